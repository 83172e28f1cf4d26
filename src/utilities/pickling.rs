// Copyright 2025 The moceril contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The binary pickle codec.
//!
//! Pickles are byte strings consisting of the pickled fields in declaration
//! order: `u8` and `bool` take a single byte, `u32` four bytes in big endian
//! encoding, byte arrays are inlined at their fixed lengths, and sequences
//! are prefixed with their element count as a big endian `u32`. Every
//! pickled structure starts with a `u32` pickle version identifying its
//! schema.
//!
//! The raw pickle is never exposed: it is encrypted with a key derived from
//! a caller-supplied passphrase, authenticated with a truncated
//! HMAC-SHA-256, and encoded as padded base64.

use std::io::{Cursor, Read, Write};

use thiserror::Error;
use zeroize::Zeroize;

use super::{base64_decode_padded, base64_encode_padded};
use crate::{cipher::Cipher, PickleError};

/// Error type describing failure modes of the structural pickle decoding.
#[derive(Debug, Error)]
pub enum PickleDecodeError {
    /// There was an error while reading from the pickle source, usually not
    /// enough data was provided.
    #[error(transparent)]
    IO(#[from] std::io::Error),
    /// The encoded sequence length doesn't fit into the usize of the
    /// architecture that is decoding.
    #[error(
        "The decoded value {0} does not fit into the usize type of this \
         architecture"
    )]
    OutsideUsizeRange(u64),
}

/// Serialize and encrypt a pickleable structure using the given pickle key.
///
/// The pickle key may be of arbitrary length, it gets run through a key
/// derivation function before use.
pub(crate) fn pickle<T: Encode>(thing: &T, pickle_key: &[u8]) -> String {
    let mut payload = Vec::new();

    thing
        .encode(&mut payload)
        .expect("Writing a pickle to an in-memory buffer should never fail");

    let cipher = Cipher::new_pickle(pickle_key);
    let ciphertext = cipher.encrypt_pickle(&payload);

    payload.zeroize();

    base64_encode_padded(ciphertext)
}

/// Decrypt and decode the given pickle with the given pickle key.
///
/// # Arguments
///
/// * pickle - The base64-encoded and encrypted pickle string
/// * pickle_key - The key that was used to encrypt the pickle
/// * pickle_version - The expected version of the pickle. Unpickling will
///   fail if the version in the pickle doesn't match this one.
pub(crate) fn unpickle<P: Decode, T: TryFrom<P, Error = PickleError>>(
    pickle: &str,
    pickle_key: &[u8],
    pickle_version: u32,
) -> Result<T, PickleError> {
    /// Fetch the pickle version from the given pickle source.
    fn get_version(source: &[u8]) -> Option<u32> {
        // Pickle versions are always u32 encoded as a fixed sized integer in
        // big endian encoding.
        let version = source.get(0..4)?;
        Some(u32::from_be_bytes(version.try_into().ok()?))
    }

    // Pickles are always base64 encoded, so first try to decode.
    let decoded = base64_decode_padded(pickle)?;

    // The pickle is always encrypted, even if a zero key is given. Try to
    // decrypt next.
    let cipher = Cipher::new_pickle(pickle_key);
    let mut decrypted = cipher.decrypt_pickle(&decoded)?;

    // A pickle starts with a version, which will decide how we need to
    // decode. We only support the latest version so bail out if it isn't the
    // expected pickle version.
    let version = get_version(&decrypted).ok_or(PickleError::MissingVersion)?;

    let result = if version == pickle_version {
        let mut cursor = Cursor::new(decrypted.as_slice());
        let pickle = P::decode(&mut cursor);

        match pickle {
            // Leftover bytes mean the input wasn't a pickle of the expected
            // structure after all.
            Ok(_) if cursor.position() != decrypted.len() as u64 => Err(PickleError::Corrupted),
            Ok(pickle) => pickle.try_into(),
            Err(e) => Err(e.into()),
        }
    } else {
        Err(PickleError::Version(pickle_version, version))
    };

    decrypted.zeroize();

    result
}

/// A trait for decoding non-secret values out of a binary pickle.
///
/// The decoding scheme is almost exactly the same as what the [bincode]
/// crate produces with the following config:
/// ```rust,compile_fail
/// let config = bincode::config::standard()
///     .with_big_endian()
///     .with_fixed_int_encoding()
///     .skip_fixed_array_length();
/// ```
///
/// The one difference is that bincode uses u64 to encode slice lengths while
/// this format uses u32.
///
/// For decoding values which are meant to be secret, see [`DecodeSecret`].
///
/// [bincode]: https://github.com/bincode-org/bincode/
pub(crate) trait Decode {
    /// Try to read and decode a non-secret value from the given reader which
    /// is reading from a binary pickle.
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError>
    where
        Self: Sized;
}

/// Like [`Decode`], but for decoding secret values.
///
/// Unlike `Decode`, this trait allocates the buffer for the target value on
/// the heap and returns it in a `Box`. This reduces the number of
/// inadvertent copies made when the value is moved, allowing the value to be
/// properly zeroized.
pub(crate) trait DecodeSecret {
    /// Try to read and decode a secret value from the given reader which is
    /// reading from a binary pickle.
    fn decode_secret(reader: &mut impl Read) -> Result<Box<Self>, PickleDecodeError>
    where
        Self: Sized;
}

/// The encoding counterpart of [`Decode`], writing values into a binary
/// pickle.
pub(crate) trait Encode {
    /// Encode the value into the given writer.
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error>;
}

impl Decode for u8 {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        let mut buffer = [0u8; 1];

        reader.read_exact(&mut buffer)?;

        Ok(buffer[0])
    }
}

impl Decode for bool {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        let value = u8::decode(reader)?;

        Ok(value != 0)
    }
}

impl Decode for u32 {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        let mut buffer = [0u8; 4];
        reader.read_exact(&mut buffer)?;

        Ok(u32::from_be_bytes(buffer))
    }
}

impl Decode for usize {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        let size = u32::decode(reader)?;

        size.try_into().map_err(|_| PickleDecodeError::OutsideUsizeRange(size.into()))
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        let mut buffer = [0u8; N];
        reader.read_exact(&mut buffer)?;

        Ok(buffer)
    }
}

impl<const N: usize> DecodeSecret for [u8; N] {
    fn decode_secret(reader: &mut impl Read) -> Result<Box<Self>, PickleDecodeError> {
        let mut buffer = Box::new([0u8; N]);
        reader.read_exact(buffer.as_mut_slice())?;

        Ok(buffer)
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        let length = usize::decode(reader)?;

        let mut buffer = Vec::with_capacity(length.min(1024));

        for _ in 0..length {
            let element = T::decode(reader)?;
            buffer.push(element);
        }

        Ok(buffer)
    }
}

impl Encode for u8 {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        writer.write_all(&[*self])
    }
}

impl Encode for bool {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        u8::from(*self).encode(writer)
    }
}

impl Encode for u32 {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        writer.write_all(&self.to_be_bytes())
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        writer.write_all(self)
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        let length = u32::try_from(self.len())
            .map_err(|_| std::io::Error::other("Sequence length overflows the u32 prefix"))?;

        length.encode(writer)?;

        for element in self {
            element.encode(writer)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{Decode, Encode};

    #[test]
    fn sequence_round_trip() {
        let values: Vec<[u8; 4]> = vec![*b"abcd", *b"efgh"];

        let mut encoded = Vec::new();
        values.encode(&mut encoded).expect("Encoding into a Vec should succeed");

        assert_eq!(&encoded[0..4], [0, 0, 0, 2], "The length prefix should be big endian");

        let decoded =
            Vec::<[u8; 4]>::decode(&mut Cursor::new(&encoded)).expect("The sequence should decode");

        assert_eq!(values, decoded);
    }

    #[test]
    fn truncated_input_fails() {
        let mut encoded = Vec::new();
        42u32.encode(&mut encoded).expect("Encoding into a Vec should succeed");

        <[u8; 8]>::decode(&mut Cursor::new(&encoded))
            .expect_err("Decoding more bytes than available should fail");
    }
}
