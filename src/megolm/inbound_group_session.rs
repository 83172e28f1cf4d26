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

use std::io::{Read, Write};

use aes::cipher::block_padding::UnpadError;
use hmac::digest::MacError;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{
    message::MegolmMessage,
    ratchet::Ratchet,
    SessionKey,
};
use crate::{
    cipher::Cipher,
    utilities::{base64_decode, pickle, unpickle, Decode, Encode, PickleDecodeError},
    DecodeError, PickleError,
};

const PICKLE_VERSION: u32 = 1;

/// Error type describing failure modes of inbound group session creation.
#[derive(Debug, Error)]
pub enum SessionKeyError {
    /// The session key wasn't valid base64.
    #[error("The session key wasn't valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The session key didn't decode to a full ratchet state.
    #[error("The session key had an invalid size, expected 128 bytes, got {0}")]
    InvalidLength(usize),
}

/// Error type describing failure modes of Megolm message decryption.
#[derive(Debug, Error)]
pub enum DecryptionError {
    /// The message authentication code of the message didn't pass
    /// validation.
    #[error("Failed decrypting Megolm message, invalid MAC: {0}")]
    InvalidMac(#[from] MacError),
    /// The ciphertext of the message wasn't padded correctly.
    #[error("Failed decrypting Megolm message, invalid padding")]
    InvalidPadding(#[from] UnpadError),
    /// The message was encrypted with a ratchet state this session no
    /// longer (or never did) have the keys for.
    #[error(
        "The message was encrypted using an unknown message index, \
        first known index {0}, index of the message {1}"
    )]
    UnknownMessageIndex(u32, u32),
    /// The message couldn't be decoded.
    #[error("The message couldn't be decoded: {0}")]
    Decode(#[from] DecodeError),
}

/// The decrypted plaintext of a [`MegolmMessage`], alongside the message
/// index it was encrypted at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    /// The decrypted plaintext of the message.
    pub plaintext: Vec<u8>,
    /// The index of the message that was used when the message was
    /// encrypted.
    pub message_index: u32,
}

/// The receiving side of a Megolm communication context.
///
/// The session tracks two ratchet states: the *initial* ratchet, frozen at
/// the point the session was created, and the *latest* ratchet, which
/// advances monotonically as messages arrive. A message at or beyond the
/// latest index advances the latest ratchet; a message between the two
/// indices is decrypted using a temporary copy of the initial ratchet, so
/// out-of-order delivery inside that window keeps working. Messages older
/// than the initial ratchet cannot be decrypted at all, which is what
/// bounds the session's view into the past.
#[derive(Debug)]
pub struct InboundGroupSession {
    initial_ratchet: Ratchet,
    latest_ratchet: Ratchet,
}

impl InboundGroupSession {
    /// Create a new inbound group session from a [`SessionKey`] export and
    /// the message index the export was made at.
    pub fn new(session_key: &SessionKey, message_index: u32) -> Result<Self, SessionKeyError> {
        let mut decoded = base64_decode(&session_key.0)?;

        if decoded.len() != Ratchet::RATCHET_LENGTH {
            let length = decoded.len();
            decoded.zeroize();

            Err(SessionKeyError::InvalidLength(length))
        } else {
            let mut ratchet = [0u8; Ratchet::RATCHET_LENGTH];
            ratchet.copy_from_slice(&decoded);
            decoded.zeroize();

            let initial_ratchet = Ratchet::from_bytes(ratchet, message_index);
            let latest_ratchet = initial_ratchet.clone();

            ratchet.zeroize();

            Ok(Self { initial_ratchet, latest_ratchet })
        }
    }

    /// The first message index this session can decrypt.
    pub const fn first_known_index(&self) -> u32 {
        self.initial_ratchet.index()
    }

    /// The latest message index the session has advanced to.
    ///
    /// This only ever grows as messages get decrypted.
    pub const fn latest_known_index(&self) -> u32 {
        self.latest_ratchet.index()
    }

    /// Permanently advance the session to the given index.
    ///
    /// This removes the ability to decrypt messages that were encrypted
    /// with a lower message index than what is given as the argument.
    ///
    /// Returns true if the ratchet has been advanced, false if the ratchet
    /// was already advanced past the given index.
    pub fn advance_to(&mut self, index: u32) -> bool {
        if self.first_known_index() < index {
            self.initial_ratchet.advance_to(index);

            if self.latest_ratchet.index() < index {
                self.latest_ratchet = self.initial_ratchet.clone();
            }

            true
        } else {
            false
        }
    }

    /// Decrypt a [`MegolmMessage`].
    ///
    /// On failure the session state is left untouched.
    pub fn decrypt(
        &mut self,
        message: &MegolmMessage,
    ) -> Result<DecryptedMessage, DecryptionError> {
        let message_index = message.message_index;

        // Pick a ratchet to use. The index differences are interpreted in a
        // signed window modulo 2^32, so the comparison stays correct across
        // counter wraparound.
        if message_index.wrapping_sub(self.latest_ratchet.index()) < (1 << 31) {
            // The message is at or beyond the latest ratchet. Advance a
            // copy and commit it only once the MAC has been verified.
            let mut ratchet = self.latest_ratchet.clone();
            ratchet.advance_to(message_index);

            let plaintext = decrypt_with(&ratchet, message)?;
            self.latest_ratchet = ratchet;

            Ok(DecryptedMessage { plaintext, message_index })
        } else if message_index.wrapping_sub(self.initial_ratchet.index()) >= (1 << 31) {
            // The index predates our initial ratchet, the key for it is
            // gone.
            Err(DecryptionError::UnknownMessageIndex(
                self.initial_ratchet.index(),
                message_index,
            ))
        } else {
            // The message lies between the two ratchets. Advance a
            // temporary copy of the initial ratchet so the session keeps
            // its ability to decrypt the other indices in this window. The
            // copy zeroizes itself when it drops.
            let mut ratchet = self.initial_ratchet.clone();
            ratchet.advance_to(message_index);

            let plaintext = decrypt_with(&ratchet, message)?;

            Ok(DecryptedMessage { plaintext, message_index })
        }
    }

    /// Serialize and encrypt the session state using the given pickle key.
    ///
    /// This is the inverse of [`InboundGroupSession::from_pickle`].
    pub fn pickle(&self, pickle_key: &[u8]) -> String {
        pickle(&Pickle::from(self), pickle_key)
    }

    /// Restore an [`InboundGroupSession`] from a pickle, decrypting it with
    /// the given pickle key.
    ///
    /// This is the inverse of [`InboundGroupSession::pickle`].
    pub fn from_pickle(pickle: &str, pickle_key: &[u8]) -> Result<Self, PickleError> {
        unpickle::<Pickle, _>(pickle, pickle_key, PICKLE_VERSION)
    }
}

fn decrypt_with(ratchet: &Ratchet, message: &MegolmMessage) -> Result<Vec<u8>, DecryptionError> {
    let cipher = Cipher::new_megolm(ratchet.as_bytes());

    cipher.verify_truncated_mac(&message.to_mac_bytes(), &message.mac)?;

    Ok(cipher.decrypt(&message.ciphertext)?)
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct RatchetPickle {
    ratchet: [u8; Ratchet::RATCHET_LENGTH],
    index: u32,
}

impl From<&Ratchet> for RatchetPickle {
    fn from(ratchet: &Ratchet) -> Self {
        Self { ratchet: *ratchet.as_bytes(), index: ratchet.index() }
    }
}

impl From<&RatchetPickle> for Ratchet {
    fn from(pickle: &RatchetPickle) -> Self {
        Ratchet::from_bytes(pickle.ratchet, pickle.index)
    }
}

impl Decode for RatchetPickle {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        Ok(RatchetPickle {
            ratchet: <[u8; Ratchet::RATCHET_LENGTH]>::decode(reader)?,
            index: u32::decode(reader)?,
        })
    }
}

impl Encode for RatchetPickle {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.ratchet.encode(writer)?;
        self.index.encode(writer)
    }
}

struct Pickle {
    version: u32,
    initial_ratchet: RatchetPickle,
    latest_ratchet: RatchetPickle,
}

impl From<&InboundGroupSession> for Pickle {
    fn from(session: &InboundGroupSession) -> Self {
        Self {
            version: PICKLE_VERSION,
            initial_ratchet: (&session.initial_ratchet).into(),
            latest_ratchet: (&session.latest_ratchet).into(),
        }
    }
}

impl Decode for Pickle {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        Ok(Pickle {
            version: u32::decode(reader)?,
            initial_ratchet: RatchetPickle::decode(reader)?,
            latest_ratchet: RatchetPickle::decode(reader)?,
        })
    }
}

impl Encode for Pickle {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.version.encode(writer)?;
        self.initial_ratchet.encode(writer)?;
        self.latest_ratchet.encode(writer)
    }
}

impl TryFrom<Pickle> for InboundGroupSession {
    type Error = PickleError;

    fn try_from(pickle: Pickle) -> Result<Self, Self::Error> {
        Ok(Self {
            initial_ratchet: (&pickle.initial_ratchet).into(),
            latest_ratchet: (&pickle.latest_ratchet).into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches2::assert_matches;

    use super::{DecryptionError, InboundGroupSession, SessionKeyError};
    use crate::{megolm::GroupSession, utilities::base64_encode, PickleError};

    #[test]
    fn session_key_validation() {
        let key = crate::megolm::SessionKey("not base64!".to_string());
        assert_matches!(InboundGroupSession::new(&key, 0), Err(SessionKeyError::Base64(_)));

        let key = crate::megolm::SessionKey(base64_encode([0u8; 64]));
        assert_matches!(
            InboundGroupSession::new(&key, 0),
            Err(SessionKeyError::InvalidLength(64))
        );
    }

    #[test]
    fn advance_inbound_session() {
        let mut session = InboundGroupSession::new(&GroupSession::new().session_key(), 0)
            .expect("A freshly exported session key should be valid");

        assert_eq!(session.first_known_index(), 0);
        assert_eq!(session.latest_known_index(), 0);

        assert!(session.advance_to(10));
        assert_eq!(session.first_known_index(), 10);
        assert_eq!(session.latest_known_index(), 10);

        assert!(!session.advance_to(10));

        assert!(session.advance_to(20));
        assert_eq!(session.first_known_index(), 20);
        assert_eq!(session.latest_known_index(), 20);
    }

    #[test]
    fn mac_failure_leaves_the_session_untouched() {
        let mut outbound = GroupSession::new();
        let mut session = InboundGroupSession::new(&outbound.session_key(), 0)
            .expect("A freshly exported session key should be valid");

        let mut message = outbound.encrypt("It's a secret to everybody");
        message.mac = [0u8; 8];

        assert_matches!(session.decrypt(&message), Err(DecryptionError::InvalidMac(_)));
        assert_eq!(session.latest_known_index(), 0);
    }

    #[test]
    fn pickle_round_trip() {
        let mut outbound = GroupSession::new();
        let mut session = InboundGroupSession::new(&outbound.session_key(), 0)
            .expect("A freshly exported session key should be valid");

        let message = outbound.encrypt("Secret number three");
        outbound.encrypt("Padding the index");
        let later_message = outbound.encrypt("Secret number five");

        session.decrypt(&later_message).expect("The message should decrypt");

        let pickle = session.pickle(b"It's a secret to everybody");
        let mut unpickled =
            InboundGroupSession::from_pickle(&pickle, b"It's a secret to everybody")
                .expect("The pickle should decode with the right key");

        assert_eq!(unpickled.first_known_index(), session.first_known_index());
        assert_eq!(unpickled.latest_known_index(), session.latest_known_index());

        let decrypted = unpickled.decrypt(&message).expect("The message should decrypt");
        assert_eq!(decrypted.plaintext, b"Secret number three");

        assert_matches!(
            InboundGroupSession::from_pickle(&pickle, b"Wrong key"),
            Err(PickleError::Decryption(_))
        );
    }
}
