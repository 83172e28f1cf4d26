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

use prost::Message as ProstMessage;

use crate::{
    cipher::Mac,
    utilities::{base64_decode, base64_encode, VarInt},
    Curve25519PublicKey, DecodeError,
};

const VERSION: u8 = 3;

/// An encrypted Olm message.
///
/// Contains metadata that is required to find the correct ratchet state of
/// a [`Session`] necessary to decrypt the message.
///
/// [`Session`]: crate::olm::Session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The public part of the ratchet key of the other side, which was used
    /// to encrypt this message.
    pub ratchet_key: Curve25519PublicKey,
    /// The index of the message in the chain.
    pub chain_index: u64,
    /// The ciphertext of the message.
    pub ciphertext: Vec<u8>,
    pub(crate) mac: [u8; Mac::TRUNCATED_LEN],
}

impl Message {
    pub(crate) fn new(
        ratchet_key: Curve25519PublicKey,
        chain_index: u64,
        ciphertext: Vec<u8>,
    ) -> Self {
        Self { ratchet_key, chain_index, ciphertext, mac: [0u8; Mac::TRUNCATED_LEN] }
    }

    pub(crate) fn set_mac(&mut self, mac: Mac) {
        self.mac = mac.truncate();
    }

    /// The bytes the message authentication code is computed over: the full
    /// encoded message, including the leading version byte, up to but not
    /// including the MAC itself.
    pub(crate) fn to_mac_bytes(&self) -> Vec<u8> {
        self.encode()
    }

    /// Try to decode the given byte slice as an Olm [`Message`].
    ///
    /// The expected format of the byte array is described in the
    /// [`Message::to_bytes()`] method.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::try_from(bytes)
    }

    /// Encode the `Message` as an array of bytes.
    ///
    /// Olm `Message`s consist of a one-byte version, followed by a variable
    /// length payload and a fixed length message authentication code.
    ///
    /// ```text
    /// +--------------+------------------------------------+-----------+
    /// | Version Byte | Payload Bytes                      | MAC Bytes |
    /// +--------------+------------------------------------+-----------+
    /// ```
    ///
    /// The payload uses a format based on the Protocol Buffers encoding. It
    /// consists of the following key-value pairs:
    ///
    /// **Name**   |**Tag**|**Type**|               **Meaning**
    /// :---------:|:-----:|:------:|:--------------------------------------:
    /// Ratchet-Key| 0x0A  | String |The public part of the ratchet key
    /// Chain-Index| 0x10  | Integer|The chain index, i, of the message
    /// Cipher-Text| 0x22  | String |The cipher-text, Xi, of the message
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut message = self.encode();
        message.extend(self.mac);

        message
    }

    /// Try to decode the given string as an Olm [`Message`].
    ///
    /// The string needs to be a base64 encoded byte array that follows the
    /// format described in the [`Message::to_bytes()`] method.
    pub fn from_base64(message: &str) -> Result<Self, DecodeError> {
        Self::try_from(message)
    }

    /// Encode the [`Message`] as a string.
    ///
    /// This method first calls [`Message::to_bytes()`] and then encodes the
    /// resulting byte array as a string using base64 encoding.
    pub fn to_base64(&self) -> String {
        base64_encode(self.to_bytes())
    }

    fn encode(&self) -> Vec<u8> {
        ProtoBufMessage {
            ratchet_key: self.ratchet_key.to_bytes().to_vec(),
            chain_index: self.chain_index,
            ciphertext: self.ciphertext.clone(),
        }
        .encode_manual()
    }
}

impl TryFrom<&str> for Message {
    type Error = DecodeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let decoded = base64_decode(value)?;

        Self::try_from(decoded.as_slice())
    }
}

impl TryFrom<&[u8]> for Message {
    type Error = DecodeError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let version = *value.first().ok_or(DecodeError::MissingVersion)?;

        if version != VERSION {
            Err(DecodeError::InvalidVersion(VERSION, version))
        } else if value.len() < Mac::TRUNCATED_LEN + 2 {
            Err(DecodeError::MessageTooShort(value.len()))
        } else {
            let inner = ProtoBufMessage::decode(&value[1..value.len() - Mac::TRUNCATED_LEN])?;

            let mac_slice = &value[value.len() - Mac::TRUNCATED_LEN..];

            let mut mac = [0u8; Mac::TRUNCATED_LEN];
            mac.copy_from_slice(mac_slice);

            let chain_index = inner.chain_index;
            let ciphertext = inner.ciphertext;
            let ratchet_key = Curve25519PublicKey::from_slice(&inner.ratchet_key)?;

            Ok(Message { ratchet_key, chain_index, ciphertext, mac })
        }
    }
}

#[derive(ProstMessage)]
struct ProtoBufMessage {
    #[prost(bytes, tag = "1")]
    ratchet_key: Vec<u8>,
    #[prost(uint64, tag = "2")]
    chain_index: u64,
    #[prost(bytes, tag = "4")]
    ciphertext: Vec<u8>,
}

impl ProtoBufMessage {
    const RATCHET_TAG: &'static [u8; 1] = b"\x0A";
    const INDEX_TAG: &'static [u8; 1] = b"\x10";
    const CIPHER_TAG: &'static [u8; 1] = b"\x22";

    fn encode_manual(&self) -> Vec<u8> {
        // Prost optimizes away fields with default values, which older
        // decoders can't handle, so encode the message the pedestrian way
        // instead.
        let index = self.chain_index.to_var_int();
        let ratchet_len = self.ratchet_key.len().to_var_int();
        let ciphertext_len = self.ciphertext.len().to_var_int();

        [
            [VERSION].as_ref(),
            Self::RATCHET_TAG.as_ref(),
            &ratchet_len,
            &self.ratchet_key,
            Self::INDEX_TAG.as_ref(),
            &index,
            Self::CIPHER_TAG.as_ref(),
            &ciphertext_len,
            &self.ciphertext,
        ]
        .concat()
    }
}

#[cfg(test)]
mod tests {
    use super::Message;
    use crate::Curve25519PublicKey;

    #[test]
    fn encode() {
        let message = b"\x03\n\x20ratchetkeyhereprettyplease123456\x10\x01\"\nciphertext";
        let message_mac =
            b"\x03\n\x20ratchetkeyhereprettyplease123456\x10\x01\"\nciphertextMACHEREE";

        let ratchet_key = Curve25519PublicKey::from(*b"ratchetkeyhereprettyplease123456");
        let ciphertext = b"ciphertext";

        let mut encoded = Message::new(ratchet_key, 1, ciphertext.to_vec());
        encoded.mac = *b"MACHEREE";

        assert_eq!(encoded.to_mac_bytes(), message.as_ref());
        assert_eq!(encoded.to_bytes(), message_mac.as_ref());
    }

    #[test]
    fn decode_matches_encode() {
        let ratchet_key = Curve25519PublicKey::from(*b"ratchetkeyhereprettyplease123456");

        let mut message = Message::new(ratchet_key, 2, b"ciphertext".to_vec());
        message.mac = *b"MACHEREE";

        let decoded =
            Message::from_bytes(&message.to_bytes()).expect("The message should decode");

        assert_eq!(decoded, message);
    }
}
