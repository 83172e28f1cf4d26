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

use zeroize::Zeroize;

use super::{message::MegolmMessage, ratchet::Ratchet, SessionKey};
use crate::{cipher::Cipher, types::Ed25519Keypair, utilities::base64_encode, Ed25519PublicKey};

/// A Megolm group session represents a single sending participant in an
/// encrypted group communication context containing multiple receiving
/// parties.
///
/// A group session consists of a ratchet, used for encryption, and an
/// Ed25519 signing key pair, used for authenticity.
///
/// The receiving side of the same communication context is the
/// [`InboundGroupSession`], which a recipient constructs from the
/// [`SessionKey`] export of this session, received via a secure
/// peer-to-peer channel (e.g. an Olm channel).
///
/// [`InboundGroupSession`]: crate::megolm::InboundGroupSession
pub struct GroupSession {
    ratchet: Ratchet,
    signing_key: Ed25519Keypair,
}

impl Default for GroupSession {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupSession {
    /// Construct a new group session, with a random ratchet state and
    /// signing key pair.
    pub fn new() -> Self {
        let signing_key = Ed25519Keypair::new();
        Self { signing_key, ratchet: Ratchet::new() }
    }

    /// Return the current message index.
    ///
    /// The message index is incremented each time a message is encrypted
    /// with the group session.
    pub const fn message_index(&self) -> u32 {
        self.ratchet.index()
    }

    /// The public part of the Ed25519 key pair the session signs its
    /// messages with.
    ///
    /// Receivers which want to authenticate messages need to get hold of
    /// this key through a trusted channel, it does not travel with the
    /// [`SessionKey`].
    pub const fn public_signing_key(&self) -> Ed25519PublicKey {
        self.signing_key.public_key()
    }

    /// Encrypt the `plaintext` with the group session.
    ///
    /// The resulting ciphertext is MAC-ed, then signed with the group
    /// session's Ed25519 key pair, and the ratchet is advanced to the next
    /// message index.
    pub fn encrypt(&mut self, plaintext: impl AsRef<[u8]>) -> MegolmMessage {
        let cipher = Cipher::new_megolm(self.ratchet.as_bytes());

        let ciphertext = cipher.encrypt(plaintext.as_ref());
        let mut message = MegolmMessage::new(ciphertext, self.message_index());

        let mac = cipher.mac(&message.to_mac_bytes());
        message.mac = mac.truncate();

        let signature = self.signing_key.sign(&message.to_signature_bytes());
        message.signature = signature;

        self.ratchet.advance();

        message
    }

    /// Export the group session into a session key.
    ///
    /// The session key is the current 128-byte ratchet state in unpadded
    /// base64 form. It is only useful together with the current
    /// [`message_index()`]: a recipient needs both to construct an inbound
    /// group session which can decrypt messages from this index onwards.
    ///
    /// [`message_index()`]: GroupSession::message_index
    pub fn session_key(&self) -> SessionKey {
        let mut export = *self.ratchet.as_bytes();

        let result = base64_encode(&export);
        export.zeroize();

        SessionKey(result)
    }
}
