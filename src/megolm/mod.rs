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

//! An implementation of the Megolm group ratchet.
//!
//! Megolm provides encrypted communication from a single sender to a group
//! of recipients. The sender side is represented by a [`GroupSession`],
//! which owns the ratchet and an Ed25519 signing key pair. Each recipient
//! constructs an [`InboundGroupSession`] from the sender's exported
//! [`SessionKey`] and the message index the export was made at.
//!
//! The ratchet only moves forward: a recipient who joins at message index
//! `n` can decrypt messages with index `n` or greater, in any order, but
//! never anything older.

mod group_session;
mod inbound_group_session;
mod message;
mod ratchet;

pub use group_session::GroupSession;
pub use inbound_group_session::{
    DecryptedMessage, DecryptionError, InboundGroupSession, SessionKeyError,
};
pub use message::MegolmMessage;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The exported state of a Megolm ratchet, the 128-byte ratchet value in
/// unpadded base64 form.
///
/// A session key is only valid for the message index the ratchet was at
/// when it was exported; the index travels alongside the key, out of band.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey(pub String);

impl SessionKey {
    /// Access the session key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::{GroupSession, InboundGroupSession};

    #[test]
    fn round_trip() -> Result<()> {
        let mut session = GroupSession::new();
        let mut inbound = InboundGroupSession::new(&session.session_key(), 0)?;

        let plaintext = "It's a secret to everybody";
        let message = session.encrypt(plaintext);

        let decrypted = inbound.decrypt(&message)?;

        assert_eq!(decrypted.plaintext, plaintext.as_bytes());
        assert_eq!(decrypted.message_index, 0);

        let plaintext = "Another secret";
        let message = session.encrypt(plaintext);

        let decrypted = inbound.decrypt(&message)?;

        assert_eq!(decrypted.plaintext, plaintext.as_bytes());
        assert_eq!(decrypted.message_index, 1);

        Ok(())
    }

    #[test]
    fn decrypting_a_distant_message() -> Result<()> {
        let mut session = GroupSession::new();
        let mut inbound = InboundGroupSession::new(&session.session_key(), 0)?;

        let plaintext = "Last secret";

        for _ in 0..2000 {
            session.encrypt(plaintext);
        }

        let message = session.encrypt(plaintext);
        let decrypted = inbound.decrypt(&message)?;

        assert_eq!(decrypted.plaintext, plaintext.as_bytes());
        assert_eq!(decrypted.message_index, 2000);

        Ok(())
    }

    #[test]
    fn joining_the_session_late() -> Result<()> {
        let mut session = GroupSession::new();

        let early_message = session.encrypt("Before the export");

        let session_key = session.session_key();
        let mut inbound = InboundGroupSession::new(&session_key, session.message_index())?;

        inbound
            .decrypt(&early_message)
            .expect_err("Messages before the export point shouldn't decrypt");

        let message = session.encrypt("After the export");
        let decrypted = inbound.decrypt(&message)?;

        assert_eq!(decrypted.plaintext, b"After the export");
        assert_eq!(decrypted.message_index, 1);

        Ok(())
    }
}
