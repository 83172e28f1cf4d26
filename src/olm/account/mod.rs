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

mod one_time_keys;

use std::collections::HashMap;

use one_time_keys::OneTimeKeys;
use rand::thread_rng;
use thiserror::Error;
use x25519_dalek::ReusableSecret;

use super::{
    messages::PreKeyMessage,
    session::{DecryptionError, Session},
    session_keys::SessionKeys,
    shared_secret::{RemoteShared3DHSecret, Shared3DHSecret},
};
use crate::{
    types::{Curve25519Keypair, Ed25519Keypair},
    Curve25519PublicKey, Ed25519PublicKey, Ed25519Signature, KeyId,
};

const PUBLIC_MAX_ONE_TIME_KEYS: usize = 50;

/// Error describing failure modes when creating an Olm Session from an
/// incoming Olm message.
#[derive(Error, Debug)]
pub enum SessionCreationError {
    /// The pre-key message contained an unknown one-time key. This happens
    /// either because we never had such a one-time key, or because it has
    /// already been used up.
    #[error("The pre-key message contained an unknown one-time key")]
    MissingOneTimeKey,
    /// The pre-key message contains a Curve25519 identity key that doesn't
    /// match to the identity key that was given.
    #[error("The given identity key doesn't match the one in the pre-key message")]
    MismatchedIdentityKey,
    /// The pre-key message that was used to establish the Session couldn't
    /// be decrypted. The message needs to be decryptable, otherwise we will
    /// have created a Session that wasn't used to encrypt the pre-key
    /// message.
    #[error("The message that was used to establish the Session couldn't be decrypted")]
    Decryption(#[from] DecryptionError),
}

/// Struct holding the two public identity keys of an [`Account`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentityKeys {
    /// The Ed25519 key, used for signing.
    pub ed25519: Ed25519PublicKey,
    /// The Curve25519 key, used to establish shared secrets.
    pub curve25519: Curve25519PublicKey,
}

/// Return type for the creation of inbound [`Session`] objects.
#[derive(Debug)]
pub struct InboundCreationResult {
    /// The [`Session`] that was created from a pre-key message.
    pub session: Session,
    /// The plaintext of the pre-key message.
    pub plaintext: Vec<u8>,
}

/// An Olm account manages all cryptographic keys used on a device.
pub struct Account {
    /// A permanent Ed25519 key used for signing. Also known as the
    /// fingerprint key.
    signing_key: Ed25519Keypair,
    /// The permanent Curve25519 key used for 3DH. Also known as the sender
    /// key or the identity key.
    diffie_hellman_key: Curve25519Keypair,
    /// The ephemeral (one-time) Curve25519 keys used as part of the 3DH.
    one_time_keys: OneTimeKeys,
}

impl Account {
    /// Create a new Account with new random identity keys.
    pub fn new() -> Self {
        Self {
            signing_key: Ed25519Keypair::new(),
            diffie_hellman_key: Curve25519Keypair::new(),
            one_time_keys: OneTimeKeys::new(),
        }
    }

    /// Get the IdentityKeys of this Account.
    pub fn identity_keys(&self) -> IdentityKeys {
        IdentityKeys { ed25519: self.ed25519_key(), curve25519: *self.curve25519_key() }
    }

    /// Get a reference to the account's public Ed25519 key.
    pub fn ed25519_key(&self) -> Ed25519PublicKey {
        self.signing_key.public_key()
    }

    /// Get a reference to the account's public Curve25519 key.
    pub fn curve25519_key(&self) -> &Curve25519PublicKey {
        self.diffie_hellman_key.public_key()
    }

    /// Sign the given message using our Ed25519 fingerprint key.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        self.signing_key.sign(message)
    }

    /// Get the maximum number of one-time keys the client should keep on
    /// the server.
    ///
    /// The account itself can store more keys than this: a client might
    /// receive the count of uploaded keys from the server before it
    /// receives all the pre-key messages that used some of them, so
    /// forgetting private keys as soon as new ones are generated would
    /// break those sessions.
    pub const fn max_number_of_one_time_keys(&self) -> usize {
        PUBLIC_MAX_ONE_TIME_KEYS
    }

    /// Generate the given number of one-time keys.
    pub fn generate_one_time_keys(&mut self, count: usize) {
        self.one_time_keys.generate(count)
    }

    /// Get the currently unpublished one-time keys.
    ///
    /// The one-time keys should be published to a server and marked as
    /// published using the [`Account::mark_keys_as_published()`] method.
    pub fn one_time_keys(&self) -> HashMap<KeyId, Curve25519PublicKey> {
        self.one_time_keys.unpublished_keys().iter().map(|(&k, &v)| (k, v)).collect()
    }

    /// Mark all currently unpublished one-time keys as published.
    pub fn mark_keys_as_published(&mut self) {
        self.one_time_keys.mark_as_published();
    }

    /// Remove a one-time key that has previously been published but not yet
    /// used.
    ///
    /// **Note**: This function is only rarely useful and you'll know if you
    /// need it. Notably, you do *not* need to call it manually when using up
    /// a key via [`Account::create_inbound_session`] since the key is
    /// automatically removed in that case.
    pub fn remove_one_time_key(&mut self, public_key: &Curve25519PublicKey) -> bool {
        self.one_time_keys.remove_secret_key(public_key).is_some()
    }

    /// Create a [`Session`] with the given identity key and one-time key of
    /// the other side.
    pub fn create_outbound_session(
        &self,
        identity_key: Curve25519PublicKey,
        one_time_key: Curve25519PublicKey,
    ) -> Session {
        let rng = thread_rng();

        let base_key = ReusableSecret::random_from_rng(rng);
        let public_base_key = Curve25519PublicKey::from(&base_key);

        let shared_secret = Shared3DHSecret::new(
            self.diffie_hellman_key.secret_key(),
            &base_key,
            &identity_key,
            &one_time_key,
        );

        let session_keys = SessionKeys {
            identity_key: *self.curve25519_key(),
            base_key: public_base_key,
            one_time_key,
        };

        Session::new(shared_secret, session_keys)
    }

    /// Create a [`Session`] from the given pre-key message and identity key
    /// of the other side.
    ///
    /// The message is decrypted as part of the session creation: a session
    /// is only handed out if the message was actually encrypted for it. The
    /// one-time key the message used up is removed from the account.
    pub fn create_inbound_session(
        &mut self,
        their_identity_key: &Curve25519PublicKey,
        pre_key_message: &PreKeyMessage,
    ) -> Result<InboundCreationResult, SessionCreationError> {
        if their_identity_key != &pre_key_message.identity_key() {
            Err(SessionCreationError::MismatchedIdentityKey)
        } else {
            // Find the matching private key that the message claims was
            // used to create the session that encrypted it.
            let one_time_key = self
                .one_time_keys
                .get_secret_key(&pre_key_message.one_time_key())
                .ok_or(SessionCreationError::MissingOneTimeKey)?;

            // Construct a 3DH shared secret from the various Curve25519
            // keys.
            let shared_secret = RemoteShared3DHSecret::new(
                self.diffie_hellman_key.secret_key(),
                one_time_key,
                &pre_key_message.identity_key(),
                &pre_key_message.base_key(),
            );

            // These will be used to uniquely identify the Session.
            let session_keys = SessionKeys {
                identity_key: pre_key_message.identity_key(),
                base_key: pre_key_message.base_key(),
                one_time_key: pre_key_message.one_time_key(),
            };

            // Create a Session, AKA a double ratchet, this one will have an
            // inactive sending chain until we decide to encrypt a message.
            let mut session = Session::new_remote(
                shared_secret,
                pre_key_message.message().ratchet_key,
                session_keys,
            );

            // Decrypt the message to check if the Session is actually
            // valid.
            let plaintext = session.decrypt_decoded(pre_key_message.message())?;

            // We only drop the one-time key now, this is why we can't use a
            // one-time key twice.
            self.one_time_keys.remove_secret_key(&pre_key_message.one_time_key());

            Ok(InboundCreationResult { session, plaintext })
        }
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use assert_matches2::assert_matches;

    use super::{Account, InboundCreationResult, SessionCreationError};
    use crate::olm::OlmMessage;

    #[test]
    fn one_time_keys_can_be_generated_and_published() {
        let mut account = Account::new();

        account.generate_one_time_keys(account.max_number_of_one_time_keys());
        assert_eq!(account.one_time_keys().len(), account.max_number_of_one_time_keys());

        account.mark_keys_as_published();
        assert!(account.one_time_keys().is_empty());
    }

    #[test]
    fn used_one_time_keys_are_consumed() -> Result<()> {
        let alice = Account::new();
        let mut bob = Account::new();

        bob.generate_one_time_keys(1);
        let one_time_key = *bob.one_time_keys().values().next().expect("We just made a key");

        let mut alice_session =
            alice.create_outbound_session(*bob.curve25519_key(), one_time_key);

        let message = alice_session.encrypt("It's a secret to everybody");

        if let OlmMessage::PreKey(message) = message {
            let InboundCreationResult { .. } =
                bob.create_inbound_session(alice.curve25519_key(), &message)?;

            // The same pre-key message can't be used to create a second
            // session, the one-time key is gone.
            assert_matches!(
                bob.create_inbound_session(alice.curve25519_key(), &message),
                Err(SessionCreationError::MissingOneTimeKey)
            );
        } else {
            anyhow::bail!("Invalid message type");
        }

        Ok(())
    }

    #[test]
    fn mismatched_identity_keys_are_rejected() -> Result<()> {
        let alice = Account::new();
        let eve = Account::new();
        let mut bob = Account::new();

        bob.generate_one_time_keys(1);
        let one_time_key = *bob.one_time_keys().values().next().expect("We just made a key");

        let mut alice_session =
            alice.create_outbound_session(*bob.curve25519_key(), one_time_key);

        let message = alice_session.encrypt("It's a secret to everybody");

        if let OlmMessage::PreKey(message) = message {
            assert_matches!(
                bob.create_inbound_session(eve.curve25519_key(), &message),
                Err(SessionCreationError::MismatchedIdentityKey)
            );

            // The failed attempt didn't consume the one-time key, the
            // honest session can still be created.
            bob.create_inbound_session(alice.curve25519_key(), &message)?;
        } else {
            anyhow::bail!("Invalid message type");
        }

        Ok(())
    }
}
