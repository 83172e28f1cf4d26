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

mod chain_key;
mod double_ratchet;
mod message_key;
mod ratchet;
mod receiver_chain;
mod root_key;

use std::io::{Read, Write};

use aes::cipher::block_padding::UnpadError;
use arrayvec::ArrayVec;
use chain_key::{ChainKey, RemoteChainKey};
use double_ratchet::{DoubleRatchet, SenderChainPickle};
use hmac::digest::MacError;
use message_key::RemoteMessageKey;
use ratchet::{Ratchet, RatchetKey, RemoteRatchetKey};
use receiver_chain::ReceiverChain;
use root_key::{RemoteRootKey, RootKey};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{
    messages::{Message, OlmMessage, PreKeyMessage},
    session_keys::SessionKeys,
    shared_secret::{RemoteShared3DHSecret, Shared3DHSecret},
};
use crate::{
    types::Curve25519SecretKey,
    utilities::{pickle, unpickle, Decode, DecodeSecret, Encode, PickleDecodeError},
    Curve25519PublicKey, DecodeError, PickleError,
};

const MAX_RECEIVING_CHAINS: usize = 5;
const PICKLE_VERSION: u32 = 1;

#[derive(Clone, Default)]
struct ChainStore {
    inner: ArrayVec<ReceiverChain, MAX_RECEIVING_CHAINS>,
}

impl ChainStore {
    fn new() -> Self {
        Self { inner: ArrayVec::new() }
    }

    fn push(&mut self, ratchet: ReceiverChain) {
        if self.inner.is_full() {
            self.inner.pop_at(0);
        }

        self.inner.push(ratchet)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn last(&self) -> Option<&ReceiverChain> {
        self.inner.last()
    }

    fn find_ratchet(&mut self, ratchet_key: &RemoteRatchetKey) -> Option<&mut ReceiverChain> {
        self.inner.iter_mut().find(|r| r.belongs_to(ratchet_key))
    }
}

/// Error type describing the failure modes of Olm message decryption.
#[derive(Error, Debug)]
pub enum DecryptionError {
    /// The message authentication code of the message didn't pass
    /// validation.
    #[error("Failed decrypting Olm message, invalid MAC: {0}")]
    InvalidMac(#[from] MacError),
    /// The ciphertext of the message wasn't padded correctly.
    #[error("Failed decrypting Olm message, invalid padding")]
    InvalidPadding(#[from] UnpadError),
    /// The message key for the given chain index has already been used up
    /// or was never derived.
    #[error("The message key with the given key can't be created, message index: {0}")]
    MissingMessageKey(u64),
    /// The message skips over more indices than the session is willing to
    /// derive in one step.
    #[error("The message gap was too big, got {0}, max allowed {1}")]
    TooBigMessageGap(u64, u64),
    /// The message couldn't be decoded.
    #[error("The message couldn't be decoded: {0}")]
    Decode(#[from] DecodeError),
}

/// An Olm session represents one end of an encrypted communication channel
/// between two participants.
///
/// A session enables the session owner to encrypt messages intended for,
/// and decrypt messages sent by, the other participant of the channel.
///
/// Olm sessions have two important properties:
///
/// 1. They are based on a double ratchet algorithm which continuously
///    introduces new entropy into the channel as messages are sent and
///    received. This imbues the channel with *self-healing* properties,
///    allowing it to recover from a momentary loss of confidentiality in
///    the event of a key compromise.
/// 2. They are *asynchronous*, allowing the participant to start sending
///    messages to the other side even if the other participant is not
///    online at the moment.
///
/// An Olm [`Session`] is acquired from an [`Account`], by calling either
///
/// - [`Account::create_outbound_session`], if you are the first participant
///   to send a message in this channel, or
/// - [`Account::create_inbound_session`], if the other participant
///   initiated the channel by sending you a message.
///
/// [`Account`]: crate::olm::Account
/// [`Account::create_outbound_session`]: crate::olm::Account::create_outbound_session
/// [`Account::create_inbound_session`]: crate::olm::Account::create_inbound_session
pub struct Session {
    session_keys: SessionKeys,
    sending_ratchet: DoubleRatchet,
    receiving_chains: ChainStore,
    /// Whether we ever received and decrypted a message from the other
    /// side. Until that happens every message we send carries the pre-key
    /// envelope; once set, the flag never reverts.
    received_message: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("session_id", &self.session_id()).finish_non_exhaustive()
    }
}

impl Session {
    pub(super) fn new(shared_secret: Shared3DHSecret, session_keys: SessionKeys) -> Self {
        let local_ratchet = DoubleRatchet::active(shared_secret);

        Self {
            session_keys,
            sending_ratchet: local_ratchet,
            receiving_chains: Default::default(),
            received_message: false,
        }
    }

    pub(super) fn new_remote(
        shared_secret: RemoteShared3DHSecret,
        remote_ratchet_key: Curve25519PublicKey,
        session_keys: SessionKeys,
    ) -> Self {
        let (root_key, remote_chain_key) = shared_secret.expand();

        let remote_ratchet_key = RemoteRatchetKey::from(remote_ratchet_key);
        let root_key = RemoteRootKey::new(root_key);
        let remote_chain_key = RemoteChainKey::new(remote_chain_key);

        let local_ratchet = DoubleRatchet::inactive(root_key, remote_ratchet_key);
        let remote_ratchet = ReceiverChain::new(remote_ratchet_key, remote_chain_key);

        let mut ratchet_store = ChainStore::new();
        ratchet_store.push(remote_ratchet);

        Self {
            session_keys,
            sending_ratchet: local_ratchet,
            receiving_chains: ratchet_store,
            received_message: false,
        }
    }

    /// Returns the globally unique session ID, in base64-encoded form.
    ///
    /// A session ID is the SHA-256 of the concatenation of the account's
    /// identity key, an ephemeral base key and the one-time key which was
    /// used to establish the session. Due to the construction, every
    /// session ID is (probabilistically) globally unique.
    pub fn session_id(&self) -> String {
        self.session_keys.session_id()
    }

    /// The collection of keys that were used to establish this session.
    pub const fn session_keys(&self) -> SessionKeys {
        self.session_keys
    }

    /// Have we ever received and decrypted a message from the other side?
    ///
    /// Used to decide if outgoing messages should be sent as normal or
    /// pre-key messages.
    pub const fn has_received_message(&self) -> bool {
        self.received_message
    }

    /// Check if the given pre-key message was encrypted for this session.
    ///
    /// A pre-key message matches this session if the establishment keys it
    /// carries are the ones this session was created from. The comparison
    /// runs in constant time.
    ///
    /// This is used to deduplicate sessions: if a new pre-key message
    /// matches an existing session there is no need to create a new one.
    pub fn matches_inbound_session(
        &self,
        their_identity_key: Option<Curve25519PublicKey>,
        message: &PreKeyMessage,
    ) -> bool {
        let session_keys = message.session_keys();

        let mut matches = session_keys
            .identity_key
            .as_bytes()
            .ct_eq(self.session_keys.identity_key.as_bytes())
            & session_keys.base_key.as_bytes().ct_eq(self.session_keys.base_key.as_bytes())
            & session_keys
                .one_time_key
                .as_bytes()
                .ct_eq(self.session_keys.one_time_key.as_bytes());

        if let Some(identity_key) = their_identity_key {
            matches &= identity_key.as_bytes().ct_eq(self.session_keys.identity_key.as_bytes());
        }

        matches.into()
    }

    /// Encrypt the `plaintext` and construct an [`OlmMessage`].
    ///
    /// The message will either be a pre-key message or a normal message,
    /// depending on whether the session is fully established. A session is
    /// fully established once you receive (and decrypt) at least one
    /// message from the other side.
    pub fn encrypt(&mut self, plaintext: impl AsRef<[u8]>) -> OlmMessage {
        let message = self.sending_ratchet.encrypt(plaintext.as_ref());

        if self.received_message {
            OlmMessage::Normal(message)
        } else {
            OlmMessage::PreKey(PreKeyMessage::new(self.session_keys, message))
        }
    }

    /// Try to decrypt an Olm message, which will either return the
    /// plaintext or result in a [`DecryptionError`].
    ///
    /// On failure the session state is left untouched.
    pub fn decrypt(&mut self, message: &OlmMessage) -> Result<Vec<u8>, DecryptionError> {
        let decrypted = match message {
            OlmMessage::Normal(m) => self.decrypt_decoded(m)?,
            OlmMessage::PreKey(m) => self.decrypt_decoded(&m.message)?,
        };

        Ok(decrypted)
    }

    pub(super) fn decrypt_decoded(
        &mut self,
        message: &Message,
    ) -> Result<Vec<u8>, DecryptionError> {
        let ratchet_key = RemoteRatchetKey::from(message.ratchet_key);

        let plaintext = if let Some(ratchet) = self.receiving_chains.find_ratchet(&ratchet_key) {
            ratchet.decrypt(message)?
        } else {
            // The message points to a ratchet key we don't have a receiving
            // chain for, so the other side has advanced the DH ratchet.
            // Advance our side on copies and only install them once the
            // message has been authenticated.
            let (sending_ratchet, mut remote_ratchet) = self.sending_ratchet.advance(ratchet_key);

            let plaintext = remote_ratchet.decrypt(message)?;

            self.sending_ratchet = sending_ratchet;
            self.receiving_chains.push(remote_ratchet);

            plaintext
        };

        self.received_message = true;

        Ok(plaintext)
    }

    /// Serialize and encrypt the session state using the given pickle key.
    ///
    /// This is the inverse of [`Session::from_pickle`].
    pub fn pickle(&self, pickle_key: &[u8]) -> String {
        pickle(&Pickle::from(self), pickle_key)
    }

    /// Restore a [`Session`] from a pickle, decrypting it with the given
    /// pickle key.
    ///
    /// This is the inverse of [`Session::pickle`].
    pub fn from_pickle(pickle: &str, pickle_key: &[u8]) -> Result<Self, PickleError> {
        unpickle::<Pickle, _>(pickle, pickle_key, PICKLE_VERSION)
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct PickledSenderChain {
    public_ratchet_key: [u8; 32],
    secret_ratchet_key: Box<[u8; 32]>,
    chain_key: Box<[u8; 32]>,
    chain_key_index: u32,
}

impl Decode for PickledSenderChain {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        Ok(Self {
            public_ratchet_key: <[u8; 32]>::decode(reader)?,
            secret_ratchet_key: <[u8; 32]>::decode_secret(reader)?,
            chain_key: <[u8; 32]>::decode_secret(reader)?,
            chain_key_index: u32::decode(reader)?,
        })
    }
}

impl Encode for PickledSenderChain {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.public_ratchet_key.encode(writer)?;
        self.secret_ratchet_key.encode(writer)?;
        self.chain_key.encode(writer)?;
        self.chain_key_index.encode(writer)
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct PickledReceiverChain {
    ratchet_key: [u8; 32],
    chain_key: Box<[u8; 32]>,
    chain_key_index: u32,
}

impl Decode for PickledReceiverChain {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        Ok(Self {
            ratchet_key: <[u8; 32]>::decode(reader)?,
            chain_key: <[u8; 32]>::decode_secret(reader)?,
            chain_key_index: u32::decode(reader)?,
        })
    }
}

impl Encode for PickledReceiverChain {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.ratchet_key.encode(writer)?;
        self.chain_key.encode(writer)?;
        self.chain_key_index.encode(writer)
    }
}

impl From<&PickledReceiverChain> for ReceiverChain {
    fn from(chain: &PickledReceiverChain) -> Self {
        let ratchet_key = RemoteRatchetKey::from(chain.ratchet_key);
        let chain_key =
            RemoteChainKey::from_bytes_and_index(chain.chain_key.clone(), chain.chain_key_index);

        ReceiverChain::new(ratchet_key, chain_key)
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct PickledMessageKey {
    ratchet_key: [u8; 32],
    message_key: Box<[u8; 32]>,
    index: u32,
}

impl Decode for PickledMessageKey {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        Ok(Self {
            ratchet_key: <[u8; 32]>::decode(reader)?,
            message_key: <[u8; 32]>::decode_secret(reader)?,
            index: u32::decode(reader)?,
        })
    }
}

impl Encode for PickledMessageKey {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.ratchet_key.encode(writer)?;
        self.message_key.encode(writer)?;
        self.index.encode(writer)
    }
}

impl From<&PickledMessageKey> for RemoteMessageKey {
    fn from(key: &PickledMessageKey) -> Self {
        RemoteMessageKey { key: key.message_key.clone(), index: key.index.into() }
    }
}

struct Pickle {
    version: u32,
    received_message: bool,
    session_keys: SessionKeys,
    root_key: Box<[u8; 32]>,
    sender_chains: Vec<PickledSenderChain>,
    receiver_chains: Vec<PickledReceiverChain>,
    message_keys: Vec<PickledMessageKey>,
}

impl Drop for Pickle {
    fn drop(&mut self) {
        self.root_key.zeroize();
    }
}

impl From<&Session> for Pickle {
    fn from(session: &Session) -> Self {
        let (root_key, sender_chain) = session.sending_ratchet.pickle_parts();

        let sender_chains = sender_chain
            .into_iter()
            .map(|chain: SenderChainPickle| PickledSenderChain {
                public_ratchet_key: chain.public_ratchet_key,
                secret_ratchet_key: chain.secret_ratchet_key,
                chain_key: chain.chain_key,
                chain_key_index: chain.chain_key_index,
            })
            .collect();

        let mut receiver_chains = Vec::new();
        let mut message_keys = Vec::new();

        for chain in session.receiving_chains.inner.iter() {
            let ratchet_key = *chain.ratchet_key().as_ref().as_bytes();

            receiver_chains.push(PickledReceiverChain {
                ratchet_key,
                chain_key: chain.chain_key().as_bytes().clone(),
                chain_key_index: chain.chain_key().chain_index() as u32,
            });

            for key in chain.skipped_message_keys().iter() {
                message_keys.push(PickledMessageKey {
                    ratchet_key,
                    message_key: key.key.clone(),
                    index: key.index as u32,
                });
            }
        }

        Self {
            version: PICKLE_VERSION,
            received_message: session.received_message,
            session_keys: session.session_keys,
            root_key,
            sender_chains,
            receiver_chains,
            message_keys,
        }
    }
}

impl Decode for Pickle {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        Ok(Self {
            version: u32::decode(reader)?,
            received_message: bool::decode(reader)?,
            session_keys: SessionKeys::decode(reader)?,
            root_key: <[u8; 32]>::decode_secret(reader)?,
            sender_chains: Vec::decode(reader)?,
            receiver_chains: Vec::decode(reader)?,
            message_keys: Vec::decode(reader)?,
        })
    }
}

impl Encode for Pickle {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.version.encode(writer)?;
        self.received_message.encode(writer)?;
        self.session_keys.encode(writer)?;
        self.root_key.encode(writer)?;
        self.sender_chains.encode(writer)?;
        self.receiver_chains.encode(writer)?;
        self.message_keys.encode(writer)
    }
}

impl TryFrom<Pickle> for Session {
    type Error = PickleError;

    fn try_from(pickle: Pickle) -> Result<Self, Self::Error> {
        let mut receiving_chains = ChainStore::new();

        for chain in &pickle.receiver_chains {
            receiving_chains.push(chain.into())
        }

        for key in &pickle.message_keys {
            let ratchet_key = RemoteRatchetKey::from(key.ratchet_key);

            if let Some(receiving_chain) = receiving_chains.find_ratchet(&ratchet_key) {
                receiving_chain.insert_message_key(key.into())
            }
        }

        if let Some(chain) = pickle.sender_chains.first() {
            let ratchet_key =
                RatchetKey::from(Curve25519SecretKey::from_slice(&chain.secret_ratchet_key));
            let chain_key =
                ChainKey::from_bytes_and_index(chain.chain_key.clone(), chain.chain_key_index);

            let root_key = RootKey::new(pickle.root_key.clone());

            let ratchet = Ratchet::new_with_ratchet_key(root_key, ratchet_key);
            let sending_ratchet = DoubleRatchet::from_ratchet_and_chain_key(ratchet, chain_key);

            Ok(Self {
                session_keys: pickle.session_keys,
                sending_ratchet,
                receiving_chains,
                received_message: pickle.received_message,
            })
        } else if let Some(chain) = receiving_chains.last() {
            // Without a sending chain the ratchet is inactive, waiting for
            // our next encrypt to advance it against the newest receiving
            // chain.
            let sending_ratchet =
                DoubleRatchet::inactive(RemoteRootKey::new(pickle.root_key.clone()), chain.ratchet_key());

            Ok(Self {
                session_keys: pickle.session_keys,
                sending_ratchet,
                receiving_chains,
                received_message: pickle.received_message,
            })
        } else {
            Err(PickleError::InvalidSession)
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use assert_matches2::assert_matches;

    use super::{DecryptionError, Session};
    use crate::{
        olm::{Account, InboundCreationResult, OlmMessage},
        PickleError,
    };

    const PICKLE_KEY: &[u8] = b"It's a secret to everybody";

    fn sessions() -> Result<(Account, Account, Session, Session)> {
        let alice = Account::new();
        let mut bob = Account::new();

        bob.generate_one_time_keys(1);
        let one_time_key =
            *bob.one_time_keys().values().next().expect("We just generated a key");

        let mut alice_session =
            alice.create_outbound_session(*bob.curve25519_key(), one_time_key);

        bob.mark_keys_as_published();

        let message = "It's a secret to everybody";
        let olm_message = alice_session.encrypt(message);

        if let OlmMessage::PreKey(m) = olm_message {
            let InboundCreationResult { session, plaintext } =
                bob.create_inbound_session(alice.curve25519_key(), &m)?;

            assert_eq!(message.as_bytes(), plaintext);

            Ok((alice, bob, alice_session, session))
        } else {
            anyhow::bail!("Invalid message type");
        }
    }

    #[test]
    fn out_of_order_decryption() -> Result<()> {
        let (_, _, mut alice_session, mut bob_session) = sessions()?;

        let message_1 = bob_session.encrypt("Message 1");
        let message_2 = bob_session.encrypt("Message 2");
        let message_3 = bob_session.encrypt("Message 3");

        assert_eq!(b"Message 3".as_ref(), alice_session.decrypt(&message_3)?);
        assert_eq!(b"Message 2".as_ref(), alice_session.decrypt(&message_2)?);
        assert_eq!(b"Message 1".as_ref(), alice_session.decrypt(&message_1)?);

        // Every stashed key has been consumed again.
        for chain in alice_session.receiving_chains.inner.iter() {
            assert_eq!(chain.skipped_message_keys().len(), 0);
        }

        Ok(())
    }

    #[test]
    fn more_out_of_order_decryption() -> Result<()> {
        let (_, _, mut alice_session, mut bob_session) = sessions()?;

        let message_1 = bob_session.encrypt("Message 1");
        let message_2 = bob_session.encrypt("Message 2");
        let message_3 = bob_session.encrypt("Message 3");

        assert_eq!(b"Message 1".as_ref(), alice_session.decrypt(&message_1)?);

        assert_eq!(alice_session.receiving_chains.len(), 1);

        let message_4 = alice_session.encrypt("Message 4");
        assert_eq!(b"Message 4".as_ref(), bob_session.decrypt(&message_4)?);

        let message_5 = bob_session.encrypt("Message 5");
        assert_eq!(b"Message 5".as_ref(), alice_session.decrypt(&message_5)?);
        assert_eq!(b"Message 3".as_ref(), alice_session.decrypt(&message_3)?);
        assert_eq!(b"Message 2".as_ref(), alice_session.decrypt(&message_2)?);

        assert_eq!(alice_session.receiving_chains.len(), 2);

        Ok(())
    }

    #[test]
    fn mac_failure_leaves_the_session_untouched() -> Result<()> {
        let (_, _, mut alice_session, mut bob_session) = sessions()?;

        let message = bob_session.encrypt("An important message");
        let mut tampered = message.clone();

        if let OlmMessage::Normal(m) = &mut tampered {
            m.ciphertext[0] ^= 0x01;
        } else {
            anyhow::bail!("Bob's session should be fully established");
        }

        assert_matches!(alice_session.decrypt(&tampered), Err(DecryptionError::InvalidMac(_)));

        // The failed attempt didn't advance any state, the untampered
        // message still decrypts.
        assert_eq!(b"An important message".as_ref(), alice_session.decrypt(&message)?);

        Ok(())
    }

    #[test]
    fn pickle_round_trip_is_identity() -> Result<()> {
        let (_, _, mut alice_session, mut bob_session) = sessions()?;

        let reply = bob_session.encrypt("A reply");
        alice_session.decrypt(&reply)?;

        let pickle = alice_session.pickle(PICKLE_KEY);
        let mut unpickled = Session::from_pickle(&pickle, PICKLE_KEY)?;

        assert_eq!(alice_session.session_id(), unpickled.session_id());
        assert_eq!(
            alice_session.has_received_message(),
            unpickled.has_received_message()
        );

        let message = unpickled.encrypt("From the unpickled session");
        assert_eq!(b"From the unpickled session".as_ref(), bob_session.decrypt(&message)?);

        Ok(())
    }

    #[test]
    fn pickling_with_skipped_message_keys() -> Result<()> {
        let (_, _, mut alice_session, mut bob_session) = sessions()?;

        let message_1 = bob_session.encrypt("Message 1");
        let message_2 = bob_session.encrypt("Message 2");
        let message_3 = bob_session.encrypt("Message 3");

        assert_eq!(b"Message 3".as_ref(), alice_session.decrypt(&message_3)?);

        let pickle = alice_session.pickle(PICKLE_KEY);
        let mut unpickled = Session::from_pickle(&pickle, PICKLE_KEY)?;

        assert_eq!(b"Message 1".as_ref(), unpickled.decrypt(&message_1)?);
        assert_eq!(b"Message 2".as_ref(), unpickled.decrypt(&message_2)?);

        Ok(())
    }

    #[test]
    fn unpickling_with_a_wrong_key_fails() -> Result<()> {
        let (_, _, alice_session, _) = sessions()?;

        let pickle = alice_session.pickle(PICKLE_KEY);

        assert_matches!(
            Session::from_pickle(&pickle, b"A wrong key"),
            Err(PickleError::Decryption(_))
        );

        Ok(())
    }

    #[test]
    fn unpickling_an_unknown_version_fails() -> Result<()> {
        let (_, _, alice_session, _) = sessions()?;

        let mut pickle = super::Pickle::from(&alice_session);
        pickle.version = 99;

        let pickle = crate::utilities::pickle(&pickle, PICKLE_KEY);

        assert_matches!(
            Session::from_pickle(&pickle, PICKLE_KEY),
            Err(PickleError::Version(1, 99))
        );

        Ok(())
    }
}
