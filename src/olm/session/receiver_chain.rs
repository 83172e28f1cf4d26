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

use arrayvec::ArrayVec;

use super::{
    chain_key::RemoteChainKey, message_key::RemoteMessageKey, ratchet::RemoteRatchetKey,
    DecryptionError,
};
use crate::olm::messages::Message;

const MAX_MESSAGE_GAP: u64 = 2000;
const MAX_MESSAGE_KEYS: usize = 40;

#[derive(Clone)]
pub(super) struct MessageKeyStore {
    inner: ArrayVec<RemoteMessageKey, MAX_MESSAGE_KEYS>,
}

impl MessageKeyStore {
    fn new() -> Self {
        Self { inner: ArrayVec::new() }
    }

    fn push(&mut self, message_key: RemoteMessageKey) {
        if self.inner.is_full() {
            self.inner.pop_at(0);
        }

        self.inner.push(message_key)
    }

    fn merge(&mut self, mut store: MessageKeyStore) {
        for key in store.inner.drain(..) {
            self.push(key);
        }
    }

    fn get_message_key(&self, chain_index: u64) -> Option<&RemoteMessageKey> {
        self.inner.iter().find(|k| k.chain_index() == chain_index)
    }

    fn remove_message_key(&mut self, chain_index: u64) {
        self.inner.retain(|k| k.chain_index() != chain_index);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteMessageKey> {
        self.inner.iter()
    }
}

impl Default for MessageKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A receiving chain: the chain key belonging to one ratchet key of the
/// other side, along with the message keys we have skipped over on that
/// chain.
#[derive(Clone)]
pub(super) struct ReceiverChain {
    ratchet_key: RemoteRatchetKey,
    hkdf_ratchet: RemoteChainKey,
    skipped_message_keys: MessageKeyStore,
}

impl ReceiverChain {
    pub fn new(ratchet_key: RemoteRatchetKey, chain_key: RemoteChainKey) -> Self {
        ReceiverChain {
            ratchet_key,
            hkdf_ratchet: chain_key,
            skipped_message_keys: Default::default(),
        }
    }

    pub fn decrypt(&mut self, message: &Message) -> Result<Vec<u8>, DecryptionError> {
        let chain_index = message.chain_index;
        let message_gap = chain_index.saturating_sub(self.hkdf_ratchet.chain_index());

        if message_gap > MAX_MESSAGE_GAP {
            Err(DecryptionError::TooBigMessageGap(message_gap, MAX_MESSAGE_GAP))
        } else if self.hkdf_ratchet.chain_index() > chain_index {
            if let Some(message_key) = self.skipped_message_keys.get_message_key(chain_index) {
                let plaintext = message_key.decrypt(message)?;

                self.skipped_message_keys.remove_message_key(chain_index);

                Ok(plaintext)
            } else {
                Err(DecryptionError::MissingMessageKey(chain_index))
            }
        } else {
            // Advance a copy of the ratchet up to the desired index, stashing
            // the message keys we skip over. The copy and the stash only
            // replace our state once the message has been authenticated, so
            // a failure leaves the chain exactly as it was.
            let mut ratchet = self.hkdf_ratchet.clone();
            let mut skipped_keys = MessageKeyStore::new();

            while ratchet.chain_index() < chain_index {
                if chain_index - ratchet.chain_index() > MAX_MESSAGE_KEYS as u64 {
                    ratchet.advance();
                } else {
                    let key = ratchet.create_message_key();
                    skipped_keys.push(key);
                }
            }

            let message_key = ratchet.create_message_key();
            let plaintext = message_key.decrypt(message)?;

            self.hkdf_ratchet = ratchet;
            self.skipped_message_keys.merge(skipped_keys);

            Ok(plaintext)
        }
    }

    pub const fn ratchet_key(&self) -> RemoteRatchetKey {
        self.ratchet_key
    }

    pub const fn chain_key(&self) -> &RemoteChainKey {
        &self.hkdf_ratchet
    }

    pub const fn skipped_message_keys(&self) -> &MessageKeyStore {
        &self.skipped_message_keys
    }

    pub fn insert_message_key(&mut self, message_key: RemoteMessageKey) {
        self.skipped_message_keys.push(message_key)
    }

    pub fn belongs_to(&self, ratchet_key: &RemoteRatchetKey) -> bool {
        &self.ratchet_key == ratchet_key
    }
}
