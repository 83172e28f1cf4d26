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

use std::collections::{BTreeMap, HashMap};

use super::PUBLIC_MAX_ONE_TIME_KEYS;
use crate::{types::Curve25519SecretKey, Curve25519PublicKey, KeyId};

pub(super) struct OneTimeKeys {
    next_key_id: u64,
    unpublished_public_keys: BTreeMap<KeyId, Curve25519PublicKey>,
    private_keys: BTreeMap<KeyId, Curve25519SecretKey>,
    key_ids_by_key: HashMap<Curve25519PublicKey, KeyId>,
}

impl OneTimeKeys {
    const MAX_ONE_TIME_KEYS: usize = 100 * PUBLIC_MAX_ONE_TIME_KEYS;

    pub fn new() -> Self {
        Self {
            next_key_id: 0,
            unpublished_public_keys: Default::default(),
            private_keys: Default::default(),
            key_ids_by_key: Default::default(),
        }
    }

    pub fn mark_as_published(&mut self) {
        self.unpublished_public_keys.clear();
    }

    pub fn get_secret_key(&self, public_key: &Curve25519PublicKey) -> Option<&Curve25519SecretKey> {
        self.key_ids_by_key.get(public_key).and_then(|key_id| self.private_keys.get(key_id))
    }

    pub fn remove_secret_key(
        &mut self,
        public_key: &Curve25519PublicKey,
    ) -> Option<Curve25519SecretKey> {
        self.key_ids_by_key.remove(public_key).and_then(|key_id| {
            self.unpublished_public_keys.remove(&key_id);
            self.private_keys.remove(&key_id)
        })
    }

    pub fn unpublished_keys(&self) -> &BTreeMap<KeyId, Curve25519PublicKey> {
        &self.unpublished_public_keys
    }

    fn insert_secret_key(&mut self, key_id: KeyId, key: Curve25519SecretKey) {
        // If we hit the maximum number of one-time keys we'd like to keep,
        // remove the oldest one before inserting the new one.
        if self.private_keys.len() >= Self::MAX_ONE_TIME_KEYS {
            if let Some(key_id) = self.private_keys.keys().next().copied() {
                if let Some(private_key) = self.private_keys.remove(&key_id) {
                    let public_key = Curve25519PublicKey::from(&private_key);
                    self.key_ids_by_key.remove(&public_key);
                }

                self.unpublished_public_keys.remove(&key_id);
            }
        }

        let public_key = Curve25519PublicKey::from(&key);

        self.private_keys.insert(key_id, key);
        self.key_ids_by_key.insert(public_key, key_id);
        self.unpublished_public_keys.insert(key_id, public_key);
    }

    pub fn generate(&mut self, count: usize) {
        for _ in 0..count {
            let key_id = KeyId(self.next_key_id);
            let key = Curve25519SecretKey::new();

            self.insert_secret_key(key_id, key);

            self.next_key_id = self.next_key_id.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::OneTimeKeys;
    use crate::{Curve25519PublicKey, KeyId};

    #[test]
    fn store_limit() {
        let mut store = OneTimeKeys::new();

        store.generate(OneTimeKeys::MAX_ONE_TIME_KEYS);
        assert_eq!(store.unpublished_public_keys.len(), OneTimeKeys::MAX_ONE_TIME_KEYS);
        assert_eq!(store.private_keys.len(), OneTimeKeys::MAX_ONE_TIME_KEYS);

        store.mark_as_published();
        assert!(store.unpublished_public_keys.is_empty());

        store.generate(10);
        assert_eq!(store.unpublished_public_keys.len(), 10);
        assert_eq!(store.private_keys.len(), OneTimeKeys::MAX_ONE_TIME_KEYS);

        let oldest_key_id =
            store.private_keys.keys().next().copied().expect("Couldn't get the first key ID");

        assert_eq!(oldest_key_id, KeyId(10));
    }

    #[test]
    fn keys_are_removable_by_public_key() {
        let mut store = OneTimeKeys::new();
        store.generate(1);

        let public_key: Curve25519PublicKey =
            *store.unpublished_public_keys.values().next().expect("We just generated a key");

        assert!(store.get_secret_key(&public_key).is_some());

        store.remove_secret_key(&public_key).expect("The key should be removable");

        assert!(store.get_secret_key(&public_key).is_none());
        assert!(store.private_keys.is_empty());
    }
}
