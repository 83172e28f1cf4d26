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

use sha2::{Digest, Sha256};

use crate::{
    utilities::{base64_encode, Decode, Encode, PickleDecodeError},
    Curve25519PublicKey,
};

/// The set of keys that were used to establish an Olm session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionKeys {
    /// Alice's long-term identity key.
    pub identity_key: Curve25519PublicKey,
    /// Alice's single-use base key.
    pub base_key: Curve25519PublicKey,
    /// Bob's single-use one-time key.
    pub one_time_key: Curve25519PublicKey,
}

impl SessionKeys {
    /// Returns the globally unique session ID, in base64-encoded form.
    ///
    /// A session ID is the SHA-256 of the concatenation of the three keys
    /// that were used to establish the session. Due to the construction,
    /// every session ID is (probabilistically) globally unique.
    pub fn session_id(&self) -> String {
        let sha = Sha256::new();

        let digest = sha
            .chain_update(self.identity_key.as_bytes())
            .chain_update(self.base_key.as_bytes())
            .chain_update(self.one_time_key.as_bytes())
            .finalize();

        base64_encode(digest)
    }
}

impl Decode for SessionKeys {
    fn decode(reader: &mut impl Read) -> Result<Self, PickleDecodeError> {
        Ok(Self {
            identity_key: <[u8; 32]>::decode(reader)?.into(),
            base_key: <[u8; 32]>::decode(reader)?.into(),
            one_time_key: <[u8; 32]>::decode(reader)?.into(),
        })
    }
}

impl Encode for SessionKeys {
    fn encode(&self, writer: &mut impl Write) -> Result<(), std::io::Error> {
        self.identity_key.to_bytes().encode(writer)?;
        self.base_key.to_bytes().encode(writer)?;
        self.one_time_key.to_bytes().encode(writer)
    }
}
