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

use std::fmt::Display;

mod curve25519;
mod ed25519;

pub(crate) use curve25519::Curve25519Keypair;
pub use curve25519::{Curve25519PublicKey, Curve25519SecretKey};
pub use ed25519::{Ed25519Keypair, Ed25519PublicKey, Ed25519Signature, SignatureError};
use thiserror::Error;

/// An identifier for a one-time key stored in an [`Account`].
///
/// [`Account`]: crate::olm::Account
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct KeyId(pub(crate) u64);

impl KeyId {
    /// Encode the key ID as a string of unpadded base64.
    pub fn to_base64(self) -> String {
        crate::utilities::base64_encode(self.0.to_be_bytes())
    }
}

impl Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("KeyId({0})", self.0))
    }
}

/// Error type describing failures that can happen when we try to decode or
/// use a cryptographic key.
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Failed decoding a public key from base64: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error(
        "Failed decoding {key_type} key from base64: \
        Invalid number of bytes for {key_type}, expected {expected_length}, got {length}."
    )]
    InvalidKeyLength { key_type: &'static str, expected_length: usize, length: usize },
}
