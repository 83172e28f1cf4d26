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

use anyhow::Result;
use assert_matches2::assert_matches;
use moceril::{
    megolm::{DecryptionError, GroupSession, InboundGroupSession, MegolmMessage},
    PickleError,
};

const PICKLE_KEY: &[u8] = b"sufficiently long pickle key";

#[test]
fn group_round_trip() -> Result<()> {
    let mut outbound = GroupSession::new();
    let mut inbound = InboundGroupSession::new(&outbound.session_key(), 0)?;

    for i in 0..10 {
        let plaintext = format!("Message {i}");
        let message = outbound.encrypt(&plaintext);

        let decrypted = inbound.decrypt(&message)?;

        assert_eq!(decrypted.plaintext, plaintext.as_bytes());
        assert_eq!(decrypted.message_index, i);
    }

    Ok(())
}

#[test]
fn messages_survive_the_wire_format() -> Result<()> {
    let mut outbound = GroupSession::new();
    let mut inbound = InboundGroupSession::new(&outbound.session_key(), 0)?;

    let message = outbound.encrypt("Over the wire");
    let encoded = message.to_base64();

    let received = MegolmMessage::from_base64(&encoded)?;
    assert_eq!(received, message);

    let decrypted = inbound.decrypt(&received)?;
    assert_eq!(decrypted.plaintext, b"Over the wire");

    Ok(())
}

#[test]
fn signatures_verify_against_the_published_key() -> Result<()> {
    let mut outbound = GroupSession::new();

    let message = outbound.encrypt("It's a secret to everybody");

    outbound
        .public_signing_key()
        .verify(&message.to_signature_bytes(), message.signature())?;

    Ok(())
}

#[test]
fn forward_secrecy_bound() -> Result<()> {
    let mut outbound = GroupSession::new();

    for i in 0..3 {
        outbound.encrypt(format!("Message {i}"));
    }

    let message_3 = outbound.encrypt("Message 3");
    outbound.encrypt("Message 4");

    // Export at index 5: messages 3 and 4 are in the past for the inbound
    // session.
    let session_key = outbound.session_key();
    let export_index = outbound.message_index();
    assert_eq!(export_index, 5);

    let mut inbound = InboundGroupSession::new(&session_key, export_index)?;

    assert_matches!(
        inbound.decrypt(&message_3),
        Err(DecryptionError::UnknownMessageIndex(5, 3))
    );

    Ok(())
}

#[test]
fn out_of_order_group_decryption() -> Result<()> {
    let mut outbound = GroupSession::new();
    let session_key = outbound.session_key();

    let mut messages = Vec::new();
    for i in 0..101 {
        messages.push(outbound.encrypt(format!("Message {i}")));
    }

    let mut inbound = InboundGroupSession::new(&session_key, 0)?;

    // Arrival order 0, 5, 2, 7: everything decrypts, and the latest index
    // only ever grows.
    for (index, expected_latest) in [(0u32, 0u32), (5, 5), (2, 5), (7, 7)] {
        let decrypted = inbound.decrypt(&messages[index as usize])?;

        assert_eq!(decrypted.plaintext, format!("Message {index}").as_bytes());
        assert_eq!(decrypted.message_index, index);
        assert_eq!(inbound.latest_known_index(), expected_latest);
    }

    // A big jump forward, then one back into the window.
    let decrypted = inbound.decrypt(&messages[100])?;
    assert_eq!(decrypted.plaintext, b"Message 100");
    assert_eq!(inbound.latest_known_index(), 100);

    let decrypted = inbound.decrypt(&messages[50])?;
    assert_eq!(decrypted.plaintext, b"Message 50");
    assert_eq!(
        inbound.latest_known_index(),
        100,
        "Decrypting an older message must not regress the latest ratchet"
    );

    Ok(())
}

#[test]
fn advancing_discards_old_indices() -> Result<()> {
    let mut outbound = GroupSession::new();
    let mut inbound = InboundGroupSession::new(&outbound.session_key(), 0)?;

    let message_0 = outbound.encrypt("Message 0");
    let message_1 = outbound.encrypt("Message 1");

    assert!(inbound.advance_to(1));
    assert_eq!(inbound.first_known_index(), 1);

    assert_matches!(
        inbound.decrypt(&message_0),
        Err(DecryptionError::UnknownMessageIndex(1, 0))
    );
    assert_eq!(inbound.decrypt(&message_1)?.plaintext, b"Message 1");

    Ok(())
}

#[test]
fn tampered_group_messages_are_rejected() -> Result<()> {
    let mut outbound = GroupSession::new();
    let mut inbound = InboundGroupSession::new(&outbound.session_key(), 0)?;

    let message = outbound.encrypt("It's a secret to everybody");

    let mut tampered = message.to_bytes();
    // Flip a bit in the ciphertext, leaving the MAC as it was.
    tampered[6] ^= 0x01;

    let tampered = MegolmMessage::from_bytes(&tampered)?;

    assert_matches!(inbound.decrypt(&tampered), Err(DecryptionError::InvalidMac(_)));
    assert_eq!(inbound.decrypt(&message)?.plaintext, b"It's a secret to everybody");

    Ok(())
}

#[test]
fn group_pickle_round_trip() -> Result<()> {
    let mut outbound = GroupSession::new();
    let mut inbound = InboundGroupSession::new(&outbound.session_key(), 0)?;

    let message_0 = outbound.encrypt("Message 0");
    outbound.encrypt("Message 1");
    let message_2 = outbound.encrypt("Message 2");

    inbound.decrypt(&message_2)?;

    let pickle = inbound.pickle(PICKLE_KEY);
    let mut unpickled = InboundGroupSession::from_pickle(&pickle, PICKLE_KEY)?;

    assert_eq!(unpickled.first_known_index(), inbound.first_known_index());
    assert_eq!(unpickled.latest_known_index(), inbound.latest_known_index());

    // The initial ratchet came along, older indices inside the window
    // still decrypt.
    assert_eq!(unpickled.decrypt(&message_0)?.plaintext, b"Message 0");

    let mut tampered = pickle.into_bytes();
    let index = tampered
        .iter()
        .position(|&b| matches!(b, b'B'..=b'Y' | b'b'..=b'y' | b'0'..=b'9'))
        .expect("The pickle should contain a flippable character");
    tampered[index] ^= 0x01;
    let tampered = String::from_utf8(tampered)?;

    assert_matches!(
        InboundGroupSession::from_pickle(&tampered, PICKLE_KEY),
        Err(PickleError::Decryption(_))
    );

    Ok(())
}
