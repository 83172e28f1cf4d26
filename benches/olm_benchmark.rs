//! Benchmark for the common Olm operations.

#![allow(clippy::expect_used, missing_docs)]

use assert_matches2::assert_let;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use moceril::olm::{Account, OlmMessage};

/// Benchmark how long it takes to create a 1-to-1 Olm session.
pub fn outbound_session_creation(c: &mut Criterion) {
    let mut bob = Account::new();

    bob.generate_one_time_keys(1);

    let identity_key = *bob.curve25519_key();
    let one_time_key = *bob
        .one_time_keys()
        .values()
        .next()
        .expect("Bob should have at least one one-time key");

    bob.mark_keys_as_published();

    c.bench_function("Creating an outbound session", |b| {
        b.iter_batched(
            Account::new,
            |alice| {
                alice.create_outbound_session(identity_key, one_time_key);
            },
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark how long it takes to encrypt a message using a 1-to-1 Olm
/// session.
pub fn encryption(c: &mut Criterion) {
    let alice = Account::new();
    let mut bob = Account::new();

    bob.generate_one_time_keys(1);

    let identity_key = *bob.curve25519_key();
    let one_time_key = *bob
        .one_time_keys()
        .values()
        .next()
        .expect("Bob should have at least one one-time key");

    bob.mark_keys_as_published();

    let mut session = alice.create_outbound_session(identity_key, one_time_key);

    c.bench_function("Encrypting a message", |b| {
        b.iter(|| session.encrypt("It's a secret to everybody"));
    });
}

/// Benchmark how long it takes to decrypt a message using a 1-to-1 Olm
/// session.
pub fn decryption(c: &mut Criterion) {
    let alice = Account::new();
    let mut bob = Account::new();

    bob.generate_one_time_keys(1);

    let identity_key = *bob.curve25519_key();
    let one_time_key = *bob
        .one_time_keys()
        .values()
        .next()
        .expect("Bob should have at least one one-time key");

    bob.mark_keys_as_published();

    let mut alice_session = alice.create_outbound_session(identity_key, one_time_key);

    let message = alice_session.encrypt("It's a secret to everybody");
    assert_let!(OlmMessage::PreKey(message) = message);

    let mut bob_session = bob
        .create_inbound_session(alice.curve25519_key(), &message)
        .expect("We should be able to create an inbound session")
        .session;

    c.bench_function("Decrypting a message", |b| {
        b.iter_batched(
            || bob_session.encrypt("It's a secret to everybody"),
            |message| {
                alice_session
                    .decrypt(&message)
                    .expect("We should be able to decrypt the message");
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, outbound_session_creation, encryption, decryption);
criterion_main!(benches);
