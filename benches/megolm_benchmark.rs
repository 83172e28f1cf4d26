//! Benchmark for the common Megolm operations.

#![allow(clippy::expect_used, missing_docs)]

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use moceril::megolm::{GroupSession, InboundGroupSession};

/// Benchmark how long it takes to create a group session.
pub fn outbound_session_creation(c: &mut Criterion) {
    c.bench_function("Creating a group session", |b| {
        b.iter(GroupSession::new);
    });
}

/// Benchmark how long it takes to encrypt a message using a Megolm session.
pub fn encryption(c: &mut Criterion) {
    let mut session = GroupSession::new();

    c.bench_function("Encrypting a group message", |b| {
        b.iter(|| session.encrypt("It's a secret to everybody"));
    });
}

/// Benchmark how long it takes to decrypt a message using a Megolm session.
pub fn decryption(c: &mut Criterion) {
    let mut session = GroupSession::new();

    c.bench_function("Decrypting a group message", |b| {
        b.iter_batched(
            || {
                let inbound_session =
                    InboundGroupSession::new(&session.session_key(), session.message_index())
                        .expect("The exported session key should be valid");
                (inbound_session, session.encrypt("It's a secret to everybody"))
            },
            |(mut session, message)| {
                let result =
                    session.decrypt(&message).expect("We should be able to decrypt the message");

                assert_eq!(result.plaintext, b"It's a secret to everybody");
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, outbound_session_creation, encryption, decryption);
criterion_main!(benches);
