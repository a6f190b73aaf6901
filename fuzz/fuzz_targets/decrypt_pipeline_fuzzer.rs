//! Fuzz target for the encrypt → tamper → decrypt pipeline
//!
//! # Strategy
//!
//! - Arbitrary plaintexts, frame counters and source ids
//! - Arbitrary byte-level mutations of the protected frame
//! - Completely arbitrary frames fed straight to the decryptor
//!
//! # Invariants
//!
//! - Decryption never panics, whatever the input
//! - An untouched frame always decrypts to its plaintext
//! - A modified frame never decrypts
//! - Random bytes never decrypt

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use callframe_crypto::{
    FrameDecryptor, FrameEncryptor, KeyStore, KeyStoreConfig, MediaType, StaticResolver,
};
use callframe_harness::SimEnv;
use libfuzzer_sys::fuzz_target;

const SOURCE: u32 = 0xC0FFEE;

#[derive(Debug, Arbitrary)]
struct PipelineScenario {
    seed: u64,
    key: [u8; 32],
    generation: u8,
    video: bool,
    embed_source: bool,
    plaintext: Vec<u8>,
    mutations: Vec<Mutation>,
    garbage: Vec<u8>,
}

#[derive(Debug, Arbitrary)]
enum Mutation {
    Flip { index: u16, mask: u8 },
    Truncate { len: u16 },
    Append { byte: u8 },
}

fuzz_target!(|scenario: PipelineScenario| {
    let env = SimEnv::with_seed(scenario.seed);
    let media = if scenario.video { MediaType::Video } else { MediaType::Audio };
    let generation = u64::from(scenario.generation);

    let sender = KeyStore::shared(env.clone(), KeyStoreConfig::default());
    let receiver = KeyStore::shared(env.clone(), KeyStoreConfig::default());
    for store in [&sender, &receiver] {
        store.set_salt(b"fuzz").unwrap();
        store.set_session_key(generation, &scenario.key).unwrap();
    }

    let resolver = Arc::new(StaticResolver::new());
    resolver.insert(SOURCE, media, "sender");

    let mut enc = FrameEncryptor::new(Arc::clone(&sender), "sender", media);
    let mut dec = FrameDecryptor::new(Arc::clone(&receiver), media, resolver);

    let source = scenario.embed_source.then_some(SOURCE);
    let frame = enc.encrypt(&scenario.plaintext, source).unwrap();
    assert!(frame.len() <= enc.max_output_size(scenario.plaintext.len()));

    // INVARIANT 1: Untouched frames decrypt
    let plaintext = dec.decrypt(&frame, Some(SOURCE)).expect("untouched frame must decrypt");
    assert_eq!(plaintext, scenario.plaintext);

    // INVARIANT 2: Modified frames never decrypt
    let mut tampered = frame.clone();
    for mutation in &scenario.mutations {
        match *mutation {
            Mutation::Flip { index, mask } => {
                if !tampered.is_empty() {
                    let index = usize::from(index) % tampered.len();
                    tampered[index] ^= mask;
                }
            },
            Mutation::Truncate { len } => tampered.truncate(usize::from(len)),
            Mutation::Append { byte } => tampered.push(byte),
        }
    }
    let result = dec.decrypt(&tampered, Some(SOURCE));
    if tampered == frame {
        assert_eq!(result.as_deref(), Ok(scenario.plaintext.as_slice()));
    } else {
        assert!(result.is_err(), "tampered frame decrypted");
    }

    // INVARIANT 3: Arbitrary bytes never decrypt
    if scenario.garbage != frame {
        assert!(dec.decrypt(&scenario.garbage, Some(SOURCE)).is_err());
    }
});
