//! Fuzz target for keystore bookkeeping
//!
//! Drives the real keystore and the reference model with the same arbitrary
//! operation sequence.
//!
//! # Invariants
//!
//! - No operation panics
//! - Every result matches the model
//! - Observable state matches the model after every operation
//! - Keystore invariants hold after every operation

#![no_main]

use std::{sync::Arc, time::Duration};

use arbitrary::Arbitrary;
use callframe_crypto::{KeyStore, KeyStoreConfig};
use callframe_harness::{
    InvariantRegistry, KeyStoreModel, KeyStoreSnapshot, Operation, OperationError,
    OperationResult, SimEnv,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct KeyStoreScenario {
    seed: u64,
    forward_secure: bool,
    operations: Vec<Operation>,
}

fn apply(env: &SimEnv, store: &KeyStore<SimEnv>, op: &Operation) -> OperationResult {
    let result = match *op {
        Operation::SetKey { generation, key } => store
            .set_session_key(u64::from(generation), &Operation::raw_key(key))
            .map(|()| OperationResult::Ok),
        Operation::Rotate => store.rotate().map(OperationResult::Rotated),
        Operation::SetCurrent { generation } => {
            store.set_current(u64::from(generation)).map(|()| OperationResult::Ok)
        },
        Operation::RotateByTime { lag_millis } => {
            let min_ts = env.elapsed().saturating_sub(Duration::from_millis(u64::from(lag_millis)));
            Ok(OperationResult::KeepPolling(store.rotate_by_time(min_ts)))
        },
        Operation::AdvanceTime { millis } => {
            env.advance(Duration::from_millis(u64::from(millis)));
            Ok(OperationResult::Ok)
        },
        Operation::ResetKeys => {
            store.reset_keys();
            Ok(OperationResult::Ok)
        },
        Operation::Reset => {
            store.reset();
            Ok(OperationResult::Ok)
        },
    };
    result.unwrap_or_else(|err| OperationResult::Error(OperationError::from_store(&err)))
}

fuzz_target!(|scenario: KeyStoreScenario| {
    let env = SimEnv::with_seed(scenario.seed);
    let store = Arc::new(KeyStore::new(
        env.clone(),
        KeyStoreConfig { forward_secure: scenario.forward_secure },
    ));
    store.set_salt(b"fuzz").unwrap();

    let mut model = KeyStoreModel::new(scenario.forward_secure);
    let mut registry = InvariantRegistry::standard();

    for op in scenario.operations.iter().take(256) {
        if matches!(op, Operation::ResetKeys | Operation::Reset) {
            registry.reset();
        }

        // INVARIANT 1: Results match the model
        let expected = model.apply(op);
        let actual = apply(&env, &store, op);
        assert_eq!(expected, actual, "result divergence on {op:?}");

        // INVARIANT 2: State matches the model
        let state = model.observable_state();
        let current = store.current();
        assert_eq!(state.current, current.map(|(g, _)| g));
        assert_eq!(state.current_created_at, current.map(|(_, ts)| ts));
        assert_eq!(state.generations, store.generations());

        // INVARIANT 3: Keystore invariants hold
        if let Err(violations) = registry.check_all(&KeyStoreSnapshot::from_store(&store)) {
            panic!("invariant violation after {op:?}: {violations:?}");
        }
    }
});
