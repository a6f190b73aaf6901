//! Deterministic test harness for Callframe.
//!
//! [`SimEnv`] implements the crypto crate's `Environment` with a manual
//! clock and a seeded RNG, so every test run replays exactly from its seed.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference keystore. Operations are applied
//! to both the model and the real implementation, and their observable
//! states are compared.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks properties that must hold after every
//! operation. Use [`InvariantRegistry::standard()`] for the keystore set.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod model;
pub mod sim_env;

pub use invariants::{
    CurrentIsStored, Invariant, InvariantRegistry, InvariantResult, KeyStoreSnapshot,
    MaxKnownMonotonicity, RetentionWindow, Violation,
};
pub use model::{
    KeyStoreModel, ModelGeneration, ObservableState, Operation, OperationError, OperationResult,
};
pub use sim_env::SimEnv;
