//! Model-based testing for the keystore.
//!
//! A simplified reference implementation of key bookkeeping. Tests apply the
//! same random operation sequence to the model and to the real store, then
//! compare results and observable state after every step.
//!
//! ```text
//! proptest generates: Vec<Operation>
//!                          │
//!           ┌──────────────┼──────────────┐
//!           ▼              ▼              ▼
//!    KeyStoreModel     KeyStore       Compare
//!     (reference)     (SimEnv)        Results
//! ```

mod keystore;
mod operation;

pub use keystore::{KeyStoreModel, ObservableState};
pub use operation::{ModelGeneration, Operation, OperationError, OperationResult};
