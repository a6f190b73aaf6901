//! Invariant checking for keystore state.
//!
//! Invariants are properties that must hold after every operation,
//! regardless of the sequence that led there. Tests take a
//! [`KeyStoreSnapshot`] and run every registered [`Invariant`] against it.
//!
//! # Usage
//!
//! ```ignore
//! let mut registry = InvariantRegistry::standard();
//! let snapshot = KeyStoreSnapshot::from_store(&store);
//! registry.check_all(&snapshot)?;
//! ```

mod checks;
mod snapshot;

pub use checks::{CurrentIsStored, MaxKnownMonotonicity, RetentionWindow};
pub use snapshot::KeyStoreSnapshot;

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against keystore snapshots.
///
/// Checks may keep state between calls (e.g. the previous snapshot), so
/// `check` takes `&mut self`.
pub trait Invariant: Send {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against the latest snapshot.
    fn check(&mut self, snapshot: &KeyStoreSnapshot) -> InvariantResult;

    /// Forget state carried between snapshots, after a reset.
    fn reset(&mut self) {}
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every keystore invariant:
    /// [`CurrentIsStored`], [`RetentionWindow`] and [`MaxKnownMonotonicity`].
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(CurrentIsStored);
        registry.add(RetentionWindow);
        registry.add(MaxKnownMonotonicity::default());
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants, collecting every violation.
    pub fn check_all(&mut self, snapshot: &KeyStoreSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter_mut().filter_map(|inv| inv.check(snapshot).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Forget carried state in every invariant.
    pub fn reset(&mut self) {
        for invariant in &mut self.invariants {
            invariant.reset();
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// True if no invariants are registered.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
