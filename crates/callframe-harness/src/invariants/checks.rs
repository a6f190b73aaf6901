//! Keystore invariants.

use super::{Invariant, InvariantResult, KeyStoreSnapshot, Violation};

/// The current generation is stored, and a store without keys has no
/// current generation.
pub struct CurrentIsStored;

impl Invariant for CurrentIsStored {
    fn name(&self) -> &'static str {
        "current_is_stored"
    }

    fn check(&mut self, snapshot: &KeyStoreSnapshot) -> InvariantResult {
        match snapshot.current {
            None if snapshot.generations.is_empty() => {},
            None => {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("no current generation but {:?} stored", snapshot.generations),
                });
            },
            Some(current) if !snapshot.generations.contains(&current) => {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "current generation {current} not in {:?}",
                        snapshot.generations
                    ),
                });
            },
            Some(_) => {},
        }

        if snapshot.max_known != snapshot.generations.last().copied() {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "max known {:?} disagrees with stored {:?}",
                    snapshot.max_known, snapshot.generations
                ),
            });
        }
        Ok(())
    }
}

/// At most one generation older than current is retained.
pub struct RetentionWindow;

impl Invariant for RetentionWindow {
    fn name(&self) -> &'static str {
        "retention_window"
    }

    fn check(&mut self, snapshot: &KeyStoreSnapshot) -> InvariantResult {
        let Some(current) = snapshot.current else {
            return Ok(());
        };

        let older = snapshot.generations.iter().filter(|&&g| g < current).count();
        if older > 1 {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "{older} generations older than current {current}: {:?}",
                    snapshot.generations
                ),
            });
        }
        Ok(())
    }
}

/// The highest known generation never decreases until the store is reset.
#[derive(Default)]
pub struct MaxKnownMonotonicity {
    previous: Option<u64>,
}

impl Invariant for MaxKnownMonotonicity {
    fn name(&self) -> &'static str {
        "max_known_monotonicity"
    }

    fn check(&mut self, snapshot: &KeyStoreSnapshot) -> InvariantResult {
        if let Some(previous) = self.previous
            && snapshot.max_known.is_none_or(|max| max < previous)
        {
            return Err(Violation {
                invariant: self.name(),
                message: format!("max known went from {previous} to {:?}", snapshot.max_known),
            });
        }
        self.previous = snapshot.max_known;
        Ok(())
    }

    fn reset(&mut self) {
        self.previous = None;
    }
}
