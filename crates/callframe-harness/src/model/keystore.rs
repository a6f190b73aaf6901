//! Reference keystore.
//!
//! Tracks only bookkeeping: which generations exist, which is current, when
//! each key was stored and whether two keys are identical. No cryptography.
//! The real store must agree with it after every operation.

use std::{collections::BTreeMap, time::Duration};

use super::operation::{Operation, OperationError, OperationResult};

/// Identity of a stored key.
///
/// Ratcheted keys are never equal to a fill-byte key delivered by
/// signaling, since HKDF output is not a repeated byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelKey {
    Explicit(u8),
    Ratcheted,
}

#[derive(Debug, Clone, Copy)]
struct ModelSlot {
    key: ModelKey,
    created_at: Duration,
}

/// Observable state for oracle comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Current generation.
    pub current: Option<u64>,
    /// Timestamp of the current generation's key.
    pub current_created_at: Option<Duration>,
    /// Stored generations, ascending.
    pub generations: Vec<u64>,
    /// Every generation delivered to listeners, in order.
    pub notifications: Vec<u64>,
}

/// Model keystore - the reference implementation.
#[derive(Debug, Clone)]
pub struct KeyStoreModel {
    slots: BTreeMap<u64, ModelSlot>,
    current: Option<u64>,
    forward_secure: bool,
    now: Duration,
    notifications: Vec<u64>,
}

impl KeyStoreModel {
    /// Create an empty model.
    pub fn new(forward_secure: bool) -> Self {
        Self {
            slots: BTreeMap::new(),
            current: None,
            forward_secure,
            now: Duration::ZERO,
            notifications: Vec::new(),
        }
    }

    /// Model clock.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Apply an operation and return its expected result.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        match *op {
            Operation::SetKey { generation, key } => self.set_key(u64::from(generation), key),
            Operation::Rotate => self.rotate(),
            Operation::SetCurrent { generation } => self.set_current(u64::from(generation)),
            Operation::RotateByTime { lag_millis } => {
                let min_ts = self.now.saturating_sub(Duration::from_millis(u64::from(lag_millis)));
                OperationResult::KeepPolling(self.rotate_by_time(min_ts))
            },
            Operation::AdvanceTime { millis } => {
                self.now += Duration::from_millis(u64::from(millis));
                OperationResult::Ok
            },
            Operation::ResetKeys | Operation::Reset => {
                self.slots.clear();
                self.current = None;
                OperationResult::Ok
            },
        }
    }

    /// Extract observable state.
    pub fn observable_state(&self) -> ObservableState {
        ObservableState {
            current: self.current,
            current_created_at: self
                .current
                .and_then(|g| self.slots.get(&g))
                .map(|slot| slot.created_at),
            generations: self.slots.keys().copied().collect(),
            notifications: self.notifications.clone(),
        }
    }

    fn set_key(&mut self, generation: u64, key: u8) -> OperationResult {
        if self.current.is_some_and(|current| generation < current) {
            return OperationResult::Error(OperationError::AlreadySet);
        }

        let key = ModelKey::Explicit(key);
        if let Some(slot) = self.slots.get_mut(&generation) {
            if slot.key == key {
                return OperationResult::Error(OperationError::AlreadySet);
            }
            *slot = ModelSlot { key, created_at: self.now };
            return OperationResult::Ok;
        }

        self.slots.insert(generation, ModelSlot { key, created_at: self.now });
        if self.current.is_none() {
            self.current = Some(generation);
            self.notifications.push(generation);
        }
        OperationResult::Ok
    }

    fn rotate(&mut self) -> OperationResult {
        let Some(current) = self.current else {
            return OperationResult::Error(OperationError::NoKeys);
        };

        let explicit = current
            .checked_add(1)
            .and_then(|from| self.slots.range(from..).next().map(|(&g, _)| g));

        let next = match explicit {
            Some(next) => next,
            None if self.forward_secure => {
                let Some(next) = current.checked_add(1) else {
                    return OperationResult::Error(OperationError::NoMoreKeys);
                };
                let slot = ModelSlot { key: ModelKey::Ratcheted, created_at: self.now };
                self.slots.insert(next, slot);
                next
            },
            None => return OperationResult::Error(OperationError::NoMoreKeys),
        };

        self.switch_to(next);
        OperationResult::Rotated(next)
    }

    fn set_current(&mut self, generation: u64) -> OperationResult {
        if !self.slots.contains_key(&generation) {
            return OperationResult::Error(OperationError::NotFound);
        }
        if self.current != Some(generation) {
            self.switch_to(generation);
        }
        OperationResult::Ok
    }

    fn rotate_by_time(&mut self, min_ts: Duration) -> bool {
        let Some(current) = self.current else {
            return true;
        };

        let latest = self
            .slots
            .iter()
            .filter(|&(&g, slot)| g >= current && slot.created_at <= min_ts)
            .map(|(&g, _)| g)
            .max();
        let Some(latest) = latest else {
            return true;
        };

        let more = self.slots.keys().any(|&g| g > latest);
        if latest != current {
            self.switch_to(latest);
        }
        more
    }

    /// Make `generation` current, keep its immediate predecessor and
    /// everything newer, and notify.
    fn switch_to(&mut self, generation: u64) {
        self.current = Some(generation);

        let keep_from =
            self.slots.range(..generation).next_back().map_or(generation, |(&g, _)| g);
        self.slots.retain(|&g, _| g >= keep_from);

        self.notifications.push(generation);
    }
}
