//! # Timelocked Parameter Slots
//!
//! A [`ParamSlot`] holds the value currently in force plus at most one
//! pending replacement. Changing a parameter is always two steps:
//!
//! ```text
//!            stage(v, now)                 commit(now, delay)
//!   Idle ─────────────────▶ Staged{since} ────────────────────▶ Idle
//!     ▲                        │   │                     (active = v)
//!     └──────── cancel ────────┘   └─ stage(v') restarts the clock
//! ```
//!
//! A commit only succeeds once `now - since >= delay`, where `delay` is
//! whatever governance delay is in force at commit time. Observers can
//! therefore see every change coming for at least that long.

use std::hash::Hash;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::Timestamp;

/// Where a slot is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Idle,
    Staged { since: Timestamp },
}

/// One governed parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSlot<T> {
    active: T,
    staged: Option<T>,
    staged_at: Option<Timestamp>,
}

impl<T: Default + Clone> Default for ParamSlot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone> ParamSlot<T> {
    /// A slot whose initial value is already in force.
    pub fn new(active: T) -> Self {
        Self {
            active,
            staged: None,
            staged_at: None,
        }
    }

    /// The value in force.
    pub fn active(&self) -> &T {
        &self.active
    }

    /// The pending value, if any.
    pub fn staged(&self) -> Option<&T> {
        self.staged.as_ref()
    }

    pub fn staged_at(&self) -> Option<Timestamp> {
        self.staged_at
    }

    pub fn state(&self) -> SlotState {
        match self.staged_at {
            Some(since) if self.staged.is_some() => SlotState::Staged { since },
            _ => SlotState::Idle,
        }
    }

    /// Earliest commit time under `delay`, if something is staged.
    pub fn ready_at(&self, delay: u64) -> Option<Timestamp> {
        match self.state() {
            SlotState::Staged { since } => Some(since.saturating_add(delay)),
            SlotState::Idle => None,
        }
    }

    /// Replaces any pending value and restarts the clock.
    pub fn stage(&mut self, value: T, now: Timestamp) {
        self.staged = Some(value);
        self.staged_at = Some(now);
    }

    /// Promotes the pending value once `delay` has elapsed.
    pub fn commit(&mut self, now: Timestamp, delay: u64) -> ProtocolResult<&T> {
        self.commit_with(now, delay, |_, staged| staged)
    }

    /// Like [`commit`](Self::commit), but the new active value is
    /// `merge(&active, staged)`.
    pub fn commit_with<F>(&mut self, now: Timestamp, delay: u64, merge: F) -> ProtocolResult<&T>
    where
        F: FnOnce(&T, T) -> T,
    {
        let since = match self.state() {
            SlotState::Staged { since } => since,
            SlotState::Idle => return Err(ProtocolError::NothingStaged),
        };
        if now.saturating_sub(since) < delay {
            return Err(ProtocolError::TimelockNotElapsed {
                ready_at: since.saturating_add(delay),
                now,
            });
        }
        let staged = self.staged.take().ok_or(ProtocolError::NothingStaged)?;
        self.staged_at = None;
        self.active = merge(&self.active, staged);
        Ok(&self.active)
    }

    /// Drops the pending value. Returns `false` if nothing was staged.
    pub fn cancel(&mut self) -> bool {
        self.staged_at = None;
        self.staged.take().is_some()
    }

    /// Rewrites the active value in place, bypassing the timelock. Reserved
    /// for changes that only ever reduce authority (revocations).
    pub(crate) fn update_active<F: FnOnce(&mut T)>(&mut self, f: F) {
        f(&mut self.active)
    }

    pub(crate) fn update_staged<F: FnOnce(&mut T)>(&mut self, f: F) {
        if let Some(staged) = self.staged.as_mut() {
            f(staged)
        }
    }
}

// ---------------------------------------------------------------------------
// ParameterStore
// ---------------------------------------------------------------------------

/// A keyed collection of [`ParamSlot`]s.
///
/// Each slot lives in its own `DashMap` entry: staging or committing one key
/// never blocks operations on another.
#[derive(Debug)]
pub struct ParameterStore<K, T>
where
    K: Eq + Hash,
{
    slots: DashMap<K, ParamSlot<T>>,
}

impl<K, T> Default for ParameterStore<K, T>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<K, T> ParameterStore<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Default,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `active` for `key`, discarding anything pending.
    pub fn init(&self, key: K, active: T) {
        self.slots.insert(key, ParamSlot::new(active));
    }

    /// Forgets `key` entirely, pending value included.
    pub fn remove(&self, key: &K) -> bool {
        self.slots.remove(key).is_some()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    /// Active value for `key`; unknown keys read as `T::default()`.
    pub fn active(&self, key: &K) -> T {
        self.slots
            .get(key)
            .map(|slot| slot.active().clone())
            .unwrap_or_default()
    }

    /// Pending value for `key`, if any.
    pub fn staged(&self, key: &K) -> Option<T> {
        self.slots.get(key).and_then(|slot| slot.staged().cloned())
    }

    pub fn state(&self, key: &K) -> SlotState {
        self.slots
            .get(key)
            .map(|slot| slot.state())
            .unwrap_or(SlotState::Idle)
    }

    /// Stages `value` for `key` and returns the time it becomes committable.
    pub fn stage(&self, key: K, value: T, now: Timestamp, delay: u64) -> Timestamp {
        let mut slot = self.slots.entry(key).or_default();
        slot.stage(value, now);
        now.saturating_add(delay)
    }

    /// Commits the pending value for `key` and returns the new active value.
    pub fn commit(&self, key: &K, now: Timestamp, delay: u64) -> ProtocolResult<T> {
        self.commit_with(key, now, delay, |_, staged| staged)
    }

    pub fn commit_with<F>(&self, key: &K, now: Timestamp, delay: u64, merge: F) -> ProtocolResult<T>
    where
        F: FnOnce(&T, T) -> T,
    {
        let mut slot = self.slots.get_mut(key).ok_or(ProtocolError::NothingStaged)?;
        slot.commit_with(now, delay, merge).cloned()
    }

    /// Drops the pending value for `key`.
    pub fn cancel(&self, key: &K) -> ProtocolResult<()> {
        let cancelled = self
            .slots
            .get_mut(key)
            .map(|mut slot| slot.cancel())
            .unwrap_or(false);
        if cancelled {
            Ok(())
        } else {
            Err(ProtocolError::NothingStaged)
        }
    }

    pub(crate) fn update(&self, key: K, f: impl FnOnce(&mut ParamSlot<T>)) {
        let mut slot = self.slots.entry(key).or_default();
        f(&mut slot)
    }

    /// Keys whose active value satisfies `predicate`.
    pub fn keys_where<F: Fn(&T) -> bool>(&self, predicate: F) -> Vec<K> {
        self.slots
            .iter()
            .filter(|entry| predicate(entry.value().active()))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: u64 = 86_400;

    #[test]
    fn test_new_slot_is_idle() {
        let slot = ParamSlot::new(5u64);
        assert_eq!(*slot.active(), 5);
        assert_eq!(slot.staged(), None);
        assert_eq!(slot.state(), SlotState::Idle);
        assert_eq!(slot.ready_at(DELAY), None);
    }

    #[test]
    fn test_commit_before_delay_fails() {
        let mut slot = ParamSlot::new(1u64);
        slot.stage(2, 1_000);
        let err = slot.commit(1_000 + DELAY - 1, DELAY).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::TimelockNotElapsed {
                ready_at: 1_000 + DELAY,
                now: 1_000 + DELAY - 1
            }
        );
        assert_eq!(*slot.active(), 1);
        assert_eq!(slot.staged(), Some(&2));
    }

    #[test]
    fn test_commit_exactly_at_delay_succeeds() {
        let mut slot = ParamSlot::new(1u64);
        slot.stage(2, 1_000);
        assert_eq!(*slot.commit(1_000 + DELAY, DELAY).unwrap(), 2);
        assert_eq!(slot.state(), SlotState::Idle);
        assert_eq!(slot.staged(), None);
    }

    #[test]
    fn test_second_commit_finds_nothing_staged() {
        let mut slot = ParamSlot::new(1u64);
        slot.stage(2, 1_000);
        slot.commit(1_000 + DELAY, DELAY).unwrap();
        assert_eq!(slot.commit(1_000 + 2 * DELAY, DELAY), Err(ProtocolError::NothingStaged));
        assert_eq!(*slot.active(), 2);

        let store: ParameterStore<u64, u64> = ParameterStore::new();
        store.init(7, 1);
        store.stage(7, 3, 1_000, DELAY);
        assert_eq!(store.commit(&7, 1_000 + DELAY, DELAY).unwrap(), 3);
        assert_eq!(store.commit(&7, 1_000 + DELAY, DELAY), Err(ProtocolError::NothingStaged));
        assert_eq!(store.active(&7), 3);
    }

    #[test]
    fn test_commit_without_stage() {
        let mut slot = ParamSlot::new(1u64);
        assert_eq!(slot.commit(10, 0), Err(ProtocolError::NothingStaged));
    }

    #[test]
    fn test_restage_restarts_clock() {
        let mut slot = ParamSlot::new(1u64);
        slot.stage(2, 1_000);
        slot.stage(3, 1_000 + DELAY - 10);
        assert!(slot.commit(1_000 + DELAY, DELAY).is_err());
        assert_eq!(*slot.commit(1_000 + 2 * DELAY, DELAY).unwrap(), 3);
    }

    #[test]
    fn test_cancel() {
        let mut slot = ParamSlot::new(1u64);
        assert!(!slot.cancel());
        slot.stage(2, 0);
        assert!(slot.cancel());
        assert_eq!(slot.state(), SlotState::Idle);
        assert_eq!(slot.commit(DELAY, DELAY), Err(ProtocolError::NothingStaged));
    }

    #[test]
    fn test_zero_delay_commits_immediately() {
        let mut slot = ParamSlot::new(1u64);
        slot.stage(9, 50);
        assert_eq!(*slot.commit(50, 0).unwrap(), 9);
    }

    #[test]
    fn test_commit_with_merges() {
        let mut slot = ParamSlot::new(0b001u8);
        slot.stage(0b100, 0);
        assert_eq!(*slot.commit_with(DELAY, DELAY, |a, s| a | s).unwrap(), 0b101);
    }

    #[test]
    fn test_store_keys_are_independent() {
        let store: ParameterStore<u64, u64> = ParameterStore::new();
        store.init(1, 10);
        store.init(2, 20);

        let ready = store.stage(1, 11, 100, DELAY);
        assert_eq!(ready, 100 + DELAY);
        assert_eq!(store.staged(&1), Some(11));
        assert_eq!(store.staged(&2), None);
        assert_eq!(store.state(&2), SlotState::Idle);

        assert_eq!(store.commit(&1, 100 + DELAY, DELAY).unwrap(), 11);
        assert_eq!(store.active(&1), 11);
        assert_eq!(store.active(&2), 20);
    }

    #[test]
    fn test_store_unknown_key_defaults() {
        let store: ParameterStore<u64, u64> = ParameterStore::new();
        assert_eq!(store.active(&42), 0);
        assert_eq!(store.commit(&42, 0, 0), Err(ProtocolError::NothingStaged));
        assert_eq!(store.cancel(&42), Err(ProtocolError::NothingStaged));
    }

    #[test]
    fn test_keys_where() {
        let store: ParameterStore<u64, u64> = ParameterStore::new();
        store.init(1, 5);
        store.init(2, 0);
        store.init(3, 7);
        let mut keys = store.keys_where(|v| *v > 0);
        keys.sort();
        assert_eq!(keys, vec![1, 3]);
    }

    #[test]
    fn test_remove_forgets_pending_value() {
        let store: ParameterStore<u64, u64> = ParameterStore::new();
        store.init(1, 5);
        store.stage(1, 6, 0, DELAY);
        assert!(store.remove(&1));
        assert!(!store.contains(&1));
        assert_eq!(store.staged(&1), None);
        assert_eq!(store.commit(&1, DELAY, DELAY), Err(ProtocolError::NothingStaged));
        assert!(!store.remove(&1));
    }
}
