//! Fixed-capacity handler slot table.
//!
//! Per-command resources (open file transfers, progress trackers) live in a
//! slot arena of fixed capacity. Insertion beyond capacity fails
//! deterministically without touching existing slots - the table never
//! grows.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Result, WireError};

/// Slot count per command session.
pub const HANDLER_CAPACITY: usize = 10;

/// A named per-command resource, owned exclusively by its slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Handler {
    pub name: String,
    pub is_error: bool,
    pub file: Option<PathBuf>,
    pub attrs: HashMap<String, String>,
}

impl Handler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Index into the slot arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(usize);

/// The slot arena.
#[derive(Debug)]
pub struct HandlerTable {
    slots: [Option<Handler>; HANDLER_CAPACITY],
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerTable {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Claim the first free slot. On a full table, fails without mutating
    /// anything.
    pub fn insert(&mut self, handler: Handler) -> Result<HandlerId> {
        let free = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(WireError::HandlerCapacity {
                capacity: HANDLER_CAPACITY,
            })?;
        self.slots[free] = Some(handler);
        Ok(HandlerId(free))
    }

    pub fn get(&self, id: HandlerId) -> Option<&Handler> {
        self.slots.get(id.0).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: HandlerId) -> Option<&mut Handler> {
        self.slots.get_mut(id.0).and_then(|s| s.as_mut())
    }

    /// Linear lookup by name.
    pub fn find(&self, name: &str) -> Option<(HandlerId, &Handler)> {
        self.slots
            .iter()
            .enumerate()
            .find_map(|(i, s)| s.as_ref().filter(|h| h.name == name).map(|h| (HandlerId(i), h)))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Handler> {
        self.slots
            .iter_mut()
            .find_map(|s| s.as_mut().filter(|h| h.name == name))
    }

    /// Free a slot, returning its handler.
    pub fn remove(&mut self, id: HandlerId) -> Option<Handler> {
        self.slots.get_mut(id.0).and_then(|s| s.take())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when any slot holds an error-flagged handler.
    pub fn any_errored(&self) -> bool {
        self.slots.iter().flatten().any(|h| h.is_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_beyond_capacity_fails_cleanly() {
        let mut table = HandlerTable::new();
        let mut ids = Vec::new();
        for i in 0..HANDLER_CAPACITY {
            ids.push(table.insert(Handler::new(format!("h{i}"))).unwrap());
        }
        assert_eq!(table.len(), HANDLER_CAPACITY);

        let err = table.insert(Handler::new("overflow")).unwrap_err();
        assert!(matches!(
            err,
            WireError::HandlerCapacity {
                capacity: HANDLER_CAPACITY
            }
        ));

        // All ten originals untouched.
        assert_eq!(table.len(), HANDLER_CAPACITY);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(table.get(*id).unwrap().name, format!("h{i}"));
        }
    }

    #[test]
    fn test_removed_slot_is_reused() {
        let mut table = HandlerTable::new();
        let first = table.insert(Handler::new("a")).unwrap();
        let _second = table.insert(Handler::new("b")).unwrap();

        let removed = table.remove(first).unwrap();
        assert_eq!(removed.name, "a");
        assert!(table.remove(first).is_none());

        let reused = table.insert(Handler::new("c")).unwrap();
        assert_eq!(reused, first);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_find_by_name() {
        let mut table = HandlerTable::new();
        table.insert(Handler::new("sync")).unwrap();
        let mut errored = Handler::new("print");
        errored.is_error = true;
        table.insert(errored).unwrap();

        let (_, h) = table.find("print").unwrap();
        assert!(h.is_error);
        assert!(table.find("missing").is_none());
        assert!(table.any_errored());

        table.find_mut("print").unwrap().is_error = false;
        assert!(!table.any_errored());
    }
}
