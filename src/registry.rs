//! Process-wide table resolving opaque [Token]s to live readers.
//!
//! The engine hands our callbacks nothing but a `void *`, so the callbacks
//! carry a token instead of a reference and look the reader up here on every
//! invocation. Slots are generation-checked: once a reader is deregistered its
//! token never resolves again, even if the slot gets reused.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::trace;

use crate::bridge::Callbacks;

/// Opaque handle identifying one [ArchiveReader](crate::ArchiveReader) in the
/// registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

impl Token {
    fn new(index: u32, generation: u32) -> Self {
        Self((u64::from(generation) << 32) | u64::from(index))
    }

    fn index(self) -> usize {
        (self.0 & u64::from(u32::MAX)) as usize
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The raw token value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether this token currently resolves to a live reader. False once
    /// the reader has been freed or dropped.
    pub fn is_registered(self) -> bool {
        lock().get(self).is_some()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

struct Slot {
    generation: u32,
    entry: Option<Arc<dyn Callbacks>>,
}

#[derive(Default)]
struct Registry {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    slots: Vec::new(),
    free: Vec::new(),
});

fn lock() -> MutexGuard<'static, Registry> {
    // the map stays consistent even if a holder panicked
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Registry {
    fn insert(&mut self, entry: Arc<dyn Callbacks>) -> Token {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return Token::new(index, slot.generation);
        }

        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        Token::new(index, 0)
    }

    fn get(&self, token: Token) -> Option<&Arc<dyn Callbacks>> {
        self.slots
            .get(token.index())
            .filter(|slot| slot.generation == token.generation())
            .and_then(|slot| slot.entry.as_ref())
    }

    fn remove(&mut self, token: Token) -> Option<Arc<dyn Callbacks>> {
        let slot = self.slots.get_mut(token.index())?;
        if slot.generation != token.generation() {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        // a slot whose generation wrapped around is retired for good
        if slot.generation != 0 {
            self.free.push(token.index() as u32);
        }
        Some(entry)
    }
}

/// Adds a reader's callback target and returns its token.
pub(crate) fn register(entry: Arc<dyn Callbacks>) -> Token {
    let token = lock().insert(entry);
    trace!(%token, "registered reader");
    token
}

/// Looks a token up. The lock is released before the caller touches the
/// returned target.
pub(crate) fn resolve(token: Token) -> Option<Arc<dyn Callbacks>> {
    lock().get(token).cloned()
}

/// Removes a token. Returns false if it was not registered.
pub(crate) fn deregister(token: Token) -> bool {
    // drop the target outside of the lock
    let removed = lock().remove(token);
    trace!(%token, removed = removed.is_some(), "deregistered reader");
    removed.is_some()
}
