//! Host-facing character registry
//!
//! Every character lives in a `CharacterEngine` that knows nothing about
//! globals. The registry maps opaque handles to engines so the WASM
//! bindings can stay thin wrappers that look an engine up and call into it.
//! Several characters may be alive at once; none share state.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::engine::CharacterEngine;

/// Handles start at 1 so hosts can use 0 as "no character"
pub struct CharacterRegistry {
    engines: HashMap<u32, CharacterEngine>,
    next_handle: u32,
}

impl Default for CharacterRegistry {
    fn default() -> Self {
        Self {
            engines: HashMap::new(),
            next_handle: 1,
        }
    }
}

impl CharacterRegistry {
    /// Store an engine under a handle no live character is using.
    ///
    /// The counter wraps after 2^32 allocations and skips 0 and live handles.
    pub fn insert(&mut self, engine: CharacterEngine) -> u32 {
        let mut handle = self.next_handle;
        while self.engines.contains_key(&handle) {
            handle = handle.wrapping_add(1).max(1);
        }
        self.next_handle = handle.wrapping_add(1).max(1);
        self.engines.insert(handle, engine);
        handle
    }

    pub fn remove(&mut self, handle: u32) -> Option<CharacterEngine> {
        self.engines.remove(&handle)
    }

    pub fn get(&self, handle: u32) -> Option<&CharacterEngine> {
        self.engines.get(&handle)
    }

    pub fn get_mut(&mut self, handle: u32) -> Option<&mut CharacterEngine> {
        self.engines.get_mut(&handle)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

// Global state access, thin wrapper for WASM bindings only
thread_local! {
    static REGISTRY: RefCell<CharacterRegistry> = RefCell::new(CharacterRegistry::default());
}

/// Register an engine and return its handle
pub fn register(engine: CharacterEngine) -> u32 {
    REGISTRY.with(|registry| registry.borrow_mut().insert(engine))
}

/// Drop the engine behind `handle`; false if it did not exist
pub fn unregister(handle: u32) -> bool {
    REGISTRY.with(|registry| registry.borrow_mut().remove(handle).is_some())
}

/// Execute a closure with immutable access to one character
///
/// Returns None if the handle is unknown
pub fn with_engine<F, R>(handle: u32, f: F) -> Option<R>
where
    F: FnOnce(&CharacterEngine) -> R,
{
    REGISTRY.with(|registry| {
        let borrowed = registry.borrow();
        borrowed.get(handle).map(f)
    })
}

/// Execute a closure with mutable access to one character
///
/// Returns None if the handle is unknown
pub fn with_engine_mut<F, R>(handle: u32, f: F) -> Option<R>
where
    F: FnOnce(&mut CharacterEngine) -> R,
{
    REGISTRY.with(|registry| {
        let mut borrowed = registry.borrow_mut();
        borrowed.get_mut(handle).map(f)
    })
}
