//! Access counters: runtime readers-XOR-writer bookkeeping per resource.
//!
//! There is one [`AccessCounter`] per component type plus one for the entity
//! set. Before a system starts, the scheduler checks every counter it needs
//! and reserves them in the same critical section. After the system returns
//! the reservations are released.

use std::collections::HashMap;

use engine_component::{AccessMode, ComponentTypeId};

/// Tracks the current holders of one resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessCounter {
    /// Number of systems currently reading the resource.
    pub readers: u32,
    /// Whether a system currently writes the resource.
    pub has_writer: bool,
}

impl AccessCounter {
    /// Returns `true` if a request of `mode` can be granted right now.
    ///
    /// A write needs the resource to be completely free. A read only needs
    /// the absence of a writer.
    #[must_use]
    pub fn can_grant(&self, mode: AccessMode) -> bool {
        match mode {
            AccessMode::Read => !self.has_writer,
            AccessMode::Write => !self.has_writer && self.readers == 0,
        }
    }

    /// Register a holder of `mode`.
    pub fn acquire(&mut self, mode: AccessMode) {
        debug_assert!(self.can_grant(mode), "conflicting {mode:?} access acquired");
        match mode {
            AccessMode::Read => self.readers += 1,
            AccessMode::Write => self.has_writer = true,
        }
    }

    /// Drop a holder of `mode`.
    pub fn release(&mut self, mode: AccessMode) {
        match mode {
            AccessMode::Read => {
                debug_assert!(self.readers > 0, "read access released twice");
                self.readers = self.readers.saturating_sub(1);
            }
            AccessMode::Write => {
                debug_assert!(self.has_writer, "write access released twice");
                self.has_writer = false;
            }
        }
    }

    /// Returns `true` if nobody holds the resource.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.readers == 0 && !self.has_writer
    }
}

/// All access counters plus the global exclusivity flag.
#[derive(Debug, Default)]
pub struct AccessTracker {
    components: HashMap<ComponentTypeId, AccessCounter>,
    entities: AccessCounter,
    exclusive: bool,
}

impl AccessTracker {
    /// Create a tracker with every resource free.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the declared accesses can all be granted.
    ///
    /// Always `false` while an exclusive system runs.
    #[must_use]
    pub fn can_grant(&self, components: &[(ComponentTypeId, AccessMode)], entities: AccessMode) -> bool {
        if self.exclusive || !self.entities.can_grant(entities) {
            return false;
        }

        components.iter().all(|(id, mode)| {
            self.components
                .get(id)
                .is_none_or(|counter| counter.can_grant(*mode))
        })
    }

    /// Reserve the declared accesses. Callers check [`Self::can_grant`] first,
    /// under the same lock.
    pub fn acquire(
        &mut self,
        components: &[(ComponentTypeId, AccessMode)],
        entities: AccessMode,
        exclusive: bool,
    ) {
        for (id, mode) in components {
            self.components.entry(*id).or_default().acquire(*mode);
        }
        self.entities.acquire(entities);
        if exclusive {
            self.exclusive = true;
        }
    }

    /// Undo [`Self::acquire`].
    pub fn release(
        &mut self,
        components: &[(ComponentTypeId, AccessMode)],
        entities: AccessMode,
        exclusive: bool,
    ) {
        for (id, mode) in components {
            if let Some(counter) = self.components.get_mut(id) {
                counter.release(*mode);
            }
        }
        self.entities.release(entities);
        if exclusive {
            self.exclusive = false;
        }
    }

    /// Returns `true` while an exclusive system runs.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Returns `true` if any resource is currently held.
    #[must_use]
    pub fn has_ongoing_access(&self) -> bool {
        self.exclusive
            || !self.entities.is_free()
            || self.components.values().any(|counter| !counter.is_free())
    }

    /// The counter for one component, if it was ever reserved.
    #[must_use]
    pub fn component(&self, id: ComponentTypeId) -> Option<&AccessCounter> {
        self.components.get(&id)
    }

    /// The entity counter.
    #[must_use]
    pub fn entities(&self) -> &AccessCounter {
        &self.entities
    }
}
