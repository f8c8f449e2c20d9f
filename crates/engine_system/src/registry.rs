//! System registry: per-system metadata records keyed by [`SystemId`].
//!
//! The registry owns every registered system together with its bookkeeping:
//! raw ordering data from the descriptor, the derived dependency/dependent/
//! blacklist sets, declared access, priority and performance estimates, and
//! the transient per-tick counters. Edges are stored as id sets; records never
//! point at each other.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use engine_component::{AccessMode, ComponentTypeId};

use crate::descriptor::{SequenceTag, SystemDescriptor};
use crate::profiler::PerformanceProfile;
use crate::system::System;

/// Identifies a registered system. Ids are handed out in increasing order and
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SystemId(pub u64);

impl std::fmt::Display for SystemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "System({})", self.0)
    }
}

/// Bookkeeping for one registered system.
pub(crate) struct SystemRecord {
    pub id: SystemId,
    pub name: String,
    pub descriptor: SystemDescriptor,
    pub component_access: Vec<(ComponentTypeId, AccessMode)>,
    pub entity_access: AccessMode,
    pub requires_exclusive: bool,
    pub requires_main_thread: bool,

    // Symmetric: b ∈ a.dependents ⇔ a ∈ b.dependencies, and likewise for blacklist.
    pub dependencies: BTreeSet<SystemId>,
    pub dependents: BTreeSet<SystemId>,
    pub blacklist: BTreeSet<SystemId>,

    pub priority: u64,
    pub priority_stale: bool,
    pub profile: PerformanceProfile,

    pub remaining_dependencies: u32,
    pub blacklist_count: u32,
    pub last_run: Option<Instant>,

    /// `None` only while a worker is executing the system.
    pub system: Option<Box<dyn System>>,
}

impl SystemRecord {
    fn new(id: SystemId, system: Box<dyn System>, profiler_samples: usize) -> Self {
        let descriptor = system.descriptor();
        let profile = PerformanceProfile::new(profiler_samples);

        Self {
            id,
            name: system.name().to_string(),
            component_access: descriptor.access.component_access(),
            entity_access: descriptor.access.entity_access(),
            requires_exclusive: descriptor.requires_exclusive,
            requires_main_thread: descriptor.requires_main_thread,
            descriptor,
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            blacklist: BTreeSet::new(),
            priority: profile.estimate_nanos(),
            priority_stale: true,
            profile,
            remaining_dependencies: 0,
            blacklist_count: 0,
            last_run: None,
            system: Some(system),
        }
    }

    /// Returns `true` if the stored system is of type `T`.
    fn is<T: System>(&self) -> bool {
        self.system
            .as_deref()
            .is_some_and(|system| system.as_any().is::<T>())
    }
}

impl std::fmt::Debug for SystemRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .field("blacklist", &self.blacklist)
            .field("priority", &self.priority)
            .field("performance", &self.profile.estimate())
            .finish_non_exhaustive()
    }
}

/// Registry of all systems known to a scheduler.
#[derive(Debug)]
pub(crate) struct SystemTable {
    records: BTreeMap<SystemId, SystemRecord>,
    /// Systems carrying each sequencing tag.
    tags: HashMap<SequenceTag, Vec<SystemId>>,
    /// Dependency order computed by the last successful graph rebuild.
    pub topo_order: Vec<SystemId>,
    next_id: u64,
    changed: bool,
    profiler_samples: usize,
}

impl SystemTable {
    /// Create a new empty registry.
    pub fn new(profiler_samples: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            tags: HashMap::new(),
            topo_order: Vec::new(),
            next_id: 0,
            changed: false,
            profiler_samples,
        }
    }

    /// Register a system under a fresh id and call its `on_added` hook.
    pub fn insert(&mut self, system: Box<dyn System>) -> SystemId {
        let id = SystemId(self.next_id);
        self.next_id += 1;

        let record = SystemRecord::new(id, system, self.profiler_samples);
        for tag in &record.descriptor.sequencing_tags {
            let carriers = self.tags.entry(*tag).or_default();
            if !carriers.contains(&id) {
                carriers.push(id);
            }
        }

        let record = self.records.entry(id).or_insert(record);
        self.changed = true;

        if let Some(system) = record.system.as_deref_mut() {
            system.on_added();
        }
        id
    }

    /// Remove a system. Returns the system itself; hooks are the caller's job.
    pub fn remove(&mut self, id: SystemId) -> Option<Box<dyn System>> {
        let record = self.records.remove(&id)?;
        self.forget(&record);
        record.system
    }

    /// Remove a system only if it is of type `T`.
    pub fn take<T: System>(&mut self, id: SystemId) -> Option<Box<dyn System>> {
        if !self.records.get(&id)?.is::<T>() {
            return None;
        }
        self.remove(id)
    }

    fn forget(&mut self, record: &SystemRecord) {
        for tag in &record.descriptor.sequencing_tags {
            if let Some(carriers) = self.tags.get_mut(tag) {
                carriers.retain(|carrier| *carrier != record.id);
                if carriers.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
        self.topo_order.retain(|id| *id != record.id);
        self.changed = true;
    }

    /// Typed mutable access to a stored system.
    pub fn get_mut<T: System>(&mut self, id: SystemId) -> Option<&mut T> {
        self.records
            .get_mut(&id)?
            .system
            .as_deref_mut()?
            .as_any_mut()
            .downcast_mut::<T>()
    }

    pub fn contains(&self, id: SystemId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, id: SystemId) -> Option<&SystemRecord> {
        self.records.get(&id)
    }

    pub fn record_mut(&mut self, id: SystemId) -> Option<&mut SystemRecord> {
        self.records.get_mut(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &SystemRecord> {
        self.records.values()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut SystemRecord> {
        self.records.values_mut()
    }

    pub fn ids(&self) -> Vec<SystemId> {
        self.records.keys().copied().collect()
    }

    /// Systems carrying `tag`.
    pub fn carriers(&self, tag: SequenceTag) -> &[SystemId] {
        self.tags.get(&tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether the registered set changed since the last graph rebuild.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn mark_rebuilt(&mut self) {
        self.changed = false;
    }
}

#[cfg(test)]
mod tests {
    use crate::context::TickContext;
    use crate::system::FnSystem;

    use super::*;

    struct Hooked {
        added: bool,
    }

    impl System for Hooked {
        fn descriptor(&self) -> SystemDescriptor {
            SystemDescriptor::new().tag(SequenceTag::named("hooked"))
        }

        fn run(&mut self, _ctx: &TickContext) {}

        fn on_added(&mut self) {
            self.added = true;
        }
    }

    fn plain(name: &str, tag: &str) -> Box<dyn System> {
        Box::new(FnSystem::new(
            name,
            SystemDescriptor::new().tag(SequenceTag::named(tag)),
            |_: &TickContext| {},
        ))
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut table = SystemTable::new(1);
        let a = table.insert(plain("a", "t"));
        assert!(table.remove(a).is_some());
        let b = table.insert(plain("b", "t"));
        assert_ne!(a, b);
        assert_eq!(b, SystemId(1));
    }

    #[test]
    fn test_insert_marks_changed_and_calls_hook() {
        let mut table = SystemTable::new(1);
        let id = table.insert(Box::new(Hooked { added: false }));
        assert!(table.is_changed());
        assert!(table.get_mut::<Hooked>(id).is_some_and(|h| h.added));
    }

    #[test]
    fn test_tags_track_carriers() {
        let mut table = SystemTable::new(1);
        let a = table.insert(plain("a", "physics"));
        let b = table.insert(plain("b", "physics"));
        assert_eq!(table.carriers(SequenceTag::named("physics")), &[a, b]);

        table.remove(a);
        assert_eq!(table.carriers(SequenceTag::named("physics")), &[b]);

        table.remove(b);
        assert!(table.carriers(SequenceTag::named("physics")).is_empty());
    }

    #[test]
    fn test_take_checks_type() {
        let mut table = SystemTable::new(1);
        let id = table.insert(Box::new(Hooked { added: false }));

        assert!(table.take::<FnSystem<fn(&TickContext)>>(id).is_none());
        assert!(table.contains(id));

        assert!(table.take::<Hooked>(id).is_some());
        assert!(!table.contains(id));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_record_derives_access() {
        let velocity = ComponentTypeId::from_name("Velocity");
        let mut table = SystemTable::new(1);
        let id = table.insert(Box::new(FnSystem::new(
            "spawner",
            SystemDescriptor::new().write(velocity).add_remove_entities().exclusive(),
            |_: &TickContext| {},
        )));

        let record = table.record(id).unwrap();
        assert_eq!(record.name, "spawner");
        assert_eq!(record.component_access, vec![(velocity, AccessMode::Write)]);
        assert_eq!(record.entity_access, AccessMode::Write);
        assert!(record.requires_exclusive);
        assert!(!record.requires_main_thread);
        assert_eq!(record.priority, 1);
    }
}
