//! Declared data access for systems.
//!
//! An [`AccessDescriptor`] declares which component types a system reads,
//! writes, or adds/removes, and whether it mutates entities. The scheduler
//! uses these declarations to reserve per-resource access counters before a
//! system starts, so two systems with conflicting access never overlap.

use serde::{Deserialize, Serialize};

use crate::component::ComponentTypeId;

/// How a resource (a component type, or "entities" as a whole) is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessMode {
    /// Shared, immutable access. Any number of readers may coexist.
    Read,
    /// Exclusive, mutable access. A writer excludes every other holder.
    Write,
}

impl AccessMode {
    /// Returns `true` if holding `self` and `other` at the same time on one
    /// resource would be a conflict.
    #[must_use]
    pub fn conflicts_with(self, other: AccessMode) -> bool {
        self == AccessMode::Write || other == AccessMode::Write
    }
}

/// Describes the data access requirements of a system.
///
/// Systems declare their access at registration time. The scheduler uses
/// this information to:
///
/// 1. Reserve component access counters while the system runs.
/// 2. Reserve the shared entity counter (read by every system, written by
///    systems that create, destroy, or re-index entities).
/// 3. Report static conflicts between systems for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDescriptor {
    /// Component types the system reads immutably.
    pub reads: Vec<ComponentTypeId>,
    /// Component types the system writes (mutable access).
    pub writes: Vec<ComponentTypeId>,
    /// Component types the system adds to or removes from entities.
    pub add_remove: Vec<ComponentTypeId>,
    /// The system modifies existing entity ids in some way.
    pub modifies_entities: bool,
    /// The system creates or destroys entities.
    pub add_remove_entities: bool,
}

impl AccessDescriptor {
    /// Create a new empty access descriptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a read-only component requirement.
    #[must_use]
    pub fn read(mut self, type_id: ComponentTypeId) -> Self {
        self.reads.push(type_id);
        self
    }

    /// Add a mutable component requirement.
    #[must_use]
    pub fn write(mut self, type_id: ComponentTypeId) -> Self {
        self.writes.push(type_id);
        self
    }

    /// Declare that the system adds or removes this component.
    #[must_use]
    pub fn add_remove(mut self, type_id: ComponentTypeId) -> Self {
        self.add_remove.push(type_id);
        self
    }

    /// Declare that the system modifies existing entities.
    #[must_use]
    pub fn modifies_entities(mut self) -> Self {
        self.modifies_entities = true;
        self
    }

    /// Declare that the system creates or destroys entities.
    #[must_use]
    pub fn add_remove_entities(mut self) -> Self {
        self.add_remove_entities = true;
        self
    }

    /// Returns the access mode for every component this system touches.
    ///
    /// Writes and add/remove declarations map to [`AccessMode::Write`]. A
    /// component declared more than once appears once, with the strongest
    /// mode. The result is sorted by component id.
    #[must_use]
    pub fn component_access(&self) -> Vec<(ComponentTypeId, AccessMode)> {
        let mut access: Vec<(ComponentTypeId, AccessMode)> = Vec::new();

        let declared = self
            .reads
            .iter()
            .map(|&id| (id, AccessMode::Read))
            .chain(self.writes.iter().map(|&id| (id, AccessMode::Write)))
            .chain(self.add_remove.iter().map(|&id| (id, AccessMode::Write)));

        for (id, mode) in declared {
            match access.iter_mut().find(|(existing, _)| *existing == id) {
                Some((_, existing_mode)) => *existing_mode = (*existing_mode).max(mode),
                None => access.push((id, mode)),
            }
        }

        access.sort_unstable();
        access
    }

    /// Returns how this system accesses the entity set as a whole.
    #[must_use]
    pub fn entity_access(&self) -> AccessMode {
        if self.modifies_entities || self.add_remove_entities {
            AccessMode::Write
        } else {
            AccessMode::Read
        }
    }

    /// Checks whether this declaration conflicts with another.
    ///
    /// Two declarations conflict when one writes a component type that the
    /// other touches, or when either mutates entities:
    ///
    /// ```text
    /// A.writes ∩ (B.reads ∪ B.writes) ≠ ∅  OR
    /// B.writes ∩ (A.reads ∪ A.writes) ≠ ∅  OR
    /// A.entity = Write  OR  B.entity = Write
    /// ```
    #[must_use]
    pub fn conflicts_with(&self, other: &AccessDescriptor) -> bool {
        if self.entity_access().conflicts_with(other.entity_access()) {
            return true;
        }

        let theirs = other.component_access();
        self.component_access().iter().any(|(id, mode)| {
            theirs
                .iter()
                .any(|(other_id, other_mode)| other_id == id && mode.conflicts_with(*other_mode))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSFORM: ComponentTypeId = ComponentTypeId(1);
    const VELOCITY: ComponentTypeId = ComponentTypeId(2);
    const AI_STATE: ComponentTypeId = ComponentTypeId(3);

    #[test]
    fn test_no_conflict_both_read() {
        let q1 = AccessDescriptor::new().read(TRANSFORM);
        let q2 = AccessDescriptor::new().read(TRANSFORM);

        assert!(!q1.conflicts_with(&q2));
    }

    #[test]
    fn test_conflict_read_vs_write() {
        let q1 = AccessDescriptor::new().read(TRANSFORM);
        let q2 = AccessDescriptor::new().write(TRANSFORM);

        assert!(q1.conflicts_with(&q2));
        assert!(q2.conflicts_with(&q1));
    }

    #[test]
    fn test_conflict_write_vs_write() {
        let q1 = AccessDescriptor::new().write(VELOCITY);
        let q2 = AccessDescriptor::new().write(VELOCITY);

        assert!(q1.conflicts_with(&q2));
    }

    #[test]
    fn test_no_conflict_different_types() {
        // Physics: reads Transform, writes Velocity
        let physics = AccessDescriptor::new().read(TRANSFORM).write(VELOCITY);
        // AI: reads Transform, writes AiState
        let ai = AccessDescriptor::new().read(TRANSFORM).write(AI_STATE);

        assert!(!physics.conflicts_with(&ai));
    }

    #[test]
    fn test_add_remove_counts_as_write() {
        let spawner = AccessDescriptor::new().add_remove(AI_STATE);
        let reader = AccessDescriptor::new().read(AI_STATE);

        assert_eq!(spawner.component_access(), vec![(AI_STATE, AccessMode::Write)]);
        assert!(spawner.conflicts_with(&reader));
    }

    #[test]
    fn test_entity_mutation_conflicts_with_everything() {
        let spawner = AccessDescriptor::new().add_remove_entities();
        let idle = AccessDescriptor::new();

        assert_eq!(spawner.entity_access(), AccessMode::Write);
        assert_eq!(idle.entity_access(), AccessMode::Read);
        assert!(spawner.conflicts_with(&idle));
        assert!(!idle.conflicts_with(&AccessDescriptor::new()));
    }

    #[test]
    fn test_component_access_strongest_mode_wins() {
        let q = AccessDescriptor::new()
            .read(VELOCITY)
            .read(TRANSFORM)
            .write(VELOCITY)
            .read(TRANSFORM);

        assert_eq!(
            q.component_access(),
            vec![(TRANSFORM, AccessMode::Read), (VELOCITY, AccessMode::Write)]
        );
    }

    #[test]
    fn test_descriptor_serializes() {
        let q = AccessDescriptor::new().read(TRANSFORM).modifies_entities();
        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(json["reads"][0], 1);
        assert_eq!(json["modifies_entities"], true);
    }
}
