//! System descriptors: ordering tags, declared access, and thread flags.
//!
//! Systems never name each other directly. Instead each system carries a set
//! of [`SequenceTag`]s and refers to tags in its `run_before`, `run_after`
//! and `run_not_during` lists. The graph builder turns these references into
//! dependency and blacklist edges between every pair of systems that meet
//! through a tag.

use serde::{Deserialize, Serialize};

use engine_component::{AccessDescriptor, ComponentTypeId, fnv1a_64};

/// An opaque ordering tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceTag(pub u64);

impl SequenceTag {
    /// A tag identified by name.
    #[must_use]
    pub const fn named(name: &str) -> Self {
        Self(fnv1a_64(name.as_bytes()))
    }

    /// A tag identified by a Rust type, typically a zero-sized marker struct.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::named(std::any::type_name::<T>())
    }
}

/// Everything the scheduler needs to know about a system up front.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemDescriptor {
    /// Tags identifying this system in other systems' ordering lists.
    pub sequencing_tags: Vec<SequenceTag>,
    /// This system runs before every system carrying one of these tags.
    pub run_before: Vec<SequenceTag>,
    /// This system runs after every system carrying one of these tags.
    pub run_after: Vec<SequenceTag>,
    /// This system never runs concurrently with systems carrying these tags.
    pub run_not_during: Vec<SequenceTag>,
    /// Declared component and entity access.
    pub access: AccessDescriptor,
    /// No other system may run while this one does.
    pub requires_exclusive: bool,
    /// This system only runs on the thread calling `invoke`.
    pub requires_main_thread: bool,
}

impl SystemDescriptor {
    /// Create a descriptor with no tags, no access and no thread requirements.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sequencing tag to this system.
    #[must_use]
    pub fn tag(mut self, tag: SequenceTag) -> Self {
        self.sequencing_tags.push(tag);
        self
    }

    /// Run before systems carrying `tag`.
    #[must_use]
    pub fn run_before(mut self, tag: SequenceTag) -> Self {
        self.run_before.push(tag);
        self
    }

    /// Run after systems carrying `tag`.
    #[must_use]
    pub fn run_after(mut self, tag: SequenceTag) -> Self {
        self.run_after.push(tag);
        self
    }

    /// Never overlap with systems carrying `tag`.
    #[must_use]
    pub fn run_not_during(mut self, tag: SequenceTag) -> Self {
        self.run_not_during.push(tag);
        self
    }

    /// Replace the declared access.
    #[must_use]
    pub fn with_access(mut self, access: AccessDescriptor) -> Self {
        self.access = access;
        self
    }

    /// Declare a read of `component`.
    #[must_use]
    pub fn read(mut self, component: ComponentTypeId) -> Self {
        self.access = self.access.read(component);
        self
    }

    /// Declare a write of `component`.
    #[must_use]
    pub fn write(mut self, component: ComponentTypeId) -> Self {
        self.access = self.access.write(component);
        self
    }

    /// Declare that `component` is added to or removed from entities.
    #[must_use]
    pub fn add_remove(mut self, component: ComponentTypeId) -> Self {
        self.access = self.access.add_remove(component);
        self
    }

    /// Declare that existing entities are modified.
    #[must_use]
    pub fn modifies_entities(mut self) -> Self {
        self.access = self.access.modifies_entities();
        self
    }

    /// Declare that entities are created or destroyed.
    #[must_use]
    pub fn add_remove_entities(mut self) -> Self {
        self.access = self.access.add_remove_entities();
        self
    }

    /// Require that no other system runs concurrently.
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.requires_exclusive = true;
        self
    }

    /// Require the thread calling `invoke`.
    #[must_use]
    pub fn main_thread(mut self) -> Self {
        self.requires_main_thread = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use engine_component::AccessMode;

    use super::*;

    struct PhysicsStage;

    #[test]
    fn test_named_tags_are_stable() {
        assert_eq!(SequenceTag::named("physics"), SequenceTag::named("physics"));
        assert_ne!(SequenceTag::named("physics"), SequenceTag::named("render"));
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(SequenceTag::of::<PhysicsStage>(), SequenceTag::of::<PhysicsStage>());
        assert_ne!(SequenceTag::of::<PhysicsStage>(), SequenceTag::of::<u32>());
    }

    #[test]
    fn test_builder_collects_everything() {
        let physics = SequenceTag::named("physics");
        let render = SequenceTag::named("render");
        let velocity = ComponentTypeId::from_name("Velocity");

        let desc = SystemDescriptor::new()
            .tag(physics)
            .run_before(render)
            .run_after(SequenceTag::named("input"))
            .run_not_during(SequenceTag::named("save"))
            .write(velocity)
            .add_remove_entities()
            .main_thread();

        assert_eq!(desc.sequencing_tags, vec![physics]);
        assert_eq!(desc.run_before, vec![render]);
        assert_eq!(desc.run_after.len(), 1);
        assert_eq!(desc.run_not_during.len(), 1);
        assert_eq!(desc.access.component_access(), vec![(velocity, AccessMode::Write)]);
        assert_eq!(desc.access.entity_access(), AccessMode::Write);
        assert!(desc.requires_main_thread);
        assert!(!desc.requires_exclusive);
    }
}
