//! Particle world shared by the demo systems.
//!
//! Component columns live behind their own `RwLock`s so that systems with
//! disjoint declared access never contend. The scheduler guarantees that a
//! column is written by at most one system at a time; the locks only make
//! that sharing safe to express.

use glam::Vec3;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use engine_component::Component;

/// A particle identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(pub u64);

/// Allocates monotonically increasing entity ids, starting at 1.
#[derive(Debug)]
pub struct EntityAllocator {
    next_id: u64,
}

impl EntityAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    pub fn allocate(&mut self) -> Entity {
        let id = self.next_id;
        self.next_id += 1;
        Entity(id)
    }

    /// Number of entities allocated so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.next_id - 1
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Particle position in world units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position(pub Vec3);

impl Component for Position {
    fn type_name() -> &'static str {
        "Position"
    }
}

/// Particle velocity in world units per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Velocity(pub Vec3);

impl Component for Velocity {
    fn type_name() -> &'static str {
        "Velocity"
    }
}

/// Per-entity bookkeeping not exposed as a component.
#[derive(Debug, Clone, Copy)]
pub struct Particle {
    pub entity: Entity,
    pub born_tick: u64,
}

/// Column storage for every live particle. Index `i` of each column belongs
/// to the same entity.
#[derive(Debug, Default)]
pub struct ParticleWorld {
    particles: RwLock<Vec<Particle>>,
    positions: RwLock<Vec<Position>>,
    velocities: RwLock<Vec<Velocity>>,
    allocator: Mutex<EntityAllocator>,
}

impl ParticleWorld {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live particles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.particles.read().len()
    }

    /// Total number of particles ever spawned.
    #[must_use]
    pub fn spawned(&self) -> u64 {
        self.allocator.lock().count()
    }

    pub fn positions(&self) -> RwLockReadGuard<'_, Vec<Position>> {
        self.positions.read()
    }

    pub fn positions_mut(&self) -> RwLockWriteGuard<'_, Vec<Position>> {
        self.positions.write()
    }

    pub fn velocities(&self) -> RwLockReadGuard<'_, Vec<Velocity>> {
        self.velocities.read()
    }

    pub fn velocities_mut(&self) -> RwLockWriteGuard<'_, Vec<Velocity>> {
        self.velocities.write()
    }

    /// Add a particle. Only systems declaring entity creation may call this.
    pub fn spawn(&self, position: Vec3, velocity: Vec3, tick: u64) -> Entity {
        let entity = self.allocator.lock().allocate();
        self.particles.write().push(Particle {
            entity,
            born_tick: tick,
        });
        self.positions.write().push(Position(position));
        self.velocities.write().push(Velocity(velocity));
        entity
    }

    /// Remove every particle for which `expired` returns `true` and return
    /// the removed entities.
    pub fn despawn_where(&self, mut expired: impl FnMut(&Particle) -> bool) -> Vec<Entity> {
        let mut particles = self.particles.write();
        let mut positions = self.positions.write();
        let mut velocities = self.velocities.write();

        let mut removed = Vec::new();
        let mut i = 0;
        while i < particles.len() {
            if expired(&particles[i]) {
                removed.push(particles.swap_remove(i).entity);
                positions.swap_remove(i);
                velocities.swap_remove(i);
            } else {
                i += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use engine_component::ComponentTypeId;

    use super::*;

    #[test]
    fn test_allocator_produces_unique_ids() {
        let mut alloc = EntityAllocator::new();
        assert_eq!(alloc.allocate(), Entity(1));
        assert_eq!(alloc.allocate(), Entity(2));
        assert_eq!(alloc.count(), 2);
    }

    #[test]
    fn test_component_ids_match_names() {
        assert_eq!(Position::component_type_id(), ComponentTypeId::from_name("Position"));
        assert_ne!(Position::component_type_id(), Velocity::component_type_id());
    }

    #[test]
    fn test_spawn_and_despawn_keep_columns_aligned() {
        let world = ParticleWorld::new();
        for i in 0..5u8 {
            world.spawn(Vec3::splat(f32::from(i)), Vec3::Y * f32::from(i), u64::from(i));
        }
        assert_eq!(world.len(), 5);

        let removed = world.despawn_where(|p| p.born_tick % 2 == 0);
        assert_eq!(removed.len(), 3);
        assert!(removed.contains(&Entity(1)));
        assert_eq!(world.len(), 2);
        assert_eq!(world.spawned(), 5);

        let particles = world.particles.read();
        let positions = world.positions();
        let velocities = world.velocities();
        for ((particle, position), velocity) in particles.iter().zip(positions.iter()).zip(velocities.iter()) {
            let born = particle.born_tick as f32;
            assert_eq!(position.0, Vec3::splat(born));
            assert_eq!(velocity.0, Vec3::Y * born);
        }
    }
}
