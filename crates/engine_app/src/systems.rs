//! Demo systems driving the particle world.
//!
//! | system      | access                              | ordering               |
//! |-------------|-------------------------------------|------------------------|
//! | `gravity`   | writes Velocity                     | tag `physics`          |
//! | `integrate` | reads Velocity, writes Position     | after `physics`        |
//! | `bounds`    | writes Position and Velocity        | after `integrate`      |
//! | `spawner`   | adds/removes entities, main thread  | tag `spawn`            |
//! | `stats`     | reads Position and Velocity         | not during `spawn`     |

use std::sync::Arc;

use glam::Vec3;
use serde::Serialize;
use tracing::{debug, info};

use engine_component::{Component, fnv1a_64};
use engine_system::{SequenceTag, System, SystemDescriptor, TickContext};

use crate::world::{ParticleWorld, Position, Velocity};

pub const PHYSICS: SequenceTag = SequenceTag::named("physics");
pub const INTEGRATE: SequenceTag = SequenceTag::named("integrate");
pub const SPAWN: SequenceTag = SequenceTag::named("spawn");

/// Accelerates every particle downwards.
#[derive(Debug)]
pub struct Gravity {
    world: Arc<ParticleWorld>,
    acceleration: Vec3,
}

impl Gravity {
    #[must_use]
    pub fn new(world: Arc<ParticleWorld>) -> Self {
        Self {
            world,
            acceleration: Vec3::new(0.0, -9.81, 0.0),
        }
    }
}

impl System for Gravity {
    fn name(&self) -> &str {
        "gravity"
    }

    fn descriptor(&self) -> SystemDescriptor {
        SystemDescriptor::new().tag(PHYSICS).write(Velocity::component_type_id())
    }

    fn run(&mut self, ctx: &TickContext) {
        let dv = self.acceleration * ctx.dt_secs();
        for velocity in self.world.velocities_mut().iter_mut() {
            velocity.0 += dv;
        }
    }
}

/// Moves particles along their velocity.
#[derive(Debug)]
pub struct Integrate {
    world: Arc<ParticleWorld>,
}

impl Integrate {
    #[must_use]
    pub fn new(world: Arc<ParticleWorld>) -> Self {
        Self { world }
    }
}

impl System for Integrate {
    fn name(&self) -> &str {
        "integrate"
    }

    fn descriptor(&self) -> SystemDescriptor {
        SystemDescriptor::new()
            .tag(INTEGRATE)
            .run_after(PHYSICS)
            .read(Velocity::component_type_id())
            .write(Position::component_type_id())
    }

    fn run(&mut self, ctx: &TickContext) {
        let dt = ctx.dt_secs();
        let velocities = self.world.velocities();
        let mut positions = self.world.positions_mut();
        for (position, velocity) in positions.iter_mut().zip(velocities.iter()) {
            position.0 += velocity.0 * dt;
        }
    }
}

/// Keeps particles inside an axis-aligned box, bouncing them off its walls.
#[derive(Debug)]
pub struct Bounds {
    world: Arc<ParticleWorld>,
    half_extent: f32,
    restitution: f32,
}

impl Bounds {
    #[must_use]
    pub fn new(world: Arc<ParticleWorld>, half_extent: f32) -> Self {
        Self {
            world,
            half_extent,
            restitution: 0.8,
        }
    }
}

impl System for Bounds {
    fn name(&self) -> &str {
        "bounds"
    }

    fn descriptor(&self) -> SystemDescriptor {
        SystemDescriptor::new()
            .run_after(INTEGRATE)
            .write(Position::component_type_id())
            .write(Velocity::component_type_id())
    }

    fn run(&mut self, _ctx: &TickContext) {
        let min = Vec3::splat(-self.half_extent);
        let max = Vec3::splat(self.half_extent);
        let mut positions = self.world.positions_mut();
        let mut velocities = self.world.velocities_mut();

        for (position, velocity) in positions.iter_mut().zip(velocities.iter_mut()) {
            for axis in 0..3 {
                if position.0[axis] < min[axis] || position.0[axis] > max[axis] {
                    velocity.0[axis] = -velocity.0[axis] * self.restitution;
                }
            }
            position.0 = position.0.clamp(min, max);
        }
    }
}

/// Keeps the particle count near a target by spawning new particles and
/// retiring old ones.
#[derive(Debug)]
pub struct Spawner {
    world: Arc<ParticleWorld>,
    target: usize,
    per_tick: usize,
    lifetime_ticks: u64,
}

impl Spawner {
    #[must_use]
    pub fn new(world: Arc<ParticleWorld>, target: usize) -> Self {
        Self {
            world,
            target,
            per_tick: (target / 30).max(1),
            lifetime_ticks: 240,
        }
    }

    /// Override the particle lifetime.
    #[must_use]
    pub fn with_lifetime(mut self, ticks: u64) -> Self {
        self.lifetime_ticks = ticks;
        self
    }
}

/// A deterministic launch velocity for the `n`th particle.
fn launch_velocity(n: u64) -> Vec3 {
    let hash = fnv1a_64(&n.to_le_bytes());
    let unit = |shift: u32| ((hash >> shift) & 0xffff) as f32 / f32::from(u16::MAX) * 2.0 - 1.0;
    Vec3::new(unit(0) * 4.0, 6.0 + unit(16) * 2.0, unit(32) * 4.0)
}

impl System for Spawner {
    fn name(&self) -> &str {
        "spawner"
    }

    fn descriptor(&self) -> SystemDescriptor {
        SystemDescriptor::new()
            .tag(SPAWN)
            .add_remove_entities()
            .add_remove(Position::component_type_id())
            .add_remove(Velocity::component_type_id())
            .main_thread()
    }

    fn run(&mut self, ctx: &TickContext) {
        let lifetime = self.lifetime_ticks;
        let retired = self
            .world
            .despawn_where(|p| ctx.tick.saturating_sub(p.born_tick) >= lifetime);

        let missing = self.target.saturating_sub(self.world.len());
        let spawned = missing.min(self.per_tick);
        for _ in 0..spawned {
            let n = self.world.spawned();
            self.world.spawn(Vec3::ZERO, launch_velocity(n), ctx.tick);
        }

        if !retired.is_empty() || spawned > 0 {
            debug!(
                tick = ctx.tick,
                spawned,
                retired = retired.len(),
                oldest_retired = retired.iter().min().map(|e| e.0),
                live = self.world.len(),
                "spawner ran"
            );
        }
    }

    fn on_added(&mut self) {
        info!(particles = self.target, lifetime = self.lifetime_ticks, "spawner registered");
    }
}

/// Aggregate particle statistics for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSample {
    pub tick: u64,
    pub particles: usize,
    pub mean_position: Vec3,
    pub mean_speed: f32,
    pub max_height: f32,
}

/// Samples the world and logs a summary at a fixed interval.
#[derive(Debug)]
pub struct Stats {
    world: Arc<ParticleWorld>,
    log_every: u64,
    latest: StatsSample,
}

impl Stats {
    #[must_use]
    pub fn new(world: Arc<ParticleWorld>, log_every: u64) -> Self {
        Self {
            world,
            log_every: log_every.max(1),
            latest: StatsSample::default(),
        }
    }

    /// The most recent sample.
    #[must_use]
    pub fn latest(&self) -> StatsSample {
        self.latest
    }
}

impl System for Stats {
    fn name(&self) -> &str {
        "stats"
    }

    fn descriptor(&self) -> SystemDescriptor {
        SystemDescriptor::new()
            .run_not_during(SPAWN)
            .read(Position::component_type_id())
            .read(Velocity::component_type_id())
    }

    fn run(&mut self, ctx: &TickContext) {
        let positions = self.world.positions();
        let velocities = self.world.velocities();
        let count = positions.len();

        let mut sample = StatsSample {
            tick: ctx.tick,
            particles: count,
            max_height: f32::MIN,
            ..StatsSample::default()
        };
        if count > 0 {
            let sum: Vec3 = positions.iter().map(|p| p.0).sum();
            let speed: f32 = velocities.iter().map(|v| v.0.length()).sum();
            sample.mean_position = sum / count as f32;
            sample.mean_speed = speed / count as f32;
            sample.max_height = positions.iter().map(|p| p.0.y).fold(f32::MIN, f32::max);
        } else {
            sample.max_height = 0.0;
        }
        self.latest = sample;

        if ctx.tick % self.log_every == 0 {
            info!(
                tick = ctx.tick,
                particles = sample.particles,
                mean_speed = sample.mean_speed,
                max_height = sample.max_height,
                "world stats"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use engine_system::{Scheduler, SchedulerConfig};

    use super::*;

    fn ctx(tick: u64) -> TickContext {
        TickContext::new(tick, Duration::from_millis(100), Instant::now())
    }

    #[test]
    fn test_gravity_then_integrate() {
        let world = Arc::new(ParticleWorld::new());
        world.spawn(Vec3::ZERO, Vec3::ZERO, 0);

        Gravity::new(Arc::clone(&world)).run(&ctx(1));
        Integrate::new(Arc::clone(&world)).run(&ctx(1));

        let velocity = world.velocities()[0].0;
        let position = world.positions()[0].0;
        assert!((velocity.y + 0.981).abs() < 1e-4);
        assert!((position.y + 0.0981).abs() < 1e-4);
    }

    #[test]
    fn test_bounds_reflects_and_clamps() {
        let world = Arc::new(ParticleWorld::new());
        world.spawn(Vec3::new(0.0, -12.0, 0.0), Vec3::new(1.0, -5.0, 0.0), 0);

        Bounds::new(Arc::clone(&world), 10.0).run(&ctx(1));

        assert_eq!(world.positions()[0].0, Vec3::new(0.0, -10.0, 0.0));
        assert_eq!(world.velocities()[0].0, Vec3::new(1.0, 4.0, 0.0));
    }

    #[test]
    fn test_spawner_fills_and_retires() {
        let world = Arc::new(ParticleWorld::new());
        let mut spawner = Spawner::new(Arc::clone(&world), 60).with_lifetime(3);

        spawner.run(&ctx(1));
        assert_eq!(world.len(), 2);
        spawner.run(&ctx(2));
        spawner.run(&ctx(3));
        assert_eq!(world.len(), 6);

        // The two particles born at tick 1 reach their lifetime.
        spawner.run(&ctx(4));
        assert_eq!(world.len(), 6);
        assert_eq!(world.spawned(), 8);
    }

    #[test]
    fn test_stats_sample() {
        let world = Arc::new(ParticleWorld::new());
        world.spawn(Vec3::new(0.0, 2.0, 0.0), Vec3::new(3.0, 4.0, 0.0), 0);
        world.spawn(Vec3::new(0.0, 4.0, 0.0), Vec3::ZERO, 0);

        let mut stats = Stats::new(Arc::clone(&world), 10);
        stats.run(&ctx(7));

        let sample = stats.latest();
        assert_eq!(sample.tick, 7);
        assert_eq!(sample.particles, 2);
        assert_eq!(sample.mean_position, Vec3::new(0.0, 3.0, 0.0));
        assert!((sample.mean_speed - 2.5).abs() < 1e-6);
        assert_eq!(sample.max_height, 4.0);
    }

    #[test]
    fn test_demo_graph_is_acyclic_and_ordered() {
        let world = Arc::new(ParticleWorld::new());
        let mut scheduler =
            Scheduler::new(SchedulerConfig::default().with_worker_threads(2)).unwrap();
        let gravity = scheduler.add_system(Gravity::new(Arc::clone(&world)));
        let integrate = scheduler.add_system(Integrate::new(Arc::clone(&world)));
        let bounds = scheduler.add_system(Bounds::new(Arc::clone(&world), 50.0));
        let spawner = scheduler.add_system(Spawner::new(Arc::clone(&world), 30));
        let stats = scheduler.add_system(Stats::new(Arc::clone(&world), 100));

        let snapshot = scheduler.snapshot().unwrap();
        assert_eq!(snapshot.systems.len(), 5);
        assert_eq!(scheduler.dependents(gravity), Some(vec![integrate]));
        assert_eq!(scheduler.dependents(integrate), Some(vec![bounds]));
        assert_eq!(scheduler.blacklist(stats), Some(vec![spawner]));

        for _ in 0..10 {
            let report = scheduler
                .invoke(Duration::from_millis(16), Instant::now())
                .unwrap();
            assert_eq!(report.executed, 5);
            assert!(report.is_clean());
        }
        assert_eq!(world.len(), 10);
        let sample = scheduler.get_system::<Stats>(stats).map(|s| s.latest());
        assert_eq!(sample.map(|s| s.tick), Some(10));
    }
}
