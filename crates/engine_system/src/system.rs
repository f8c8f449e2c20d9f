//! The [`System`] trait and closure-backed systems.

use std::any::Any;

use crate::context::TickContext;
use crate::descriptor::SystemDescriptor;

/// Downcasting support for type-erased systems.
///
/// Implemented for every `'static` type; system authors never implement it.
pub trait AsAny: Any {
    /// Borrow as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// Borrow as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Convert a boxed value into `Box<dyn Any>`.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A unit of work invoked once per tick.
///
/// The scheduler only sees what [`System::descriptor`] declares. A system
/// that touches component data it did not declare is racing other systems.
///
/// # Examples
///
/// ```rust
/// use engine_component::ComponentTypeId;
/// use engine_system::{System, SystemDescriptor, TickContext};
///
/// struct Gravity {
///     steps: u64,
/// }
///
/// impl System for Gravity {
///     fn descriptor(&self) -> SystemDescriptor {
///         SystemDescriptor::new().write(ComponentTypeId::from_name("Velocity"))
///     }
///
///     fn run(&mut self, _ctx: &TickContext) {
///         self.steps += 1;
///     }
/// }
/// ```
pub trait System: AsAny + Send {
    /// A human-readable name used in logs and error messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Ordering tags, declared access and thread requirements.
    ///
    /// Read once when the system is registered.
    fn descriptor(&self) -> SystemDescriptor;

    /// Execute the system for one tick.
    fn run(&mut self, ctx: &TickContext);

    /// Returns `false` to skip this tick. A skipped system still counts as
    /// executed, so its dependents are released as usual.
    fn should_run(&self, _ctx: &TickContext) -> bool {
        true
    }

    /// Called right after the system is added to a scheduler.
    fn on_added(&mut self) {}

    /// Called right after the system is removed from a scheduler.
    fn on_removed(&mut self) {}
}

/// A system backed by a closure.
pub struct FnSystem<F> {
    name: String,
    descriptor: SystemDescriptor,
    func: F,
}

impl<F> FnSystem<F>
where
    F: FnMut(&TickContext) + Send + 'static,
{
    /// Wrap `func` as a system with the given name and descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, descriptor: SystemDescriptor, func: F) -> Self {
        Self {
            name: name.into(),
            descriptor,
            func,
        }
    }
}

impl<F> std::fmt::Debug for FnSystem<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSystem")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl<F> System for FnSystem<F>
where
    F: FnMut(&TickContext) + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn descriptor(&self) -> SystemDescriptor {
        self.descriptor.clone()
    }

    fn run(&mut self, ctx: &TickContext) {
        (self.func)(ctx);
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    struct Counter {
        runs: u32,
    }

    impl System for Counter {
        fn descriptor(&self) -> SystemDescriptor {
            SystemDescriptor::new()
        }

        fn run(&mut self, _ctx: &TickContext) {
            self.runs += 1;
        }
    }

    #[test]
    fn test_default_name_is_type_name() {
        let counter = Counter { runs: 0 };
        assert!(counter.name().ends_with("Counter"));
    }

    #[test]
    fn test_downcast_through_trait_object() {
        let mut boxed: Box<dyn System> = Box::new(Counter { runs: 0 });
        boxed.run(&TickContext::new(1, Duration::ZERO, Instant::now()));

        assert_eq!((*boxed).as_any().downcast_ref::<Counter>().map(|c| c.runs), Some(1));
        assert!((*boxed).as_any().downcast_ref::<u32>().is_none());

        let counter = boxed.into_any().downcast::<Counter>().unwrap();
        assert_eq!(counter.runs, 1);
    }

    #[test]
    fn test_fn_system_runs_closure() {
        let mut total = 0u64;
        let mut system = FnSystem::new("sum", SystemDescriptor::new(), move |ctx: &TickContext| {
            total += ctx.tick;
            assert!(total > 0);
        });

        assert_eq!(system.name(), "sum");
        system.run(&TickContext::new(3, Duration::ZERO, Instant::now()));
    }
}
