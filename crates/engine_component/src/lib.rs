//! # engine_component
//!
//! The "C" in ECS, as far as the scheduler is concerned: component identity
//! and the data access a system declares against it.
//!
//! The scheduler never touches component data. It reasons about components
//! symbolically, by [`ComponentTypeId`], and uses each system's
//! [`AccessDescriptor`] to decide which systems may run side by side.
//!
//! This crate provides:
//!
//! - [`Component`] trait: names a component type and derives its id.
//! - [`ComponentTypeId`]: FNV-1a hashed component identifiers.
//! - [`AccessMode`]: read or write.
//! - [`AccessDescriptor`]: declarative component/entity access for a system.

pub mod access;
pub mod component;

pub use access::{AccessDescriptor, AccessMode};
pub use component::{Component, ComponentTypeId, fnv1a_64};
