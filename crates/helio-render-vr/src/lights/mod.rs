//! Lights and the per-scene light list

pub mod class;
mod light;
mod list;

pub use class::{LightClass, LightClassId, LightClassRegistry};
pub use light::Light;
pub use list::{LightDirty, LightList};
