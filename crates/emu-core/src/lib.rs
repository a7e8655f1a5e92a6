//! Collaborator seams for the serial I/O core.
//!
//! The SIO crates never own a CPU, RAM or POKEY. They reach the rest of the
//! machine through these traits: memory through [`Bus`], time through
//! [`Tickable`] (one call per emulated scanline), and inspection through
//! [`Observable`].

mod bus;
mod observable;
mod tickable;

pub use bus::{Bus, FlatRam};
pub use observable::{Observable, Value};
pub use tickable::Tickable;
