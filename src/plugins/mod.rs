//! Built-in plugins used by the samples.

pub mod basic;
pub mod graph;
pub mod math;

pub use basic::{BasicPlugin, ChatPlugin};
pub use graph::{GraphCredential, GraphPlugin};
pub use math::MathPlugin;
