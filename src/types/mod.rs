//! Core types shared across the agency runtime.

pub mod channel;
pub mod item;
pub mod output;

pub use channel::*;
pub use item::*;
pub use output::*;
