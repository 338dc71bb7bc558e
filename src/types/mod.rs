//! Core types for Tycho.

pub mod event;
pub mod options;

pub use event::*;
pub use options::*;
