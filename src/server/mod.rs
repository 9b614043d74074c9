//! Listener and accept loop.

pub mod listener;

pub use listener::{run, serve};
