//! FrostByte Daemon
//!
//! Ties the core engine into a tokio tick loop with CLI, logging and
//! default filesystem locations.

pub mod daemon;

pub use daemon::{FrostByteDaemon, Paths};
