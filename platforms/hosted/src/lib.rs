//! The hosted simulator: runs the Ember runtime as an ordinary desktop
//! process, with threads standing in for interrupt sources.

pub mod cli;
pub mod demos;
pub mod platform;
pub mod sim_tracing;
