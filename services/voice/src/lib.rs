//! The interview coach voice service.
//!
//! This library wires the hardware and terminal ends of the voice loop: the
//! environment configuration, the `cpal` audio device, and the line console.
//! The `coach` binary is a thin wrapper that assembles them around the core
//! session loop.

pub mod config;
pub mod console;
pub mod device;
