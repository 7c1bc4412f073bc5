//! # mdsync common library
//!
//! Shared code for the mdsync services:
//! - Error type
//! - Progress and queue event types
//! - Configuration loading
//! - SSE helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
