#![forbid(unsafe_code)]

//! Shared test utilities for the rangecast workspace.

pub mod http_server;
pub mod memory_source;
pub mod rng;
pub mod wait;

pub use http_server::{MediaRoute, TestHttpServer};
pub use memory_source::MemoryRangeSource;
pub use rng::*;
pub use wait::{next_event, wait_until};
