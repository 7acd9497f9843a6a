#![forbid(unsafe_code)]

//! Event bus for rangecast streaming sessions.

mod bus;
mod event;

pub use bus::EventBus;
pub use event::{Progress, StreamEvent};
