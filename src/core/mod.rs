//! Core pipeline: decoding, flow tracking, dispatch, classification and
//! the engine that wires the stages together.

pub mod dispatch;
pub mod engine;
pub mod flow;
pub mod packet;
pub mod types;
pub mod worker;

use std::time::Duration;

/// How long a queue consumer waits before doing housekeeping and
/// re-waiting. Timed-out consumers never busy-loop.
pub const QUEUE_POLL: Duration = Duration::from_millis(100);

pub use engine::{Engine, EngineReport};
