//! rlscale-metrics: in-process measurement source for the decision engine.
//!
//! Samples are pushed into a [`MetricsRecorder`], either directly or through
//! the line feed in [`feed`], and read back by the engine through the
//! [`MetricsSource`](rlscale_core::MetricsSource) contract.

pub mod feed;
pub mod recorder;

pub use feed::{FeedError, FeedLine, ingest, parse_line};
pub use recorder::MetricsRecorder;
