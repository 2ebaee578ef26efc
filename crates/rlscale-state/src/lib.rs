//! rlscale-state: training-data store for rlscale.
//!
//! Backed by [redb](https://docs.rs/redb). Every measurement interval and
//! every scaling round is stored per app so an offline stage can fit value
//! models from (state, action) pairs.
//!
//! # Layout
//!
//! Rows are JSON-serialized into redb's `&[u8]` value columns under
//! `{app}:{time_ms:020}` keys, so a lexical scan of one app's prefix yields
//! its rows in time order.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::TrainingStore;
pub use types::*;
