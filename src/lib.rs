//! Bounded async job pool with first-hit-wins batch calls
//!
//! # Features
//! - Fixed worker set draining one shared FIFO queue
//! - Non-blocking admission: a batch that does not fit is refused at once
//! - Short-circuit on the first hit or error, remaining jobs are abandoned
//! - Graceful shutdown that drains admitted work
//! - Panic isolation and pool metrics

pub mod errors;
pub mod job;
pub mod model;
pub mod pool;
mod session;

pub use errors::PoolError;
pub use job::Outcome;
pub use model::PoolMetrics;
pub use pool::{Config, Pool, SharedPool};
