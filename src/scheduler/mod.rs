//! In-process worker pool for validation units.
//!
//! - **WorkerPool**: N tokio workers draining a bounded job channel
//! - **ShutdownHandle / ShutdownSignal**: run-wide abort, observed by the
//!   producer, idle workers and running jobs alike
//!
//! ```text
//!    ┌──────────┐   bounded mpsc   ┌──────────┐
//!    │ Producer │ ───────────────► │ Worker 1 │ ...  Worker N
//!    └──────────┘                  └──────────┘
//!          ▲                              ▲
//!          └──────── shutdown (broadcast) ┘
//! ```

pub mod shutdown;
pub mod worker_pool;

pub use shutdown::{ShutdownHandle, ShutdownSignal};
pub use worker_pool::{JobOutcome, PoolStats, WorkerPool, WorkerPoolConfig};
