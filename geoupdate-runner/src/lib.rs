//! Update orchestration: per-edition fetch/verify/install tasks under a
//! bounded worker pool, with a wall-clock retry budget per edition.

mod error;
pub mod fetch;
pub mod outcome;
pub mod retry;
mod runtime;

pub use error::{EditionError, RunError};
pub use fetch::{FetchError, FetchOutcome, Fetcher};
pub use outcome::{EditionReport, RunOutcome, RunReport};
pub use retry::{RetryDecision, RetryPolicy};
pub use runtime::{init_tracing, run, run_all, start_blocking};
