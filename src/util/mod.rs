//! General utility code that didn't fit anywhere else
//!
//! Note that most of this module is not exported.
// (c) 2025 Ross Younger

mod backoff;
pub use backoff::RetryTimer;

mod registry;
pub use registry::ObserverId;
pub(crate) use registry::Registry;

mod tracing;
pub use tracing::TimeFormat;
pub(crate) use tracing::{
    is_initialized as tracing_is_initialised, setup as setup_tracing, trace_level,
    ConsoleTraceType,
};
