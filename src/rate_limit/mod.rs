//! Rate-Limit Service (spec §4.1): persisted flood-wait bookkeeping plus
//! the transparent client wrapper every outbound RPC is routed through.

mod limiter;
mod wrapper;

pub use limiter::{RateLimiter, RateLimiterConfig};
pub use wrapper::RateLimitedClient;
