//! Adapters implementing the ports in [`crate::domain::ports`] against the
//! real outside world: Binance, a webhook notifier, on-disk state, and
//! push-based observability.

pub mod binance;
pub mod notify;
pub mod observability;
pub mod persistence;
pub mod rate_limiter;
