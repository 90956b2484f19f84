mod common;
mod mock;
mod rest;
mod stream;

pub use mock::MockExchangeClient;
pub use rest::BinanceClient;
