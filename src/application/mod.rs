//! The pipeline itself: market data in, orders out, gated by risk and
//! safety rules at every stage.

pub mod analyzer;
pub mod decision_maker;
pub mod executor;
pub mod guard;
pub mod ingester;
pub mod market_cache;
pub mod risk_checker;
pub mod signal_service;
pub mod state_manager;
pub mod system;
