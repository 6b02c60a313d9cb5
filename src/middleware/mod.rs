pub mod metrics;
pub mod token_gate;
