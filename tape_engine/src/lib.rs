pub mod cache;
pub mod chunk;
pub mod commands;
pub mod engine; // TapeEngine lives here
pub mod loader;
pub mod mixer;
pub mod output;
pub mod ramp;
pub mod resampler;
pub mod scheduler;
pub mod source;
pub mod timing;
pub mod transport;

// Re-exports
pub use commands::{CommandLoop, EngineCommand};
pub use engine::{LoadSummary, TapeEngine};
pub use output::{DeviceOutput, OfflineOutput, OutputSubstrate};
pub use tape_shared::{Direction, EngineState, LoadOptions, TapeConfig, TapeError, TransportCommand};
pub use transport::TransitionOutcome;

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod tests_transport;
