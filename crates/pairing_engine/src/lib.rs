/// Dual-feed arb: Pairing Engine
/// Per-event buffers for both providers, complementary-leg matching,
/// TTL maintenance, and the single-owner actor that drives it all.

pub mod actor;
pub mod bucket;
pub mod engine;
pub mod signature;

#[cfg(test)]
mod testutil;

pub use actor::{
    spawn_engine, EngineClosed, EngineCommand, EngineHandle, EngineSettings, PushEvent, MAX_BYPASS,
};
pub use bucket::{EventBucket, BUCKET_CAP};
pub use engine::{
    EmergencyPass, EngineCounters, EngineLimits, EngineSnapshot, IngestOutcome, PairStatus, PairedMatch, PairingEngine,
    RejectionRecord,
};
pub use signature::PairRejectReason;
