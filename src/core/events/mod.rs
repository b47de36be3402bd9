//! Webhook payload normalization.

mod normalizer;
mod payload;
mod types;

pub use normalizer::{DEFAULT_DEDUP_CAPACITY, DEFAULT_DEDUP_TTL, EventNormalizer};
pub use payload::{RawEndpoint, RawTimestamp, RawWebhook};
pub use types::{
    CallPhase, CallStatus, EventKind, EventLegs, NormalizedEvent, RecordingPhase, SourceKind,
};
