pub mod dispatcher;
pub mod error;
pub mod events;
pub mod fanout;
pub mod ingest;
pub mod metrics;
pub mod provider;
pub mod reconcile;
pub mod session;
pub mod state_machine;

// Re-export commonly used types for convenience
pub use error::{SessionError, SessionResult};

pub use session::{
    ActionKind, CallSession, CallState, ConferenceRegistry, ConferenceSession, Direction,
    PendingAction, RecordingRef, SessionChange, SessionFilter, SessionSnapshot, SessionStore,
};

pub use events::{
    CallPhase, CallStatus, EventKind, EventNormalizer, NormalizedEvent, RecordingPhase, SourceKind,
};

pub use state_machine::{IgnoreReason, Transition};

pub use dispatcher::{CommandDispatcher, DispatcherConfig, MakeCallRequest};

pub use provider::{
    ConferenceOp, HttpVoiceProvider, PlaceCallRequest, PlacedCall, ProviderCredentials,
    ProviderError, SpeakRequest, TransferTarget, VoiceProvider,
};

pub use fanout::{ConnectionId, Interest, InterestUpdate, RealtimeFanout, SubscriberQueue};

pub use ingest::{EventIngestor, IngestOutcome};

pub use metrics::{GatewayMetrics, MetricsSnapshot};

pub use reconcile::{ReconciliationSweeper, SweepConfig, SweepReport};
