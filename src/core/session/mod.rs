//! Call session records and the store that owns them.

mod conference;
mod store;
mod types;

pub use conference::ConferenceRegistry;
pub use store::{
    DEFAULT_MAX_CAS_RETRIES, DEFAULT_NOTIFY_CAPACITY, SessionChange, SessionStore, Upserted,
};
pub use types::{
    ActionKind, CallSession, CallState, ConferenceSession, Direction, PendingAction,
    RecordingRef, SessionFilter, SessionSnapshot,
};
