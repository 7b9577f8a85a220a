// vigil-core: Session core keeping a local view of one alarm
// installation in sync over REST polling plus a streaming connection.

pub mod config;
pub mod connection;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod scheduler;
pub mod session;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::SessionConfig;
pub use connection::{ConnectionManager, ConnectionStatus, StatusUpdate};
pub use credential::{Credential, CredentialStore};
pub use error::CoreError;
pub use gateway::{EventSource, Gateway};
pub use scheduler::UpdateScheduler;
pub use session::Session;
pub use store::{AppliedChange, EventOutcome, SnapshotOutcome, StateStore};

// Re-export the wire model so hosts rarely need vigil-api directly.
pub use vigil_api::{DeviceState, Feature, StateDocument, StateEntry, StreamEvent};
