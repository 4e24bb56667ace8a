//! etl-broadcast: authenticated, tenant-scoped publish/subscribe of job and
//! step progress events, built on a `tokio::sync::broadcast`-backed event
//! fan-out narrowed to a single bearer/credential-validation strategy
//! since token issuance is out of scope.

pub mod auth;
pub mod event;
pub mod hub;

pub use auth::{mask_credential, validate_credential, CredentialError};
pub use event::ProgressEvent;
pub use hub::{ProgressBroadcaster, Subscription};
