//! Session management.
//!
//! This module provides:
//! - Time sources for expiry, including a test clock (`clock`)
//! - The session state machine and key cache (`manager`)
//! - Encrypted session blobs for cross-process logins (`persist`)

pub mod clock;
pub mod manager;
pub mod persist;

pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::{SessionHandle, SessionInfo, SessionManager, SessionState};
pub use persist::SessionPersistence;
