//! Session establishment types.
//!
//! A session is a negotiated channel between the service and one or more
//! remote peers, opened after a join handshake against a bound session port.
//!
//! # Join Flow
//!
//! ```text
//! Joiner                        Bus                         Service
//!    |                           |                             |
//!    |---- join(name, port) ---->|                             |
//!    |                           |-- policy.accepts(port,      |
//!    |                           |      joiner, options)? ---->|
//!    |                           |<------- true/false ---------|
//!    |                           |                             |
//!    |<---- session id ----------|----- SessionInfo ---------->|  (joined channel)
//! ```
//!
//! The accept decision is owned by the bound [`SessionPortPolicy`]; by
//! default a policy accepts a join only when the requested port equals the
//! bound port. Joins that pass the policy are additionally checked for
//! [`SessionOptions`] compatibility (same traffic kind and multipoint mode,
//! intersecting proximity and transport masks).
//!
//! The successful join is delivered to the bootstrap exactly once per
//! session as a [`SessionInfo`] over a channel; nothing polls a shared flag.

mod options;
mod port;

pub use options::{ProximityMask, SessionOptions, TrafficKind, TransportMask};
pub use port::{SessionPort, SessionPortPolicy};

use serde::{Deserialize, Serialize};

/// Per-session record created when a remote peer's join is accepted.
///
/// Written once by the bus on the join callback and read by the bootstrap's
/// wait loop; a single-writer/single-reader handoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Bus-assigned session identifier.
    pub session_id: u32,
    /// Unique name of the peer that joined.
    pub joiner: String,
    /// Set when the join handshake completed.
    pub established: bool,
}

impl SessionInfo {
    /// Record a freshly established session.
    pub fn established(session_id: u32, joiner: &str) -> Self {
        Self {
            session_id,
            joiner: joiner.to_string(),
            established: true,
        }
    }
}
