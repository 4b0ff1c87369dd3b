//! The seam between this binding and the external bus daemon.
//!
//! The real wire protocol (message framing, authentication, discovery
//! broadcast) is owned by the bus transport and is not implemented here; the
//! bootstrap and dispatcher reach it through the minimal [`BusConnector`]
//! interface. [`MemoryBus`] is an in-process loopback connector that applies
//! the daemon-side rules (name ownership, port binding, join negotiation,
//! call routing) and stands in for the daemon in tests and the demo binary.

mod memory;

pub use memory::MemoryBus;

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::dispatch::ServiceObject;
use crate::error::Result;
use crate::session::{SessionInfo, SessionOptions, SessionPortPolicy, TransportMask};

/// Flags for [`BusConnector::request_name`].
pub mod request_name_flags {
    /// The requester permits another endpoint to take the name over.
    pub const ALLOW_REPLACEMENT: u32 = 0x01;
    /// Take the name from its current owner if that owner allows replacement.
    pub const REPLACE_EXISTING: u32 = 0x02;
    /// Fail instead of queueing when the name is unavailable.
    pub const DO_NOT_QUEUE: u32 = 0x04;
}

/// Connection to a bus daemon.
///
/// Implementations route method calls to objects registered through
/// [`register_object`](Self::register_object) and deliver accepted session
/// joins over the channel handed to
/// [`bind_session_port`](Self::bind_session_port) - exactly one
/// [`SessionInfo`] per established session, no polled flags.
pub trait BusConnector: Send + Sync {
    /// Register a local object; fails if another object occupies its path
    /// or the bus is unreachable.
    fn register_object(&self, object: ServiceObject) -> Result<Arc<ServiceObject>>;

    /// Attach an observability listener.
    fn register_listener(&self, listener: Arc<dyn BusListener>);

    /// Establish the transport connection; returns the attachment's
    /// bus-assigned unique name.
    fn connect(&self) -> Result<String>;

    /// Open a listening session port under an accept policy, offering
    /// `offered` options to joiners.
    fn bind_session_port(
        &self,
        policy: SessionPortPolicy,
        offered: SessionOptions,
        joined: UnboundedSender<SessionInfo>,
    ) -> Result<()>;

    /// Claim ownership of a well-known name.
    fn request_name(&self, name: &str, flags: u32) -> Result<()>;

    /// Broadcast that the name is reachable over the given transports.
    fn advertise_name(&self, name: &str, transports: TransportMask) -> Result<()>;

    /// Give up ownership of a well-known name. Releasing a name this
    /// attachment does not own is a no-op.
    fn release_name(&self, name: &str) -> Result<()>;
}

/// Bus event observer. All methods default to no-ops; implement what you
/// need.
pub trait BusListener: Send + Sync {
    /// A well-known name changed hands. `None` for the previous owner means
    /// the name was unowned; `None` for the new owner means it was released.
    fn name_owner_changed(
        &self,
        _name: &str,
        _previous_owner: Option<&str>,
        _new_owner: Option<&str>,
    ) {
    }
}
