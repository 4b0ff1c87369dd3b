//! # Busway - Bus-Service Session Bootstrap and Method Dispatch
//!
//! Service-side binding for a message-bus middleware: declarative method
//! descriptors, a sequential session-bootstrap protocol driver, and a
//! dispatcher with a per-method concurrency policy.
//!
//! ## Features
//!
//! - **Descriptor tables**: statically constructed method metadata (name,
//!   signatures, reply flags, timeout, dispatch mode); no runtime reflection
//! - **Session bootstrap**: register, connect, bind port, request name,
//!   advertise, await join - each step guarded by the success of the prior
//! - **Per-method dispatch policy**: mark individual operations serialized
//!   while the rest of the object runs free
//! - **Loopback bus**: in-process connector applying daemon-side rules for
//!   tests and demos; the real transport stays an external collaborator
//!
//! ## Bootstrap Overview
//!
//! ```text
//! Service                         Bus                          Joiner
//!    |                             |                              |
//!    |---- register object ------->|                              |
//!    |---- connect --------------->|  assigns unique name         |
//!    |---- bind session port ----->|  accept policy installed     |
//!    |---- request name ---------->|  ownership claimed           |
//!    |---- advertise name -------->|  discoverable                |
//!    |                             |<-------- join(name, port) ---|
//!    |                             |  policy + options checked    |
//!    |<=== SessionInfo ============|========= session id =======>|
//!    |                             |                              |
//!    |<==== method calls ==========|<======= method calls ========|
//! ```
//!
//! ### State Machine
//!
//! ```text
//!                          connect()
//!     [Unregistered] ─────────────────────> [Connected]
//!          │                                     │ bind_session_port()
//!          │ register_object()                   v
//!          │ (stays Unregistered)           [PortBound]
//!          │                                     │ request_name()
//!          v                                     v
//!     (objects recorded)                  [NameRequested]
//!                                                │ advertise_name()
//!                                                v
//!                                          [Advertised]
//!                                                │ await_session()
//!                                                v
//!                                       [AwaitingSession] ──> [SessionActive]
//!
//!     Any connector failure lands in [Failed(reason)]; setup errors are
//!     fatal and map to distinct process exit codes.
//! ```
//!
//! ### Dispatch Modes
//!
//! | Mode         | Behavior                                              |
//! |--------------|-------------------------------------------------------|
//! | `Concurrent` | Runs in parallel with anything, including itself      |
//! | `Serialized` | Holds the object's serial lock; never overlaps peers  |
//!
//! The tag sits on each method descriptor, so one long-running concurrent
//! call (the demo's `Pi`) proceeds while serialized neighbors (`Ping`,
//! `Concatenate`, `Fibonacci`) stay mutually exclusive.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use busway::{
//!     demo, MemoryBus, ServiceBootstrap, SessionOptions, SessionPort,
//! };
//!
//! let bus = Arc::new(MemoryBus::default());
//! let mut bootstrap = ServiceBootstrap::new(Arc::clone(&bus));
//! bootstrap.register_object(demo::sample_object("/service")?)?;
//!
//! let session = bootstrap
//!     .run("org.busway.demo", SessionPort(42), SessionOptions::default(), None)
//!     .await?;
//! println!("serving session {}", session.session_id);
//! ```
//!
//! ## Modules
//!
//! - [`descriptor`]: method metadata tables
//! - [`signature`]: wire signature validation
//! - [`session`]: ports, options, accept policy, session records
//! - [`bus`]: connector seam to the external daemon + loopback bus
//! - [`bootstrap`]: the sequential setup state machine
//! - [`dispatch`]: call routing under the per-method concurrency policy
//! - [`demo`]: the reference methods service
//! - [`config`]: configuration management
//! - [`error`]: error types and exit-code mapping

pub mod bootstrap;
pub mod bus;
pub mod config;
pub mod demo;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod session;
pub mod signature;

// Re-exports for convenience
pub use bootstrap::{BootstrapState, ServiceBootstrap};
pub use bus::{BusConnector, BusListener, MemoryBus};
pub use config::Config;
pub use descriptor::{DispatchMode, InterfaceDescriptor, MethodDescriptor};
pub use dispatch::{
    Dispatcher, FaultInfo, MethodCall, MethodReply, ServiceObject, ServiceObjectBuilder,
};
pub use error::{BuswayError, Result};
pub use session::{
    ProximityMask, SessionInfo, SessionOptions, SessionPort, SessionPortPolicy, TrafficKind,
    TransportMask,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
