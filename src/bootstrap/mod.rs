//! Service session bootstrap.
//!
//! A sequential protocol driver that takes a service from nothing to a live
//! session: register the local object, connect to the bus, open a listening
//! session port under an accept policy, claim and advertise a well-known
//! name, then block until a remote peer joins. Each step is guarded by the
//! success of the prior one.
//!
//! # State Machine
//!
//! ```text
//!                 register_object()   (stays Unregistered)
//!                        |
//!                        v          connect()
//!   [Unregistered] ──────────────────────────> [Connected]
//!                                                   │ bind_session_port()
//!                                                   v
//!                                              [PortBound]
//!                                                   │ request_name()
//!                                                   v
//!                                            [NameRequested]
//!                                                   │ advertise_name()
//!                                                   v
//!                                              [Advertised]
//!                                                   │ await_session()
//!                                                   v
//!                                           [AwaitingSession]
//!                                                   │ join accepted
//!                                                   v
//!                                            [SessionActive]
//!
//!   [Failed(reason)] reachable from any state on a connector error.
//! ```
//!
//! Setup-phase failures are fatal: no retries, the bootstrap records
//! `Failed` and surfaces the error for the process to exit with a distinct
//! code. The one compensating action is on advertise failure, where the
//! already-acquired name is released first so no ownership is orphaned.
//!
//! Calling a step from the wrong state is a caller bug and reports a
//! `Protocol` error without poisoning the machine.
//!
//! Once `SessionActive`, the service is a passive serve loop: inbound calls
//! flow from the bus into the dispatcher for as long as the process lives;
//! the bootstrap itself has nothing periodic to do.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::bus::BusConnector;
use crate::dispatch::ServiceObject;
use crate::error::{BuswayError, Result};
use crate::session::{SessionInfo, SessionOptions, SessionPort, SessionPortPolicy, TransportMask};

/// Bootstrap progress states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapState {
    /// Initial state; objects may be registered.
    Unregistered,
    /// Transport connection to the bus established.
    Connected,
    /// Listening session port bound under a policy.
    PortBound,
    /// Well-known name acquired.
    NameRequested,
    /// Name advertised for discovery.
    Advertised,
    /// Blocked until a remote peer joins.
    AwaitingSession,
    /// At least one session established; serving calls.
    SessionActive,
    /// A setup step failed; terminal.
    Failed(String),
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unregistered => write!(f, "Unregistered"),
            Self::Connected => write!(f, "Connected"),
            Self::PortBound => write!(f, "PortBound"),
            Self::NameRequested => write!(f, "NameRequested"),
            Self::Advertised => write!(f, "Advertised"),
            Self::AwaitingSession => write!(f, "AwaitingSession"),
            Self::SessionActive => write!(f, "SessionActive"),
            Self::Failed(reason) => write!(f, "Failed({reason})"),
        }
    }
}

/// Sequential bootstrap driver for one service attachment.
pub struct ServiceBootstrap<B: BusConnector> {
    bus: Arc<B>,
    state: BootstrapState,
    objects: Vec<Arc<ServiceObject>>,
    requested_name: Option<String>,
    joined_rx: Option<mpsc::UnboundedReceiver<SessionInfo>>,
    session: Option<SessionInfo>,
}

impl<B: BusConnector> ServiceBootstrap<B> {
    /// Create a bootstrap over a bus connector.
    pub fn new(bus: Arc<B>) -> Self {
        Self {
            bus,
            state: BootstrapState::Unregistered,
            objects: Vec::new(),
            requested_name: None,
            joined_rx: None,
            session: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> &BootstrapState {
        &self.state
    }

    /// The first established session, once active.
    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    /// Objects registered so far.
    pub fn objects(&self) -> &[Arc<ServiceObject>] {
        &self.objects
    }

    fn expect_state(&self, expected: &BootstrapState, op: &str) -> Result<()> {
        if self.state == *expected {
            Ok(())
        } else {
            Err(BuswayError::Protocol(format!(
                "cannot {op} in state {}",
                self.state
            )))
        }
    }

    /// Record a connector failure and surface it.
    fn fail<T>(&mut self, err: BuswayError) -> Result<T> {
        self.state = BootstrapState::Failed(err.to_string());
        Err(err)
    }

    /// Register a local object implementing the service interface.
    ///
    /// Valid only before `connect`; more than one object may be registered.
    pub fn register_object(&mut self, object: ServiceObject) -> Result<Arc<ServiceObject>> {
        self.expect_state(&BootstrapState::Unregistered, "register an object")?;
        match self.bus.register_object(object) {
            Ok(object) => {
                tracing::info!("registered object at {}", object.path());
                self.objects.push(Arc::clone(&object));
                Ok(object)
            }
            Err(err) => self.fail(err),
        }
    }

    /// Establish the transport connection to the bus.
    pub fn connect(&mut self) -> Result<()> {
        self.expect_state(&BootstrapState::Unregistered, "connect")?;
        if self.objects.is_empty() {
            return Err(BuswayError::Protocol(
                "connect requires a registered object".to_string(),
            ));
        }
        match self.bus.connect() {
            Ok(unique) => {
                tracing::info!("connected to the bus as {unique}");
                self.state = BootstrapState::Connected;
                Ok(())
            }
            Err(err) => self.fail(err),
        }
    }

    /// Open a listening session port, offering `options` to joiners.
    pub fn bind_session_port(
        &mut self,
        policy: SessionPortPolicy,
        options: SessionOptions,
    ) -> Result<()> {
        self.expect_state(&BootstrapState::Connected, "bind a session port")?;
        let port = policy.port();
        let (joined_tx, joined_rx) = mpsc::unbounded_channel();
        match self.bus.bind_session_port(policy, options, joined_tx) {
            Ok(()) => {
                tracing::info!("session port {port} bound");
                self.joined_rx = Some(joined_rx);
                self.state = BootstrapState::PortBound;
                Ok(())
            }
            Err(err) => self.fail(err),
        }
    }

    /// Claim ownership of the well-known name.
    pub fn request_name(&mut self, name: &str, flags: u32) -> Result<()> {
        self.expect_state(&BootstrapState::PortBound, "request a name")?;
        match self.bus.request_name(name, flags) {
            Ok(()) => {
                tracing::info!("well-known name {name} acquired");
                self.requested_name = Some(name.to_string());
                self.state = BootstrapState::NameRequested;
                Ok(())
            }
            Err(err) => self.fail(err),
        }
    }

    /// Advertise the requested name over the given transports.
    ///
    /// On failure the name acquired by [`request_name`](Self::request_name)
    /// is released before the error surfaces: a partially bootstrapped
    /// service must not keep ownership it will never serve.
    pub fn advertise_name(&mut self, transports: TransportMask) -> Result<()> {
        self.expect_state(&BootstrapState::NameRequested, "advertise")?;
        let name = self
            .requested_name
            .clone()
            .ok_or_else(|| BuswayError::Protocol("no name requested".to_string()))?;
        match self.bus.advertise_name(&name, transports) {
            Ok(()) => {
                tracing::info!("name {name} advertised");
                self.state = BootstrapState::Advertised;
                Ok(())
            }
            Err(err) => {
                if let Err(release_err) = self.bus.release_name(&name) {
                    tracing::warn!("failed to release {name} after advertise error: {release_err}");
                }
                self.requested_name = None;
                self.fail(err)
            }
        }
    }

    /// Block until the accept policy approves a remote join.
    ///
    /// `None` blocks indefinitely; `Some(timeout)` is the cancellation hook
    /// for deployments that cannot afford an unbounded wait. The session is
    /// delivered over a channel written exactly once per join; nothing
    /// polls.
    pub async fn await_session(&mut self, timeout: Option<Duration>) -> Result<SessionInfo> {
        self.expect_state(&BootstrapState::Advertised, "await a session")?;
        self.state = BootstrapState::AwaitingSession;
        let joined_rx = self
            .joined_rx
            .as_mut()
            .ok_or_else(|| BuswayError::Protocol("no joined channel".to_string()))?;

        let received = match timeout {
            None => joined_rx.recv().await,
            Some(timeout) => match tokio::time::timeout(timeout, joined_rx.recv()).await {
                Ok(received) => received,
                Err(_) => {
                    let err = BuswayError::Protocol(format!(
                        "no session joined within {} ms",
                        timeout.as_millis()
                    ));
                    return self.fail(err);
                }
            },
        };

        match received {
            Some(info) => {
                tracing::info!("session {} established with {}", info.session_id, info.joiner);
                self.session = Some(info.clone());
                self.state = BootstrapState::SessionActive;
                Ok(info)
            }
            None => self.fail(BuswayError::Connection(
                "bus dropped the joined channel".to_string(),
            )),
        }
    }

    /// Receive a further join on an already-active multipoint port.
    pub async fn next_session(&mut self, timeout: Option<Duration>) -> Result<SessionInfo> {
        self.expect_state(&BootstrapState::SessionActive, "receive another session")?;
        let joined_rx = self
            .joined_rx
            .as_mut()
            .ok_or_else(|| BuswayError::Protocol("no joined channel".to_string()))?;

        let received = match timeout {
            None => joined_rx.recv().await,
            Some(timeout) => tokio::time::timeout(timeout, joined_rx.recv())
                .await
                .map_err(|_| {
                    BuswayError::Protocol(format!(
                        "no session joined within {} ms",
                        timeout.as_millis()
                    ))
                })?,
        };

        received.ok_or_else(|| {
            BuswayError::Connection("bus dropped the joined channel".to_string())
        })
    }

    /// Drive the whole sequence after object registration: connect, bind
    /// the port under the default same-port-only policy, request the name
    /// with no flags, advertise over the options' transports, and wait for
    /// the first join.
    pub async fn run(
        &mut self,
        name: &str,
        port: SessionPort,
        options: SessionOptions,
        timeout: Option<Duration>,
    ) -> Result<SessionInfo> {
        self.connect()?;
        self.bind_session_port(SessionPortPolicy::new(port), options)?;
        self.request_name(name, 0)?;
        self.advertise_name(options.transports)?;
        self.await_session(timeout).await
    }
}

impl<B: BusConnector> fmt::Debug for ServiceBootstrap<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBootstrap")
            .field("state", &self.state)
            .field("objects", &self.objects.len())
            .field("requested_name", &self.requested_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::descriptor::{InterfaceDescriptor, MethodDescriptor};
    use crate::dispatch::ServiceObjectBuilder;

    fn echo_object() -> crate::dispatch::ServiceObject {
        let interface = InterfaceDescriptor::new("org.busway.test")
            .method(MethodDescriptor::new("Echo", "s", "s"))
            .unwrap();
        ServiceObjectBuilder::new("/test", interface)
            .handler("Echo", |args| Ok(vec![args[0].clone()]))
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_initial_state() {
        let bus = Arc::new(MemoryBus::default());
        let bootstrap = ServiceBootstrap::new(bus);
        assert_eq!(*bootstrap.state(), BootstrapState::Unregistered);
        assert!(bootstrap.session().is_none());
    }

    #[test]
    fn test_connect_requires_registered_object() {
        let bus = Arc::new(MemoryBus::default());
        let mut bootstrap = ServiceBootstrap::new(bus);
        let err = bootstrap.connect().unwrap_err();
        assert!(matches!(err, BuswayError::Protocol(_)));
        // A caller-order bug does not poison the machine.
        assert_eq!(*bootstrap.state(), BootstrapState::Unregistered);
    }

    #[test]
    fn test_steps_reject_wrong_state() {
        let bus = Arc::new(MemoryBus::default());
        let mut bootstrap = ServiceBootstrap::new(bus);
        bootstrap.register_object(echo_object()).unwrap();

        // Port binding before connect is out of order.
        let err = bootstrap
            .bind_session_port(
                SessionPortPolicy::new(SessionPort(42)),
                SessionOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, BuswayError::Protocol(_)));

        let err = bootstrap.request_name("org.busway.test", 0).unwrap_err();
        assert!(matches!(err, BuswayError::Protocol(_)));
    }

    #[test]
    fn test_connection_failure_is_terminal() {
        let bus = Arc::new(MemoryBus::offline("loopback:abstract=down"));
        let mut bootstrap = ServiceBootstrap::new(bus);
        let err = bootstrap.register_object(echo_object()).unwrap_err();
        assert!(matches!(err, BuswayError::Registration(_)));
        assert!(matches!(bootstrap.state(), BootstrapState::Failed(_)));
    }

    #[tokio::test]
    async fn test_state_walk_to_advertised() {
        let bus = Arc::new(MemoryBus::default());
        let mut bootstrap = ServiceBootstrap::new(Arc::clone(&bus));
        bootstrap.register_object(echo_object()).unwrap();

        bootstrap.connect().unwrap();
        assert_eq!(*bootstrap.state(), BootstrapState::Connected);

        bootstrap
            .bind_session_port(
                SessionPortPolicy::new(SessionPort(42)),
                SessionOptions::default(),
            )
            .unwrap();
        assert_eq!(*bootstrap.state(), BootstrapState::PortBound);

        bootstrap.request_name("org.busway.test", 0).unwrap();
        assert_eq!(*bootstrap.state(), BootstrapState::NameRequested);

        bootstrap.advertise_name(TransportMask::ANY).unwrap();
        assert_eq!(*bootstrap.state(), BootstrapState::Advertised);
        assert!(bus.is_advertised("org.busway.test"));
    }

    #[tokio::test]
    async fn test_await_session_timeout_fails() {
        let bus = Arc::new(MemoryBus::default());
        let mut bootstrap = ServiceBootstrap::new(bus);
        bootstrap.register_object(echo_object()).unwrap();
        bootstrap.connect().unwrap();
        bootstrap
            .bind_session_port(
                SessionPortPolicy::new(SessionPort(42)),
                SessionOptions::default(),
            )
            .unwrap();
        bootstrap.request_name("org.busway.test", 0).unwrap();
        bootstrap.advertise_name(TransportMask::ANY).unwrap();

        let err = bootstrap
            .await_session(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, BuswayError::Protocol(_)));
        assert!(matches!(bootstrap.state(), BootstrapState::Failed(_)));
    }
}
