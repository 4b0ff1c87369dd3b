//! In-process loopback bus.
//!
//! `MemoryBus` plays the daemon's part for a single service attachment plus
//! any number of synthetic joiners: it keeps the well-known-name table,
//! enforces port binding and join negotiation, allocates session ids, and
//! routes method calls into the registered objects' dispatcher. Tests and
//! the demo binary use it in place of a running daemon; production
//! deployments supply a real [`BusConnector`] instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::mpsc::UnboundedSender;

use super::{request_name_flags, BusConnector, BusListener};
use crate::dispatch::{Dispatcher, MethodCall, MethodReply, ServiceObject};
use crate::error::{BuswayError, Result};
use crate::session::{SessionInfo, SessionOptions, SessionPort, SessionPortPolicy, TransportMask};

/// Default loopback address, for log flavor only.
pub const DEFAULT_ADDRESS: &str = "loopback:abstract=busway";

struct NameRecord {
    owner: String,
    allow_replacement: bool,
    advertised: Option<TransportMask>,
}

struct PortBinding {
    policy: SessionPortPolicy,
    offered: SessionOptions,
    joined_tx: UnboundedSender<SessionInfo>,
}

struct SessionRecord {
    port: u16,
    joiner: String,
}

#[derive(Default)]
struct BusCore {
    connected: bool,
    unique_name: Option<String>,
    names: HashMap<String, NameRecord>,
    ports: HashMap<u16, PortBinding>,
    sessions: HashMap<u32, SessionRecord>,
}

/// A name-owner transition to fan out to listeners after the core lock drops.
struct OwnerChange {
    name: String,
    previous: Option<String>,
    new_owner: Option<String>,
}

/// Loopback bus connector.
pub struct MemoryBus {
    address: String,
    online: AtomicBool,
    dispatcher: Dispatcher,
    listeners: RwLock<Vec<Arc<dyn BusListener>>>,
    core: Mutex<BusCore>,
    next_session_id: AtomicU32,
    next_unique: AtomicU32,
}

impl MemoryBus {
    /// Create a reachable loopback bus.
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            online: AtomicBool::new(true),
            dispatcher: Dispatcher::new(),
            listeners: RwLock::new(Vec::new()),
            core: Mutex::new(BusCore::default()),
            next_session_id: AtomicU32::new(1),
            next_unique: AtomicU32::new(1),
        }
    }

    /// Create a bus whose daemon is "not running": `connect` and
    /// `register_object` fail until the end of time.
    pub fn offline(address: &str) -> Self {
        let bus = Self::new(address);
        bus.online.store(false, Ordering::SeqCst);
        bus
    }

    /// The address this bus pretends to listen on.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Unique name assigned to the service attachment, once connected.
    pub fn unique_name(&self) -> Option<String> {
        self.lock_core().unique_name.clone()
    }

    /// Current owner of a well-known name.
    pub fn name_owner(&self, name: &str) -> Option<String> {
        self.lock_core().names.get(name).map(|r| r.owner.clone())
    }

    /// Whether a well-known name is currently advertised.
    pub fn is_advertised(&self, name: &str) -> bool {
        self.lock_core()
            .names
            .get(name)
            .is_some_and(|r| r.advertised.is_some())
    }

    /// Number of established sessions.
    pub fn session_count(&self) -> usize {
        self.lock_core().sessions.len()
    }

    /// Seat a foreign endpoint as owner of a name, as if another process on
    /// the bus had requested it first.
    pub fn claim_name(&self, owner: &str, name: &str, allow_replacement: bool) {
        let previous = {
            let mut core = self.lock_core();
            let previous = core.names.get(name).map(|r| r.owner.clone());
            core.names.insert(
                name.to_string(),
                NameRecord {
                    owner: owner.to_string(),
                    allow_replacement,
                    advertised: None,
                },
            );
            previous
        };
        self.emit(OwnerChange {
            name: name.to_string(),
            previous,
            new_owner: Some(owner.to_string()),
        });
    }

    /// Join a session as a synthetic remote peer.
    ///
    /// Runs the daemon-side join handshake: the bound policy's accept
    /// predicate first, then structural option compatibility, then (for
    /// point-to-point ports) a single-session check. On success the
    /// service's bootstrap receives the [`SessionInfo`] over its joined
    /// channel.
    pub fn join_session(
        &self,
        joiner: &str,
        port: SessionPort,
        proposed: SessionOptions,
    ) -> Result<SessionInfo> {
        let (info, joined_tx) = {
            let mut core = self.lock_core();
            let binding = core.ports.get(&port.get()).ok_or_else(|| {
                BuswayError::Protocol(format!("no session port {port} bound"))
            })?;

            if !binding.policy.accepts(port, joiner, &proposed) {
                return Err(BuswayError::Protocol(format!(
                    "join of port {port} by {joiner} rejected by policy"
                )));
            }
            if !binding.offered.is_compatible(&proposed) {
                return Err(BuswayError::Protocol(format!(
                    "session options proposed by {joiner} are incompatible"
                )));
            }
            if !binding.offered.multipoint
                && core.sessions.values().any(|s| s.port == port.get())
            {
                return Err(BuswayError::Protocol(format!(
                    "port {port} already carries a point-to-point session"
                )));
            }

            let joined_tx = binding.joined_tx.clone();
            let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
            core.sessions.insert(
                session_id,
                SessionRecord {
                    port: port.get(),
                    joiner: joiner.to_string(),
                },
            );
            (SessionInfo::established(session_id, joiner), joined_tx)
        };

        tracing::debug!(
            "session {} joined by {} on port {}",
            info.session_id,
            info.joiner,
            port
        );
        if joined_tx.send(info.clone()).is_err() {
            tracing::debug!("joined receiver dropped; session {} unobserved", info.session_id);
        }
        Ok(info)
    }

    /// Invoke a method over an established session.
    pub async fn call(&self, session_id: u32, call: &MethodCall) -> Result<Option<MethodReply>> {
        {
            let core = self.lock_core();
            let session = core.sessions.get(&session_id).ok_or_else(|| {
                BuswayError::Protocol(format!("no established session {session_id}"))
            })?;
            tracing::debug!(
                "session {} ({}) calls {} on {}",
                session_id,
                session.joiner,
                call.method,
                call.path
            );
        }
        self.dispatcher.dispatch(call).await
    }

    fn lock_core(&self) -> std::sync::MutexGuard<'_, BusCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fan an owner change out to listeners. Never called under the core
    /// lock; listeners may re-enter the bus.
    fn emit(&self, change: OwnerChange) {
        tracing::debug!(
            "name owner changed: {} {:?} -> {:?}",
            change.name,
            change.previous,
            change.new_owner
        );
        let listeners: Vec<Arc<dyn BusListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.name_owner_changed(
                &change.name,
                change.previous.as_deref(),
                change.new_owner.as_deref(),
            );
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}

impl BusConnector for MemoryBus {
    fn register_object(&self, object: ServiceObject) -> Result<Arc<ServiceObject>> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(BuswayError::Registration(format!(
                "bus unreachable at {}",
                self.address
            )));
        }
        self.dispatcher.register(object)
    }

    fn register_listener(&self, listener: Arc<dyn BusListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn connect(&self) -> Result<String> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(BuswayError::Connection(format!(
                "bus daemon not reachable at {}",
                self.address
            )));
        }
        let mut core = self.lock_core();
        if core.connected {
            return Err(BuswayError::Protocol("already connected".to_string()));
        }
        let unique = format!(":1.{}", self.next_unique.fetch_add(1, Ordering::SeqCst));
        core.connected = true;
        core.unique_name = Some(unique.clone());
        Ok(unique)
    }

    fn bind_session_port(
        &self,
        policy: SessionPortPolicy,
        offered: SessionOptions,
        joined: UnboundedSender<SessionInfo>,
    ) -> Result<()> {
        let mut core = self.lock_core();
        if !core.connected {
            return Err(BuswayError::Connection("not connected to the bus".to_string()));
        }
        let port = policy.port().get();
        if core.ports.contains_key(&port) {
            return Err(BuswayError::PortInUse(port));
        }
        core.ports.insert(
            port,
            PortBinding {
                policy,
                offered,
                joined_tx: joined,
            },
        );
        Ok(())
    }

    fn request_name(&self, name: &str, flags: u32) -> Result<()> {
        let change = {
            let mut core = self.lock_core();
            if !core.connected {
                return Err(BuswayError::Connection("not connected to the bus".to_string()));
            }
            if !name.contains('.') {
                return Err(BuswayError::Protocol(format!(
                    "{name:?} is not a valid well-known name"
                )));
            }
            let unique = core
                .unique_name
                .clone()
                .ok_or_else(|| BuswayError::Connection("no unique name assigned".to_string()))?;
            let allow_replacement = flags & request_name_flags::ALLOW_REPLACEMENT != 0;

            match core.names.entry(name.to_string()) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(NameRecord {
                        owner: unique.clone(),
                        allow_replacement,
                        advertised: None,
                    });
                    OwnerChange {
                        name: name.to_string(),
                        previous: None,
                        new_owner: Some(unique),
                    }
                }
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    let record = slot.get_mut();
                    if record.owner == unique {
                        record.allow_replacement = allow_replacement;
                        return Ok(());
                    }
                    if flags & request_name_flags::REPLACE_EXISTING != 0
                        && record.allow_replacement
                    {
                        let previous = std::mem::replace(&mut record.owner, unique.clone());
                        record.allow_replacement = allow_replacement;
                        record.advertised = None;
                        OwnerChange {
                            name: name.to_string(),
                            previous: Some(previous),
                            new_owner: Some(unique),
                        }
                    } else {
                        return Err(BuswayError::NameTaken(name.to_string()));
                    }
                }
            }
        };
        self.emit(change);
        Ok(())
    }

    fn advertise_name(&self, name: &str, transports: TransportMask) -> Result<()> {
        let mut core = self.lock_core();
        if !core.connected {
            return Err(BuswayError::Connection("not connected to the bus".to_string()));
        }
        if transports.is_empty() {
            return Err(BuswayError::Advertise(
                "empty transport mask selects no transport".to_string(),
            ));
        }
        let unique = core.unique_name.clone();
        match core.names.get_mut(name) {
            Some(record) if Some(&record.owner) == unique.as_ref() => {
                record.advertised = Some(transports);
                Ok(())
            }
            _ => Err(BuswayError::Advertise(format!(
                "name {name} not owned by this attachment"
            ))),
        }
    }

    fn release_name(&self, name: &str) -> Result<()> {
        let change = {
            let mut core = self.lock_core();
            let unique = core.unique_name.clone();
            let owned = core
                .names
                .get(name)
                .is_some_and(|record| Some(&record.owner) == unique.as_ref());
            if !owned {
                tracing::debug!("release of unowned name {} ignored", name);
                return Ok(());
            }
            core.names.remove(name);
            OwnerChange {
                name: name.to_string(),
                previous: unique,
                new_owner: None,
            }
        };
        self.emit(change);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{InterfaceDescriptor, MethodDescriptor};
    use crate::dispatch::ServiceObjectBuilder;
    use tokio::sync::mpsc;

    fn connected_bus() -> MemoryBus {
        let bus = MemoryBus::default();
        bus.connect().unwrap();
        bus
    }

    fn echo_object() -> ServiceObject {
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
    fn test_connect_assigns_unique_name() {
        let bus = MemoryBus::default();
        let unique = bus.connect().unwrap();
        assert!(unique.starts_with(":1."));
        assert_eq!(bus.unique_name(), Some(unique));

        // Second connect is a protocol error.
        assert!(matches!(bus.connect(), Err(BuswayError::Protocol(_))));
    }

    #[test]
    fn test_offline_bus_rejects_setup() {
        let bus = MemoryBus::offline(DEFAULT_ADDRESS);
        assert!(matches!(bus.connect(), Err(BuswayError::Connection(_))));
        assert!(matches!(
            bus.register_object(echo_object()),
            Err(BuswayError::Registration(_))
        ));
    }

    #[test]
    fn test_request_name_and_taken() {
        let bus = connected_bus();
        bus.request_name("org.busway.a", 0).unwrap();
        assert_eq!(bus.name_owner("org.busway.a"), bus.unique_name());

        bus.claim_name(":1.99", "org.busway.b", false);
        assert!(matches!(
            bus.request_name("org.busway.b", 0),
            Err(BuswayError::NameTaken(_))
        ));
    }

    #[test]
    fn test_request_name_replacement() {
        let bus = connected_bus();
        bus.claim_name(":1.99", "org.busway.x", true);

        // Without the flag the name stays put.
        assert!(bus.request_name("org.busway.x", 0).is_err());

        bus.request_name("org.busway.x", request_name_flags::REPLACE_EXISTING)
            .unwrap();
        assert_eq!(bus.name_owner("org.busway.x"), bus.unique_name());
    }

    #[test]
    fn test_invalid_well_known_name() {
        let bus = connected_bus();
        assert!(matches!(
            bus.request_name("nodots", 0),
            Err(BuswayError::Protocol(_))
        ));
    }

    #[test]
    fn test_advertise_requires_ownership_and_transport() {
        let bus = connected_bus();
        bus.request_name("org.busway.adv", 0).unwrap();

        assert!(matches!(
            bus.advertise_name("org.busway.adv", TransportMask::NONE),
            Err(BuswayError::Advertise(_))
        ));
        assert!(matches!(
            bus.advertise_name("org.busway.other", TransportMask::ANY),
            Err(BuswayError::Advertise(_))
        ));

        bus.advertise_name("org.busway.adv", TransportMask::ANY).unwrap();
        assert!(bus.is_advertised("org.busway.adv"));
    }

    #[test]
    fn test_bind_port_twice_fails() {
        let bus = connected_bus();
        let (tx, _rx) = mpsc::unbounded_channel();
        bus.bind_session_port(
            SessionPortPolicy::new(SessionPort(42)),
            SessionOptions::default(),
            tx,
        )
        .unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            bus.bind_session_port(
                SessionPortPolicy::new(SessionPort(42)),
                SessionOptions::default(),
                tx,
            ),
            Err(BuswayError::PortInUse(42))
        ));
    }

    #[tokio::test]
    async fn test_join_and_call_roundtrip() {
        let bus = connected_bus();
        bus.register_object(echo_object()).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.bind_session_port(
            SessionPortPolicy::new(SessionPort(42)),
            SessionOptions::default(),
            tx,
        )
        .unwrap();

        let info = bus
            .join_session(":1.7", SessionPort(42), SessionOptions::default())
            .unwrap();
        assert!(info.established);
        assert_eq!(rx.recv().await.unwrap(), info);

        let reply = bus
            .call(info.session_id, &MethodCall::new("/test", "Echo").arg("hi"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.first().unwrap(), "hi");
    }

    #[test]
    fn test_join_wrong_port_rejected() {
        let bus = connected_bus();
        let (tx, _rx) = mpsc::unbounded_channel();
        bus.bind_session_port(
            SessionPortPolicy::new(SessionPort(42)),
            SessionOptions::default(),
            tx,
        )
        .unwrap();

        assert!(bus
            .join_session(":1.7", SessionPort(43), SessionOptions::default())
            .is_err());
        assert_eq!(bus.session_count(), 0);
    }

    #[test]
    fn test_point_to_point_single_session() {
        let bus = connected_bus();
        let (tx, _rx) = mpsc::unbounded_channel();
        bus.bind_session_port(
            SessionPortPolicy::new(SessionPort(42)),
            SessionOptions::default(),
            tx,
        )
        .unwrap();

        bus.join_session(":1.7", SessionPort(42), SessionOptions::default())
            .unwrap();
        assert!(bus
            .join_session(":1.8", SessionPort(42), SessionOptions::default())
            .is_err());
    }

    #[test]
    fn test_multipoint_allows_many_joiners() {
        let bus = connected_bus();
        let offered = SessionOptions {
            multipoint: true,
            ..SessionOptions::default()
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        bus.bind_session_port(SessionPortPolicy::new(SessionPort(42)), offered, tx)
            .unwrap();

        bus.join_session(":1.7", SessionPort(42), offered).unwrap();
        bus.join_session(":1.8", SessionPort(42), offered).unwrap();
        assert_eq!(bus.session_count(), 2);
    }
}
