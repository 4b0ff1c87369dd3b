//! Session ports and the join-accept policy.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::SessionOptions;

/// A 16-bit session contact port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionPort(pub u16);

impl SessionPort {
    /// Raw port number.
    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for SessionPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for SessionPort {
    fn from(port: u16) -> Self {
        Self(port)
    }
}

/// Join-accept predicate: (requested port, joiner identity, proposed options).
pub type AcceptPredicate = dyn Fn(SessionPort, &str, &SessionOptions) -> bool + Send + Sync;

/// Accept policy for one bound session port.
///
/// A policy instance is single-port-scoped: the default predicate accepts a
/// join only when the requested port equals the bound port, and rejects any
/// other port. The predicate stays pluggable for deployments that need a
/// different rule (joiner allow-lists, option inspection); lifetime is the
/// owning bootstrap's, which is the process.
#[derive(Clone)]
pub struct SessionPortPolicy {
    port: SessionPort,
    predicate: Arc<AcceptPredicate>,
}

impl SessionPortPolicy {
    /// Policy with the default same-port-only predicate.
    pub fn new(port: SessionPort) -> Self {
        Self {
            port,
            predicate: Arc::new(move |requested, _joiner, _opts| requested == port),
        }
    }

    /// Replace the accept predicate.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(SessionPort, &str, &SessionOptions) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    /// The bound port.
    pub fn port(&self) -> SessionPort {
        self.port
    }

    /// Evaluate the accept predicate for a join request.
    pub fn accepts(&self, requested: SessionPort, joiner: &str, opts: &SessionOptions) -> bool {
        (self.predicate)(requested, joiner, opts)
    }
}

// Debug by hand: the predicate closure has no useful representation.
impl fmt::Debug for SessionPortPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPortPolicy")
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_same_port_only() {
        let policy = SessionPortPolicy::new(SessionPort(42));
        let opts = SessionOptions::default();

        assert!(policy.accepts(SessionPort(42), ":1.7", &opts));
        assert!(!policy.accepts(SessionPort(43), ":1.7", &opts));
        assert!(!policy.accepts(SessionPort(0), ":1.7", &opts));
    }

    #[test]
    fn test_custom_predicate() {
        let policy = SessionPortPolicy::new(SessionPort(42))
            .with_predicate(|_, joiner, _| joiner.starts_with(":1."));
        let opts = SessionOptions::default();

        // Custom rule replaces the port check entirely.
        assert!(policy.accepts(SessionPort(99), ":1.7", &opts));
        assert!(!policy.accepts(SessionPort(42), "intruder", &opts));
    }

    #[test]
    fn test_port_display_and_from() {
        let port: SessionPort = 42.into();
        assert_eq!(port.to_string(), "42");
        assert_eq!(port.get(), 42);
    }
}
