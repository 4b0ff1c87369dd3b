//! Interface descriptors: the statically constructed method metadata table.
//!
//! A [`MethodDescriptor`] maps an exported method to its wire-level RPC
//! metadata (name, input/output signatures, reply flags, timeout, dispatch
//! mode). Descriptors are built once at service-definition time and never
//! mutated afterwards; no runtime reflection is involved.
//!
//! The dispatch mode is an explicit tag per method, not a property of the
//! object: a service can mark one slow operation [`Concurrent`] while its
//! quick state-touching neighbors stay [`Serialized`], without serializing
//! the whole object.
//!
//! [`Concurrent`]: DispatchMode::Concurrent
//! [`Serialized`]: DispatchMode::Serialized
//!
//! # Usage
//!
//! ```rust,ignore
//! use busway::descriptor::{InterfaceDescriptor, MethodDescriptor};
//!
//! let interface = InterfaceDescriptor::new("org.busway.sample")
//!     .method(MethodDescriptor::new("Concatenate", "ss", "s").serialized())?
//!     .method(MethodDescriptor::new("Pi", "i", "d"))?;
//!
//! let desc = interface.describe("Pi")?;
//! assert_eq!(desc.output_signature, "d");
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BuswayError, Result};
use crate::signature;

/// Default reply timeout when a descriptor does not declare one (25 seconds).
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 25_000;

/// How invocations of a method may interleave on one object instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Invocations may run in parallel with any other invocation,
    /// including other calls to the same method.
    #[default]
    Concurrent,
    /// Invocations hold the object's serial lock; two serialized calls on
    /// the same object never overlap.
    Serialized,
}

/// Wire-level metadata for one exported method.
///
/// Immutable once declared; created at service-definition time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodDescriptor {
    /// Method name as it appears on the wire.
    pub name: String,
    /// Input signature (argument type tags).
    pub input_signature: String,
    /// Output signature (reply type tags).
    pub output_signature: String,
    /// Caller does not wait for a reply.
    #[serde(default)]
    pub no_reply: bool,
    /// Marked deprecated in introspection data.
    #[serde(default)]
    pub deprecated: bool,
    /// Reply timeout in milliseconds; `None` means the implementation
    /// default of [`DEFAULT_REPLY_TIMEOUT_MS`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Dispatch interleaving mode.
    #[serde(default)]
    pub mode: DispatchMode,
}

impl MethodDescriptor {
    /// Create a descriptor with the default flags (reply expected, not
    /// deprecated, default timeout, concurrent dispatch).
    pub fn new(name: &str, input_signature: &str, output_signature: &str) -> Self {
        Self {
            name: name.to_string(),
            input_signature: input_signature.to_string(),
            output_signature: output_signature.to_string(),
            no_reply: false,
            deprecated: false,
            timeout_ms: None,
            mode: DispatchMode::Concurrent,
        }
    }

    /// Mark invocations of this method as mutually exclusive on one object.
    pub fn serialized(mut self) -> Self {
        self.mode = DispatchMode::Serialized;
        self
    }

    /// Mark this method as fire-and-forget (no reply envelope).
    pub fn no_reply(mut self) -> Self {
        self.no_reply = true;
        self
    }

    /// Mark this method deprecated in introspection data.
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Override the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Effective reply timeout for dispatch.
    pub fn effective_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_REPLY_TIMEOUT_MS))
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(BuswayError::Registration(
                "method name must be non-empty".to_string(),
            ));
        }
        signature::validate(&self.input_signature)?;
        signature::validate(&self.output_signature)?;
        Ok(())
    }
}

/// The exported method set of a service interface.
///
/// Queried by the dispatcher to route incoming calls and by the proxy side
/// to validate outgoing ones. Descriptors are validated on insertion, so a
/// built table only ever holds well-formed metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    /// Interface name (dotted, bus-scoped).
    name: String,
    /// Descriptors keyed by method name.
    methods: BTreeMap<String, MethodDescriptor>,
}

impl InterfaceDescriptor {
    /// Create an empty interface descriptor.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            methods: BTreeMap::new(),
        }
    }

    /// Interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a method descriptor, validating its name and signatures.
    pub fn method(mut self, descriptor: MethodDescriptor) -> Result<Self> {
        descriptor.validate()?;
        if self.methods.contains_key(&descriptor.name) {
            return Err(BuswayError::Registration(format!(
                "method {} declared twice on {}",
                descriptor.name, self.name
            )));
        }
        self.methods.insert(descriptor.name.clone(), descriptor);
        Ok(self)
    }

    /// Look up the descriptor for a method.
    ///
    /// Pure and deterministic; fails with `UnknownMethod` for names not in
    /// the table.
    pub fn describe(&self, method: &str) -> Result<&MethodDescriptor> {
        self.methods
            .get(method)
            .ok_or_else(|| BuswayError::UnknownMethod(method.to_string()))
    }

    /// Whether the table contains a method.
    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Iterate over all descriptors in name order.
    pub fn methods(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values()
    }

    /// Number of exported methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
