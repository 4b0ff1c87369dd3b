//! Method call and reply envelopes.
//!
//! Defines the JSON shapes a call and its reply travel in. Application
//! faults are replies, never transport errors: a handler that fails
//! produces a [`FaultInfo`] matching the method's reply slot, and the
//! process keeps serving.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dotted error name for calls to methods missing from the table.
pub const FAULT_UNKNOWN_METHOD: &str = "org.busway.Error.UnknownMethod";
/// Dotted error name for calls addressed to an unregistered object path.
pub const FAULT_UNKNOWN_OBJECT: &str = "org.busway.Error.UnknownObject";
/// Dotted error name for handlers that panicked.
pub const FAULT_INTERNAL: &str = "org.busway.Error.Internal";
/// Dotted error name for malformed or out-of-range arguments.
pub const FAULT_INVALID_ARGUMENT: &str = "org.busway.Error.InvalidArgument";

/// An inbound method invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodCall {
    /// Target object path.
    pub path: String,
    /// Method name.
    pub method: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl MethodCall {
    /// Create a call with no arguments.
    pub fn new(path: &str, method: &str) -> Self {
        Self {
            path: path.to_string(),
            method: method.to_string(),
            args: Vec::new(),
        }
    }

    /// Append one positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }
}

/// Reply to a method invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodReply {
    /// Successful reply values matching the output signature.
    Values(Vec<Value>),
    /// Structured application fault.
    Fault(FaultInfo),
}

impl MethodReply {
    /// Successful reply from a value list.
    pub fn values(values: Vec<Value>) -> Self {
        Self::Values(values)
    }

    /// Fault reply.
    pub fn fault(name: &str, message: &str) -> Self {
        Self::Fault(FaultInfo::new(name, message))
    }

    /// Whether this reply is a fault.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }

    /// First reply value, if this is a successful reply with one.
    pub fn first(&self) -> Option<&Value> {
        match self {
            Self::Values(values) => values.first(),
            Self::Fault(_) => None,
        }
    }
}

/// Structured application fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultInfo {
    /// Dotted fault name.
    pub name: String,
    /// Human-readable message.
    pub message: String,
}

impl FaultInfo {
    /// Create a fault.
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}
