//! Method dispatch with per-method concurrency policy.
//!
//! Once a session is active the service enters a passive serve loop:
//! inbound calls are routed through a [`Dispatcher`] to the registered
//! [`ServiceObject`] whose descriptor table matches, and executed under the
//! method's declared [`DispatchMode`]:
//!
//! - `Concurrent` methods run in parallel with anything, including other
//!   calls to themselves.
//! - `Serialized` methods hold the object's serial lock for the duration of
//!   the handler; two serialized calls on the same object never overlap.
//!
//! The lock is per object and acquired only for serialized calls, so one
//! slow concurrent method never blocks the rest of the object.
//!
//! Handlers run on the blocking thread pool under the descriptor's reply
//! timeout; waiting for the serial lock counts against the timeout. A
//! handler that outlives its timeout keeps the serial lock until it actually
//! returns, so mutual exclusion survives caller-side expiry.
//!
//! # Usage
//!
//! ```rust,ignore
//! use busway::dispatch::{MethodCall, ServiceObjectBuilder};
//!
//! let object = ServiceObjectBuilder::new("/service", interface)
//!     .handler("Concatenate", |args| { /* ... */ })?
//!     .build()?;
//!
//! let dispatcher = Dispatcher::new();
//! let object = dispatcher.register(object)?;
//! let reply = dispatcher.dispatch(&MethodCall::new("/service", "Concatenate")).await?;
//! ```

mod call;

pub use call::{
    FaultInfo, MethodCall, MethodReply, FAULT_INTERNAL, FAULT_INVALID_ARGUMENT,
    FAULT_UNKNOWN_METHOD, FAULT_UNKNOWN_OBJECT,
};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::Mutex;

use crate::descriptor::{DispatchMode, InterfaceDescriptor, MethodDescriptor};
use crate::error::{BuswayError, Result};
use crate::signature;

/// Method handler: positional JSON arguments in, reply values or fault out.
pub type Handler = dyn Fn(&[Value]) -> std::result::Result<Vec<Value>, FaultInfo> + Send + Sync;

/// A registered local object implementing one interface.
pub struct ServiceObject {
    /// Object path the bus routes calls by.
    path: String,
    /// Exported method table.
    interface: InterfaceDescriptor,
    /// Handlers keyed by method name; complete by construction.
    handlers: HashMap<String, Arc<Handler>>,
    /// Serial lock shared by this object's `Serialized` methods.
    serial_lock: Arc<Mutex<()>>,
}

impl ServiceObject {
    /// Object path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Exported interface table.
    pub fn interface(&self) -> &InterfaceDescriptor {
        &self.interface
    }

    /// Route one call through this object.
    ///
    /// Unknown methods yield a fault reply, not an error; the only error
    /// this returns is `DispatchTimeout`. `no_reply` methods execute
    /// detached and yield `Ok(None)` immediately.
    pub async fn invoke(self: Arc<Self>, call: &MethodCall) -> Result<Option<MethodReply>> {
        let descriptor = match self.interface.describe(&call.method) {
            Ok(descriptor) => descriptor.clone(),
            Err(_) => {
                tracing::warn!("call to unknown method {} on {}", call.method, self.path);
                return Ok(Some(MethodReply::fault(
                    FAULT_UNKNOWN_METHOD,
                    &format!("{} has no method {}", self.interface.name(), call.method),
                )));
            }
        };

        let handler = self
            .handlers
            .get(&call.method)
            .cloned()
            .ok_or_else(|| BuswayError::UnknownMethod(call.method.clone()))?;

        if descriptor.deprecated {
            tracing::debug!("deprecated method {} invoked", descriptor.name);
        }

        if descriptor.no_reply {
            let object = Arc::clone(&self);
            let args = call.args.clone();
            tokio::spawn(async move {
                let reply = object.execute(&descriptor, handler, args).await;
                if let MethodReply::Fault(fault) = reply {
                    tracing::warn!(
                        "no-reply method {} faulted: {}: {}",
                        descriptor.name,
                        fault.name,
                        fault.message
                    );
                }
            });
            return Ok(None);
        }

        let timeout = descriptor.effective_timeout();
        match tokio::time::timeout(timeout, self.execute(&descriptor, handler, call.args.clone()))
            .await
        {
            Ok(reply) => Ok(Some(reply)),
            Err(_) => Err(BuswayError::DispatchTimeout {
                method: call.method.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Run a handler under the method's dispatch mode.
    async fn execute(
        &self,
        descriptor: &MethodDescriptor,
        handler: Arc<Handler>,
        args: Vec<Value>,
    ) -> MethodReply {
        let guard = match descriptor.mode {
            DispatchMode::Serialized => Some(Arc::clone(&self.serial_lock).lock_owned().await),
            DispatchMode::Concurrent => None,
        };

        // Signatures were validated at definition time, so arity is total here.
        let expected = signature::arity(&descriptor.output_signature).unwrap_or(0);
        let method = descriptor.name.clone();
        let output_signature = descriptor.output_signature.clone();

        let joined = tokio::task::spawn_blocking(move || {
            // The guard rides inside the blocking task: a serialized handler
            // keeps exclusion until it returns, even if the caller timed out.
            let _guard = guard;
            handler(&args)
        })
        .await;

        match joined {
            Ok(Ok(values)) => {
                if values.len() != expected {
                    tracing::warn!(
                        "{} replied with {} values but signature {:?} declares {}",
                        method,
                        values.len(),
                        output_signature,
                        expected
                    );
                }
                MethodReply::Values(values)
            }
            Ok(Err(fault)) => MethodReply::Fault(fault),
            Err(err) => MethodReply::fault(FAULT_INTERNAL, &format!("handler aborted: {err}")),
        }
    }
}

impl fmt::Debug for ServiceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceObject")
            .field("path", &self.path)
            .field("interface", &self.interface.name())
            .field("methods", &self.interface.len())
            .finish_non_exhaustive()
    }
}

/// Builder pairing an interface table with its handlers.
pub struct ServiceObjectBuilder {
    path: String,
    interface: InterfaceDescriptor,
    handlers: HashMap<String, Arc<Handler>>,
}

impl ServiceObjectBuilder {
    /// Start building an object at `path` exporting `interface`.
    pub fn new(path: &str, interface: InterfaceDescriptor) -> Self {
        Self {
            path: path.to_string(),
            interface,
            handlers: HashMap::new(),
        }
    }

    /// Attach the handler for one declared method.
    pub fn handler<F>(mut self, method: &str, handler: F) -> Result<Self>
    where
        F: Fn(&[Value]) -> std::result::Result<Vec<Value>, FaultInfo> + Send + Sync + 'static,
    {
        if !self.interface.contains(method) {
            return Err(BuswayError::UnknownMethod(method.to_string()));
        }
        if self.handlers.contains_key(method) {
            return Err(BuswayError::Registration(format!(
                "handler for {method} attached twice"
            )));
        }
        self.handlers.insert(method.to_string(), Arc::new(handler));
        Ok(self)
    }

    /// Finish the object, requiring a handler for every declared method.
    pub fn build(self) -> Result<ServiceObject> {
        if !self.path.starts_with('/') {
            return Err(BuswayError::Registration(format!(
                "object path {:?} must start with '/'",
                self.path
            )));
        }
        for descriptor in self.interface.methods() {
            if !self.handlers.contains_key(&descriptor.name) {
                return Err(BuswayError::Registration(format!(
                    "declared method {} has no handler",
                    descriptor.name
                )));
            }
        }
        Ok(ServiceObject {
            path: self.path,
            interface: self.interface,
            handlers: self.handlers,
            serial_lock: Arc::new(Mutex::new(())),
        })
    }
}

/// Routes inbound calls to registered objects by path.
#[derive(Default)]
pub struct Dispatcher {
    /// Registered objects; write-locked only at registration time.
    objects: RwLock<HashMap<String, Arc<ServiceObject>>>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object, failing if its path is already occupied.
    pub fn register(&self, object: ServiceObject) -> Result<Arc<ServiceObject>> {
        let mut objects = self
            .objects
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if objects.contains_key(object.path()) {
            return Err(BuswayError::Registration(format!(
                "another object already occupies path {}",
                object.path()
            )));
        }
        let object = Arc::new(object);
        objects.insert(object.path().to_string(), Arc::clone(&object));
        Ok(object)
    }

    /// Remove the object at `path`, if any.
    pub fn unregister(&self, path: &str) -> Option<Arc<ServiceObject>> {
        self.objects
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(path)
    }

    /// Look up the object at `path`.
    pub fn object(&self, path: &str) -> Option<Arc<ServiceObject>> {
        self.objects
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// Number of registered objects.
    pub fn object_count(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Route one call to its target object.
    pub async fn dispatch(&self, call: &MethodCall) -> Result<Option<MethodReply>> {
        let Some(object) = self.object(&call.path) else {
            return Ok(Some(MethodReply::fault(
                FAULT_UNKNOWN_OBJECT,
                &format!("no object registered at {}", call.path),
            )));
        };
        object.invoke(call).await
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("objects", &self.object_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::MethodDescriptor;
    use serde_json::json;
    use std::time::Duration;

    fn echo_interface() -> InterfaceDescriptor {
        InterfaceDescriptor::new("org.busway.test")
            .method(MethodDescriptor::new("Echo", "s", "s"))
            .unwrap()
    }

    fn echo_object(path: &str) -> ServiceObject {
        ServiceObjectBuilder::new(path, echo_interface())
            .handler("Echo", |args| Ok(vec![args[0].clone()]))
            .unwrap()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_echo() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(echo_object("/test")).unwrap();

        let reply = dispatcher
            .dispatch(&MethodCall::new("/test", "Echo").arg("hello"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, MethodReply::values(vec![json!("hello")]));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method_is_fault() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(echo_object("/test")).unwrap();

        let reply = dispatcher
            .dispatch(&MethodCall::new("/test", "Missing"))
            .await
            .unwrap()
            .unwrap();
        match reply {
            MethodReply::Fault(fault) => assert_eq!(fault.name, FAULT_UNKNOWN_METHOD),
            MethodReply::Values(_) => panic!("expected fault"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_unknown_object_is_fault() {
        let dispatcher = Dispatcher::new();
        let reply = dispatcher
            .dispatch(&MethodCall::new("/nowhere", "Echo"))
            .await
            .unwrap()
            .unwrap();
        match reply {
            MethodReply::Fault(fault) => assert_eq!(fault.name, FAULT_UNKNOWN_OBJECT),
            MethodReply::Values(_) => panic!("expected fault"),
        }
    }

    #[tokio::test]
    async fn test_handler_fault_is_reply_not_error() {
        let interface = InterfaceDescriptor::new("org.busway.test")
            .method(MethodDescriptor::new("Fail", "", "i"))
            .unwrap();
        let object = ServiceObjectBuilder::new("/test", interface)
            .handler("Fail", |_| {
                Err(FaultInfo::new(FAULT_INVALID_ARGUMENT, "always fails"))
            })
            .unwrap()
            .build()
            .unwrap();

        let dispatcher = Dispatcher::new();
        dispatcher.register(object).unwrap();

        let reply = dispatcher
            .dispatch(&MethodCall::new("/test", "Fail"))
            .await
            .unwrap()
            .unwrap();
        assert!(reply.is_fault());
    }

    #[tokio::test]
    async fn test_dispatch_timeout() {
        let interface = InterfaceDescriptor::new("org.busway.test")
            .method(
                MethodDescriptor::new("Slow", "", "")
                    .with_timeout(Duration::from_millis(50)),
            )
            .unwrap();
        let object = ServiceObjectBuilder::new("/test", interface)
            .handler("Slow", |_| {
                std::thread::sleep(Duration::from_millis(500));
                Ok(vec![])
            })
            .unwrap()
            .build()
            .unwrap();

        let dispatcher = Dispatcher::new();
        dispatcher.register(object).unwrap();

        let result = dispatcher.dispatch(&MethodCall::new("/test", "Slow")).await;
        assert!(matches!(
            result,
            Err(BuswayError::DispatchTimeout { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_reply_returns_none() {
        let (tx, rx) = std::sync::mpsc::channel::<String>();
        let interface = InterfaceDescriptor::new("org.busway.test")
            .method(MethodDescriptor::new("Notify", "s", "").no_reply())
            .unwrap();
        let object = ServiceObjectBuilder::new("/test", interface)
            .handler("Notify", move |args| {
                let text = args[0].as_str().unwrap_or_default().to_string();
                tx.send(text).ok();
                Ok(vec![])
            })
            .unwrap()
            .build()
            .unwrap();

        let dispatcher = Dispatcher::new();
        dispatcher.register(object).unwrap();

        let reply = dispatcher
            .dispatch(&MethodCall::new("/test", "Notify").arg("ping"))
            .await
            .unwrap();
        assert!(reply.is_none());

        // The handler still ran, just detached from the caller.
        let received = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(received, "ping");
    }

    #[test]
    fn test_builder_requires_all_handlers() {
        let interface = InterfaceDescriptor::new("org.busway.test")
            .method(MethodDescriptor::new("A", "", ""))
            .unwrap()
            .method(MethodDescriptor::new("B", "", ""))
            .unwrap();

        let result = ServiceObjectBuilder::new("/test", interface)
            .handler("A", |_| Ok(vec![]))
            .unwrap()
            .build();
        assert!(matches!(result, Err(BuswayError::Registration(_))));
    }

    #[test]
    fn test_builder_rejects_undeclared_handler() {
        let result = ServiceObjectBuilder::new("/test", echo_interface())
            .handler("NotDeclared", |_| Ok(vec![]));
        assert!(matches!(result, Err(BuswayError::UnknownMethod(_))));
    }

    #[test]
    fn test_builder_rejects_relative_path() {
        let result = ServiceObjectBuilder::new("test", echo_interface())
            .handler("Echo", |args| Ok(vec![args[0].clone()]))
            .unwrap()
            .build();
        assert!(matches!(result, Err(BuswayError::Registration(_))));
    }

    #[test]
    fn test_register_occupied_path() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(echo_object("/test")).unwrap();
        let result = dispatcher.register(echo_object("/test"));
        assert!(matches!(result, Err(BuswayError::Registration(_))));
        assert_eq!(dispatcher.object_count(), 1);
    }
}
