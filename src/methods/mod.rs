//! Method export types.
//!
//! An exported object is a [`MethodTable`]: a dispatch table from member name
//! to [`MethodHandler`]. The bus client routes incoming calls on the exported
//! path and interface to the table; nothing is discovered by reflection.
//!
//! ```ignore
//! let methods = MethodTable::new()
//!     .method("Ping", |_args: Vec<Value>| async {
//!         Ok::<_, MethodError>(vec![Value::from("pong")])
//!     });
//! session.export_methods(methods, "/com/example/App", "com.example.App").await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::bus::{error_names, Value};

/// Result of a single method invocation: reply body or D-Bus error.
pub type MethodResult = std::result::Result<Vec<Value>, MethodError>;

/// Handler for one exported method.
pub trait MethodHandler: Send + Sync {
    /// Handle a call with its argument list.
    fn call(&self, args: Vec<Value>) -> BoxFuture<'static, MethodResult>;
}

impl<F, Fut> MethodHandler for F
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = MethodResult> + Send + 'static,
{
    fn call(&self, args: Vec<Value>) -> BoxFuture<'static, MethodResult> {
        Box::pin((self)(args))
    }
}

/// Error returned from an exported method, sent back as a D-Bus error reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct MethodError {
    /// D-Bus error name.
    pub name: String,
    /// Human-readable message.
    pub message: String,
}

impl MethodError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Generic `org.freedesktop.DBus.Error.Failed`.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(error_names::FAILED, message)
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(error_names::INVALID_ARGS, message)
    }

    pub fn unknown_method(interface: &str, member: &str) -> Self {
        Self::new(
            error_names::UNKNOWN_METHOD,
            format!("No such method '{}' in interface '{}'", member, interface),
        )
    }
}

/// Dispatch table for one exported interface.
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method (builder form).
    pub fn method(
        mut self,
        name: impl Into<String>,
        handler: impl MethodHandler + 'static,
    ) -> Self {
        self.insert(name, handler);
        self
    }

    /// Add or replace a method.
    pub fn insert(&mut self, name: impl Into<String>, handler: impl MethodHandler + 'static) {
        self.methods.insert(name.into(), Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MethodHandler>> {
        self.methods.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Method names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Route a call to its handler.
    pub async fn dispatch(&self, interface: &str, member: &str, args: Vec<Value>) -> MethodResult {
        match self.get(member) {
            Some(handler) => handler.call(args).await,
            None => Err(MethodError::unknown_method(interface, member)),
        }
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn echo(args: Vec<Value>) -> MethodResult {
        Ok(args)
    }

    async fn fail(_args: Vec<Value>) -> MethodResult {
        Err(MethodError::failed("always fails"))
    }

    fn echo_table() -> MethodTable {
        MethodTable::new().method("Echo", echo).method("Fail", fail)
    }

    #[tokio::test]
    async fn test_dispatch_known_method() {
        let table = echo_table();
        let reply = table
            .dispatch("com.example.Echo", "Echo", vec![Value::from(3i32)])
            .await
            .unwrap();
        assert_eq!(reply, vec![Value::I32(3)]);
    }

    #[tokio::test]
    async fn test_dispatch_handler_error() {
        let table = echo_table();
        let err = table.dispatch("com.example.Echo", "Fail", vec![]).await.unwrap_err();
        assert_eq!(err.name, error_names::FAILED);
        assert_eq!(err.message, "always fails");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method() {
        let table = echo_table();
        let err = table.dispatch("com.example.Echo", "Nope", vec![]).await.unwrap_err();
        assert_eq!(err.name, error_names::UNKNOWN_METHOD);
    }

    #[test]
    fn test_names_sorted() {
        let table = echo_table();
        assert_eq!(table.names(), vec!["Echo", "Fail"]);
        assert_eq!(table.len(), 2);
        assert!(format!("{:?}", table).contains("Echo"));
    }
}
