//! Bus client contract.
//!
//! This module contains:
//! - `BusConnector` trait: opens a connection to the session or system bus
//! - `BusConnection` trait: the operations the core needs from a bus client
//! - Wire-independent value and message types
//! - Implementations: in-memory mock daemon, D-Bus via zbus (`dbus` feature)

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;

use crate::error::Result;
use crate::methods::MethodTable;

// Implementation modules
#[cfg(feature = "dbus")]
pub mod dbus;
mod match_rule;
pub mod mock;
mod value;

// Re-exports
#[cfg(feature = "dbus")]
pub use dbus::{DbusConnection, DbusConnector};
pub use match_rule::MatchRule;
pub use mock::{MockBus, MockConnection};
pub use value::Value;

/// Well-known name of the bus daemon itself.
pub const DBUS_SERVICE: &str = "org.freedesktop.DBus";
/// Object path of the bus daemon.
pub const DBUS_PATH: &str = "/org/freedesktop/DBus";
/// Interface of the bus daemon.
pub const DBUS_INTERFACE: &str = "org.freedesktop.DBus";
/// Signal emitted by the daemon whenever a name changes owner.
pub const NAME_OWNER_CHANGED: &str = "NameOwnerChanged";

/// Standard D-Bus error names.
pub mod error_names {
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
    pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
}

/// Which well-known bus endpoint to connect to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// Per-login session bus.
    #[default]
    Session,
    /// System-wide bus.
    System,
}

impl std::fmt::Display for BusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusKind::Session => write!(f, "session"),
            BusKind::System => write!(f, "system"),
        }
    }
}

/// Outcome of a do-not-queue name request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameReply {
    /// The caller is now the primary owner.
    PrimaryOwner,
    /// The caller was queued (never returned for do-not-queue requests).
    InQueue,
    /// Another connection owns the name.
    Exists,
    /// The caller already owned the name.
    AlreadyOwner,
}

impl NameReply {
    /// Whether the caller owns the name after the request.
    pub fn is_owner(self) -> bool {
        matches!(self, NameReply::PrimaryOwner | NameReply::AlreadyOwner)
    }
}

/// Unique connection names start with a colon (`:1.42`).
pub fn is_unique_name(name: &str) -> bool {
    name.starts_with(':')
}

/// A remote method invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// Destination bus name.
    pub destination: String,
    /// Object path on the destination.
    pub path: String,
    /// Interface the method belongs to.
    pub interface: String,
    /// Method member name.
    pub method: String,
    /// Call arguments.
    pub args: Vec<Value>,
}

impl MethodCall {
    pub fn new(
        destination: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            path: path.into(),
            interface: interface.into(),
            method: method.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// `interface.method`, the form bus clients use to address a method.
    pub fn full_method_name(&self) -> String {
        format!("{}.{}", self.interface, self.method)
    }
}

/// One inbound signal occurrence as delivered by the bus client.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSignal {
    /// Originating bus name (normally the emitter's unique name).
    pub sender: Option<String>,
    /// Object path the signal was emitted from.
    pub path: Option<String>,
    /// Interface the signal belongs to.
    pub interface: Option<String>,
    /// Signal member name.
    pub member: String,
    /// Ordered signal arguments.
    pub args: Vec<Value>,
}

impl RawSignal {
    pub fn new(member: impl Into<String>) -> Self {
        Self {
            sender: None,
            path: None,
            interface: None,
            member: member.into(),
            args: Vec::new(),
        }
    }

    pub fn from_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn at_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn on_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// `interface.member`, or the bare member when no interface was delivered.
    pub fn qualified_name(&self) -> String {
        match &self.interface {
            Some(interface) => format!("{}.{}", interface, self.member),
            None => self.member.clone(),
        }
    }
}

/// Stream of every signal delivered to a connection.
pub type SignalStream = BoxStream<'static, RawSignal>;

/// Opens bus connections.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Connect to the session or system bus.
    ///
    /// Transport failures surface as `Error::Connection` with the client's text.
    async fn connect(&self, kind: BusKind) -> Result<Arc<dyn BusConnection>>;
}

/// Operations the core needs from an established bus connection.
///
/// Implementations must be safe for concurrent use: the fan-in loop reads the
/// signal stream while callers subscribe, export, and invoke methods.
///
/// Implementations:
/// - `MockConnection`: in-memory daemon for tests and embedding
/// - `DbusConnection`: D-Bus via zbus (`dbus` feature)
#[async_trait]
pub trait BusConnection: Send + Sync {
    /// Unique name the bus assigned to this connection.
    fn unique_name(&self) -> Option<String>;

    /// Request a well-known name without queueing behind an existing owner.
    async fn request_name(&self, name: &str) -> Result<NameReply>;

    /// Register a dispatch table for calls to `interface` on `path`.
    async fn export(&self, methods: MethodTable, path: &str, interface: &str) -> Result<()>;

    /// Invoke a remote method and wait for the reply body.
    async fn call(&self, call: &MethodCall) -> Result<Vec<Value>>;

    /// Install a match rule so the bus forwards matching signals here.
    async fn add_match(&self, rule: &MatchRule) -> Result<()>;

    /// Current unique owner of `name`, or `None` if nobody owns it.
    async fn name_owner(&self, name: &str) -> Result<Option<String>>;

    /// Stream every signal occurrence delivered to this connection.
    async fn signals(&self) -> Result<SignalStream>;
}
