//! In-memory bus daemon.
//!
//! Behaves like a small D-Bus daemon inside the process: every connection
//! gets a unique name, well-known names are granted without queueing,
//! signals are forwarded only to connections whose match rules admit them,
//! and method calls are routed to exported [`MethodTable`]s with the
//! standard D-Bus error names on failure. Session and system buses are kept
//! apart.
//!
//! ```ignore
//! let bus = MockBus::new();
//! let session = Session::new(bus.clone());
//! session.init(BusKind::Session, None).await?;
//!
//! // Another "process" on the same bus
//! let peer = bus.connect_peer(BusKind::Session).await?;
//! peer.request_name("com.example.Sender").await?;
//! peer.emit_signal("/com/example/Sender", "com.example.Sender", "StateChanged", vec![1i32.into()])
//!     .await;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use super::{
    error_names, is_unique_name, BusConnection, BusConnector, BusKind, MatchRule, MethodCall,
    NameReply, RawSignal, SignalStream, Value, DBUS_INTERFACE, DBUS_PATH, DBUS_SERVICE,
    NAME_OWNER_CHANGED,
};
use crate::error::{Error, Result};
use crate::methods::MethodTable;

#[derive(Default)]
struct Peer {
    kind: BusKind,
    rules: Vec<MatchRule>,
    sinks: Vec<mpsc::UnboundedSender<RawSignal>>,
    objects: HashMap<(String, String), MethodTable>,
}

#[derive(Default)]
struct DaemonState {
    next_id: u64,
    peers: HashMap<String, Peer>,
    /// (bus, well-known name) -> owning unique name.
    owners: HashMap<(BusKind, String), String>,
    fail_on_connect: Option<String>,
}

impl DaemonState {
    /// Every name `unique` is known by on its bus.
    fn names_of(&self, kind: BusKind, unique: &str) -> Vec<String> {
        std::iter::once(unique.to_string())
            .chain(
                self.owners
                    .iter()
                    .filter(|((k, _), owner)| *k == kind && owner.as_str() == unique)
                    .map(|((_, name), _)| name.clone()),
            )
            .collect()
    }

    fn resolve(&self, kind: BusKind, name: &str) -> Option<String> {
        if is_unique_name(name) {
            self.peers
                .get(name)
                .filter(|p| p.kind == kind)
                .map(|_| name.to_string())
        } else {
            self.owners.get(&(kind, name.to_string())).cloned()
        }
    }

    /// Forward a signal to every connection on `kind` whose rules admit it.
    fn broadcast(&mut self, kind: BusKind, signal: &RawSignal, sender_names: &[String]) -> usize {
        let names: Vec<&str> = sender_names.iter().map(String::as_str).collect();
        let mut receivers = 0;
        for peer in self.peers.values_mut().filter(|p| p.kind == kind) {
            if peer.rules.iter().any(|r| r.matches(signal, &names)) {
                peer.sinks.retain(|tx| tx.send(signal.clone()).is_ok());
                receivers += 1;
            }
        }
        receivers
    }

    fn owner_changed(&mut self, kind: BusKind, name: &str, old_owner: &str, new_owner: &str) {
        let signal = RawSignal::new(NAME_OWNER_CHANGED)
            .from_sender(DBUS_SERVICE)
            .at_path(DBUS_PATH)
            .on_interface(DBUS_INTERFACE)
            .with_args(vec![name.into(), old_owner.into(), new_owner.into()]);
        self.broadcast(kind, &signal, &[DBUS_SERVICE.to_string()]);
    }
}

fn remote(name: &str, message: String) -> Error {
    Error::RemoteCall {
        name: name.to_string(),
        message,
    }
}

/// In-memory bus daemon shared by every connection created from it.
#[derive(Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<DaemonState>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent connects fail with the given transport error.
    pub async fn set_fail_on_connect(&self, message: Option<&str>) {
        self.state.lock().await.fail_on_connect = message.map(str::to_string);
    }

    /// Open a connection as another participant on the bus.
    pub async fn connect_peer(&self, kind: BusKind) -> Result<Arc<MockConnection>> {
        let mut state = self.state.lock().await;
        if let Some(message) = &state.fail_on_connect {
            return Err(Error::Connection(message.clone()));
        }

        state.next_id += 1;
        let unique = format!(":1.{}", state.next_id);
        state.peers.insert(
            unique.clone(),
            Peer {
                kind,
                ..Peer::default()
            },
        );
        debug!(bus = %kind, unique_name = %unique, "Mock connection opened");

        Ok(Arc::new(MockConnection {
            bus: self.clone(),
            unique,
            kind,
        }))
    }

    /// Match rules installed by a connection.
    pub async fn match_rules(&self, unique: &str) -> Vec<MatchRule> {
        self.state
            .lock()
            .await
            .peers
            .get(unique)
            .map(|p| p.rules.clone())
            .unwrap_or_default()
    }

    /// Current owner of a well-known name.
    pub async fn owner_of(&self, kind: BusKind, name: &str) -> Option<String> {
        self.state.lock().await.resolve(kind, name)
    }

    /// Deliver a signal straight to a connection, bypassing match rules.
    pub async fn inject(&self, unique: &str, signal: RawSignal) -> bool {
        let mut state = self.state.lock().await;
        match state.peers.get_mut(unique) {
            Some(peer) => {
                peer.sinks.retain(|tx| tx.send(signal.clone()).is_ok());
                true
            }
            None => false,
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.state.lock().await.peers.len()
    }
}

#[async_trait]
impl BusConnector for MockBus {
    async fn connect(&self, kind: BusKind) -> Result<Arc<dyn BusConnection>> {
        let connection: Arc<dyn BusConnection> = self.connect_peer(kind).await?;
        Ok(connection)
    }
}

/// One connection to a [`MockBus`].
pub struct MockConnection {
    bus: MockBus,
    unique: String,
    kind: BusKind,
}

impl MockConnection {
    /// Unique name assigned by the daemon.
    pub fn name(&self) -> &str {
        &self.unique
    }

    pub fn kind(&self) -> BusKind {
        self.kind
    }

    /// Emit a signal; returns how many connections received it.
    pub async fn emit_signal(
        &self,
        path: &str,
        interface: &str,
        member: &str,
        args: Vec<Value>,
    ) -> usize {
        let signal = RawSignal::new(member)
            .from_sender(self.unique.as_str())
            .at_path(path)
            .on_interface(interface)
            .with_args(args);

        let mut state = self.bus.state.lock().await;
        let names = state.names_of(self.kind, &self.unique);
        state.broadcast(self.kind, &signal, &names)
    }

    /// Give up a well-known name.
    pub async fn release_name(&self, name: &str) -> bool {
        let mut state = self.bus.state.lock().await;
        let key = (self.kind, name.to_string());
        if state.owners.get(&key) != Some(&self.unique) {
            return false;
        }
        state.owners.remove(&key);
        state.owner_changed(self.kind, name, &self.unique, "");
        true
    }

    /// Leave the bus, releasing every owned name.
    pub async fn disconnect(&self) {
        let mut state = self.bus.state.lock().await;
        state.peers.remove(&self.unique);

        let owned: Vec<String> = state
            .owners
            .iter()
            .filter(|((kind, _), owner)| *kind == self.kind && **owner == self.unique)
            .map(|((_, name), _)| name.clone())
            .collect();
        for name in owned {
            state.owners.remove(&(self.kind, name.clone()));
            state.owner_changed(self.kind, &name, &self.unique, "");
        }
        debug!(unique_name = %self.unique, "Mock connection closed");
    }

    fn closed() -> Error {
        Error::Connection("Connection closed".to_string())
    }
}

#[async_trait]
impl BusConnection for MockConnection {
    fn unique_name(&self) -> Option<String> {
        Some(self.unique.clone())
    }

    async fn request_name(&self, name: &str) -> Result<NameReply> {
        if name.is_empty() || is_unique_name(name) {
            return Err(Error::InvalidArgument(format!(
                "'{}' is not a well-known bus name",
                name
            )));
        }

        let mut state = self.bus.state.lock().await;
        if !state.peers.contains_key(&self.unique) {
            return Err(Self::closed());
        }

        let key = (self.kind, name.to_string());
        match state.owners.get(&key) {
            Some(owner) if *owner == self.unique => Ok(NameReply::AlreadyOwner),
            Some(_) => Ok(NameReply::Exists),
            None => {
                state.owners.insert(key, self.unique.clone());
                state.owner_changed(self.kind, name, "", &self.unique);
                Ok(NameReply::PrimaryOwner)
            }
        }
    }

    async fn export(&self, methods: MethodTable, path: &str, interface: &str) -> Result<()> {
        let mut state = self.bus.state.lock().await;
        let peer = state.peers.get_mut(&self.unique).ok_or_else(|| Error::Export {
            path: path.to_string(),
            interface: interface.to_string(),
            message: "Connection closed".to_string(),
        })?;
        peer.objects
            .insert((path.to_string(), interface.to_string()), methods);
        Ok(())
    }

    async fn call(&self, call: &MethodCall) -> Result<Vec<Value>> {
        let table = {
            let state = self.bus.state.lock().await;
            let peer = state
                .resolve(self.kind, &call.destination)
                .and_then(|target| state.peers.get(&target))
                .ok_or_else(|| {
                    remote(
                        error_names::SERVICE_UNKNOWN,
                        format!(
                            "The name {} was not provided by any .service files",
                            call.destination
                        ),
                    )
                })?;

            if !peer.objects.keys().any(|(path, _)| *path == call.path) {
                return Err(remote(
                    error_names::UNKNOWN_OBJECT,
                    format!("Unknown object '{}'", call.path),
                ));
            }

            peer.objects
                .get(&(call.path.clone(), call.interface.clone()))
                .cloned()
                .ok_or_else(|| {
                    remote(
                        error_names::UNKNOWN_INTERFACE,
                        format!(
                            "Unknown interface '{}' at object '{}'",
                            call.interface, call.path
                        ),
                    )
                })?
        };

        table
            .dispatch(&call.interface, &call.method, call.args.clone())
            .await
            .map_err(|e| Error::RemoteCall {
                name: e.name,
                message: e.message,
            })
    }

    async fn add_match(&self, rule: &MatchRule) -> Result<()> {
        let mut state = self.bus.state.lock().await;
        let peer = state
            .peers
            .get_mut(&self.unique)
            .ok_or_else(|| Error::MatchRule {
                rule: rule.to_string(),
                message: "Connection closed".to_string(),
            })?;
        peer.rules.push(rule.clone());
        Ok(())
    }

    async fn name_owner(&self, name: &str) -> Result<Option<String>> {
        Ok(self.bus.state.lock().await.resolve(self.kind, name))
    }

    async fn signals(&self) -> Result<SignalStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.bus.state.lock().await;
        let peer = state.peers.get_mut(&self.unique).ok_or_else(Self::closed)?;
        peer.sinks.push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests;
