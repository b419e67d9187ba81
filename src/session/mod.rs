//! Bus session.
//!
//! A [`Session`] owns the single bus connection of a process. It is created
//! explicitly, initialised once, and then exposes method export, method
//! invocation, and signal subscription against that connection.
//!
//! ```text
//! Session::init ──> BusConnector::connect ──> RequestName (optional)
//!                          │
//!                          ├──> SignalRegistry ──> listen / get_signal
//!                          └──> fan-in task (reads the signal stream)
//! ```

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{BusConnection, BusConnector, BusKind, MethodCall, Value};
use crate::config::{SessionConfig, SignalConfig};
use crate::error::{Error, Result};
use crate::methods::MethodTable;
use crate::signals::{
    fan_in, DeliveryStats, SignalChannel, SignalKey, SignalRegistry, StatsSnapshot,
};

/// State that exists once the session is initialised.
struct ActiveSession {
    kind: BusKind,
    name: Option<String>,
    connection: Arc<dyn BusConnection>,
    registry: Arc<SignalRegistry>,
    stats: Arc<DeliveryStats>,
    fan_in: JoinHandle<()>,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.fan_in.abort();
    }
}

/// The process's bus session.
///
/// Every operation other than [`init`](Self::init) fails with
/// `NotInitialized` until `init` has succeeded.
pub struct Session {
    connector: Arc<dyn BusConnector>,
    signal_config: SignalConfig,
    active: RwLock<Option<Arc<ActiveSession>>>,
}

impl Session {
    /// Create an uninitialised session that connects through `connector`.
    pub fn new(connector: impl BusConnector + 'static) -> Self {
        Self {
            connector: Arc::new(connector),
            signal_config: SignalConfig::default(),
            active: RwLock::new(None),
        }
    }

    /// Session backed by the system's D-Bus daemon.
    #[cfg(feature = "dbus")]
    pub fn dbus() -> Self {
        Self::new(crate::bus::DbusConnector)
    }

    /// Queue capacity and overflow behaviour for signal delivery.
    ///
    /// Takes effect at [`init`](Self::init).
    pub fn with_signal_config(mut self, config: SignalConfig) -> Self {
        self.signal_config = config;
        self
    }

    /// Connect to the bus and optionally claim a well-known name.
    ///
    /// Fails with `AlreadyInitialized` on a second successful call, leaving
    /// the first connection untouched. If the requested name is owned by
    /// another connection the new connection is closed and the session stays
    /// uninitialised, so `init` may be retried.
    #[tracing::instrument(name = "session.init", skip(self))]
    pub async fn init(&self, kind: BusKind, name: Option<&str>) -> Result<()> {
        let mut active = self.active.write().await;
        if active.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        let connection = self.connector.connect(kind).await?;
        let unique_name = connection.unique_name().unwrap_or_default();
        debug!(bus = %kind, unique_name = %unique_name, "Connected");

        let name = name.filter(|n| !n.is_empty());
        if let Some(name) = name {
            let reply = connection.request_name(name).await?;
            if !reply.is_owner() {
                warn!(name = %name, reply = ?reply, "Bus name already owned");
                return Err(Error::NameUnavailable {
                    name: name.to_string(),
                });
            }
        }

        let registry = Arc::new(SignalRegistry::new(
            connection.clone(),
            self.signal_config.queue_capacity,
        ));
        let stats = Arc::new(DeliveryStats::default());
        let signals = connection.signals().await?;
        let fan_in = tokio::spawn(fan_in::run(
            registry.clone(),
            signals,
            self.signal_config.overflow_policy(),
            stats.clone(),
        ));

        info!(
            bus = %kind,
            unique_name = %unique_name,
            name = ?name,
            queue_capacity = registry.capacity(),
            "Session initialized"
        );

        *active = Some(Arc::new(ActiveSession {
            kind,
            name: name.map(str::to_string),
            connection,
            registry,
            stats,
            fan_in,
        }));
        Ok(())
    }

    /// [`init`](Self::init) from the `session` configuration section.
    pub async fn init_with_config(&self, config: &SessionConfig) -> Result<()> {
        self.init(config.bus, config.requested_name()).await
    }

    pub async fn is_initialized(&self) -> bool {
        self.active.read().await.is_some()
    }

    async fn active(&self) -> Result<Arc<ActiveSession>> {
        self.active
            .read()
            .await
            .clone()
            .ok_or(Error::NotInitialized)
    }

    /// Raw connection handle, for operations this layer does not wrap.
    pub async fn connection(&self) -> Result<Arc<dyn BusConnection>> {
        Ok(self.active().await?.connection.clone())
    }

    pub async fn bus_kind(&self) -> Result<BusKind> {
        Ok(self.active().await?.kind)
    }

    /// Well-known name claimed at init, if any.
    pub async fn name(&self) -> Result<Option<String>> {
        Ok(self.active().await?.name.clone())
    }

    /// Make the methods in `methods` callable as `interface` on `path`.
    pub async fn export_methods(
        &self,
        methods: MethodTable,
        path: &str,
        interface: &str,
    ) -> Result<()> {
        require("path", path)?;
        require("interface", interface)?;
        let active = self.active().await?;

        let method_count = methods.len();
        active.connection.export(methods, path, interface).await?;
        info!(path = %path, interface = %interface, method_count, "Exported methods");
        Ok(())
    }

    /// Invoke a remote method and discard its reply.
    pub async fn call_method(
        &self,
        path: &str,
        destination: &str,
        interface: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<()> {
        self.call_method_with_reply(path, destination, interface, method, params)
            .await
            .map(|_| ())
    }

    /// Invoke a remote method and return its reply body.
    ///
    /// Waits until the remote side replies; there is no deadline.
    #[tracing::instrument(name = "session.call", skip(self, params))]
    pub async fn call_method_with_reply(
        &self,
        path: &str,
        destination: &str,
        interface: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Value>> {
        require("destination", destination)?;
        require("method", method)?;
        let active = self.active().await?;

        let call = MethodCall::new(destination, path, interface, method).with_args(params);
        active.connection.call(&call).await.inspect_err(|e| {
            debug!(method = %call.full_method_name(), error = %e, "Remote call failed");
        })
    }

    /// Subscribe to `signal` emitted by `sender` on `interface` at `path`.
    ///
    /// Returns the key to read occurrences with. Subscribing twice is a no-op.
    pub async fn listen_signal_from_sender(
        &self,
        path: &str,
        sender: &str,
        interface: &str,
        signal: &str,
    ) -> Result<SignalKey> {
        require("sender", sender)?;
        require("signal", signal)?;
        let active = self.active().await?;
        active.registry.listen(path, sender, interface, signal).await
    }

    /// Wait for the next occurrence of a subscribed signal.
    ///
    /// Fails immediately with `NotListened` for keys that were never
    /// subscribed; otherwise waits without a deadline.
    pub async fn get_signal(&self, key: &SignalKey) -> Result<Vec<Value>> {
        let active = self.active().await?;
        active.registry.get_signal(key).await
    }

    /// Consumer handle for a subscribed signal.
    pub async fn get_channel(&self, key: &SignalKey) -> Option<SignalChannel> {
        let active = self.active().await.ok()?;
        active.registry.channel(key).await
    }

    pub async fn is_listening(&self, key: &SignalKey) -> bool {
        match self.active().await {
            Ok(active) => active.registry.is_listening(key).await,
            Err(_) => false,
        }
    }

    /// Senders with an installed match rule.
    pub async fn listened_senders(&self) -> Result<Vec<String>> {
        Ok(self.active().await?.registry.senders().await)
    }

    /// Fan-in delivery counters.
    pub async fn stats(&self) -> Result<StatsSnapshot> {
        Ok(self.active().await?.stats.snapshot())
    }
}

fn require(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidArgument(format!("{} must not be empty", what)));
    }
    Ok(())
}
