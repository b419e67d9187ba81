//! D-Bus backend over zbus.
//!
//! Match rules are installed with a plain `AddMatch` call, so the bus daemon
//! does the filtering and every delivered signal shows up on the
//! connection's message stream. Exported method tables are served by a
//! dispatcher task that starts with the first export.

mod convert;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::fdo::{DBusProxy, RequestNameFlags, RequestNameReply};
use zbus::message::Type as MessageType;
use zbus::names::{BusName, InterfaceName, WellKnownName};
use zbus::zvariant::ObjectPath;
use zbus::{Connection, Message, MessageStream};

use super::{
    error_names, BusConnection, BusConnector, BusKind, MatchRule, MethodCall, NameReply,
    RawSignal, SignalStream, Value, DBUS_INTERFACE, DBUS_PATH, DBUS_SERVICE,
};
use crate::error::{Error, Result};
use crate::methods::MethodTable;

type ObjectMap = HashMap<(String, String), MethodTable>;

/// Connects to the session or system bus named by the environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct DbusConnector;

#[async_trait]
impl BusConnector for DbusConnector {
    async fn connect(&self, kind: BusKind) -> Result<Arc<dyn BusConnection>> {
        let conn = match kind {
            BusKind::Session => Connection::session().await,
            BusKind::System => Connection::system().await,
        }
        .map_err(|e| Error::Connection(e.to_string()))?;

        info!(
            bus = %kind,
            unique_name = ?conn.unique_name().map(|n| n.to_string()),
            "Connected to D-Bus"
        );
        let connection: Arc<dyn BusConnection> = Arc::new(DbusConnection::new(conn));
        Ok(connection)
    }
}

/// A live zbus connection.
pub struct DbusConnection {
    conn: Connection,
    objects: Arc<RwLock<ObjectMap>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl DbusConnection {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            objects: Arc::new(RwLock::new(HashMap::new())),
            dispatcher: Mutex::new(None),
        }
    }

    /// Underlying zbus connection.
    pub fn inner(&self) -> &Connection {
        &self.conn
    }

    async fn proxy(&self) -> Result<DBusProxy<'static>> {
        DBusProxy::new(&self.conn)
            .await
            .map_err(|e| Error::Connection(e.to_string()))
    }
}

impl Drop for DbusConnection {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.get_mut().take() {
            dispatcher.abort();
        }
    }
}

fn remote(e: zbus::Error) -> Error {
    match e {
        zbus::Error::MethodError(name, detail, _) => Error::RemoteCall {
            name: name.to_string(),
            message: detail.unwrap_or_default(),
        },
        other => Error::RemoteCall {
            name: error_names::FAILED.to_string(),
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl BusConnection for DbusConnection {
    fn unique_name(&self) -> Option<String> {
        self.conn.unique_name().map(|n| n.to_string())
    }

    async fn request_name(&self, name: &str) -> Result<NameReply> {
        let well_known =
            WellKnownName::try_from(name).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let reply = self
            .proxy()
            .await?
            .request_name(well_known, RequestNameFlags::DoNotQueue.into())
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(match reply {
            RequestNameReply::PrimaryOwner => NameReply::PrimaryOwner,
            RequestNameReply::InQueue => NameReply::InQueue,
            RequestNameReply::Exists => NameReply::Exists,
            RequestNameReply::AlreadyOwner => NameReply::AlreadyOwner,
        })
    }

    async fn export(&self, methods: MethodTable, path: &str, interface: &str) -> Result<()> {
        let export_error = |message: String| Error::Export {
            path: path.to_string(),
            interface: interface.to_string(),
            message,
        };
        ObjectPath::try_from(path).map_err(|e| export_error(e.to_string()))?;
        InterfaceName::try_from(interface).map_err(|e| export_error(e.to_string()))?;

        self.objects
            .write()
            .await
            .insert((path.to_string(), interface.to_string()), methods);

        let mut dispatcher = self.dispatcher.lock().await;
        if dispatcher.is_none() {
            *dispatcher = Some(tokio::spawn(serve_methods(
                self.conn.clone(),
                self.objects.clone(),
            )));
            debug!("Method dispatcher started");
        }
        Ok(())
    }

    async fn call(&self, call: &MethodCall) -> Result<Vec<Value>> {
        let body = if call.args.is_empty() {
            None
        } else {
            Some(convert::structure(&call.args)?)
        };

        let reply = match &body {
            None => {
                self.conn
                    .call_method(
                        Some(call.destination.as_str()),
                        call.path.as_str(),
                        Some(call.interface.as_str()),
                        call.method.as_str(),
                        &(),
                    )
                    .await
            }
            Some(body) => {
                self.conn
                    .call_method(
                        Some(call.destination.as_str()),
                        call.path.as_str(),
                        Some(call.interface.as_str()),
                        call.method.as_str(),
                        body,
                    )
                    .await
            }
        }
        .map_err(remote)?;

        Ok(convert::body_args(&reply))
    }

    async fn add_match(&self, rule: &MatchRule) -> Result<()> {
        let rule = rule.to_string();
        self.conn
            .call_method(
                Some(DBUS_SERVICE),
                DBUS_PATH,
                Some(DBUS_INTERFACE),
                "AddMatch",
                &rule,
            )
            .await
            .map_err(|e| Error::MatchRule {
                rule: rule.clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn name_owner(&self, name: &str) -> Result<Option<String>> {
        let bus_name =
            BusName::try_from(name).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        match self.proxy().await?.get_name_owner(bus_name).await {
            Ok(owner) => Ok(Some(owner.to_string())),
            Err(zbus::fdo::Error::NameHasNoOwner(_)) => Ok(None),
            Err(e) => Err(Error::RemoteCall {
                name: error_names::FAILED.to_string(),
                message: e.to_string(),
            }),
        }
    }

    async fn signals(&self) -> Result<SignalStream> {
        let stream = MessageStream::from(&self.conn).filter_map(|msg| async move {
            match msg {
                Ok(msg) if msg.message_type() == MessageType::Signal => raw_signal(&msg),
                Ok(_) => None,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable message");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}

fn raw_signal(msg: &Message) -> Option<RawSignal> {
    let header = msg.header();
    let mut signal = RawSignal::new(header.member()?.to_string());
    signal.sender = header.sender().map(|s| s.to_string());
    signal.path = header.path().map(|p| p.to_string());
    signal.interface = header.interface().map(|i| i.to_string());
    signal.args = convert::body_args(msg);
    Some(signal)
}

/// `(path, interface, member)` of a method call.
fn call_target(msg: &Message) -> Option<(String, String, String)> {
    let header = msg.header();
    Some((
        header.path()?.to_string(),
        header.interface().map(|i| i.to_string()).unwrap_or_default(),
        header.member()?.to_string(),
    ))
}

async fn serve_methods(conn: Connection, objects: Arc<RwLock<ObjectMap>>) {
    let mut stream = MessageStream::from(&conn);

    while let Some(msg) = stream.next().await {
        let Ok(msg) = msg else { continue };
        if msg.message_type() != MessageType::MethodCall {
            continue;
        }
        let Some((path, interface, member)) = call_target(&msg) else {
            continue;
        };

        let table = {
            let objects = objects.read().await;
            match objects.get(&(path.clone(), interface.clone())) {
                Some(table) => Ok(table.clone()),
                None if objects.keys().any(|(p, _)| *p == path) => Err((
                    error_names::UNKNOWN_INTERFACE,
                    format!("Unknown interface '{}' at object '{}'", interface, path),
                )),
                None => Err((
                    error_names::UNKNOWN_OBJECT,
                    format!("Unknown object '{}'", path),
                )),
            }
        };

        let conn = conn.clone();
        tokio::spawn(async move {
            let outcome = match table {
                Ok(table) => {
                    table
                        .dispatch(&interface, &member, convert::body_args(&msg))
                        .await
                }
                Err((name, message)) => Err(crate::methods::MethodError::new(name, message)),
            };

            let header = msg.header();
            let sent = match outcome {
                Ok(reply) if reply.is_empty() => conn.reply(&header, &()).await.map(|_| ()),
                Ok(reply) => match convert::structure(&reply) {
                    Ok(body) => conn.reply(&header, &body).await.map(|_| ()),
                    Err(e) => conn
                        .reply_error(&header, error_names::FAILED, &e.to_string())
                        .await
                        .map(|_| ()),
                },
                Err(e) => conn
                    .reply_error(&header, e.name.as_str(), &e.message)
                    .await
                    .map(|_| ()),
            };

            if let Err(e) = sent {
                warn!(path = %path, member = %member, error = %e, "Failed to send method reply");
            }
        });
    }

    info!("Method dispatcher stopped");
}
