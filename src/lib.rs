//! Busline - signal routing over a D-Bus style message bus
//!
//! A thin layer over an inter-process message bus. A [`Session`] owns the one
//! bus connection of the process and offers:
//!
//! - method export and synchronous method invocation, delegated to the bus client
//! - signal subscription: one match rule per sender, one bounded delivery queue
//!   per `(sender, member)` identity
//! - a single background fan-in loop that demultiplexes every inbound signal
//!   into the matching queue
//!
//! ```ignore
//! use busline::{BusKind, Session};
//!
//! let session = Session::dbus();
//! session.init(BusKind::Session, Some("com.example.App")).await?;
//!
//! let key = session
//!     .listen_signal_from_sender(
//!         "/com/example/Sender",
//!         "com.example.Sender",
//!         "com.example.Sender",
//!         "StateChanged",
//!     )
//!     .await?;
//! let args = session.get_signal(&key).await?;
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod methods;
pub mod session;
pub mod signals;
pub mod utils;

pub use bus::{BusConnection, BusConnector, BusKind, Value};
pub use error::{Error, Result};
pub use methods::{MethodError, MethodTable};
pub use session::Session;
pub use signals::{SignalChannel, SignalEnvelope, SignalKey};
