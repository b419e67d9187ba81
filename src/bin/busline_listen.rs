//! busline-listen: log every occurrence of one D-Bus signal.
//!
//! ## Architecture
//! ```text
//! [emitter] --(signal)--> [bus daemon] --(match rule)--> [busline-listen]
//!                                                              |
//!                                                              v
//!                                                           tracing
//! ```
//!
//! ## Configuration
//! - `listen.path`, `listen.sender`, `listen.interface`, `listen.member`
//!   (e.g. `BUSLINE__LISTEN__SENDER=org.freedesktop.NetworkManager`)
//! - `session.bus`: `session` or `system` (default: session)
//! - BUSLINE_CONFIG: path to a YAML configuration file (optional)
//! - BUSLINE_LOG: tracing filter (default: info)

use tracing::{error, info};

use busline::config::Config;
use busline::utils::bootstrap::init_tracing;
use busline::Session;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    let listen = config.listen.clone().ok_or(
        "no signal configured; set listen.path, listen.sender, listen.interface and listen.member",
    )?;

    let session = Session::dbus().with_signal_config(config.signals.clone());
    session.init_with_config(&config.session).await?;

    let key = session
        .listen_signal_from_sender(&listen.path, &listen.sender, &listen.interface, &listen.member)
        .await?;
    info!(signal = %key, bus = %config.session.bus, "busline-listen started");

    loop {
        tokio::select! {
            received = session.get_signal(&key) => match received {
                Ok(args) => {
                    let args: Vec<String> = args.iter().map(ToString::to_string).collect();
                    info!(signal = %key, args = ?args, "Signal received");
                }
                Err(e) => {
                    error!(signal = %key, error = %e, "Signal delivery stopped");
                    return Err(e.into());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                let stats = session.stats().await?;
                info!(
                    delivered = stats.delivered,
                    unregistered = stats.unregistered,
                    overflowed = stats.overflowed,
                    "Shutting down"
                );
                return Ok(());
            }
        }
    }
}
