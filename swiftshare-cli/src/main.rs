//! SwiftShare console host.
//!
//! `swiftshare [room]` joins a room (a fresh one when omitted) against the
//! endpoint in `SWIFTSHARE_WS_URL`. `swiftshare relay [addr]` runs a relay.

mod command;
mod host;

use log::{error, info};

use swiftshare_session::room::sanitize;
use swiftshare_session::{Relay, RelayConfig, RoomId};

use host::HostResult;

const USAGE: &str = "usage: swiftshare [room] | swiftshare relay [addr]";

#[tokio::main]
async fn main() {
    env_logger::init();
    info!("Starting SwiftShare...");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("-h" | "--help") => {
            println!("{USAGE}");
            Ok(())
        }
        Some("relay") => relay(args.get(1)).await,
        room => join(room).await,
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn relay(addr: Option<&String>) -> HostResult {
    let mut config = RelayConfig::default();
    if let Some(addr) = addr {
        config.bind_addr = addr.clone();
    }
    Relay::new(config).run().await
}

async fn join(room: Option<&str>) -> HostResult {
    let room = room.map(|raw| RoomId::parse(&sanitize(raw))).transpose()?;
    host::run(room).await
}
