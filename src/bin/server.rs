use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing::Level;

use uap::config::ServerConfig;
use uap::dispatch;
use uap::session_table::SessionTable;
use uap::socket::DatagramSocket;

#[derive(Parser)]
struct Args {
    port: u16,

    #[clap(long, default_value = "event-loop")]
    mode: String,

    #[clap(long, default_value_t = 20)]
    timeout: u64,

    #[clap(long, default_value_t = 1)]
    sweep_interval: u64,

    #[clap(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut config = ServerConfig::new(SocketAddr::new(args.bind, args.port));
    config.concurrency_mode = args.mode.parse()?;
    config.session_timeout = Duration::from_secs(args.timeout);
    config.sweep_interval = Duration::from_secs(args.sweep_interval);
    config.validate()?;

    let socket: Arc<dyn DatagramSocket> = Arc::new(UdpSocket::bind(config.bind_addr).await?);
    let sessions = Arc::new(RwLock::new(SessionTable::new()));

    dispatch::run_server(Arc::new(config), socket, sessions).await
}
