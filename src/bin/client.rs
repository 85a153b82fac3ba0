use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use tracing::Level;

use uap::client;
use uap::config::ClientConfig;

#[derive(Parser)]
struct Args {
    host: String,
    port: u16,

    #[clap(long, default_value_t = 8)]
    timeout: u64,

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

    let server_addr = tokio::net::lookup_host((args.host.as_str(), args.port))
        .await?
        .next()
        .ok_or_else(|| anyhow!("no address found for {}:{}", args.host, args.port))?;

    let mut config = ClientConfig::new(server_addr);
    config.response_timeout = Duration::from_secs(args.timeout);

    client::run_client(config).await
}
