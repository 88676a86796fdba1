use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use rift_tcp_proxy::config::FaultConfig;
use rift_tcp_proxy::unreliable::{Exchange, UnreliableClient};
use rift_tcp_proxy::{FaultPolicy, ProxyConfig, ProxyServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rift-tcp-proxy", version, about = "TCP chaos relay")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Relay between clients and a real server, injecting faults
    Proxy(ProxyArgs),
    /// Send one message through a client-side unreliable socket
    Client(ClientArgs),
}

#[derive(Args, Debug)]
struct ProxyArgs {
    /// YAML config file; flags below override its values
    #[arg(short, long, env = "RIFT_TCP_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "RIFT_TCP_TARGET_HOST")]
    target_host: Option<String>,
    #[arg(long, env = "RIFT_TCP_TARGET_PORT")]
    target_port: Option<u16>,
    /// Defaults to target port + 1000
    #[arg(long, env = "RIFT_TCP_LISTEN_PORT")]
    listen_port: Option<u16>,
    #[arg(long)]
    listen_host: Option<String>,
    /// Packet loss rate (0-1)
    #[arg(long)]
    packet_loss: Option<f64>,
    /// Latency in milliseconds
    #[arg(long)]
    latency: Option<u64>,
    /// Data corruption rate (0-1)
    #[arg(long)]
    corruption: Option<f64>,
    /// Disconnect rate (0-1)
    #[arg(long)]
    disconnect: Option<f64>,
    /// Disconnect duration in seconds
    #[arg(long)]
    disconnect_time: Option<u64>,
    /// Seed for reproducible fault sequences
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct ClientArgs {
    #[arg(long, default_value = "localhost")]
    host: String,
    #[arg(long, default_value_t = 8888)]
    port: u16,
    #[arg(long, default_value = "Hello, Unreliable World!")]
    message: String,
    #[arg(long, default_value_t = 0.1)]
    packet_loss: f64,
    #[arg(long, default_value_t = 100)]
    latency: u64,
    #[arg(long, default_value_t = 0.05)]
    corruption: f64,
}

impl ProxyArgs {
    fn into_config(self) -> anyhow::Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => ProxyConfig::default(),
        };

        if let Some(host) = self.target_host {
            config.upstream.host = host;
        }
        if let Some(port) = self.target_port {
            config.upstream.port = port;
        }
        if let Some(host) = self.listen_host {
            config.listen.host = host;
        }
        if self.listen_port.is_some() {
            config.listen.port = self.listen_port;
        }

        let faults = &mut config.faults;
        if let Some(p) = self.packet_loss {
            faults.packet_loss = p;
        }
        if let Some(ms) = self.latency {
            faults.latency_ms = ms;
        }
        if let Some(p) = self.corruption {
            faults.corruption = p;
        }
        if let Some(p) = self.disconnect {
            faults.disconnect = p;
        }
        if let Some(secs) = self.disconnect_time {
            faults.disconnect_seconds = secs;
        }
        if self.seed.is_some() {
            faults.seed = self.seed;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

async fn run_proxy(args: ProxyArgs) -> anyhow::Result<()> {
    let config = args.into_config()?;
    let server = ProxyServer::bind(config)
        .await
        .context("Relay failed to start")?;
    let handle = server.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            handle.stop();
        }
    });

    server.run().await?;
    Ok(())
}

async fn run_client(args: ClientArgs) -> anyhow::Result<()> {
    let policy = Arc::new(FaultPolicy::new(FaultConfig {
        packet_loss: args.packet_loss,
        latency_ms: args.latency,
        corruption: args.corruption,
        ..FaultConfig::disabled()
    }));

    let mut client = UnreliableClient::new(args.host, args.port, policy);
    client.connect().await.context("Connection failed")?;

    info!("Sending message: {}", args.message);
    match client.send_message(args.message.as_bytes()).await? {
        Exchange::Response(bytes) => {
            info!("Received response: {}", String::from_utf8_lossy(&bytes))
        }
        Exchange::LostOnSend => info!("Request lost before sending"),
        Exchange::LostOnReceive => info!("Response lost in transit"),
        Exchange::ConnectionIssue(kind) => error!("Connection issue: {}", kind),
    }
    client.close();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Proxy(args) => run_proxy(args).await,
        Command::Client(args) => run_client(args).await,
    }
}
