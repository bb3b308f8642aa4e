use anyhow::Context;
use clap::Parser;
use log::{error, info};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tunbox::config::Config;
use tunbox::engine::Engine;
use tunbox::error::ProxyError;

#[derive(Parser)]
#[command(name = "tunbox")]
#[command(about = "Dial a destination through the default outbound and relay stdin/stdout over it")]
struct Args {
    /// Destination as host:port
    address: String,

    /// Network to dial (tcp, tcp4, tcp6, udp, udp4, udp6)
    #[arg(short, long, default_value = "tcp")]
    network: String,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Outbound to use instead of the configured default
    #[arg(short, long)]
    outbound: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Print connection statistics as JSON on exit
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => Config::default(),
    };

    // Override config with command line arguments
    if args.debug {
        config.logging.level = "debug".to_string();
    }
    if let Some(outbound) = &args.outbound {
        config.default_outbound = Some(outbound.clone());
    }
    if args.stats {
        config.stats.enabled = true;
    }

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.logging.level))
        .init();

    if let Some(listen) = config.stats.prometheus_listen {
        PrometheusBuilder::new()
            .with_http_listener(listen)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!("Prometheus metrics on {}", listen);
    }

    let engine = Engine::new(&config, None)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let conn = match engine.dial_with_cancel(&cancel, &args.network, &args.address).await {
        Ok(conn) => conn,
        Err(ProxyError::Cancelled) => {
            info!("Interrupted before the connection was established");
            return Ok(());
        }
        Err(e) => {
            error!("Failed to dial {} {}: {}", args.network, args.address, e);
            return Err(e.into());
        }
    };
    info!("Connected to {} over {}", args.address, args.network);

    let (mut remote_rd, mut remote_wr) = tokio::io::split(conn);
    let mut stdin = tokio::io::stdin();
    let mut stdout = BufWriter::new(tokio::io::stdout());

    let upload = async {
        tokio::io::copy(&mut stdin, &mut remote_wr).await?;
        remote_wr.shutdown().await
    };
    let download = async {
        tokio::io::copy(&mut remote_rd, &mut stdout).await?;
        stdout.flush().await
    };

    tokio::select! {
        result = async { tokio::try_join!(upload, download) } => {
            result.context("relay failed")?;
        }
        _ = cancel.cancelled() => info!("Interrupted"),
    }

    if let Some(stats) = engine.stats() {
        let report = serde_json::json!({
            "connections": stats.connections(),
            "traffic": stats.traffic_summary(),
        });
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
    }

    engine.close_stack()?;
    Ok(())
}
