use std::future::Future;
use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use relay_channel::{AnnouncementChannel, MemoryChannel, WhisperChannel};
use relay_ingest::{IngestListener, IngestPipeline};
use relay_rpc::{start_server, AppState};
use relay_store::{ContentStore, IpfsContentStore, MemoryContentStore};
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod settings;
mod version;

use settings::{AppConfig, ChannelMode, StoreMode};
use version::{git_commit_hash, RELAY_VERSION};

fn cli() -> Command {
    Command::new("relay-node")
        .version(RELAY_VERSION)
        .about("Stores locally produced JSON documents and announces their content ids")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path (defaults to config/relay.toml when present)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "compact"])
                .help("Select log output format"),
        )
        .arg(
            Arg::new("ingest-port")
                .long("ingest-port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Override the local ingest socket port"),
        )
        .arg(
            Arg::new("http-port")
                .long("http-port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Override the HTTP port"),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .action(ArgAction::SetTrue)
                .help("Validate the configuration, print a summary and exit"),
        )
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|value| value.as_str());
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) {
    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    if let Some(port) = matches.get_one::<u16>("ingest-port") {
        config.ingest_port = *port;
    }

    if let Some(port) = matches.get_one::<u16>("http-port") {
        config.http_port = *port;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config = load_config_with_overrides(&matches)?;

    if matches.get_flag("check") {
        print_summary(&config);
        return Ok(());
    }

    init_logging(&config)?;
    let metrics = init_metrics(&config);

    info!(
        "Starting relay-node {} (commit {}) using {}",
        RELAY_VERSION,
        git_commit_hash(),
        config.config_source()
    );

    let store = build_store(&config)?;
    let channel = build_channel(&config)?;
    let topic = config.topic()?;
    let key_id = config.key_id()?;

    let filter = channel
        .create_filter(topic, &key_id)
        .await
        .with_context(|| format!("failed to create message filter on topic {topic}"))?;
    info!("Subscribed to topic {} with filter {}", topic, filter);

    let pipeline = IngestPipeline::new(
        Arc::clone(&store),
        Arc::clone(&channel),
        config.announce_target()?,
    );
    let ingest = IngestListener::bind(&config.ingest_config()?, pipeline)
        .await?
        .spawn();

    let state = AppState::new(store, channel, filter, topic).with_metrics(metrics);
    let service_config = config.service_config()?;
    let (http_shutdown_tx, http_shutdown_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        start_server(state, &service_config, async move {
            let _ = http_shutdown_rx.await;
        })
        .await
    });

    tokio::select! {
        _ = wait_for_shutdown_signal(tokio::signal::ctrl_c()) => {}
        result = &mut server => {
            error!("HTTP server exited before shutdown was requested");
            ingest.shutdown().await?;
            return result.context("HTTP server task failed")?;
        }
    }

    ingest.stop();
    ingest.join().await?;
    info!("Ingest listener released its socket");

    let _ = http_shutdown_tx.send(());
    server.await.context("HTTP server task failed")??;

    info!("relay-node stopped");
    Ok(())
}

/// Resolve once shutdown should begin. A failing signal listener is treated
/// as a shutdown request so the ingest socket is still released.
async fn wait_for_shutdown_signal<F>(signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => error!("Failed to listen for the shutdown signal: {}", err),
    }
}

fn build_store(config: &AppConfig) -> Result<Arc<dyn ContentStore>> {
    let store: Arc<dyn ContentStore> = match config.store_mode {
        StoreMode::Memory => {
            warn!("Using in-memory content store; documents are lost on restart");
            Arc::new(MemoryContentStore::new())
        }
        StoreMode::Ipfs => {
            info!("Using IPFS content store at {}", config.store_api_url);
            Arc::new(IpfsContentStore::new(
                &config.store_api_url,
                config.client_timeout(),
            )?)
        }
    };
    Ok(store)
}

fn build_channel(config: &AppConfig) -> Result<Arc<dyn AnnouncementChannel>> {
    let channel: Arc<dyn AnnouncementChannel> = match config.channel_mode {
        ChannelMode::Memory => {
            // The local key ring holds the configured identity so the node
            // receives its own announcements.
            let target = config.announce_target()?;
            info!("Using in-process announcement channel");
            Arc::new(MemoryChannel::with_key(
                config.key_id()?,
                target.recipient_public_key,
            ))
        }
        ChannelMode::Whisper => {
            info!("Using Whisper RPC at {}", config.channel_rpc_url);
            Arc::new(WhisperChannel::new(
                &config.channel_rpc_url,
                config.ttl_secs,
                config.client_timeout(),
            )?)
        }
    };
    Ok(channel)
}

fn init_metrics(config: &AppConfig) -> Option<PrometheusHandle> {
    if !config.prometheus_enabled {
        info!("Prometheus metrics exporter disabled via configuration");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus metrics exporter registered");
            describe_counter!(
                "relay_ingest_documents_total",
                "Documents stored and announced by the ingest listener"
            );
            describe_counter!(
                "relay_ingest_failures_total",
                "Ingest attempts abandoned, labelled by error kind"
            );
            describe_counter!(
                "relay_http_requests_total",
                "Retrieval API requests, labelled by endpoint"
            );
            Some(handle)
        }
        Err(err) => {
            warn!("Failed to install Prometheus metrics exporter: {}", err);
            None
        }
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("failed to initialise logging")?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .context("failed to initialise logging")?;
    }

    Ok(())
}

fn print_summary(config: &AppConfig) {
    println!("relay-node {} (commit {})", RELAY_VERSION, git_commit_hash());
    println!("  config:   {}", config.config_source());
    println!("  store:    {} ({})", config.store_mode, config.store_api_url);
    println!(
        "  channel:  {} ({}) topic {}",
        config.channel_mode, config.channel_rpc_url, config.topic
    );
    println!(
        "  ingest:   {}:{} every {}ms",
        config.ingest_host, config.ingest_port, config.poll_interval_ms
    );
    println!("  http:     {}:{}", config.http_host, config.http_port);
    println!("OK");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let matches = cli()
            .try_get_matches_from([
                "relay-node",
                "--ingest-port",
                "15000",
                "--http-port",
                "8080",
                "--log-level",
                "debug",
            ])
            .unwrap();
        let mut config = AppConfig::from_config(&config::Config::default()).unwrap();
        apply_overrides(&matches, &mut config);

        assert_eq!(config.ingest_port, 15000);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, "pretty");
    }

    #[test]
    fn test_cli_rejects_unknown_log_format() {
        let result = cli().try_get_matches_from(["relay-node", "--log-format", "xml"]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_signal_listener_failure_still_resolves() {
        let failed = async { Err(io::Error::new(io::ErrorKind::Other, "no signal handler")) };
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            wait_for_shutdown_signal(failed),
        )
        .await
        .unwrap();

        wait_for_shutdown_signal(async { Ok(()) }).await;
    }

    #[tokio::test]
    async fn test_memory_backends_wire_up() {
        let config = AppConfig::from_config(&config::Config::default()).unwrap();
        let store = build_store(&config).unwrap();
        let channel = build_channel(&config).unwrap();

        assert_eq!(store.backend(), "memory");
        assert_eq!(channel.transport(), "memory");

        // The configured identity can subscribe and sees its own announcements.
        let filter = channel
            .create_filter(config.topic().unwrap(), &config.key_id().unwrap())
            .await
            .unwrap();
        let pipeline = IngestPipeline::new(store, Arc::clone(&channel), config.announce_target().unwrap());
        let receipt = pipeline.ingest(b"{'a': 1}").await.unwrap();

        let received = channel.poll(&filter).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload, receipt.content_id);
    }
}
