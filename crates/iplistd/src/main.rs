// # iplistd - IP List Sync Runner
//
// Runs one synchronization batch over every configured (account, list) pair
// and exits. Scheduling is left to cron or a systemd timer.
//
// This binary is a thin integration layer: it reads the environment and the
// YAML file, wires the registry, the feed fetcher and the report sinks into
// `iplist_core::SyncEngine`, and turns the run report into an exit code.
//
// ## Environment
//
// - `CLOUDFLARE_API_TOKEN`: API token (required, never logged)
// - `IPLIST_CONFIG`: path to the YAML configuration (default `config.yaml`)
// - `IPLIST_LOG_LEVEL`: trace, debug, info, warn or error (default info)
// - `IPLIST_MODE`: set to `dry-run` to log mutations instead of sending them
// - `IPLIST_REPORT_PATH`: optional path receiving the run report as JSON
//
// ## Example
//
// ```bash
// export CLOUDFLARE_API_TOKEN=your_token
// export IPLIST_CONFIG=/etc/iplist/config.yaml
// export IPLIST_REPORT_PATH=/var/lib/iplist/last-run.json
//
// iplistd
// ```

mod sinks;

use anyhow::{Context, Result};
use iplist_core::{
    CacheStore, CacheStoreConfig, MemoryCacheStore, ProviderConfig, ProviderRegistry, RunReport,
    SyncConfig, SyncEngine,
};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use sinks::{JsonFileReportSink, WebhookNotifier};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes of a batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IplistExitCode {
    /// At least one pair did not fail, or nothing ran
    Success = 0,
    /// Configuration or startup failure, no pair was processed
    ConfigError = 1,
    /// Every processed pair failed
    AllFailed = 2,
}

impl From<IplistExitCode> for ExitCode {
    fn from(code: IplistExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

impl IplistExitCode {
    fn for_report(report: &RunReport) -> Self {
        if report.all_failed() {
            IplistExitCode::AllFailed
        } else {
            IplistExitCode::Success
        }
    }
}

/// Settings taken from the environment
struct DaemonSettings {
    api_token: String,
    config_path: String,
    log_level: String,
    dry_run: bool,
    report_path: Option<String>,
}

// Keep the token out of debug output
impl std::fmt::Debug for DaemonSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonSettings")
            .field("api_token", &"<REDACTED>")
            .field("config_path", &self.config_path)
            .field("log_level", &self.log_level)
            .field("dry_run", &self.dry_run)
            .field("report_path", &self.report_path)
            .finish()
    }
}

impl DaemonSettings {
    /// Load settings from the process environment
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through `lookup`, which returns a variable's value if set
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_token = lookup("CLOUDFLARE_API_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .context(
                "CLOUDFLARE_API_TOKEN is required. \
                Set it via: export CLOUDFLARE_API_TOKEN=your_token",
            )?;

        let log_level = lookup("IPLIST_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        parse_log_level(&log_level)?;

        let dry_run = match lookup("IPLIST_MODE") {
            None => false,
            Some(mode) => match mode.to_lowercase().as_str() {
                "dry-run" => true,
                "" | "live" => false,
                other => anyhow::bail!(
                    "IPLIST_MODE '{}' is not valid. Valid modes: live, dry-run",
                    other
                ),
            },
        };

        Ok(Self {
            api_token,
            config_path: lookup("IPLIST_CONFIG").unwrap_or_else(|| "config.yaml".to_string()),
            log_level,
            dry_run,
            report_path: lookup("IPLIST_REPORT_PATH").filter(|p| !p.is_empty()),
        })
    }

    /// Read and validate the YAML configuration, injecting environment overrides
    fn load_config(&self) -> Result<SyncConfig> {
        let yaml = std::fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read configuration file {}", self.config_path))?;
        let mut config = SyncConfig::from_yaml_str(&yaml)?;

        if let ProviderConfig::Cloudflare { api_token, .. } = &mut config.provider {
            *api_token = self.api_token.clone();
        }
        if self.dry_run {
            config.engine.dry_run = true;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "IPLIST_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            level
        ),
    }
}

fn main() -> ExitCode {
    let settings = match DaemonSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return IplistExitCode::ConfigError.into();
        }
    };

    let log_level = parse_log_level(&settings.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return IplistExitCode::ConfigError.into();
    }

    let config = match settings.load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return IplistExitCode::ConfigError.into();
        }
    };

    info!(
        "Starting iplistd: {} account(s), {} enabled list(s){}",
        config.accounts.len(),
        config.enabled_pairs(),
        if config.engine.dry_run { " [DRY-RUN]" } else { "" }
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return IplistExitCode::ConfigError.into();
        }
    };

    let code = rt.block_on(async {
        match run_batch(config, &settings).await {
            Ok(report) => IplistExitCode::for_report(&report),
            Err(e) => {
                error!("Startup error: {:#}", e);
                IplistExitCode::ConfigError
            }
        }
    });

    code.into()
}

/// Wire the engine and run one batch
async fn run_batch(config: SyncConfig, settings: &DaemonSettings) -> Result<RunReport> {
    let registry = ProviderRegistry::with_builtin_cache_stores();

    #[cfg(feature = "cloudflare")]
    {
        debug!("Registering Cloudflare provider");
        iplist_provider_cloudflare::register(&registry);
    }

    let provider = registry
        .create_provider(&config.provider)
        .with_context(|| format!("Failed to create provider '{}'", config.provider.type_name()))?;
    let cache = open_cache_store(&registry, &config.cache).await;
    let fetcher = iplist_source_http::HttpSourceFetcher::new()?;

    let (engine, mut events) = SyncEngine::new(
        Arc::new(fetcher),
        Arc::from(provider),
        Arc::from(cache),
        config,
    )?;

    let mut engine = engine.with_notifier(Arc::new(WebhookNotifier::new()?));
    if let Some(path) = &settings.report_path {
        engine = engine.with_report_sink(Arc::new(JsonFileReportSink::new(path)));
    }

    let event_log = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(?event, "Engine event");
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_watch = tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => {
                warn!("Received {}, finishing in-flight lists", signal);
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!("Signal handling unavailable: {}", e),
        }
    });

    let report = engine.run_with_shutdown(shutdown_rx).await;

    signal_watch.abort();
    drop(engine);
    let _ = event_log.await;

    Ok(report)
}

/// Build the configured cache store, degrading to memory when it cannot be opened
///
/// The cache only gates redundant remote reads, so a missing one never stops a run.
async fn open_cache_store(
    registry: &ProviderRegistry,
    config: &CacheStoreConfig,
) -> Box<dyn CacheStore> {
    if let Some(message) = volatile_cache_warning(config) {
        warn!("{}", message);
    }

    match registry.create_cache_store(config).await {
        Ok(cache) => cache,
        Err(e) => {
            warn!(
                "Failed to create cache store '{}': {}. Continuing with an in-memory cache.",
                config.type_name(),
                e
            );
            Box::new(MemoryCacheStore::new())
        }
    }
}

/// Warning for cache settings that cannot carry fingerprints to the next run
fn volatile_cache_warning(config: &CacheStoreConfig) -> Option<&'static str> {
    match config {
        CacheStoreConfig::Memory => Some(
            "Cache store is in-memory: fingerprints are lost on exit and every list \
             will be re-read on the next run. Set `cache: { type: file, path: ... }` to persist them.",
        ),
        _ => None,
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
