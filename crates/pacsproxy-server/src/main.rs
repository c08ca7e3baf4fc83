// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use pacsproxy_server::{
    build_router, validate_startup_config, ApiConfig, AppState, CacheConfig, FsContentStore,
    RemoteConfig, RetryPolicy, SeriesService,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_duration_ms(name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_u64(name, default_ms))
}

fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("register SIGTERM");
        let mut sigint = signal(SignalKind::interrupt()).expect("register SIGINT");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env_bool("PACSPROXY_LOG_JSON", true) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    init_tracing();

    let bind_addr = env::var("PACSPROXY_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let defaults = CacheConfig::default();
    let retrieve_timeout_ms = env_u64("PACSPROXY_RETRIEVE_TIMEOUT_MS", 120_000);
    let cache_cfg = CacheConfig {
        storage_root: PathBuf::from(
            env::var("PACSPROXY_STORAGE_PATH").unwrap_or_else(|_| "data/storage".to_string()),
        ),
        max_associations: env_usize("PACSPROXY_MAX_ASSOCIATIONS", defaults.max_associations),
        metadata_cache_entries: env_usize(
            "PACSPROXY_METADATA_CACHE_ENTRIES",
            defaults.metadata_cache_entries,
        ),
        metadata_ttl: env_duration_ms("PACSPROXY_METADATA_CACHE_TTL_MS", 300_000),
        retrieve_timeout: (retrieve_timeout_ms > 0)
            .then(|| Duration::from_millis(retrieve_timeout_ms)),
        query_timeout: env_duration_ms("PACSPROXY_QUERY_TIMEOUT_MS", 15_000),
    };
    let api_cfg = ApiConfig {
        server_uri: env::var("PACSPROXY_SERVER_URI")
            .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        shutdown_drain: env_duration_ms("PACSPROXY_SHUTDOWN_DRAIN_MS", 2_000),
    };
    validate_startup_config(&api_cfg, &cache_cfg).map_err(|e| e.to_string())?;

    let retry = RetryPolicy {
        max_attempts: env_usize("PACSPROXY_REMOTE_RETRY_ATTEMPTS", 3),
        base_backoff_ms: env_u64("PACSPROXY_REMOTE_RETRY_BASE_MS", 120),
    };
    let remote_cfg = RemoteConfig::parse(
        &env::var("PACSPROXY_REMOTE").unwrap_or_else(|_| "local:data/archive".to_string()),
        env_string("PACSPROXY_WADO_URI"),
        env_string("PACSPROXY_REMOTE_BEARER"),
        &retry,
    )
    .map_err(|e| e.to_string())?;

    tokio::fs::create_dir_all(&cache_cfg.storage_root)
        .await
        .map_err(|e| {
            format!(
                "create storage root {} failed: {e}",
                cache_cfg.storage_root.display()
            )
        })?;
    let channel = remote_cfg
        .build_channel(cache_cfg.query_timeout.max(Duration::from_secs(30)))
        .map_err(|e| e.to_string())?;
    info!(
        cache = %serde_json::to_string(&cache_cfg).unwrap_or_default(),
        remote = %serde_json::to_string(&remote_cfg).unwrap_or_default(),
        channel = channel.channel_tag(),
        "startup config"
    );

    let service = SeriesService::new(
        &cache_cfg,
        &api_cfg.server_uri,
        Arc::new(FsContentStore::new(cache_cfg.storage_root.clone())),
        channel,
    );
    let drain = api_cfg.shutdown_drain;
    let state = AppState::with_config(Arc::new(service), api_cfg);
    let app = build_router(state.clone());

    let addr: std::net::SocketAddr = bind_addr
        .parse()
        .map_err(|e| format!("invalid bind addr {bind_addr}: {e}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!("pacsproxy-server listening on {bind_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            info!("shutdown requested, draining");
            state.begin_shutdown_drain();
            tokio::time::sleep(drain).await;
        })
        .await
        .map_err(|e| format!("server failed: {e}"))
}
