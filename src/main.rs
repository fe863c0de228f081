//! Meshcache node binary
//!
//! Starts one cache node: local store, cluster membership and the HTTP
//! listener that carries both client and peer traffic.
//!
//! # Startup Sequence
//! 1. Initialize tracing subscriber for logging
//! 2. Load configuration from environment variables
//! 3. Create the default cache group
//! 4. Join the cluster (unless standalone) and wire the peer picker in
//! 5. Serve HTTP until SIGINT/SIGTERM or a lost service lease

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshcache::{
    destroy_all_groups, new_group, CacheServer, ClientPicker, Config, GroupOptions, PickerOptions,
    RegistryConfig, ServerOptions, SourceFn,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meshcache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting meshcache node");

    let config = Config::from_env();
    info!(
        addr = %config.node_addr,
        service = %config.service_name,
        group = %config.group_name,
        cache_bytes = config.cache_bytes,
        default_ttl = config.default_ttl,
        standalone = config.standalone,
        "configuration loaded"
    );

    // A plain cache node has no origin of record; misses that reach the
    // data source report not-found to the caller.
    let source = Arc::new(SourceFn(|key: String| async move {
        Err(anyhow::anyhow!("no origin data for key {key}"))
    }));

    let expiration = match config.default_ttl {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let group = new_group(
        &config.group_name,
        config.cache_bytes,
        source,
        GroupOptions {
            expiration,
            ..GroupOptions::default()
        },
    );

    let registry_config = RegistryConfig {
        endpoints: config.etcd_endpoints.clone(),
        ..RegistryConfig::default()
    };

    let picker = if config.standalone {
        None
    } else {
        match ClientPicker::new(
            &config.node_addr,
            PickerOptions {
                svc_name: Some(config.service_name.clone()),
                registry: registry_config.clone(),
                ..PickerOptions::default()
            },
        )
        .await
        {
            Ok(picker) => {
                group.register_peers(picker.clone());
                Some(picker)
            }
            Err(e) => {
                error!(error = %e, "failed to join cluster");
                std::process::exit(1);
            }
        }
    };

    let server = CacheServer::new(
        &config.node_addr,
        &config.service_name,
        ServerOptions {
            registry: registry_config,
            standalone: config.standalone,
        },
    );

    if let Err(e) = server.run().await {
        error!(error = %e, "server failed");
    }

    if let Some(picker) = picker {
        picker.close();
    }
    destroy_all_groups();
}
