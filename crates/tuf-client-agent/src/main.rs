// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{fs, sync::Arc};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use tuf_client_core::{
    CountingTelemetry, ErrorClass, HttpTransport, HttpTransportOptions, MemoryCache,
    MetadataCache, SledCache, SystemClock, TrustClient, TrustEnv,
};

#[tokio::main]
pub async fn main() {
    let env = TrustEnv::from_os_env();

    let env_filter = format!("h2=off,hyper=off,rustls=off,sled=warn,{}", env.log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let Some(metadata_url) = env.metadata_url.clone() else {
        error!("TUF_METADATA_URL is not set. Shutting down.");
        return;
    };
    let Some(root_path) = env.root_path.clone() else {
        error!("TUF_ROOT_PATH is not set. Shutting down.");
        return;
    };
    let bootstrap_root = match fs::read(&root_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Unable to read root metadata at {}: {e}", root_path.display());
            return;
        }
    };

    let transport = match HttpTransport::new(
        &metadata_url,
        HttpTransportOptions {
            allow_plaintext: env.allow_plaintext,
            timeout: env.fetch_timeout,
        },
    ) {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            error!("Invalid repository URL {metadata_url}: {e}");
            return;
        }
    };

    let cache: Arc<dyn MetadataCache> = match env.cache_path.as_ref() {
        Some(path) => match SledCache::open(path, &metadata_url) {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                error!("Unable to open metadata cache at {}: {e}", path.display());
                return;
            }
        },
        None => {
            info!("TUF_CACHE_PATH is not set, keeping metadata in memory");
            Arc::new(MemoryCache::new())
        }
    };

    let telemetry = CountingTelemetry::default();
    let client = match TrustClient::new(
        env.client_config(),
        &bootstrap_root,
        transport,
        cache,
        Arc::new(SystemClock),
    ) {
        Ok(client) => client.with_telemetry(Arc::new(telemetry.clone())),
        Err(e) => {
            error!("Unable to load root metadata from {}: {e}", root_path.display());
            return;
        }
    };

    let cancel_token = CancellationToken::new();
    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for shutdown signal: {e}");
            return;
        }
        info!("Shutdown requested");
        shutdown.cancel();
    });

    info!(
        "Refreshing {metadata_url} every {}s",
        env.refresh_interval.as_secs()
    );
    let mut refresh_interval = interval(env.refresh_interval);
    refresh_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = refresh_interval.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel_token.cancelled() => break,
            result = client.refresh() => result,
        };
        debug!("Refresh counters: {}", telemetry.counters().snapshot());

        if let Err(e) = result {
            if e.class() == ErrorClass::Fatal {
                error!("Trust configuration cannot be used, stopping: {e}");
                break;
            }
        }
    }

    info!("Stopped");
}
