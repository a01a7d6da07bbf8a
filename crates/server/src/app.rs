//! Startup and shutdown sequence.
//!
//! ```text
//! config → store (schema) → broker (streams) → service → pipeline → consumers → wait for signal → drain
//! ```
//!
//! Any failure before consumers are running aborts startup with context.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use auction_product_catalog::{ProductService, ProductStore};
use auction_product_events::{Broker, IdempotentPublisher};
use auction_product_infra::dispatch::MAX_DELIVER;
use auction_product_infra::{
    AppConfig, ConsumerDispatch, HandlerPipeline, JetStreamBroker, PipelineSettings,
    PostgresProductStore,
};

pub fn pipeline_settings(config: &AppConfig) -> PipelineSettings {
    PipelineSettings {
        stream_name: config.product_stream.clone(),
        caller_header: config.headers.auth_user_id.clone(),
        msg_id_header: config.headers.msg_id.clone(),
        max_deliver: MAX_DELIVER,
    }
}

/// Service plus publisher behind a pipeline.
pub fn build_pipeline<S, B>(config: &AppConfig, store: S, broker: B) -> HandlerPipeline
where
    S: ProductStore + 'static,
    B: Broker + 'static,
{
    let publisher = IdempotentPublisher::new(broker, config.publisher_settings());
    let service =
        ProductService::new(store, publisher).with_find_all_limit(config.find_all_limit);
    HandlerPipeline::new(Arc::new(service), pipeline_settings(config))
}

pub fn build_dispatch<B: Broker>(
    config: &AppConfig,
    broker: B,
    pipeline: HandlerPipeline,
) -> ConsumerDispatch<B> {
    ConsumerDispatch::new(
        broker,
        pipeline,
        config.app_name.clone(),
        config.product_stream.clone(),
        config.commands.clone(),
    )
}

/// Both the command stream and the error stream must exist before consuming.
pub async fn verify_streams<B: Broker>(broker: &B, config: &AppConfig) -> anyhow::Result<()> {
    for stream in [&config.product_stream, &config.error_stream] {
        broker
            .verify_stream(stream)
            .await
            .with_context(|| format!("stream {stream} is not available"))?;
    }
    Ok(())
}

/// Run until SIGINT/SIGTERM, then let in-flight messages settle.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!(app = %config.app_name, stream = %config.product_stream, "starting");

    let store =
        PostgresProductStore::connect(&config.postgres_dsn, config.postgres_max_connections)
            .await
            .context("failed to connect to postgres")?;
    store
        .ensure_schema()
        .await
        .context("failed to prepare products table")?;

    let broker = JetStreamBroker::connect(&config.nats_url)
        .await
        .context("failed to connect to nats")?;
    verify_streams(&broker, &config).await?;

    let pipeline = build_pipeline(&config, store, broker.clone());
    let dispatch = build_dispatch(&config, broker, pipeline);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = dispatch
        .start_all(shutdown_rx)
        .await
        .context("failed to start consumers")?;
    info!(consumers = handles.len(), "consumers started");

    shutdown_signal().await;
    info!("shutdown requested");

    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "consumer task ended abnormally");
        }
    }

    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use auction_product_catalog::InMemoryProductStore;
    use auction_product_events::{Disposition, Headers, InMemoryBroker};

    use super::*;

    fn config() -> AppConfig {
        AppConfig::from_lookup(|var| match var {
            "APP_NAME" => Some("catalog".to_string()),
            "PRODUCT_STREAM_HEADER_AUTH_USER_ID" => Some("X-User".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn pipeline_settings_follow_config() {
        let settings = pipeline_settings(&config());
        assert_eq!(settings.stream_name, "PRODUCT");
        assert_eq!(settings.caller_header, "X-User");
        assert_eq!(settings.msg_id_header, "Nats-Msg-Id");
        assert_eq!(settings.max_deliver, 2);
    }

    #[tokio::test]
    async fn startup_requires_the_error_stream() {
        let config = config();
        let broker = InMemoryBroker::new();
        assert!(verify_streams(&broker, &config).await.is_ok());

        broker.drop_stream("ERROR");

        let err = verify_streams(&broker, &config).await.unwrap_err();
        assert_eq!(err.to_string(), "stream ERROR is not available");
    }

    #[tokio::test]
    async fn wired_service_handles_messages_end_to_end() {
        let config = config();
        let broker = InMemoryBroker::new();
        let store = Arc::new(InMemoryProductStore::new());

        let pipeline = build_pipeline(&config, Arc::clone(&store), broker.clone());
        let dispatch = build_dispatch(&config, broker.clone(), pipeline);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = dispatch.start_all(shutdown_rx).await.unwrap();

        assert!(
            broker
                .consumer("catalog-consumer-command-create-product")
                .is_some()
        );

        let payload = serde_json::json!({
            "key": "cmd-1",
            "value": {"name": "Lamp", "description": "desk lamp"}
        });
        assert!(broker.deliver(
            &config.commands.create,
            Headers::new().with("X-User", "u1"),
            serde_json::to_vec(&payload).unwrap(),
        ));

        let settled = broker.wait_for_settlements(1, Duration::from_secs(2)).await;
        assert_eq!(settled[0].disposition, Disposition::DoubleAck);
        assert_eq!(store.len(), 1);

        let created = broker.published_on(&config.events.created);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].headers.get("X-User"), Some("u1"));

        shutdown_tx.send(true).unwrap();
        futures::future::join_all(handles).await;
    }
}
