//! promptfold server wiring.
//!
//! Builds the transport adapter, the generation client, and the engine, and
//! connects them through one event queue.

use crate::config::PromptfoldConfig;
use crate::debounce::DebounceScheduler;
use crate::dispatch::Dispatcher;
use crate::engine::{Engine, EngineEvent};
use crate::rotator::KeyRotator;
use crate::store::PendingStore;
use anyhow::Result;
use fold_channels::{ChannelAdapter, TelegramAdapter};
use fold_gen::{DEFAULT_GENERATION_ENDPOINT, GenClient};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

const EVENT_QUEUE_CAPACITY: usize = 256;

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = PromptfoldConfig::load(config_path).await?;
    tracing::info!(
        api_keys = cfg.generation.api_keys.len(),
        endpoint = cfg
            .generation
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_GENERATION_ENDPOINT),
        quiet_period_secs = cfg.engine.quiet_period_secs,
        upstream_timeout_secs = cfg.engine.upstream_timeout_secs,
        prompt_prefix_set = cfg.engine.prompt_prefix.is_some(),
        "config ok"
    );
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = PromptfoldConfig::load(config_path).await?;

    let rotator = KeyRotator::new(cfg.generation.api_keys.clone())?;
    tracing::info!(
        api_keys = rotator.len(),
        quiet_period_secs = cfg.engine.quiet_period_secs,
        upstream_timeout_secs = cfg.engine.upstream_timeout_secs,
        "server configuration loaded"
    );

    let endpoint = cfg
        .generation
        .endpoint
        .as_deref()
        .unwrap_or(DEFAULT_GENERATION_ENDPOINT);
    let generator = Arc::new(GenClient::new(endpoint, cfg.upstream_timeout()));

    let telegram: Arc<dyn ChannelAdapter> = Arc::new(TelegramAdapter::new(&cfg.telegram.bot_token)?);

    let (events_tx, events_rx) = mpsc::channel::<EngineEvent>(EVENT_QUEUE_CAPACITY);
    let (inbound_tx, mut inbound_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    telegram.start(inbound_tx).await?;

    // Inbound messages and timer fires share one queue; the engine is the
    // sole consumer, which is what serializes all state mutations.
    let forward_tx = events_tx.clone();
    tokio::spawn(async move {
        while let Some(inbound) = inbound_rx.recv().await {
            if forward_tx.send(EngineEvent::Inbound(inbound)).await.is_err() {
                tracing::warn!("engine queue closed; stopping inbound forwarder");
                break;
            }
        }
    });

    let scheduler = DebounceScheduler::new(cfg.quiet_period(), events_tx.clone());
    let dispatcher = Dispatcher::new(
        telegram.clone(),
        generator,
        cfg.upstream_timeout(),
        cfg.engine.prompt_prefix.clone(),
    );
    let engine = Arc::new(Engine::new(
        PendingStore::new(),
        rotator,
        scheduler,
        dispatcher,
        telegram,
        events_rx,
    ));
    engine.start();

    tracing::info!("promptfold serving");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    Ok(())
}
