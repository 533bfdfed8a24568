use std::sync::Arc;

use anyhow::Context;
use floodwatch_core::{
    config::Config,
    memory::MemorySink,
    messaging::{
        logged::LoggingReplyChannel,
        throttled::{ThrottleConfig, ThrottledReplyChannel},
    },
    ports::SystemClock,
    source::{DataSource, FeedDataSource},
};
use floodwatch_feed::{FeedSettings, TcpLineTransport};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    floodwatch_core::logging::init("floodwatch")?;

    let cfg = Arc::new(Config::load().context("loading configuration")?);
    let transport = Arc::new(TcpLineTransport::new(
        FeedSettings::from_env().context("loading feed settings")?,
    ));

    let channel = Arc::new(ThrottledReplyChannel::new(
        Arc::new(LoggingReplyChannel),
        ThrottleConfig {
            global_min_interval: cfg.reply_min_interval,
            ..ThrottleConfig::default()
        },
    ));
    let clock = Arc::new(SystemClock);
    let source = Arc::new(FeedDataSource::new(
        cfg.clone(),
        Arc::new(MemorySink::new()),
        channel,
        clock.clone(),
    ));

    let supervisor = source.supervise(transport, cfg.clone(), clock);
    supervisor
        .start()
        .await
        .context("starting feed supervisor")?;
    info!(
        live_send = cfg.live_send_enabled,
        keywords = cfg.keywords.len(),
        accounts = cfg.monitored_accounts.len(),
        "floodwatch running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");
    supervisor.stop().await;

    Ok(())
}
