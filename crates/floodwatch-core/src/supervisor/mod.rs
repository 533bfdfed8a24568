//! Feed connection lifecycle.
//!
//! One task owns the connection and its event stream. Two watchdog tasks
//! poll `StreamHealth` and signal the owner when the stream went silent or a
//! connect call hung; signals carry the connect attempt number so late ones
//! are ignored. Applying classification results runs in tracked tasks.

mod health;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval, sleep, timeout, Instant, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    cache::CacheBuffer,
    config::Config,
    domain::Message,
    ports::{Clock, FeedConnection, FeedEvent, FeedTransport},
    source::DataSource,
    Error, Result,
};

pub use health::{ConnectionState, StreamHealth};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub state: ConnectionState,
    pub attempt: u64,
    pub reconnects: u64,
    pub last_message_at: Option<Instant>,
    pub caching: bool,
    pub cached: usize,
    pub dropped: u64,
}

#[derive(Clone, Copy, Debug)]
enum Signal {
    Stale { attempt: u64 },
    ConnectTimedOut { attempt: u64 },
}

enum Connect {
    Cancelled,
    /// The connect watchdog gave up on this attempt.
    Abandoned,
    Done(Result<FeedConnection>),
}

enum StreamEnd {
    Stopped,
    /// Silent stream; reconnect right away.
    Stale,
    /// The transport reported the connection gone; reconnect after backoff.
    Lost,
}

struct Intake {
    caching: bool,
    cache: CacheBuffer,
}

#[derive(Clone)]
pub struct StreamSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    source: Arc<dyn DataSource>,
    transport: Arc<dyn FeedTransport>,
    cfg: Arc<Config>,
    clock: Arc<dyn Clock>,
    health: Mutex<StreamHealth>,
    intake: Mutex<Intake>,
    started: AtomicBool,
    cancel: CancellationToken,
    tracker: TaskTracker,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl StreamSupervisor {
    pub fn new(
        source: Arc<dyn DataSource>,
        transport: Arc<dyn FeedTransport>,
        cfg: Arc<Config>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = CacheBuffer::new(cfg.cache_capacity);
        Self {
            inner: Arc::new(SupervisorInner {
                source,
                transport,
                cfg,
                clock,
                health: Mutex::new(StreamHealth::default()),
                intake: Mutex::new(Intake {
                    caching: false,
                    cache,
                }),
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                tasks: tokio::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    /// Verify credentials, then keep one feed connection alive until `stop()`.
    ///
    /// A credential failure, or no answer within the stale timeout, is
    /// returned and nothing is spawned.
    pub async fn start(&self) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::State("stream supervisor already stopped".to_string()));
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(Error::State("stream supervisor already started".to_string()));
        }

        if !self.inner.cfg.stream_enabled {
            info!("feed streaming disabled; supervisor idle");
            return Ok(());
        }

        let limit = self.inner.cfg.stream_stale_timeout;
        let verified = match timeout(limit, self.inner.transport.verify_credentials()).await {
            Ok(res) => res,
            Err(_) => Err(Error::Credentials(format!(
                "no answer within {} ms",
                limit.as_millis()
            ))),
        };
        if let Err(e) = verified {
            error!(error = %e, "feed credential verification failed");
            return Err(match e {
                Error::Credentials(_) => e,
                other => Error::Credentials(other.to_string()),
            });
        }
        info!("feed credentials verified");

        let (tx, rx) = mpsc::unbounded_channel();
        let mut tasks = self.inner.tasks.lock().await;
        tasks.push(tokio::spawn(self.inner.clone().run(rx)));
        tasks.push(tokio::spawn(self.inner.clone().stale_watchdog(tx.clone())));
        tasks.push(tokio::spawn(self.inner.clone().connect_watchdog(tx)));
        Ok(())
    }

    /// Tear down the connection and every timer and in-flight task.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();

        let handles = std::mem::take(&mut *self.inner.tasks.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "supervisor task ended abnormally");
            }
        }

        self.inner.tracker.close();
        self.inner.tracker.wait().await;

        self.inner.health().mark_stopped();
        info!("stream supervisor stopped");
    }

    /// Hold incoming messages in the cache instead of classifying them.
    pub fn enable_cache_mode(&self) {
        let mut intake = self.inner.intake();
        if !intake.caching {
            intake.caching = true;
            info!("cache mode enabled");
        }
    }

    /// Replay cached messages in arrival order, then resume live dispatch.
    ///
    /// Returns the number of replayed messages. Must be called from within
    /// the tokio runtime.
    pub fn disable_cache_mode(&self) -> usize {
        let mut intake = self.inner.intake();
        let cached = intake.cache.drain_in_order();
        let replayed = cached.len();
        for message in cached {
            self.inner.classify_and_apply(message);
        }
        intake.caching = false;
        info!(replayed, "cache mode disabled");
        replayed
    }

    pub fn health(&self) -> HealthSnapshot {
        let (caching, cached, dropped) = {
            let intake = self.inner.intake();
            (intake.caching, intake.cache.len(), intake.cache.dropped())
        };
        let health = self.inner.health();
        HealthSnapshot {
            state: health.state(),
            attempt: health.attempt(),
            reconnects: health.reconnects(),
            last_message_at: health.last_message_at(),
            caching,
            cached,
            dropped,
        }
    }
}

impl SupervisorInner {
    fn health(&self) -> MutexGuard<'_, StreamHealth> {
        self.health.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn intake(&self) -> MutexGuard<'_, Intake> {
        self.intake.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run(self: Arc<Self>, mut signals: mpsc::UnboundedReceiver<Signal>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let attempt = self.health().begin_connect(self.clock.now());
            info!(attempt, "connecting to feed");

            let connected = {
                let connect = self.transport.connect();
                tokio::pin!(connect);
                loop {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break Connect::Cancelled,
                        res = &mut connect => break Connect::Done(res),
                        Some(signal) = signals.recv() => match signal {
                            Signal::ConnectTimedOut { attempt: hung } if hung == attempt => {
                                break Connect::Abandoned;
                            }
                            other => {
                                debug!(attempt, signal = ?other, "ignoring watchdog signal while connecting");
                            }
                        },
                    }
                }
            };

            let conn = match connected {
                Connect::Cancelled => break,
                Connect::Done(Ok(conn)) => conn,
                Connect::Abandoned => {
                    warn!(attempt, "connect attempt hung; abandoning it");
                    self.health().mark_reconnecting();
                    continue;
                }
                Connect::Done(Err(e)) => {
                    warn!(attempt, error = %e, "feed connect failed; retrying after backoff");
                    self.health().mark_reconnecting();
                    if !self.backoff().await {
                        break;
                    }
                    continue;
                }
            };

            self.health().mark_streaming(self.clock.now());
            info!(attempt, "feed connected");

            match self.stream(conn, attempt, &mut signals).await {
                StreamEnd::Stopped => break,
                StreamEnd::Stale => {
                    self.health().mark_reconnecting();
                }
                StreamEnd::Lost => {
                    self.health().mark_reconnecting();
                    if !self.backoff().await {
                        break;
                    }
                }
            }
        }
        debug!("supervisor loop exited");
    }

    async fn stream(
        &self,
        mut conn: FeedConnection,
        attempt: u64,
        signals: &mut mpsc::UnboundedReceiver<Signal>,
    ) -> StreamEnd {
        enum Step {
            Stop,
            Signal(Signal),
            Event(Option<FeedEvent>),
        }

        loop {
            let step = tokio::select! {
                _ = self.cancel.cancelled() => Step::Stop,
                Some(signal) = signals.recv() => Step::Signal(signal),
                event = conn.events.recv() => Step::Event(event),
            };

            match step {
                Step::Stop => {
                    conn.close();
                    return StreamEnd::Stopped;
                }
                Step::Signal(Signal::Stale { attempt: stale }) if stale == attempt => {
                    warn!(
                        attempt,
                        timeout_ms = self.cfg.stream_stale_timeout.as_millis() as u64,
                        "no feed messages within stale timeout; reconnecting"
                    );
                    conn.close();
                    return StreamEnd::Stale;
                }
                Step::Signal(signal) => {
                    debug!(attempt, ?signal, "ignoring watchdog signal while streaming");
                }
                Step::Event(None) => {
                    warn!(attempt, "feed event stream closed; reconnecting");
                    conn.close();
                    return StreamEnd::Lost;
                }
                Step::Event(Some(event)) => {
                    if let Some(end) = self.handle_event(event, attempt) {
                        conn.close();
                        return end;
                    }
                }
            }
        }
    }

    fn handle_event(&self, event: FeedEvent, attempt: u64) -> Option<StreamEnd> {
        match event {
            FeedEvent::Data(message) => {
                self.health().touch(self.clock.now());
                self.dispatch(message);
                None
            }
            FeedEvent::Warning { code, message } => {
                warn!(attempt, %code, %message, "feed warning");
                None
            }
            FeedEvent::Disconnect { code, reason } => {
                warn!(attempt, %code, reason = reason.as_deref().unwrap_or(""), "feed disconnect; reconnecting");
                Some(StreamEnd::Lost)
            }
            FeedEvent::Error { error, code } => {
                error!(attempt, %error, code = code.as_deref().unwrap_or(""), "feed error; reconnecting");
                Some(StreamEnd::Lost)
            }
            FeedEvent::End => {
                warn!(attempt, "feed ended; reconnecting");
                Some(StreamEnd::Lost)
            }
            FeedEvent::Destroy => {
                warn!(attempt, "feed connection destroyed; reconnecting");
                Some(StreamEnd::Lost)
            }
        }
    }

    fn dispatch(&self, message: Message) {
        let mut intake = self.intake();
        if intake.caching {
            debug!(message_id = %message.id, "caching message");
            intake.cache.enqueue(message);
            return;
        }
        self.classify_and_apply(message);
    }

    fn classify_and_apply(&self, message: Message) {
        let result = self.source.classify(&message);
        if result.is_ignored() {
            return;
        }

        let source = self.source.clone();
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = source.apply(message, result) => {}
            }
        });
    }

    /// Returns `false` when cancelled during the wait.
    async fn backoff(&self) -> bool {
        let wait = self.cfg.reconnect_backoff;
        debug!(backoff_ms = wait.as_millis() as u64, "waiting before reconnect");
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(wait) => true,
        }
    }

    async fn stale_watchdog(self: Arc<Self>, tx: mpsc::UnboundedSender<Signal>) {
        let timeout = self.cfg.stream_stale_timeout;
        self.watchdog(tx, |health, now| {
            health
                .check_stale(now, timeout)
                .map(|attempt| Signal::Stale { attempt })
        })
        .await;
    }

    async fn connect_watchdog(self: Arc<Self>, tx: mpsc::UnboundedSender<Signal>) {
        let timeout = self.cfg.stream_stale_timeout;
        self.watchdog(tx, |health, now| {
            health
                .check_connect(now, timeout)
                .map(|attempt| Signal::ConnectTimedOut { attempt })
        })
        .await;
    }

    async fn watchdog<F>(&self, tx: mpsc::UnboundedSender<Signal>, mut check: F)
    where
        F: FnMut(&mut StreamHealth, Instant) -> Option<Signal> + Send,
    {
        let mut ticker = interval(poll_interval(&self.cfg));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let signal = {
                        let now = self.clock.now();
                        let mut health = self.health();
                        check(&mut *health, now)
                    };
                    if let Some(signal) = signal {
                        if tx.send(signal).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn poll_interval(cfg: &Config) -> Duration {
    cfg.supervisor_poll_interval.max(Duration::from_millis(1))
}
