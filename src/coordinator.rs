//! Pipeline wiring and lifecycle
//!
//! Feed adapters push onto one bounded intake channel. A single task
//! drains it, merges each message into the registry, classifies, synthesizes
//! and hands the event to the sink. That task is the registry's only writer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    cache::IdentityCache,
    config::AppConfig,
    errors::GatewayError,
    feeds::{AggregatorFeed, FeedHandle, FeedStats, RadioFeed, StreamFeed},
    known_craft::KnownCraftMatcher,
    models::RawAisMessage,
    registry::VesselRegistry,
    synthesizer::{EventSynthesizer, OutboundEvent},
    transport::EventSink,
};

const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Registry, matcher and synthesizer, constructed once and owned by the
/// coordinator task
pub struct Pipeline {
    registry: VesselRegistry,
    matcher: KnownCraftMatcher,
    synthesizer: EventSynthesizer,
}

impl Pipeline {
    pub fn new(matcher: KnownCraftMatcher, synthesizer: EventSynthesizer) -> Self {
        Self {
            registry: VesselRegistry::new(),
            matcher,
            synthesizer,
        }
    }

    /// Merge one message and synthesize the resulting event, if any
    pub fn process(
        &mut self,
        message: &RawAisMessage,
        now: DateTime<Utc>,
    ) -> Option<OutboundEvent> {
        let state = self.registry.merge(message);
        let directive = self.matcher.classify(&state);
        self.synthesizer.synthesize(&state, &directive, now)
    }

    /// Merge without producing an event
    pub fn absorb(&mut self, message: &RawAisMessage) {
        self.registry.merge(message);
    }

    pub fn registry(&self) -> &VesselRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut VesselRegistry {
        &mut self.registry
    }
}

pub struct Coordinator<S> {
    pipeline: Pipeline,
    sink: S,
    cache: Option<IdentityCache>,
    shutdown_grace: Duration,
    feed_stats: Vec<(&'static str, Arc<FeedStats>)>,
}

impl<S: EventSink> Coordinator<S> {
    pub fn new(pipeline: Pipeline, sink: S) -> Self {
        Self {
            pipeline,
            sink,
            cache: None,
            shutdown_grace: Duration::from_secs(5),
            feed_stats: Vec::new(),
        }
    }

    pub fn with_cache(mut self, cache: IdentityCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Seed registry identities from the cache file, if one is configured.
    /// Failures leave the registry empty.
    pub async fn seed_from_cache(&mut self) {
        let Some(cache) = &self.cache else {
            return;
        };
        match cache.load().await {
            Ok(identities) => {
                for (mmsi, identity) in identities {
                    self.pipeline.registry_mut().seed_identity(mmsi, identity);
                }
            }
            Err(e) => warn!("Identity cache not loaded, continuing without it: {}", e),
        }
    }

    /// Start every enabled feed and process until `shutdown` resolves
    pub async fn run<F>(mut self, config: &AppConfig, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()>,
    {
        self.seed_from_cache().await;

        let (tx, rx) = mpsc::channel(config.intake.capacity);
        let cancel = CancellationToken::new();
        let feeds = spawn_feeds(config, tx, &cancel).await?;
        self.feed_stats = feeds.iter().map(|f| (f.name, f.stats.clone())).collect();

        self.drive(rx, shutdown, &cancel).await;

        for feed in feeds {
            match tokio::time::timeout(self.shutdown_grace, feed.task).await {
                Ok(Ok(())) => debug!("{} feed stopped", feed.name),
                Ok(Err(e)) => error!("{} feed task failed: {}", feed.name, e),
                Err(_) => warn!("{} feed did not stop within grace period", feed.name),
            }
        }
        info!("Coordinator stopped");
        Ok(())
    }

    /// Consume the intake channel until `shutdown` resolves or every
    /// producer is gone, then drain for at most the grace period.
    pub async fn drive<F>(
        &mut self,
        mut rx: mpsc::Receiver<RawAisMessage>,
        shutdown: F,
        cancel: &CancellationToken,
    ) where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut stats_tick = tokio::time::interval(STATS_INTERVAL);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                message = rx.recv() => {
                    let Some(message) = message else {
                        info!("All feeds stopped");
                        break;
                    };
                    self.handle(&message).await;
                }
                _ = stats_tick.tick() => self.log_stats(),
            }
        }

        cancel.cancel();
        self.drain(&mut rx).await;
        self.log_stats();

        if let Some(cache) = self.cache.as_mut() {
            if let Err(e) = cache.flush(self.pipeline.registry()).await {
                error!("Final identity cache flush failed: {}", e);
            }
        }
    }

    async fn handle(&mut self, message: &RawAisMessage) {
        if let Some(event) = self.pipeline.process(message, Utc::now()) {
            let uid = event.uid.clone();
            if let Err(e) = self.sink.send(event).await {
                warn!(%uid, "Event delivery failed: {}", e);
            }
        }

        if let Some(cache) = self.cache.as_mut() {
            if let Err(e) = cache.maybe_flush(self.pipeline.registry()).await {
                warn!("Identity cache flush failed: {}", e);
            }
        }
    }

    /// Merge whatever is already queued, but synthesize nothing
    async fn drain(&mut self, rx: &mut mpsc::Receiver<RawAisMessage>) {
        let deadline = Instant::now() + self.shutdown_grace;
        let mut drained = 0usize;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(message)) => {
                    self.pipeline.absorb(&message);
                    drained += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("Shutdown grace period elapsed with messages still queued");
                    break;
                }
            }
        }
        rx.close();
        debug!("Drained {} queued messages", drained);
    }

    fn log_stats(&self) {
        info!("Tracking {} vessels", self.pipeline.registry().len());
        for (name, stats) in &self.feed_stats {
            info!("{} feed: {}", name, stats);
        }
    }
}

/// Spawn one task per enabled feed. Each task holds its own intake sender,
/// so the channel closes once every feed has stopped. If a later feed fails
/// to start, the ones already running are cancelled.
async fn spawn_feeds(
    config: &AppConfig,
    tx: mpsc::Sender<RawAisMessage>,
    cancel: &CancellationToken,
) -> Result<Vec<FeedHandle>, GatewayError> {
    let scope = cancel.child_token();
    let mut feeds = Vec::new();

    if config.stream.enabled {
        let stats = FeedStats::new();
        let feed = StreamFeed::new(&config.stream, &config.bbox, tx.clone(), stats.clone());
        feeds.push(FeedHandle {
            name: "stream",
            stats,
            task: tokio::spawn(feed.run(scope.child_token())),
        });
    }

    if config.aggregator.enabled {
        let stats = FeedStats::new();
        let feed =
            AggregatorFeed::new(&config.aggregator, &config.bbox, tx.clone(), stats.clone())
                .inspect_err(|e| error!("Aggregator feed could not start: {}", e))
                .map_err(|e| abandon(&scope, e.into()))?;
        feeds.push(FeedHandle {
            name: "aggregator",
            stats,
            task: tokio::spawn(feed.run(scope.child_token())),
        });
    }

    if config.radio.enabled {
        let stats = FeedStats::new();
        let feed = RadioFeed::bind(&config.radio, tx.clone(), stats.clone())
            .await
            .inspect_err(|e| {
                error!("Radio feed could not bind {}: {}", config.radio.listen_addr, e)
            })
            .map_err(|e| abandon(&scope, e.into()))?;
        feeds.push(FeedHandle {
            name: "radio",
            stats,
            task: tokio::spawn(feed.run(scope.child_token())),
        });
    }

    info!("Started {} feeds", feeds.len());
    Ok(feeds)
}

/// Stop every feed started so far and hand back the startup error
fn abandon(scope: &CancellationToken, error: GatewayError) -> GatewayError {
    scope.cancel();
    error
}
