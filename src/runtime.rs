//! Service runtime: assembles the pipeline and drives the periodic
//! inspection cycles.
//!
//! One scheduler service per task class plus the daily digest service, all
//! cancelled through a shared token on shutdown. Cycles fan out one task per
//! node into a bounded worker pool; a worker owns its session for the
//! node's cycle and closes it on exit.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::alert::AlertEngine;
use crate::config::ConfigBundle;
use crate::debounce::DebounceCache;
use crate::discover;
use crate::executor;
use crate::model::{NodeSpec, TaskClass};
use crate::session::{SessionProvider, SshSessionProvider};
use crate::sinks::event_log::EventLog;
use crate::sinks::webhook::Notifier;
use crate::store::StateStore;
use crate::utils;

/// Shared, immutable state handed to every service and worker task.
#[derive(Clone)]
pub struct InspectionContext {
    shared: Arc<SharedState>,
}

struct SharedState {
    config: ConfigBundle,
    engine: AlertEngine,
    provider: Box<dyn SessionProvider>,
    workers: Semaphore,
}

impl InspectionContext {
    pub fn config(&self) -> &ConfigBundle {
        &self.shared.config
    }

    pub fn engine(&self) -> &AlertEngine {
        &self.shared.engine
    }

    fn provider(&self) -> &dyn SessionProvider {
        self.shared.provider.as_ref()
    }

    fn workers(&self) -> &Semaphore {
        &self.shared.workers
    }
}

pub struct Sentinel {
    config: ConfigBundle,
    provider: Option<Box<dyn SessionProvider>>,
}

impl Sentinel {
    pub fn new(config: ConfigBundle) -> Self {
        Self {
            config,
            provider: None,
        }
    }

    /// Swaps the SSH transport for another provider. Used by tests.
    pub fn with_session_provider(mut self, provider: Box<dyn SessionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub async fn start(self) -> Result<SentinelRuntime> {
        let app = &self.config.app;

        let store = StateStore::open(Path::new(&app.sqlite_db_path), app.max_workers as u32 + 1)
            .await
            .context("state store initialization failed")?;
        let events = match &app.mysql {
            Some(settings) => EventLog::connect(settings, app.max_workers as u32).await,
            None => {
                info!("event log disabled (no MYSQL configuration)");
                EventLog::disabled()
            }
        };
        let notifier = Notifier::new(app.feishu_webhooks.clone());
        let debounce = DebounceCache::new(Duration::from_secs(app.debounce_window_seconds));
        let engine = AlertEngine::new(store, events, notifier, debounce, app.timezone_offset_hours);

        let provider = self
            .provider
            .unwrap_or_else(|| Box::new(SshSessionProvider::from_config(app)));
        let grace = Duration::from_secs(app.shutdown_grace_seconds);
        let workers = Semaphore::new(app.max_workers.max(1));

        let context = InspectionContext {
            shared: Arc::new(SharedState {
                config: self.config,
                engine,
                provider,
                workers,
            }),
        };

        let root_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let mut services: Vec<(String, JoinHandle<()>)> = Vec::new();
        for class in TaskClass::ALL {
            let handle = tokio::spawn(inspection_service(
                context.clone(),
                class,
                root_token.child_token(),
                tracker.clone(),
            ));
            services.push((format!("inspector-{}", class.as_str()), handle));
        }
        services.push((
            "daily-digest".to_string(),
            tokio::spawn(digest_service(context.clone(), root_token.child_token())),
        ));

        info!("sentinel boot completed");

        Ok(SentinelRuntime {
            cancel: root_token,
            tracker,
            services,
            grace,
        })
    }
}

pub struct SentinelRuntime {
    cancel: CancellationToken,
    tracker: TaskTracker,
    services: Vec<(String, JoinHandle<()>)>,
    grace: Duration,
}

impl SentinelRuntime {
    /// Stops the schedulers and drains in-flight node tasks up to the grace
    /// period.
    pub async fn shutdown(self) -> Result<()> {
        info!("shutting down");
        self.cancel.cancel();

        for (name, handle) in self.services {
            match handle.await {
                Ok(()) => info!(service = %name, "service shutdown cleanly"),
                Err(err) => error!(service = %name, error = %err, "service task failed"),
            }
        }

        self.tracker.close();
        if tokio::time::timeout(self.grace, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                grace_secs = self.grace.as_secs(),
                "grace period elapsed with node tasks still in flight"
            );
        }
        Ok(())
    }
}

async fn inspection_service(
    context: InspectionContext,
    class: TaskClass,
    token: CancellationToken,
    tracker: TaskTracker,
) {
    let period = context.config().app.interval_for(class);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Same-class overlap policy: skip. A tick that finds the previous cycle
    // undrained does nothing.
    let in_flight = Arc::new(AtomicBool::new(false));

    info!(
        class = class.as_str(),
        period_secs = period.as_secs(),
        "inspection service started"
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if in_flight.swap(true, Ordering::SeqCst) {
                    warn!(class = class.as_str(), "previous cycle still draining, skipping tick");
                    continue;
                }
                let context = context.clone();
                let flag = Arc::clone(&in_flight);
                tracker.spawn(async move {
                    run_cycle(&context, class).await;
                    flag.store(false, Ordering::SeqCst);
                });
            }
        }
    }

    info!(class = class.as_str(), "inspection service stopped");
}

async fn run_cycle(context: &InspectionContext, class: TaskClass) {
    let nodes = context.config().nodes.clone();
    if nodes.is_empty() {
        warn!(class = class.as_str(), "node inventory is empty, skipping cycle");
        return;
    }

    info!(class = class.as_str(), nodes = nodes.len(), "inspection cycle started");
    let mut tasks: JoinSet<()> = JoinSet::new();
    for node in nodes {
        let context = context.clone();
        tasks.spawn(async move {
            let Ok(_permit) = context.workers().acquire().await else {
                return;
            };
            process_node(&context, class, &node).await;
        });
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(err) = result {
            // One node's crash must not take down the cycle.
            error!(class = class.as_str(), error = %err, "node task aborted");
        }
    }
    info!(class = class.as_str(), "inspection cycle completed");
}

async fn process_node(context: &InspectionContext, class: TaskClass, node: &NodeSpec) {
    let app = &context.config().app;
    let engine = context.engine();
    info!(node = %node.display(), class = class.as_str(), "processing node");

    let session = match context.provider().connect(node).await {
        Ok(session) => session,
        Err(err) => {
            warn!(node = %node.display(), error = %err, "session establishment failed");
            engine.report_session_failure(node, &err).await;
            return;
        }
    };

    let profile = discover::discover_profile(session.as_ref(), node.display()).await;
    let probe_names = context.config().profiles.probes_for(profile.label(), class);
    if probe_names.is_empty() {
        warn!(
            node = %node.display(),
            profile = profile.label(),
            class = class.as_str(),
            "no probes configured for this profile and class, skipping"
        );
        return;
    }

    let findings = executor::run_probes(
        session.as_ref(),
        node,
        &context.config().thresholds,
        probe_names,
        Duration::from_secs(app.ssh_command_timeout_seconds),
    )
    .await;
    for (_probe, finding) in &findings {
        engine.process(node, finding).await;
    }

    info!(
        node = %node.display(),
        class = class.as_str(),
        probes = findings.len(),
        "node processing completed"
    );
}

async fn digest_service(context: InspectionContext, token: CancellationToken) {
    let app = &context.config().app;
    let (hour, minute) = utils::parse_daily_time(&app.daily_digest_time).unwrap_or_else(|| {
        warn!(
            configured = %app.daily_digest_time,
            "invalid DAILY_DIGEST_TIME, falling back to 09:00"
        );
        (9, 0)
    });
    let offset_hours = app.timezone_offset_hours;

    info!(hour, minute, "daily digest service started");
    loop {
        let wait = utils::until_next_daily(hour, minute, offset_hours);
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(wait) => {
                context.engine().run_daily_digest().await;
            }
        }
    }
    info!("daily digest service stopped");
}
