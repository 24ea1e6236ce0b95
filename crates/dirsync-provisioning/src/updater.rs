//! Group mapping updater
//!
//! Background loop that waits for the target directory to come up and then
//! runs a reconciliation cycle at a fixed interval, measured from the end
//! of the previous cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use dirsync_connector::config::Configuration;
use dirsync_connector::error::ConnectorResult;
use dirsync_connector::traits::TargetDirectory;

use crate::mapping::MappingRegistry;
use crate::reconcile::{reconcile_units, CycleReport, ReconcileError};

/// Credential given to created users when none is configured.
///
/// Known-insecure; its use is reported on the `security` log target.
pub const INSECURE_PLACEHOLDER_PASSWORD: &str = "password";

fn default_interval_secs() -> u64 {
    300
}

fn default_readiness_poll_ms() -> u64 {
    1000
}

/// Updater configuration.
#[derive(Clone)]
pub struct UpdaterConfig {
    /// Pause between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// How often readiness of the target is polled before the first cycle.
    pub readiness_poll: Duration,
    /// Initial credential for created users.
    pub user_credential: String,
}

impl std::fmt::Debug for UpdaterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdaterConfig")
            .field("interval", &self.interval)
            .field("readiness_poll", &self.readiness_poll)
            .field("insecure_credential", &self.is_insecure_credential())
            .finish_non_exhaustive()
    }
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(default_interval_secs()),
            readiness_poll: Duration::from_millis(default_readiness_poll_ms()),
            user_credential: INSECURE_PLACEHOLDER_PASSWORD.to_string(),
        }
    }
}

impl UpdaterConfig {
    /// Read `updater.*` keys.
    pub fn from_configuration(config: &Configuration) -> ConnectorResult<Self> {
        let credential = config.get_password("updater.user.password")?;
        Ok(Self {
            interval: Duration::from_secs(
                config.get_u64("updater.interval.secs", default_interval_secs())?,
            ),
            readiness_poll: Duration::from_millis(
                config.get_u64("updater.readiness.poll.ms", default_readiness_poll_ms())?,
            ),
            user_credential: if credential.is_empty() {
                INSECURE_PLACEHOLDER_PASSWORD.to_string()
            } else {
                credential
            },
        })
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_readiness_poll(mut self, poll: Duration) -> Self {
        self.readiness_poll = poll;
        self
    }

    #[must_use]
    pub fn with_user_credential(mut self, credential: impl Into<String>) -> Self {
        self.user_credential = credential.into();
        self
    }

    /// Whether created users get the known-insecure placeholder.
    #[must_use]
    pub fn is_insecure_credential(&self) -> bool {
        self.user_credential == INSECURE_PLACEHOLDER_PASSWORD
    }
}

/// Lifecycle state of the background loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdaterState {
    Stopped,
    Running,
    Stopping,
}

struct Shared {
    mappings: Arc<MappingRegistry>,
    target: Arc<dyn TargetDirectory>,
    config: UpdaterConfig,
    cycle_lock: Mutex<()>,
    last_report: RwLock<Option<CycleReport>>,
    cycles_completed: AtomicU64,
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the background reconciliation loop.
pub struct GroupMappingUpdater {
    shared: Arc<Shared>,
    control: Mutex<Option<RunningLoop>>,
    state: Arc<RwLock<UpdaterState>>,
    /// Cancels ad hoc cycles started by `run_once`; replaced on every `stop`.
    adhoc_cancel: std::sync::Mutex<CancellationToken>,
}

impl GroupMappingUpdater {
    pub fn new(
        mappings: Arc<MappingRegistry>,
        target: Arc<dyn TargetDirectory>,
        config: UpdaterConfig,
    ) -> Self {
        if config.is_insecure_credential() {
            warn!(
                target: "security",
                "updater.user.password is not set: created users get the insecure placeholder credential"
            );
        }

        Self {
            shared: Arc::new(Shared {
                mappings,
                target,
                config,
                cycle_lock: Mutex::new(()),
                last_report: RwLock::new(None),
                cycles_completed: AtomicU64::new(0),
            }),
            control: Mutex::new(None),
            state: Arc::new(RwLock::new(UpdaterState::Stopped)),
            adhoc_cancel: std::sync::Mutex::new(CancellationToken::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &UpdaterConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn mappings(&self) -> &Arc<MappingRegistry> {
        &self.shared.mappings
    }

    #[must_use]
    pub fn state(&self) -> UpdaterState {
        *self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn set_state(&self, state: UpdaterState) {
        set_state(&self.state, state);
    }

    /// Most recent cycle report.
    #[must_use]
    pub fn last_report(&self) -> Option<CycleReport> {
        self.shared
            .last_report
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Cycles completed since construction.
    #[must_use]
    pub fn cycles_completed(&self) -> u64 {
        self.shared.cycles_completed.load(Ordering::SeqCst)
    }

    /// Start the background loop. Returns `false` if it is already running.
    pub async fn start(&self) -> bool {
        let mut control = self.control.lock().await;
        if let Some(running) = control.as_ref() {
            if !running.handle.is_finished() {
                debug!("Group mapping updater already running");
                return false;
            }
        }

        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let state = Arc::clone(&self.state);
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            run_loop(&shared, &loop_cancel).await;
            set_state(&state, UpdaterState::Stopped);
        });

        *control = Some(RunningLoop { cancel, handle });
        self.set_state(UpdaterState::Running);
        info!(
            interval_secs = self.shared.config.interval.as_secs(),
            "Group mapping updater started"
        );
        true
    }

    /// Stop the loop and wait until it has halted. A cycle in progress,
    /// scheduled or ad hoc, finishes its current group first.
    pub async fn stop(&self) {
        let adhoc = std::mem::replace(
            &mut *self
                .adhoc_cancel
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
            CancellationToken::new(),
        );
        adhoc.cancel();

        let mut control = self.control.lock().await;
        let Some(running) = control.take() else {
            return;
        };

        self.set_state(UpdaterState::Stopping);
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            warn!(error = %e, "Group mapping updater task ended abnormally");
        }
        self.set_state(UpdaterState::Stopped);
        info!("Group mapping updater stopped");
    }

    /// Run one cycle now, outside the schedule. A concurrent [`stop`](Self::stop)
    /// cuts it short between groups.
    pub async fn run_once(&self) -> Result<CycleReport, ReconcileError> {
        let cancel = self
            .adhoc_cancel
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        run_cycle(&self.shared, &cancel).await
    }
}

impl Drop for GroupMappingUpdater {
    fn drop(&mut self) {
        if let Ok(mut control) = self.control.try_lock() {
            if let Some(running) = control.take() {
                running.cancel.cancel();
            }
        }
    }
}

fn set_state(slot: &RwLock<UpdaterState>, state: UpdaterState) {
    *slot
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner) = state;
}

async fn run_loop(shared: &Shared, cancel: &CancellationToken) {
    if !wait_until_ready(shared, cancel).await {
        debug!("Stopped before the target directory became ready");
        return;
    }

    loop {
        match run_cycle(shared, cancel).await {
            Ok(_) => {}
            Err(ReconcileError::CycleInProgress) => {
                debug!("Skipping scheduled cycle, another cycle is running");
            }
            Err(e) => warn!(error = %e, "Reconciliation cycle failed"),
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(shared.config.interval) => {}
        }
    }
}

/// Poll `is_started` until true. Returns `false` when cancelled first.
async fn wait_until_ready(shared: &Shared, cancel: &CancellationToken) -> bool {
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        if shared.target.is_started().await {
            return true;
        }
        debug!(
            poll_ms = shared.config.readiness_poll.as_millis() as u64,
            "Target directory not started yet"
        );
        tokio::select! {
            () = cancel.cancelled() => return false,
            () = tokio::time::sleep(shared.config.readiness_poll) => {}
        }
    }
}

#[instrument(skip_all)]
async fn run_cycle(
    shared: &Shared,
    cancel: &CancellationToken,
) -> Result<CycleReport, ReconcileError> {
    let _guard = shared
        .cycle_lock
        .try_lock()
        .map_err(|_| ReconcileError::CycleInProgress)?;

    let snapshot = shared.mappings.snapshot();
    let report = reconcile_units(
        &snapshot,
        shared.target.as_ref(),
        &shared.config.user_credential,
        cancel,
    )
    .await;

    info!(
        cycle_id = %report.cycle_id,
        providers = report.providers,
        groups_processed = report.groups_processed,
        groups_created = report.groups_created,
        users_created = report.users_created,
        memberships_added = report.memberships_added,
        empty_resolutions = report.empty_resolutions,
        write_failures = report.write_failures,
        cancelled = report.cancelled,
        duration_ms = report.duration_ms(),
        "Reconciliation cycle finished"
    );

    shared.cycles_completed.fetch_add(1, Ordering::SeqCst);
    *shared
        .last_report
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(report.clone());
    Ok(report)
}
