//! The update state machine
//!
//! ```text
//! Idle ──check──► Checking ──newer──► Available ──download──► Downloading ──► Downloaded
//!   ▲                 │                   ▲                        │               │ install
//!   └──── not newer ──┘                   └──── retry ──── Error ◄─┘               ▼
//!                                                                              Installing
//! ```
//!
//! Check and download share one failure path: the error is classified,
//! recorded, and either retried after an exponential delay or surfaced as
//! terminal. Only one check and one download may be in flight; repeated
//! calls while one is pending are no-ops.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use crate::config::UpdaterConfig;
use crate::error::{ProviderError, UpdateError, UpdateResult};
use crate::state::{ErrorHistory, ErrorRecord, UpdateBackup, UpdateEvent, UpdateInfo, UpdateOperation, UpdatePhase, UpdateState};
use crate::traits::{StateStore, UpdateProvider};
use shared::{
    component_debug, component_error, component_info, component_warn, BackoffPolicy, Clock, ComponentId,
    ErrorClassifier, StatusBus, Subscription, SystemClock,
};

/// Handle of one background timer or retry
type TaskSlot = StdMutex<Option<JoinHandle<()>>>;

struct CoordinatorInner<P, S> {
    config: UpdaterConfig,
    provider: P,
    store: S,
    classifier: ErrorClassifier,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
    state: Mutex<UpdateState>,
    history: Mutex<ErrorHistory>,
    is_checking: AtomicBool,
    is_downloading: AtomicBool,
    retry_task: TaskSlot,
    check_timer: TaskSlot,
    reenable_timer: TaskSlot,
    events: StatusBus<UpdateEvent>,
}

/// Drives check, download and install against an [`UpdateProvider`]
pub struct UpdateCoordinator<P, S> {
    inner: Arc<CoordinatorInner<P, S>>,
}

impl<P, S> Clone for UpdateCoordinator<P, S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<P, S> UpdateCoordinator<P, S>
where
    P: UpdateProvider + 'static,
    S: StateStore + 'static,
{
    pub fn new(config: UpdaterConfig, provider: P, store: S) -> Self {
        Self::with_clock(config, provider, store, Arc::new(SystemClock))
    }

    pub fn with_clock(config: UpdaterConfig, provider: P, store: S, clock: Arc<dyn Clock>) -> Self {
        let state = UpdateState::new(config.current_version.clone(), config.auto_check, config.auto_download);
        Self {
            inner: Arc::new(CoordinatorInner {
                classifier: ErrorClassifier::new().with_retry_unknown(config.retry_unknown_errors),
                backoff: config.backoff(),
                history: Mutex::new(ErrorHistory::new(config.history_capacity)),
                config,
                provider,
                store,
                clock,
                state: Mutex::new(state),
                is_checking: AtomicBool::new(false),
                is_downloading: AtomicBool::new(false),
                retry_task: StdMutex::new(None),
                check_timer: StdMutex::new(None),
                reenable_timer: StdMutex::new(None),
                events: StatusBus::new(),
            }),
        }
    }

    /// Load persisted history and suspension, then start the periodic check
    ///
    /// Unreadable records are logged and ignored so a damaged state
    /// directory never blocks startup.
    pub async fn initialize(&self) {
        match self.inner.store.load_error_history().await {
            Ok(records) => {
                let history = ErrorHistory::from_records(records, self.inner.config.history_capacity);
                component_debug!(ComponentId::Updater, "Loaded {} error records", history.len());
                *self.inner.history.lock().await = history;
            }
            Err(e) => {
                component_warn!(ComponentId::Updater, "Ignoring unreadable error history: {}", e);
            }
        }

        let suspension = match self.inner.store.load_suspension().await {
            Ok(suspension) => suspension,
            Err(e) => {
                component_warn!(ComponentId::Updater, "Ignoring unreadable auto-check suspension: {}", e);
                None
            }
        };

        let now = self.inner.clock.now();
        match suspension {
            Some(until) if until > now => {
                {
                    let mut state = self.inner.state.lock().await;
                    state.auto_check_enabled = false;
                    state.auto_check_disabled_until = Some(until);
                }
                let remaining = (until - now).to_std().unwrap_or_default();
                component_info!(ComponentId::Updater, "⏸️ Automatic update checks suspended until {}", until);
                self.schedule_reenable(remaining);
            }
            Some(_) => {
                if let Err(e) = self.inner.store.save_suspension(None).await {
                    component_warn!(ComponentId::Updater, "Failed to clear expired suspension: {}", e);
                }
            }
            None => {}
        }

        if self.inner.state.lock().await.auto_check_enabled {
            self.start_check_timer();
        }
    }

    /// Subscribe to update events
    pub fn subscribe(&self) -> Subscription<UpdateEvent> {
        self.inner.events.subscribe()
    }

    /// Read-only snapshot of the update state
    pub async fn status(&self) -> UpdateState {
        self.inner.state.lock().await.clone()
    }

    /// Recorded failures, oldest first
    pub async fn error_history(&self) -> Vec<ErrorRecord> {
        self.inner.history.lock().await.to_vec()
    }

    /// Ask the provider for a newer release
    ///
    /// Returns `Ok(None)` when nothing newer exists, when another check is
    /// already in flight, or when a failure has been scheduled for retry.
    pub async fn check_for_updates(&self, is_retry: bool) -> UpdateResult<Option<UpdateInfo>> {
        if is_retry {
            self.inner.is_checking.store(true, Ordering::SeqCst);
        } else if self
            .inner
            .is_checking
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            component_debug!(ComponentId::Updater, "Update check already in progress");
            return Ok(None);
        }

        {
            let mut state = self.inner.state.lock().await;
            if matches!(
                state.phase,
                UpdatePhase::Downloading | UpdatePhase::Downloaded | UpdatePhase::Installing
            ) {
                component_debug!(ComponentId::Updater, "Skipping update check while {:?}", state.phase);
                self.inner.is_checking.store(false, Ordering::SeqCst);
                return Ok(None);
            }
            state.phase = UpdatePhase::Checking;
        }
        self.inner.events.emit(UpdateEvent::CheckingStarted);
        component_info!(ComponentId::Updater, "🔍 Checking for updates");

        match self.inner.provider.check_for_updates().await {
            Ok(offered) => {
                self.inner.is_checking.store(false, Ordering::SeqCst);
                let now = self.inner.clock.now();
                let mut state = self.inner.state.lock().await;
                let newer = offered.filter(|info| is_newer(&info.version, &state.current_version));

                state.retry_count = 0;
                state.consecutive_failures = 0;
                state.last_successful_check_at = Some(now);
                state.last_error = None;
                state.progress_percent = 0;
                match &newer {
                    Some(info) => {
                        state.phase = UpdatePhase::Available;
                        state.target_version = Some(info.version.clone());
                        state.available_update = Some(info.clone());
                    }
                    None => {
                        state.phase = UpdatePhase::Idle;
                        state.target_version = None;
                        state.available_update = None;
                    }
                }
                let current_version = state.current_version.clone();
                let auto_download = state.auto_download_enabled;
                drop(state);

                match &newer {
                    Some(info) => {
                        component_info!(
                            ComponentId::Updater,
                            "✨ Update available: {} -> {}",
                            current_version,
                            info.version
                        );
                        self.inner.events.emit(UpdateEvent::UpdateAvailable(info.clone()));
                        if auto_download {
                            self.spawn_download();
                        }
                    }
                    None => {
                        component_info!(ComponentId::Updater, "✅ {} is up to date", current_version);
                        self.inner.events.emit(UpdateEvent::UpdateNotAvailable { current_version });
                    }
                }
                Ok(newer)
            }
            Err(e) => self.handle_failure(UpdateOperation::Check, e).await.map(|()| None),
        }
    }

    /// Download the available release, streaming progress events
    pub async fn download_update(&self, is_retry: bool) -> UpdateResult<()> {
        if is_retry {
            self.inner.is_downloading.store(true, Ordering::SeqCst);
        } else if self
            .inner
            .is_downloading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            component_debug!(ComponentId::Updater, "Download already in progress");
            return Ok(());
        }

        let info = {
            let mut state = self.inner.state.lock().await;
            // A retry resumes from the failure left by the previous attempt
            if is_retry && state.phase == UpdatePhase::Error && state.available_update.is_some() {
                state.phase = UpdatePhase::Available;
            }
            let available = match (&state.phase, &state.available_update) {
                (UpdatePhase::Available, Some(info)) => Some(info.clone()),
                _ => None,
            };
            let Some(info) = available else {
                self.inner.is_downloading.store(false, Ordering::SeqCst);
                return Err(UpdateError::InvalidPhase {
                    operation: UpdateOperation::Download,
                    phase: state.phase,
                });
            };
            state.phase = UpdatePhase::Downloading;
            state.progress_percent = 0;
            info
        };
        component_info!(ComponentId::Updater, "⬇️ Downloading {}", info.version);

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let download = self.inner.provider.download_update(&info, progress_tx);
        let progress = async {
            while let Some(percent) = progress_rx.recv().await {
                self.record_progress(percent).await;
            }
        };
        let (result, ()) = tokio::join!(download, progress);

        match result {
            Ok(()) => {
                self.record_progress(100).await;
                {
                    let mut state = self.inner.state.lock().await;
                    state.phase = UpdatePhase::Downloaded;
                    state.retry_count = 0;
                    state.consecutive_failures = 0;
                    state.last_error = None;
                }
                self.inner.is_downloading.store(false, Ordering::SeqCst);
                self.inner.events.emit(UpdateEvent::UpdateDownloaded { version: info.version.clone() });
                component_info!(ComponentId::Updater, "✅ Update {} downloaded", info.version);
                Ok(())
            }
            Err(e) => self.handle_failure(UpdateOperation::Download, e).await,
        }
    }

    /// Record a backup, then hand over to the provider's installer
    ///
    /// If the provider fails before the process exits, the bookkeeping is
    /// rolled back and the error says which version remains installed.
    pub async fn install_update(&self) -> UpdateResult<()> {
        let backup = {
            let state = self.inner.state.lock().await;
            let target = match (state.phase, &state.target_version) {
                (UpdatePhase::Downloaded, Some(target)) => target.clone(),
                (phase, _) => {
                    return Err(UpdateError::InvalidPhase {
                        operation: UpdateOperation::Install,
                        phase,
                    })
                }
            };
            UpdateBackup {
                previous_version: state.current_version.clone(),
                target_version: target,
                timestamp: self.inner.clock.now(),
            }
        };

        if let Err(e) = self.inner.store.save_backup(&backup).await {
            component_error!(ComponentId::Updater, "❌ Could not record update backup, not installing: {}", e);
            return Err(e.into());
        }

        self.inner.state.lock().await.phase = UpdatePhase::Installing;
        self.inner.events.emit(UpdateEvent::Installing {
            version: backup.target_version.clone(),
        });
        component_info!(
            ComponentId::Updater,
            "🔧 Installing {} over {}",
            backup.target_version,
            backup.previous_version
        );

        match self.inner.provider.quit_and_install().await {
            Ok(()) => Ok(()),
            Err(e) => self.rollback(e).await,
        }
    }

    /// Enable or disable the periodic check; enabling clears any suspension
    pub async fn set_auto_check(&self, enabled: bool) {
        let had_suspension = {
            let mut state = self.inner.state.lock().await;
            state.auto_check_enabled = enabled;
            if enabled {
                state.auto_check_disabled_until.take().is_some()
            } else {
                false
            }
        };

        if enabled {
            abort_slot(&self.inner.reenable_timer);
            if had_suspension {
                self.clear_persisted_suspension().await;
            }
            self.start_check_timer();
            component_info!(ComponentId::Updater, "Automatic update checks enabled");
        } else {
            abort_slot(&self.inner.check_timer);
            component_info!(ComponentId::Updater, "Automatic update checks disabled");
        }
    }

    pub async fn set_auto_download(&self, enabled: bool) {
        self.inner.state.lock().await.auto_download_enabled = enabled;
    }

    /// Drop a pending retry and forget the in-flight operation it belonged to
    ///
    /// A retry that was already running is interrupted, and the phase it
    /// left behind falls back to where a fresh check or download can start.
    pub async fn cancel_retry(&self) {
        let pending = lock_slot(&self.inner.retry_task).take();
        let interrupted = match pending {
            Some(task) if !task.is_finished() => {
                task.abort();
                // Wait for the task to be dropped so it cannot touch the state afterwards
                let _ = task.await;
                component_debug!(ComponentId::Updater, "Pending retry cancelled");
                true
            }
            _ => false,
        };
        self.inner.is_checking.store(false, Ordering::SeqCst);
        self.inner.is_downloading.store(false, Ordering::SeqCst);

        let mut state = self.inner.state.lock().await;
        state.retry_count = 0;
        if interrupted && matches!(state.phase, UpdatePhase::Checking | UpdatePhase::Downloading) {
            state.progress_percent = 0;
            state.phase = if state.available_update.is_some() {
                UpdatePhase::Available
            } else {
                UpdatePhase::Idle
            };
        }
    }

    /// Cancel every timer owned by the coordinator
    pub async fn shutdown(&self) {
        abort_slot(&self.inner.check_timer);
        abort_slot(&self.inner.reenable_timer);
        self.cancel_retry().await;
        component_debug!(ComponentId::Updater, "Update timers cancelled");
    }

    /// Shared failure path of check and download
    async fn handle_failure(&self, operation: UpdateOperation, error: ProviderError) -> UpdateResult<()> {
        let classification = self.inner.classifier.classify(&error);
        let message = error.to_string();
        let max_retries = self.inner.config.max_retries;

        let (retry_count, consecutive_failures) = {
            let mut state = self.inner.state.lock().await;
            state.consecutive_failures += 1;
            state.phase = UpdatePhase::Error;
            state.last_error = Some(message.clone());
            (state.retry_count, state.consecutive_failures)
        };

        self.record_error(ErrorRecord {
            timestamp: self.inner.clock.now(),
            operation,
            message: message.clone(),
            category: classification.category,
            retry_count_at_failure: retry_count,
        })
        .await;

        if classification.retryable && retry_count < max_retries {
            let attempt = retry_count + 1;
            self.inner.state.lock().await.retry_count = attempt;
            let delay = self.inner.backoff.delay_for(attempt);

            self.inner.events.emit(UpdateEvent::Error {
                operation,
                message: message.clone(),
                category: classification.category,
                terminal: false,
            });
            self.inner.events.emit(UpdateEvent::Retrying {
                operation,
                attempt,
                delay_ms: delay.as_millis() as u64,
            });
            component_warn!(
                ComponentId::Updater,
                category = %classification.category,
                "🔄 Update {} failed, retry {}/{} in {:?}: {}",
                operation,
                attempt,
                max_retries,
                delay,
                message
            );
            self.schedule_retry(operation, delay);
            return Ok(());
        }

        self.inner.state.lock().await.retry_count = 0;
        match operation {
            UpdateOperation::Download => self.inner.is_downloading.store(false, Ordering::SeqCst),
            _ => self.inner.is_checking.store(false, Ordering::SeqCst),
        }
        self.inner.events.emit(UpdateEvent::Error {
            operation,
            message: message.clone(),
            category: classification.category,
            terminal: true,
        });
        component_error!(
            ComponentId::Updater,
            category = %classification.category,
            retryable = classification.retryable,
            "❌ Update {} failed: {}",
            operation,
            message
        );

        if consecutive_failures >= self.inner.config.failure_threshold {
            self.suspend_auto_check(consecutive_failures).await;
        }

        Err(match operation {
            UpdateOperation::Download => UpdateError::UpdateDownloadError {
                message,
                category: classification.category,
            },
            _ => UpdateError::UpdateCheckError {
                message,
                category: classification.category,
            },
        })
    }

    async fn rollback(&self, error: ProviderError) -> UpdateResult<()> {
        let classification = self.inner.classifier.classify(&error);
        let message = error.to_string();
        component_error!(ComponentId::Updater, "❌ Install failed: {}", message);

        self.record_error(ErrorRecord {
            timestamp: self.inner.clock.now(),
            operation: UpdateOperation::Install,
            message: message.clone(),
            category: classification.category,
            retry_count_at_failure: 0,
        })
        .await;

        let backup = match self.inner.store.load_backup().await {
            Ok(Some(backup)) => backup,
            Ok(None) => return Err(self.rollback_failed("no update backup recorded".to_string()).await),
            Err(e) => return Err(self.rollback_failed(format!("could not read update backup: {e}")).await),
        };

        if let Err(e) = self.inner.provider.discard_staged_update().await {
            component_warn!(ComponentId::Updater, "Could not discard staged update: {}", e);
        }

        {
            let mut state = self.inner.state.lock().await;
            state.phase = UpdatePhase::Error;
            state.target_version = Some(backup.previous_version.clone());
            state.available_update = None;
            state.progress_percent = 0;
            state.last_error = Some(message.clone());
        }

        self.record_error(ErrorRecord {
            timestamp: self.inner.clock.now(),
            operation: UpdateOperation::Rollback,
            message: format!(
                "install of {} failed, remaining on {}: {}",
                backup.target_version, backup.previous_version, message
            ),
            category: classification.category,
            retry_count_at_failure: 0,
        })
        .await;

        self.inner.events.emit(UpdateEvent::Error {
            operation: UpdateOperation::Install,
            message: message.clone(),
            category: classification.category,
            terminal: true,
        });
        self.inner.events.emit(UpdateEvent::RolledBack {
            version: backup.previous_version.clone(),
        });
        component_warn!(ComponentId::Updater, "↩️ Rolled back; remaining on {}", backup.previous_version);

        Err(UpdateError::UpdateInstallError {
            message,
            rolled_back_to: backup.previous_version,
        })
    }

    async fn rollback_failed(&self, message: String) -> UpdateError {
        {
            let mut state = self.inner.state.lock().await;
            state.phase = UpdatePhase::Error;
            state.last_error = Some(message.clone());
        }
        component_error!(ComponentId::Updater, "❌ Rollback failed: {}", message);
        UpdateError::RollbackError { message }
    }

    async fn record_progress(&self, percent: u8) {
        let percent = percent.min(100);
        let mut state = self.inner.state.lock().await;
        if percent > state.progress_percent {
            state.progress_percent = percent;
            drop(state);
            self.inner.events.emit(UpdateEvent::DownloadProgress { percent });
        }
    }

    async fn record_error(&self, record: ErrorRecord) {
        let records = {
            let mut history = self.inner.history.lock().await;
            history.push(record);
            history.to_vec()
        };
        if let Err(e) = self.inner.store.save_error_history(records).await {
            component_warn!(ComponentId::Updater, "Failed to persist error history: {}", e);
        }
    }

    async fn suspend_auto_check(&self, consecutive_failures: u32) {
        let suspension = self.inner.config.suspension;
        let until = deadline_after(self.inner.clock.now(), suspension);
        {
            let mut state = self.inner.state.lock().await;
            // Turned off by the user; nothing to re-enable later
            if !state.auto_check_enabled && state.auto_check_disabled_until.is_none() {
                return;
            }
            state.auto_check_enabled = false;
            state.auto_check_disabled_until = Some(until);
        }
        abort_slot(&self.inner.check_timer);

        if let Err(e) = self.inner.store.save_suspension(Some(until)).await {
            component_warn!(ComponentId::Updater, "Failed to persist auto-check suspension: {}", e);
        }
        self.inner.events.emit(UpdateEvent::AutoCheckDisabled { until });
        component_warn!(
            ComponentId::Updater,
            "⏸️ {} consecutive failures, automatic update checks suspended until {}",
            consecutive_failures,
            until
        );
        self.schedule_reenable(suspension);
    }

    async fn reenable_auto_check(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.auto_check_enabled = true;
            state.auto_check_disabled_until = None;
        }
        self.clear_persisted_suspension().await;
        self.start_check_timer();
        self.inner.events.emit(UpdateEvent::AutoCheckReenabled);
        component_info!(ComponentId::Updater, "▶️ Automatic update checks re-enabled");
    }

    async fn clear_persisted_suspension(&self) {
        if let Err(e) = self.inner.store.save_suspension(None).await {
            component_warn!(ComponentId::Updater, "Failed to clear auto-check suspension: {}", e);
        }
    }

    fn schedule_retry(&self, operation: UpdateOperation, delay: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            sleep(delay).await;
            let Some(coordinator) = Self::upgrade(&weak) else {
                return;
            };
            let result = match operation {
                UpdateOperation::Download => coordinator.download_update(true).await,
                _ => coordinator.check_for_updates(true).await.map(|_| ()),
            };
            if let Err(e) = result {
                component_debug!(ComponentId::Updater, "Retried {} ended with: {}", operation, e);
            }
        });
        // The previous handle may belong to the task running this retry, so it is detached rather than aborted
        *lock_slot(&self.inner.retry_task) = Some(task);
    }

    fn schedule_reenable(&self, after: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            sleep(after).await;
            if let Some(coordinator) = Self::upgrade(&weak) {
                coordinator.reenable_auto_check().await;
            }
        });
        replace_slot(&self.inner.reenable_timer, task);
    }

    fn start_check_timer(&self) {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.check_interval;
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(coordinator) = Self::upgrade(&weak) else {
                    break;
                };
                if !coordinator.inner.state.lock().await.auto_check_enabled {
                    continue;
                }
                if let Err(e) = coordinator.check_for_updates(false).await {
                    component_debug!(ComponentId::Updater, "Scheduled update check ended with: {}", e);
                }
            }
        });
        replace_slot(&self.inner.check_timer, task);
    }

    fn spawn_download(&self) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.download_update(false).await {
                component_debug!(ComponentId::Updater, "Automatic download ended with: {}", e);
            }
        });
    }

    fn upgrade(weak: &Weak<CoordinatorInner<P, S>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }
}

fn lock_slot(slot: &TaskSlot) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Abort the task in `slot`, if any
fn abort_slot(slot: &TaskSlot) {
    if let Some(task) = lock_slot(slot).take() {
        task.abort();
    }
}

fn replace_slot(slot: &TaskSlot, task: JoinHandle<()>) {
    if let Some(previous) = lock_slot(slot).replace(task) {
        previous.abort();
    }
}

/// `now + after`, saturating at the latest representable instant
fn deadline_after(now: DateTime<Utc>, after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|after| now.checked_add_signed(after))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whether `candidate` should replace `current`
///
/// Semantic versions are compared properly; anything unparsable counts as
/// newer whenever it differs.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    let parse = |v: &str| semver::Version::parse(v.trim().trim_start_matches('v'));
    match (parse(candidate), parse(current)) {
        (Ok(candidate), Ok(current)) => candidate > current,
        _ => candidate.trim() != current.trim(),
    }
}
