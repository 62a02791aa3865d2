// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Scan job registry
//!
//! Every accepted scan request becomes a [`JobInfo`] in the device's
//! [`JobTable`]. The table owns the scan engine's [`ScanJob`] and drops it
//! (disposing it) when a background sweep finds the job finished or abandoned.

use crate::settings::ScanSettings;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Status transitions reported by a scan job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    /// The device finished with the job's pages and can accept a new job
    DeviceIdle,
    /// The job was cancelled
    CancelJob,
    /// The job failed (e.g. scanner hardware error)
    AbortJob,
}

/// Callback a job invokes on every status transition
pub type StatusCallback = Box<dyn Fn(StatusTransition) + Send + Sync>;

/// Scan engine side of a job
///
/// Dropping the job disposes it.
#[async_trait]
pub trait ScanJob: Send + Sync {
    /// Request cancellation
    fn cancel(&self);

    /// Wait until the next document is available; `false` when there are no more
    async fn wait_for_next_document(&self) -> bool;

    /// Write the current document
    async fn write_document_to(
        &self,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> std::io::Result<()>;

    /// Write a progress report
    async fn write_progress_to(
        &self,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> std::io::Result<()>;

    /// Register the single status callback of this job
    fn register_status_transition(&self, callback: StatusCallback);
}

/// Creates scan jobs for a device
#[async_trait]
pub trait ScanJobFactory: Send + Sync {
    /// Start scanning with the given settings
    async fn create_job(&self, settings: &ScanSettings) -> anyhow::Result<Box<dyn ScanJob>>;
}

/// Job state as reported in `pwg:JobState`
///
/// There is no completed state: a job that finishes normally stays
/// `Processing` and is evicted by the idle timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Processing,
    Canceled,
    Aborted,
}

impl JobState {
    /// Whether no further transition is possible
    pub const fn is_terminal(self) -> bool {
        matches!(self, JobState::Canceled | JobState::Aborted)
    }

    /// eSCL name of the state
    pub const fn as_str(self) -> &'static str {
        match self {
            JobState::Processing => "Processing",
            JobState::Canceled => "Canceled",
            JobState::Aborted => "Aborted",
        }
    }
}

/// Job table cleanup timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobCleanupConfig {
    /// Sweep interval
    pub interval: Duration,
    /// How long a cancelled or aborted job stays visible after its last update
    pub terminal_grace: Duration,
    /// How long a non-terminal job may go without updates before it is evicted
    pub idle_timeout: Duration,
}

impl Default for JobCleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            terminal_grace: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

struct JobStatus {
    state: JobState,
    last_updated: Instant,
    /// Whether the engine has reported the device idle for this job
    device_released: bool,
}

/// One tracked scan job
pub struct JobInfo {
    id: Uuid,
    settings: ScanSettings,
    status: Mutex<JobStatus>,
    job: Box<dyn ScanJob>,
}

impl JobInfo {
    /// Job identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Settings the job was created with
    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Current state
    pub fn state(&self) -> JobState {
        self.status.lock().state
    }

    /// Time of the last state transition or access
    pub fn last_updated(&self) -> Instant {
        self.status.lock().last_updated
    }

    /// The scan engine job
    pub fn job(&self) -> &dyn ScanJob {
        self.job.as_ref()
    }

    /// Move to `state`; terminal states are final
    pub fn transition(&self, state: JobState) {
        let mut status = self.status.lock();
        if status.state.is_terminal() {
            return;
        }
        status.state = state;
        status.last_updated = Instant::now();
    }

    /// Record client activity on the job
    pub fn touch(&self) {
        self.status.lock().last_updated = Instant::now();
    }

    fn release_device(&self) {
        let mut status = self.status.lock();
        status.device_released = true;
        status.last_updated = Instant::now();
    }

    fn has_released_device(&self) -> bool {
        self.status.lock().device_released
    }

    fn is_eligible_for_cleanup(&self, now: Instant, config: &JobCleanupConfig) -> bool {
        let status = self.status.lock();
        let idle = now.saturating_duration_since(status.last_updated);
        if status.state.is_terminal() {
            idle >= config.terminal_grace
        } else {
            idle >= config.idle_timeout
        }
    }
}

impl fmt::Debug for JobInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobInfo")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct TableState {
    jobs: HashMap<Uuid, Arc<JobInfo>>,
    is_processing: bool,
    cleanup_task: Option<JoinHandle<()>>,
}

struct JobTableInner {
    config: JobCleanupConfig,
    state: Mutex<TableState>,
}

/// Per-device job registry
///
/// All mutation, including the cleanup sweep, happens under one lock that is
/// held only for bookkeeping. The cleanup timer runs only while the table is
/// non-empty. Cloning yields another handle to the same table.
#[derive(Clone)]
pub struct JobTable {
    inner: Arc<JobTableInner>,
}

impl JobTable {
    /// Create an empty table
    pub fn new(config: JobCleanupConfig) -> Self {
        Self {
            inner: Arc::new(JobTableInner {
                config,
                state: Mutex::new(TableState::default()),
            }),
        }
    }

    /// Track a new job in the `Processing` state
    ///
    /// Registers the job's status callback and starts the cleanup timer if it
    /// is not running. Must be called from within a tokio runtime.
    pub fn add_job(&self, settings: ScanSettings, job: Box<dyn ScanJob>) -> Arc<JobInfo> {
        let info = Arc::new(JobInfo {
            id: Uuid::new_v4(),
            settings,
            status: Mutex::new(JobStatus {
                state: JobState::Processing,
                last_updated: Instant::now(),
                device_released: false,
            }),
            job,
        });

        let weak_job = Arc::downgrade(&info);
        let weak_table = Arc::downgrade(&self.inner);
        info.job
            .register_status_transition(Box::new(move |transition| {
                handle_transition(&weak_table, &weak_job, transition);
            }));

        let mut state = self.inner.state.lock();
        state.jobs.insert(info.id, Arc::clone(&info));
        if state.cleanup_task.is_none() {
            state.cleanup_task = Some(spawn_cleanup(&self.inner));
        }
        debug!(job = %info.id, "Added scan job");
        info
    }

    /// Look up a job by identifier
    pub fn try_get_job(&self, id: Uuid) -> Option<Arc<JobInfo>> {
        self.inner.state.lock().jobs.get(&id).cloned()
    }

    /// Snapshot of all tracked jobs
    pub fn jobs(&self) -> Vec<Arc<JobInfo>> {
        self.inner.state.lock().jobs.values().cloned().collect()
    }

    /// Number of tracked jobs
    pub fn len(&self) -> usize {
        self.inner.state.lock().jobs.len()
    }

    /// Whether no job is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the device is busy with a job
    pub fn is_processing(&self) -> bool {
        self.inner.state.lock().is_processing
    }

    /// Mark the device busy; `false` if it already was
    pub fn try_begin_processing(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.is_processing {
            return false;
        }
        state.is_processing = true;
        true
    }

    /// Mark the device idle
    pub fn end_processing(&self) {
        self.inner.state.lock().is_processing = false;
    }

    /// Whether the cleanup timer is running
    pub fn is_cleanup_running(&self) -> bool {
        self.inner.state.lock().cleanup_task.is_some()
    }

    /// Drop every job and stop the cleanup timer
    pub fn clear(&self) {
        let removed: Vec<Arc<JobInfo>> = {
            let mut state = self.inner.state.lock();
            if let Some(task) = state.cleanup_task.take() {
                task.abort();
            }
            state.is_processing = false;
            state.jobs.drain().map(|(_, job)| job).collect()
        };
        debug!(count = removed.len(), "Cleared scan jobs");
        // Disposed outside the lock
        drop(removed);
    }
}

impl fmt::Debug for JobTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobTable")
            .field("jobs", &self.len())
            .field("is_processing", &self.is_processing())
            .finish()
    }
}

impl JobTableInner {
    /// Evict eligible jobs; returns whether the timer should keep running
    fn sweep(&self) -> bool {
        let now = Instant::now();
        let (removed, keep_running) = {
            let mut state = self.state.lock();
            let eligible: Vec<Uuid> = state
                .jobs
                .values()
                .filter(|job| job.is_eligible_for_cleanup(now, &self.config))
                .map(|job| job.id)
                .collect();
            let removed: Vec<Arc<JobInfo>> = eligible
                .iter()
                .filter_map(|id| state.jobs.remove(id))
                .collect();

            // An evicted job can no longer report the device idle
            if let Some(job) = removed.iter().find(|job| !job.has_released_device()) {
                if state.is_processing {
                    warn!(job = %job.id, "Evicted a job that never went idle; releasing device");
                    state.is_processing = false;
                }
            }

            let keep_running = !state.jobs.is_empty();
            if !keep_running {
                state.cleanup_task = None;
            }
            (removed, keep_running)
        };

        for job in &removed {
            debug!(job = %job.id, state = job.state().as_str(), "Evicted scan job");
        }
        keep_running
    }
}

fn spawn_cleanup(inner: &Arc<JobTableInner>) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    let period = inner.config.interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            interval.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            trace!("Running job cleanup sweep");
            if !inner.sweep() {
                break;
            }
        }
    })
}

fn handle_transition(
    table: &Weak<JobTableInner>,
    job: &Weak<JobInfo>,
    transition: StatusTransition,
) {
    let job = job.upgrade();
    match transition {
        StatusTransition::DeviceIdle => {
            if let Some(table) = table.upgrade() {
                table.state.lock().is_processing = false;
            }
            if let Some(job) = &job {
                job.release_device();
            }
        }
        StatusTransition::CancelJob => {
            if let Some(job) = &job {
                job.transition(JobState::Canceled);
            }
        }
        StatusTransition::AbortJob => {
            if let Some(job) = &job {
                job.transition(JobState::Aborted);
            }
        }
    }
    if let Some(job) = job {
        debug!(job = %job.id, ?transition, state = job.state().as_str(), "Job status transition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type SharedCallback = Arc<Mutex<Option<StatusCallback>>>;

    struct FakeJob {
        callback: SharedCallback,
        drops: Arc<AtomicUsize>,
    }

    impl FakeJob {
        fn new(drops: &Arc<AtomicUsize>) -> Box<Self> {
            Self::with_trigger(drops).0
        }

        fn with_trigger(drops: &Arc<AtomicUsize>) -> (Box<Self>, SharedCallback) {
            let callback = SharedCallback::default();
            let job = Box::new(Self {
                callback: Arc::clone(&callback),
                drops: Arc::clone(drops),
            });
            (job, callback)
        }

        fn fire(&self, transition: StatusTransition) {
            fire(&self.callback, transition);
        }
    }

    fn fire(callback: &SharedCallback, transition: StatusTransition) {
        if let Some(callback) = callback.lock().as_ref() {
            callback(transition);
        }
    }

    #[async_trait]
    impl ScanJob for FakeJob {
        fn cancel(&self) {
            self.fire(StatusTransition::CancelJob);
        }

        async fn wait_for_next_document(&self) -> bool {
            false
        }

        async fn write_document_to(
            &self,
            _out: &mut (dyn AsyncWrite + Send + Unpin),
        ) -> std::io::Result<()> {
            Ok(())
        }

        async fn write_progress_to(
            &self,
            _out: &mut (dyn AsyncWrite + Send + Unpin),
        ) -> std::io::Result<()> {
            Ok(())
        }

        fn register_status_transition(&self, callback: StatusCallback) {
            *self.callback.lock() = Some(callback);
        }
    }

    impl Drop for FakeJob {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fake_job(table: &JobTable, drops: &Arc<AtomicUsize>) -> Arc<JobInfo> {
        table.add_job(ScanSettings::default(), FakeJob::new(drops))
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_and_get() {
        let table = JobTable::new(JobCleanupConfig::default());
        let drops = Arc::new(AtomicUsize::new(0));
        let job = fake_job(&table, &drops);

        let found = table.try_get_job(job.id()).unwrap();
        assert!(Arc::ptr_eq(&found, &job));
        assert_eq!(found.state(), JobState::Processing);
        assert!(table.try_get_job(Uuid::new_v4()).is_none());
        assert!(table.is_cleanup_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_transition() {
        let table = JobTable::new(JobCleanupConfig::default());
        let drops = Arc::new(AtomicUsize::new(0));
        let job = fake_job(&table, &drops);

        job.job().cancel();
        assert_eq!(job.state(), JobState::Canceled);

        // Terminal states are final
        job.transition(JobState::Aborted);
        assert_eq!(job.state(), JobState::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_canceled_job_evicted_and_disposed_once() {
        let table = JobTable::new(JobCleanupConfig::default());
        let drops = Arc::new(AtomicUsize::new(0));
        let id = {
            let job = fake_job(&table, &drops);
            job.job().cancel();
            job.id()
        };

        tokio::time::sleep(Duration::from_secs(25)).await;

        assert!(table.try_get_job(id).is_none());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(!table.is_cleanup_running());

        // Further sweeps never dispose again
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_job_kept_until_idle_timeout() {
        let config = JobCleanupConfig::default();
        let table = JobTable::new(config);
        let drops = Arc::new(AtomicUsize::new(0));
        let id = fake_job(&table, &drops).id();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(table.try_get_job(id).is_some());

        tokio::time::sleep(config.idle_timeout).await;
        assert!(table.try_get_job(id).is_none());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_restarts_after_table_drains() {
        let table = JobTable::new(JobCleanupConfig::default());
        let drops = Arc::new(AtomicUsize::new(0));
        fake_job(&table, &drops).job().cancel();

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(table.is_empty());
        assert!(!table.is_cleanup_running());

        let job = fake_job(&table, &drops);
        assert!(table.is_cleanup_running());
        job.job().cancel();
        let id = job.id();
        drop(job);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(table.try_get_job(id).is_none());
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_idle_clears_processing_flag() {
        let table = JobTable::new(JobCleanupConfig::default());
        let drops = Arc::new(AtomicUsize::new(0));

        assert!(table.try_begin_processing());
        assert!(!table.try_begin_processing());

        let (job, trigger) = FakeJob::with_trigger(&drops);
        let info = table.add_job(ScanSettings::default(), job);
        assert!(table.is_processing());

        fire(&trigger, StatusTransition::DeviceIdle);
        assert!(!table.is_processing());
        assert_eq!(info.state(), JobState::Processing);

        fire(&trigger, StatusTransition::AbortJob);
        assert_eq!(info.state(), JobState::Aborted);
    }

    /// A job whose engine never reports idle must not keep the device busy
    /// after it is evicted
    #[tokio::test(start_paused = true)]
    async fn test_evicting_silent_job_releases_device() {
        let table = JobTable::new(JobCleanupConfig::default());
        let drops = Arc::new(AtomicUsize::new(0));

        assert!(table.try_begin_processing());
        let id = fake_job(&table, &drops).id();

        tokio::time::sleep(Duration::from_secs(400)).await;

        assert!(table.try_get_job(id).is_none(), "silent job should be evicted");
        assert!(!table.is_processing(), "device should be released");
        assert!(table.try_begin_processing(), "device should admit a new job");
    }

    /// Evicting a job that already went idle leaves a newer job's claim alone
    #[tokio::test(start_paused = true)]
    async fn test_evicting_idle_job_keeps_current_claim() {
        let table = JobTable::new(JobCleanupConfig::default());
        let drops = Arc::new(AtomicUsize::new(0));

        assert!(table.try_begin_processing());
        let (job, trigger) = FakeJob::with_trigger(&drops);
        let old = table.add_job(ScanSettings::default(), job).id();
        fire(&trigger, StatusTransition::CancelJob);
        fire(&trigger, StatusTransition::DeviceIdle);

        // The next job claims the device
        assert!(table.try_begin_processing());
        let (job, _trigger) = FakeJob::with_trigger(&drops);
        let current = table.add_job(ScanSettings::default(), job).id();

        tokio::time::sleep(Duration::from_secs(25)).await;

        assert!(table.try_get_job(old).is_none());
        assert!(table.try_get_job(current).is_some());
        assert!(table.is_processing(), "current job still owns the device");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_disposes_all() {
        let table = JobTable::new(JobCleanupConfig::default());
        let drops = Arc::new(AtomicUsize::new(0));
        fake_job(&table, &drops);
        fake_job(&table, &drops);
        assert!(table.try_begin_processing());

        table.clear();

        assert!(table.is_empty());
        assert!(!table.is_processing());
        assert!(!table.is_cleanup_running());
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }
}
