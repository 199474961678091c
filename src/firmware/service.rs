// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Firmware download service and its background worker.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::FirmwareConfig;
use crate::error::FirmwareError;
use crate::event::EventSink;

use super::{
    FirmwareStatus, FirmwareTransport, JobId, ProgressTracker, TransferObserver, TransferOutcome,
};

/// Status code a request handler replies with when a job is accepted.
pub const ACCEPTED: u16 = 202;

/// Error text emitted when the server reports the running version is current.
pub const NO_UPDATES_MESSAGE: &str = "same firmware version";

/// Restarts the device after a successful update.
///
/// Implemented for any `Fn()` closure.
pub trait RestartHandler: Send + Sync {
    /// Restarts the device. On real hardware this does not return.
    fn restart(&self);
}

impl<F> RestartHandler for F
where
    F: Fn() + Send + Sync,
{
    fn restart(&self) {
        self();
    }
}

/// Accepts firmware download requests and runs them in the background.
///
/// At most one job runs at a time; a request arriving while a job is in
/// flight is rejected with [`FirmwareError::Busy`]. Each job emits its
/// lifecycle on the event sink as [`FirmwareStatus`] documents:
///
/// 1. `preparing` when the request is accepted
/// 2. `progress` each time the written percentage increases
/// 3. `finished` once the image is written, then the device restarts
///
/// or `error` if the job ends without a new image. A running job cannot be
/// cancelled.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use statebridge::config::FirmwareConfig;
/// use statebridge::event::EventBus;
/// use statebridge::firmware::{DownloadFirmwareService, HttpUpdater, MemoryWriter};
///
/// # async fn example() -> Result<(), statebridge::error::FirmwareError> {
/// let config = FirmwareConfig::new();
/// let bus = EventBus::new();
/// let updater = HttpUpdater::new(&config, Arc::new(MemoryWriter::new()))?;
/// let service = DownloadFirmwareService::new(
///     updater,
///     bus.clone(),
///     || std::process::exit(0),
///     &config,
/// );
///
/// let body = serde_json::json!({ "download_url": "https://example.com/fw.bin" });
/// let job = service.download_update(&body)?;
/// println!("accepted job {job}");
/// # Ok(())
/// # }
/// ```
pub struct DownloadFirmwareService<Tr> {
    transport: Arc<Tr>,
    emitter: Emitter,
    restart: Arc<dyn RestartHandler>,
    restart_delay: Duration,
    slot: Arc<JobSlot>,
}

impl<Tr: FirmwareTransport> DownloadFirmwareService<Tr> {
    /// Creates a service downloading with `transport`, reporting on `events`
    /// and restarting through `restart`.
    pub fn new(
        transport: Tr,
        events: impl EventSink + 'static,
        restart: impl RestartHandler + 'static,
        config: &FirmwareConfig,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            emitter: Emitter {
                events: Arc::new(events),
                event_name: Arc::from(config.event_name()),
            },
            restart: Arc::new(restart),
            restart_delay: config.restart_delay(),
            slot: Arc::new(JobSlot::new()),
        }
    }

    /// Validates `body` and starts a download job.
    ///
    /// `body` must be a JSON object with a non-empty `download_url` string.
    /// Returns as soon as the worker is spawned; no network I/O happens on
    /// the caller's task. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`FirmwareError::Validation`] if the body is malformed
    /// - [`FirmwareError::ResourceExhausted`] if no runtime is available
    /// - [`FirmwareError::Busy`] if a job is already running
    ///
    /// No event is emitted in any of these cases.
    pub fn download_update(&self, body: &Value) -> Result<JobId, FirmwareError> {
        let url = download_url(body)?;
        let runtime = Handle::try_current().map_err(|e| {
            tracing::error!(error = %e, "Cannot spawn firmware worker");
            FirmwareError::ResourceExhausted(e.to_string())
        })?;

        let id = JobId::new();
        let lease = self.slot.acquire(id).inspect_err(|_| {
            tracing::warn!(url = %url, "Firmware download rejected: another job is running");
        })?;

        tracing::info!(job = %id, url = %url, "Starting firmware download");
        self.emitter.emit(&FirmwareStatus::Preparing);

        let job = Job {
            id,
            url,
            transport: Arc::clone(&self.transport),
            emitter: self.emitter.clone(),
            restart: Arc::clone(&self.restart),
            restart_delay: self.restart_delay,
        };
        let task = runtime.spawn(job.run(lease));
        self.slot.retain(id, task);
        Ok(id)
    }

    /// Runs [`download_update`](Self::download_update) and maps the result
    /// to the status code of the HTTP reply.
    pub fn reply_status(&self, body: &Value) -> u16 {
        match self.download_update(body) {
            Ok(_) => ACCEPTED,
            Err(e) => e.status_code(),
        }
    }
}

impl<Tr> DownloadFirmwareService<Tr> {
    /// Returns whether a job is running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.slot.active.lock().is_some()
    }

    /// Returns the id of the running job, if any.
    #[must_use]
    pub fn active_job(&self) -> Option<JobId> {
        self.slot.active.lock().as_ref().map(|job| job.id)
    }

    /// Waits until no job is running.
    ///
    /// Returns immediately when the service is idle.
    pub async fn wait_idle(&self) {
        let mut rx = self.slot.state.subscribe();
        // The sender lives in the slot, so this only fails if the slot is gone.
        let _ = rx.wait_for(Option::is_none).await;
    }
}

impl<Tr> std::fmt::Debug for DownloadFirmwareService<Tr> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadFirmwareService")
            .field("event_name", &self.emitter.event_name)
            .field("restart_delay", &self.restart_delay)
            .field("active_job", &self.active_job())
            .finish_non_exhaustive()
    }
}

fn download_url(body: &Value) -> Result<String, FirmwareError> {
    let Value::Object(fields) = body else {
        return Err(FirmwareError::Validation(
            "body must be a JSON object".to_string(),
        ));
    };
    match fields.get("download_url") {
        Some(Value::String(url)) if !url.trim().is_empty() => Ok(url.clone()),
        Some(Value::String(_)) | None => Err(FirmwareError::Validation(
            "download_url is required".to_string(),
        )),
        Some(_) => Err(FirmwareError::Validation(
            "download_url must be a string".to_string(),
        )),
    }
}

#[derive(Clone)]
struct Emitter {
    events: Arc<dyn EventSink>,
    event_name: Arc<str>,
}

impl Emitter {
    fn emit(&self, status: &FirmwareStatus) {
        self.events
            .send(&status.to_json(), &self.event_name, Utc::now());
    }
}

/// Single-job slot shared between the service and its worker.
struct JobSlot {
    active: Mutex<Option<ActiveJob>>,
    state: watch::Sender<Option<JobId>>,
}

struct ActiveJob {
    id: JobId,
    // Retained for the lifetime of the job.
    task: Option<JoinHandle<()>>,
}

impl JobSlot {
    fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            active: Mutex::new(None),
            state,
        }
    }

    fn acquire(self: &Arc<Self>, id: JobId) -> Result<JobLease, FirmwareError> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(FirmwareError::Busy);
        }
        *active = Some(ActiveJob { id, task: None });
        self.state.send_replace(Some(id));
        Ok(JobLease {
            slot: Arc::clone(self),
            id,
        })
    }

    fn retain(&self, id: JobId, task: JoinHandle<()>) {
        let mut active = self.active.lock();
        match active.as_mut() {
            Some(job) if job.id == id => job.task = Some(task),
            // The job already finished.
            _ => {}
        }
    }

    fn release(&self, id: JobId) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|job| job.id == id) {
            *active = None;
            self.state.send_replace(None);
        }
    }
}

/// Frees the slot when the worker ends, including by panic.
struct JobLease {
    slot: Arc<JobSlot>,
    id: JobId,
}

impl Drop for JobLease {
    fn drop(&mut self) {
        self.slot.release(self.id);
    }
}

struct Job<Tr> {
    id: JobId,
    url: String,
    transport: Arc<Tr>,
    emitter: Emitter,
    restart: Arc<dyn RestartHandler>,
    restart_delay: Duration,
}

impl<Tr: FirmwareTransport> Job<Tr> {
    async fn run(self, _lease: JobLease) {
        let mut observer = JobObserver {
            id: self.id,
            tracker: ProgressTracker::new(),
            emitter: self.emitter.clone(),
        };

        match self.transport.update(&self.url, &mut observer).await {
            TransferOutcome::Ok => {
                tracing::info!(job = %self.id, "Firmware update successful, restarting");
                tokio::time::sleep(self.restart_delay).await;
                self.restart.restart();
            }
            TransferOutcome::NoUpdates => {
                tracing::info!(job = %self.id, "Firmware is already up to date");
                self.emitter.emit(&FirmwareStatus::Error {
                    error: NO_UPDATES_MESSAGE.to_string(),
                });
            }
            TransferOutcome::Failed(error) => {
                tracing::warn!(job = %self.id, error = %error, "Firmware update failed");
                self.emitter.emit(&FirmwareStatus::Error { error });
            }
        }
    }
}

/// Per-job observer; nothing here outlives the job.
struct JobObserver {
    id: JobId,
    tracker: ProgressTracker,
    emitter: Emitter,
}

impl TransferObserver for JobObserver {
    fn on_progress(&mut self, current: u64, total: u64) {
        if let Some(progress) = self.tracker.advance(current, total) {
            tracing::trace!(job = %self.id, current, total, progress, "Firmware download progress");
            self.emitter.emit(&FirmwareStatus::Progress { progress });
        }
    }

    fn on_end(&mut self) {
        tracing::debug!(job = %self.id, "Firmware image written");
        self.emitter.emit(&FirmwareStatus::Finished);
    }
}
