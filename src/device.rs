//! Device sessions and the scan state machine.
//!
//! ```text
//! Disabled --enable--> Idle --scan--> Scanning --ok--> Idle
//!     ^                  |                 \--fault--> Error
//!     +-----disable------+<-----disable------------------+
//! ```
//!
//! All status, session and job mutations happen under the device's state lock,
//! so the busy check and the transition to `Scanning` are one step. Backend calls
//! run on the blocking pool; the capture itself runs in a detached task
//! (see [`crate::capture`]).

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::{self, JoinError};
use tracing::{info, warn};

use crate::backend::{
    option_identifier, BackendError, BackendSession, DeviceInfo, OptionType, OptionValue, ScanBackend, Session,
    SharedSession, NONE_OPTION_KEY,
};
use crate::capture;
use crate::config::CaptureConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::job::Job;
use crate::metrics::Metrics;
use crate::types::{DeviceOption, DeviceParameter, DeviceSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Disabled,
    Idle,
    Scanning,
    Error,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceStatus::Disabled => "disabled",
            DeviceStatus::Idle => "idle",
            DeviceStatus::Scanning => "scanning",
            DeviceStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct DeviceState {
    status: DeviceStatus,
    /// Present iff status is not `Disabled`.
    session: Option<SharedSession>,
    /// `jobs[i].job_number() == i`
    jobs: Vec<Job>,
    current_job: Option<Job>,
    /// Dropped from the registry while scanning; the capture closes the session.
    retired: bool,
}

pub struct Device {
    info: DeviceInfo,
    backend: Arc<dyn ScanBackend>,
    capture: CaptureConfig,
    metrics: Metrics,
    state: Mutex<DeviceState>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device").field("info", &self.info).finish_non_exhaustive()
    }
}

impl Device {
    pub fn new(info: DeviceInfo, backend: Arc<dyn ScanBackend>, capture: CaptureConfig, metrics: Metrics) -> Self {
        Self {
            info,
            backend,
            capture,
            metrics,
            state: Mutex::new(DeviceState {
                status: DeviceStatus::Disabled,
                session: None,
                jobs: Vec::new(),
                current_job: None,
                retired: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub(crate) fn capture_config(&self) -> &CaptureConfig {
        &self.capture
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub async fn status(&self) -> DeviceStatus {
        self.state.lock().await.status
    }

    pub async fn summary(&self) -> DeviceSummary {
        let state = self.state.lock().await;
        DeviceSummary {
            name: self.info.name.clone(),
            model: self.info.model.clone(),
            vendor: self.info.vendor.clone(),
            device_type: self.info.device_type.clone(),
            status: state.status,
            job_count: state.jobs.len(),
        }
    }

    /// Opens a backend session. No-op when the device is already enabled.
    pub async fn enable(&self) -> DeviceResult<DeviceStatus> {
        let mut state = self.state.lock().await;
        if state.status != DeviceStatus::Disabled {
            return Ok(state.status);
        }

        let backend = self.backend.clone();
        let name = self.info.name.clone();
        let inner = task::spawn_blocking(move || backend.open(&name)).await.map_err(join_fault)??;

        state.session = Some(Arc::new(StdMutex::new(Session::new(self.info.name.clone(), inner))));
        state.status = DeviceStatus::Idle;
        self.metrics.inc_devices_enabled();
        info!("Enabled device {}", self.info.name);
        Ok(state.status)
    }

    /// Closes the backend session. Accepted from `Idle` and `Error`.
    pub async fn disable(&self) -> DeviceResult<DeviceStatus> {
        let mut state = self.state.lock().await;
        match state.status {
            DeviceStatus::Idle | DeviceStatus::Error => {}
            status => return Err(DeviceError::DeviceBusy { name: self.info.name.clone(), status }),
        }

        let session = state.session.take();
        state.status = DeviceStatus::Disabled;
        state.current_job = None;
        drop(state);

        close_session(session).await;
        info!("Disabled device {}", self.info.name);
        Ok(DeviceStatus::Disabled)
    }

    /// Drops the session of a device that is being retired. A running capture
    /// is left to finish and closes the session itself.
    pub(crate) async fn release(&self) {
        let mut state = self.state.lock().await;
        if state.status == DeviceStatus::Scanning {
            warn!("Device {} retired while scanning; capture continues detached", self.info.name);
            state.retired = true;
            return;
        }
        let session = state.session.take();
        state.status = DeviceStatus::Disabled;
        drop(state);
        close_session(session).await;
    }

    /// Closes the session ahead of a backend reset. Refused while a capture
    /// is using the driver.
    pub(crate) async fn reset(&self) -> DeviceResult<()> {
        let mut state = self.state.lock().await;
        if state.status == DeviceStatus::Scanning {
            return Err(DeviceError::DeviceBusy { name: self.info.name.clone(), status: state.status });
        }
        let session = state.session.take();
        state.status = DeviceStatus::Disabled;
        drop(state);
        close_session(session).await;
        Ok(())
    }

    pub async fn parameters(&self) -> DeviceResult<DeviceParameter> {
        self.with_idle_session(|s| Ok(s.parameters()?.into())).await
    }

    /// Current options in backend enumeration order.
    pub async fn options(&self) -> DeviceResult<Vec<DeviceOption>> {
        self.with_idle_session(|s| Ok(read_options(s)?)).await
    }

    /// Writes `raw_value` to the option with the given identifier and returns
    /// the re-read option list.
    pub async fn set_option(&self, option_name: &str, raw_value: &str) -> DeviceResult<Vec<DeviceOption>> {
        let option_name = option_name.to_string();
        let raw_value = raw_value.to_string();
        self.with_idle_session(move |s| {
            let option = read_options(s)?
                .into_iter()
                .find(|o| o.identifier == option_name)
                .ok_or_else(|| DeviceError::OptionNotFound(option_name.clone()))?;
            let value = coerce_option_value(&option, &raw_value)?;
            s.set_option(&option.name, value)?;
            Ok(read_options(s)?)
        })
        .await
    }

    /// Starts a capture in the background and returns its job right away.
    pub async fn scan(self: &Arc<Self>) -> DeviceResult<Job> {
        let (job, session) = {
            let mut state = self.state.lock().await;
            let session = state.session.clone().ok_or_else(|| self.not_enabled())?;
            if state.status != DeviceStatus::Idle {
                return Err(DeviceError::DeviceBusy { name: self.info.name.clone(), status: state.status });
            }
            let job = Job::new(state.jobs.len());
            state.jobs.push(job.clone());
            state.current_job = Some(job.clone());
            state.status = DeviceStatus::Scanning;
            (job, session)
        };

        self.metrics.inc_scans_started();
        info!("Started job {} on {}", job.job_number(), self.info.name);
        tokio::spawn(capture::run_capture(Arc::clone(self), job.clone(), session));
        Ok(job)
    }

    pub async fn get_job(&self, index: usize) -> DeviceResult<Job> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(index)
            .cloned()
            .ok_or_else(|| DeviceError::JobNotFound { device: self.info.name.clone(), index })
    }

    pub async fn jobs(&self) -> Vec<Job> {
        self.state.lock().await.jobs.clone()
    }

    pub async fn current_job(&self) -> Option<Job> {
        self.state.lock().await.current_job.clone()
    }

    /// Records the capture outcome on the job and the device in one step.
    pub(crate) async fn finish_scan(&self, job: &Job, outcome: Result<(), String>) {
        let mut state = self.state.lock().await;
        let next = match outcome {
            Ok(()) => {
                job.complete().await;
                DeviceStatus::Idle
            }
            Err(message) => {
                job.fail(message).await;
                DeviceStatus::Error
            }
        };
        if state.status == DeviceStatus::Scanning {
            state.status = next;
        }

        if state.retired {
            let session = state.session.take();
            state.status = DeviceStatus::Disabled;
            close_session(session).await;
            info!("Closed session of retired device {}", self.info.name);
        }
    }

    /// Runs `f` against the open session. The state lock is held throughout,
    /// so no capture can start meanwhile; while one is running the call is
    /// refused instead of waiting on the driver.
    async fn with_idle_session<T, F>(&self, f: F) -> DeviceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn BackendSession) -> DeviceResult<T> + Send + 'static,
    {
        let state = self.state.lock().await;
        let session = state.session.clone().ok_or_else(|| self.not_enabled())?;
        if state.status == DeviceStatus::Scanning {
            return Err(DeviceError::DeviceBusy { name: self.info.name.clone(), status: state.status });
        }
        let result = with_session(session, f).await;
        drop(state);
        result
    }

    fn not_enabled(&self) -> DeviceError {
        DeviceError::DeviceNotEnabled(self.info.name.clone())
    }
}

pub(crate) fn lock_session(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

fn join_fault(err: JoinError) -> DeviceError {
    DeviceError::BackendFault(BackendError::Other(format!("backend call aborted: {}", err)))
}

async fn with_session<T, F>(session: SharedSession, f: F) -> DeviceResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn BackendSession) -> DeviceResult<T> + Send + 'static,
{
    task::spawn_blocking(move || {
        let mut guard = lock_session(&session);
        f(guard.handle())
    })
    .await
    .map_err(join_fault)?
}

async fn close_session(session: Option<SharedSession>) {
    if let Some(session) = session {
        // Closing talks to the driver; keep it off the async workers
        if let Err(e) = task::spawn_blocking(move || drop(session)).await {
            warn!("Closing backend session failed: {}", e);
        }
    }
}

/// Reads every option except the unnamed sentinel slot. Values are only read
/// for active options that carry one.
pub(crate) fn read_options(s: &mut dyn BackendSession) -> Result<Vec<DeviceOption>, BackendError> {
    let keys = s.option_keys()?;
    let mut options = Vec::with_capacity(keys.len());
    for key in keys.into_iter().filter(|k| !k.eq_ignore_ascii_case(NONE_OPTION_KEY)) {
        let desc = s.describe_option(&key)?;
        let has_value = !matches!(desc.option_type, OptionType::Group | OptionType::Button);
        let value = if desc.is_active() && has_value { Some(s.get_option(&key)?) } else { None };
        let identifier = option_identifier(&desc.name);
        options.push(DeviceOption::from_descriptor(desc, identifier, value));
    }
    Ok(options)
}

/// Bool and int options take integers, fixed-point options take floats,
/// everything else is passed through as text.
pub(crate) fn coerce_option_value(option: &DeviceOption, raw: &str) -> DeviceResult<OptionValue> {
    let invalid = |reason: String| DeviceError::InvalidOptionValue {
        option: option.identifier.clone(),
        value: raw.to_string(),
        reason,
    };
    match option.option_type {
        OptionType::Bool | OptionType::Int => {
            raw.trim().parse::<i64>().map(OptionValue::Int).map_err(|e| invalid(e.to_string()))
        }
        OptionType::Fixed => raw.trim().parse::<f64>().map(OptionValue::Fixed).map_err(|e| invalid(e.to_string())),
        _ => Ok(OptionValue::Text(raw.to_string())),
    }
}
