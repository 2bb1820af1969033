//! Scripted scanning backend for tests.
//!
//! Captures block on a [`Gate`] until the test opens it, so the scanning state
//! and partially filled jobs can be observed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use image::{DynamicImage, Rgb, RgbImage};

use crate::backend::{
    BackendError, BackendSession, DeviceInfo, FrameFormat, OptionConstraint, OptionDescriptor, OptionType,
    OptionUnit, OptionValue, RawParameters, ScanBackend, CAP_INACTIVE, CAP_SOFT_DETECT, CAP_SOFT_SELECT,
};
use crate::config::CaptureConfig;
use crate::job::{Job, JobRecord};
use crate::metrics::Metrics;
use crate::registry::DeviceRegistry;

#[derive(Clone, Default)]
pub struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    pub fn closed() -> Self {
        Self::default()
    }

    pub fn opened() -> Self {
        let gate = Self::default();
        gate.open();
        gate
    }

    pub fn open(&self) {
        let (lock, cvar) = &*self.0;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (lock, cvar) = &*self.0;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
    }
}

/// What the next capture does.
#[derive(Clone, Debug)]
pub struct Script {
    /// Value of the `source` option; `None` removes the option entirely.
    pub source: Option<String>,
    /// Pages yielded by a multi-page capture.
    pub feeder_pages: usize,
    /// Multi-page capture fails after this many pages.
    pub fail_after: Option<usize>,
    /// Feeder runs empty after this many pages.
    pub no_documents_after: Option<usize>,
    pub fail_open: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            source: Some("Flatbed".into()),
            feeder_pages: 2,
            fail_after: None,
            no_documents_after: None,
            fail_open: false,
        }
    }
}

pub struct ScriptedBackend {
    pub devices: Mutex<Vec<DeviceInfo>>,
    pub script: Mutex<Script>,
    pub gate: Mutex<Gate>,
    /// Values written through `set_option`, in order.
    pub writes: Arc<Mutex<Vec<(String, OptionValue)>>>,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    pub initialized: AtomicBool,
}

pub fn device_info(name: &str) -> DeviceInfo {
    DeviceInfo {
        name: name.into(),
        vendor: "Brother".into(),
        model: "L2700DW".into(),
        device_type: "flatbed scanner".into(),
    }
}

impl ScriptedBackend {
    pub fn new(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(names.iter().map(|n| device_info(n)).collect()),
            script: Mutex::new(Script::default()),
            gate: Mutex::new(Gate::opened()),
            writes: Arc::new(Mutex::new(Vec::new())),
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            initialized: AtomicBool::new(false),
        })
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    /// Makes every following capture wait until the returned gate opens.
    pub fn hold_captures(&self) -> Gate {
        let gate = Gate::closed();
        *self.gate.lock().unwrap() = gate.clone();
        gate
    }

    pub fn set_devices(&self, names: &[&str]) {
        *self.devices.lock().unwrap() = names.iter().map(|n| device_info(n)).collect();
    }
}

impl ScanBackend for ScriptedBackend {
    fn init(&self) -> Result<String, BackendError> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok("scripted 1.0".into())
    }

    fn exit(&self) {
        self.initialized.store(false, Ordering::SeqCst);
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>, BackendError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(BackendError::Other("not initialized".into()));
        }
        Ok(self.devices.lock().unwrap().clone())
    }

    fn open(&self, name: &str) -> Result<Box<dyn BackendSession>, BackendError> {
        let script = self.script.lock().unwrap().clone();
        if script.fail_open {
            return Err(BackendError::Io(format!("cannot open {}", name)));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            options: scripted_options(&script),
            script,
            gate: self.gate.lock().unwrap().clone(),
            writes: self.writes.clone(),
            closed: self.closed.clone(),
        }))
    }
}

fn desc(name: &str, option_type: OptionType, unit: OptionUnit, constraint: Option<OptionConstraint>) -> OptionDescriptor {
    OptionDescriptor {
        name: name.into(),
        title: name.into(),
        description: format!("{} option", name),
        option_type,
        unit,
        size: 4,
        cap: CAP_SOFT_SELECT | CAP_SOFT_DETECT,
        constraint,
    }
}

fn scripted_options(script: &Script) -> Vec<(OptionDescriptor, Option<OptionValue>)> {
    let mut inactive = desc("threshold", OptionType::Int, OptionUnit::Percent, None);
    inactive.cap |= CAP_INACTIVE;

    let mut options = vec![
        (desc("none", OptionType::Group, OptionUnit::None, None), None),
        (
            desc(
                "resolution",
                OptionType::Int,
                OptionUnit::Dpi,
                Some(OptionConstraint::Range { min: 75.0, max: 600.0, quant: 0.0 }),
            ),
            Some(OptionValue::Int(150)),
        ),
        (desc("preview", OptionType::Bool, OptionUnit::None, None), Some(OptionValue::Int(0))),
        (desc("brightness", OptionType::Fixed, OptionUnit::Percent, None), Some(OptionValue::Fixed(0.0))),
        (desc("tl-x", OptionType::Fixed, OptionUnit::Mm, None), Some(OptionValue::Fixed(0.0))),
        (desc("mode", OptionType::String, OptionUnit::None, None), Some(OptionValue::Text("Color".into()))),
        (inactive, Some(OptionValue::Int(50))),
    ];
    if let Some(source) = &script.source {
        options.push((
            desc("source", OptionType::String, OptionUnit::None, None),
            Some(OptionValue::Text(source.clone())),
        ));
    }
    options
}

struct ScriptedSession {
    options: Vec<(OptionDescriptor, Option<OptionValue>)>,
    script: Script,
    gate: Gate,
    writes: Arc<Mutex<Vec<(String, OptionValue)>>>,
    closed: Arc<AtomicUsize>,
}

/// The `n`th page a scripted capture yields, counting from 1.
pub fn page(n: usize) -> DynamicImage {
    let shade = (n * 60 % 256) as u8;
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([shade, 255 - shade, 128])))
}

impl BackendSession for ScriptedSession {
    fn parameters(&mut self) -> Result<RawParameters, BackendError> {
        Ok(RawParameters {
            format: FrameFormat::Rgb,
            last_frame: true,
            resolution: (1275, 1650),
            depth: 8,
            bytes_per_line: 3825,
        })
    }

    fn option_keys(&mut self) -> Result<Vec<String>, BackendError> {
        Ok(self.options.iter().map(|(d, _)| d.name.clone()).collect())
    }

    fn describe_option(&mut self, key: &str) -> Result<OptionDescriptor, BackendError> {
        self.options
            .iter()
            .find(|(d, _)| d.name == key)
            .map(|(d, _)| d.clone())
            .ok_or_else(|| BackendError::InvalidValue(key.into()))
    }

    fn get_option(&mut self, key: &str) -> Result<OptionValue, BackendError> {
        self.options
            .iter()
            .find(|(d, _)| d.name == key)
            .and_then(|(_, v)| v.clone())
            .ok_or_else(|| BackendError::InvalidValue(key.into()))
    }

    fn set_option(&mut self, key: &str, value: OptionValue) -> Result<(), BackendError> {
        if let OptionValue::Int(v) = value {
            if key == "resolution" && !(75..=600).contains(&v) {
                return Err(BackendError::InvalidValue(format!("resolution {} out of range", v)));
            }
        }
        let slot = self
            .options
            .iter_mut()
            .find(|(d, _)| d.name == key)
            .ok_or_else(|| BackendError::InvalidValue(key.into()))?;
        slot.1 = Some(value.clone());
        self.writes.lock().unwrap().push((key.to_string(), value));
        Ok(())
    }

    fn scan(&mut self) -> Result<DynamicImage, BackendError> {
        self.gate.wait();
        Ok(page(1))
    }

    fn multi_scan(&mut self) -> Box<dyn Iterator<Item = Result<DynamicImage, BackendError>> + '_> {
        self.gate.wait();
        let fail_after = self.script.fail_after;
        let pages = (1..=self.script.feeder_pages).map(move |n| match fail_after {
            Some(limit) if n > limit => Err(BackendError::Io("paper jam".into())),
            _ => Ok(page(n)),
        });
        match self.script.no_documents_after {
            Some(limit) => Box::new(pages.take(limit).chain(std::iter::once(Err(BackendError::NoDocuments)))),
            None => Box::new(pages),
        }
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn capture_config() -> CaptureConfig {
    CaptureConfig { jpeg_quality: 80, page_buffer: 2 }
}

/// An initialized and refreshed registry over the given backend.
pub async fn registry(backend: Arc<ScriptedBackend>) -> DeviceRegistry {
    let registry = DeviceRegistry::new(backend, capture_config(), Metrics::new());
    registry.initialize().await.unwrap();
    registry.refresh_devices().await.unwrap();
    registry
}

/// Polls until the job leaves `Started`.
pub async fn wait_for_job(job: &Job) -> JobRecord {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let record = job.snapshot().await;
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}
