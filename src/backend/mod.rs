//! Scanning backend abstraction.
//!
//! The service never talks to scanner drivers directly. Everything goes through
//! [`ScanBackend`] (process-wide: init, enumeration, open) and [`BackendSession`]
//! (one open device). Both are blocking interfaces; callers run them on the
//! blocking thread pool.
//!
//! - [`simulated`]: virtual test scanner used when no hardware driver is configured

use std::sync::{Arc, Mutex};

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod simulated;

pub use simulated::SimulatedBackend;

/// Option key some backends report for an unnamed enumeration slot.
pub const NONE_OPTION_KEY: &str = "none";

/// Capability bit: option can be set by software.
pub const CAP_SOFT_SELECT: u32 = 1;
/// Capability bit: option can be set by hardware.
pub const CAP_HARD_SELECT: u32 = 2;
/// Capability bit: option value can be read by software.
pub const CAP_SOFT_DETECT: u32 = 4;
/// Capability bit: option is currently inactive.
pub const CAP_INACTIVE: u32 = 32;

/// Errors raised by a scanning backend.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("device busy: {0}")]
    Busy(String),
    #[error("invalid argument: {0}")]
    InvalidValue(String),
    #[error("document feeder out of documents")]
    NoDocuments,
    #[error("{0}")]
    Other(String),
}

/// Identity of a device as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub model: String,
    pub device_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFormat {
    Gray,
    Rgb,
    Red,
    Green,
    Blue,
}

impl FrameFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameFormat::Gray => "gray",
            FrameFormat::Rgb => "color",
            FrameFormat::Red => "red",
            FrameFormat::Green => "green",
            FrameFormat::Blue => "blue",
        }
    }
}

/// Capture geometry exactly as the driver reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawParameters {
    pub format: FrameFormat,
    pub last_frame: bool,
    /// (pixels per line, lines)
    pub resolution: (i32, i32),
    pub depth: i32,
    pub bytes_per_line: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionType {
    Bool,
    Int,
    Fixed,
    String,
    Button,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionUnit {
    None,
    Pixel,
    Bit,
    Mm,
    Dpi,
    Percent,
    Microsecond,
}

/// A typed option value. Booleans travel as `Int` (0/1), as drivers report them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Int(i64),
    Fixed(f64),
    Text(String),
}

impl OptionValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            OptionValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptionConstraint {
    Range { min: f64, max: f64, quant: f64 },
    List { values: Vec<OptionValue> },
}

/// Fixed description of one device option.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionDescriptor {
    pub name: String,
    pub title: String,
    pub description: String,
    pub option_type: OptionType,
    pub unit: OptionUnit,
    pub size: i32,
    pub cap: u32,
    pub constraint: Option<OptionConstraint>,
}

impl OptionDescriptor {
    pub fn is_active(&self) -> bool {
        self.cap & CAP_INACTIVE == 0
    }
}

/// Lookup identifier for an option name (`tl-x` -> `tl_x`).
pub fn option_identifier(name: &str) -> String {
    name.replace('-', "_")
}

/// Process-wide entry point of a scanning driver.
pub trait ScanBackend: Send + Sync {
    /// (Re)initializes the driver and returns its version string.
    fn init(&self) -> Result<String, BackendError>;

    /// Tears the driver down. Open sessions become invalid.
    fn exit(&self);

    fn devices(&self) -> Result<Vec<DeviceInfo>, BackendError>;

    fn open(&self, name: &str) -> Result<Box<dyn BackendSession>, BackendError>;
}

/// An open handle to one physical device.
pub trait BackendSession: Send {
    fn parameters(&mut self) -> Result<RawParameters, BackendError>;

    /// Option keys in driver enumeration order.
    fn option_keys(&mut self) -> Result<Vec<String>, BackendError>;

    fn describe_option(&mut self, key: &str) -> Result<OptionDescriptor, BackendError>;

    fn get_option(&mut self, key: &str) -> Result<OptionValue, BackendError>;

    fn set_option(&mut self, key: &str, value: OptionValue) -> Result<(), BackendError>;

    /// Captures a single page.
    fn scan(&mut self) -> Result<DynamicImage, BackendError>;

    /// Captures pages until the driver signals the end of the batch.
    fn multi_scan(&mut self) -> Box<dyn Iterator<Item = Result<DynamicImage, BackendError>> + '_>;

    fn close(&mut self);
}

/// An open backend session that is closed when dropped.
pub struct Session {
    device: String,
    inner: Box<dyn BackendSession>,
}

impl Session {
    pub fn new(device: impl Into<String>, inner: Box<dyn BackendSession>) -> Self {
        Self { device: device.into(), inner }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn handle(&mut self) -> &mut dyn BackendSession {
        self.inner.as_mut()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inner.close();
        tracing::debug!("Closed backend session for {}", self.device);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("device", &self.device).finish()
    }
}

/// Session shared between a device and its capture task.
pub type SharedSession = Arc<Mutex<Session>>;

/// Builds the driver selected in the configuration.
pub fn from_config(cfg: &crate::config::BackendConfig) -> Arc<dyn ScanBackend> {
    match cfg.driver {
        crate::config::BackendDriver::Simulated => Arc::new(SimulatedBackend::new(cfg.devices.clone())),
    }
}
