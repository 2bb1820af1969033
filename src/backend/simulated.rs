//! Virtual test scanner.
//!
//! Serves the devices listed under `[[backend.devices]]` in the configuration.
//! Pages are synthetic gradients sized from the `resolution` option; the
//! automatic document feeder ("ADF" source) yields `feeder_pages` pages per batch.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};

use super::{
    BackendError, BackendSession, DeviceInfo, FrameFormat, OptionConstraint, OptionDescriptor,
    OptionType, OptionUnit, OptionValue, RawParameters, ScanBackend, CAP_INACTIVE, CAP_SOFT_DETECT,
    CAP_SOFT_SELECT,
};
use crate::config::SimulatedDeviceConfig;

const VERSION: &str = concat!("scour-sim ", env!("CARGO_PKG_VERSION"));

// A6 test sheet
const PAGE_WIDTH_MM: f64 = 105.0;
const PAGE_HEIGHT_MM: f64 = 148.0;
const PREVIEW_DPI: i64 = 75;

pub struct SimulatedBackend {
    devices: Vec<SimulatedDeviceConfig>,
    initialized: AtomicBool,
    open: Arc<Mutex<HashSet<String>>>,
}

impl SimulatedBackend {
    pub fn new(devices: Vec<SimulatedDeviceConfig>) -> Self {
        Self { devices, initialized: AtomicBool::new(false), open: Arc::new(Mutex::new(HashSet::new())) }
    }

    fn ensure_initialized(&self) -> Result<(), BackendError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BackendError::Other("backend not initialized".into()))
        }
    }
}

fn lock_open(open: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    open.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScanBackend for SimulatedBackend {
    fn init(&self) -> Result<String, BackendError> {
        self.initialized.store(true, Ordering::Release);
        Ok(VERSION.to_string())
    }

    fn exit(&self) {
        self.initialized.store(false, Ordering::Release);
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>, BackendError> {
        self.ensure_initialized()?;
        Ok(self
            .devices
            .iter()
            .map(|d| DeviceInfo {
                name: d.name.clone(),
                vendor: d.vendor.clone(),
                model: d.model.clone(),
                device_type: d.device_type.clone(),
            })
            .collect())
    }

    fn open(&self, name: &str) -> Result<Box<dyn BackendSession>, BackendError> {
        self.ensure_initialized()?;
        let cfg = self
            .devices
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| BackendError::InvalidValue(format!("no such device: {}", name)))?;
        if !lock_open(&self.open).insert(cfg.name.clone()) {
            return Err(BackendError::Busy(format!("{} is already open", name)));
        }
        Ok(Box::new(SimulatedSession {
            device: cfg.clone(),
            options: default_options(),
            open: self.open.clone(),
            closed: false,
        }))
    }
}

struct SimOption {
    desc: OptionDescriptor,
    value: Option<OptionValue>,
}

fn descriptor(
    name: &str,
    title: &str,
    description: &str,
    option_type: OptionType,
    unit: OptionUnit,
    constraint: Option<OptionConstraint>,
) -> OptionDescriptor {
    let size = match option_type {
        OptionType::String => 32,
        OptionType::Group | OptionType::Button => 0,
        _ => 4,
    };
    let cap = match option_type {
        OptionType::Group => 0,
        OptionType::Button => CAP_SOFT_SELECT,
        _ => CAP_SOFT_SELECT | CAP_SOFT_DETECT,
    };
    OptionDescriptor {
        name: name.into(),
        title: title.into(),
        description: description.into(),
        option_type,
        unit,
        size,
        cap,
        constraint,
    }
}

fn text_list(values: &[&str]) -> Option<OptionConstraint> {
    Some(OptionConstraint::List { values: values.iter().map(|v| OptionValue::Text((*v).into())).collect() })
}

fn range(min: f64, max: f64, quant: f64) -> Option<OptionConstraint> {
    Some(OptionConstraint::Range { min, max, quant })
}

fn default_options() -> Vec<SimOption> {
    let mut threshold = descriptor(
        "threshold",
        "Threshold",
        "Select minimum brightness to get a white point",
        OptionType::Int,
        OptionUnit::Percent,
        range(0.0, 100.0, 1.0),
    );
    threshold.cap |= CAP_INACTIVE;

    vec![
        SimOption {
            desc: descriptor("standard", "Standard", "", OptionType::Group, OptionUnit::None, None),
            value: None,
        },
        SimOption {
            desc: descriptor(
                "mode",
                "Scan mode",
                "Selects the scan mode (e.g., lineart, monochrome, or color).",
                OptionType::String,
                OptionUnit::None,
                text_list(&["Color", "Gray", "Lineart"]),
            ),
            value: Some(OptionValue::Text("Color".into())),
        },
        SimOption {
            desc: descriptor(
                "resolution",
                "Scan resolution",
                "Sets the resolution of the scanned image.",
                OptionType::Int,
                OptionUnit::Dpi,
                range(75.0, 600.0, 25.0),
            ),
            value: Some(OptionValue::Int(150)),
        },
        SimOption {
            desc: descriptor(
                "source",
                "Scan source",
                "Selects the scan source (such as a document-feeder).",
                OptionType::String,
                OptionUnit::None,
                text_list(&["Flatbed", "ADF"]),
            ),
            value: Some(OptionValue::Text("Flatbed".into())),
        },
        SimOption {
            desc: descriptor(
                "preview",
                "Preview",
                "Request a preview-quality scan.",
                OptionType::Bool,
                OptionUnit::None,
                None,
            ),
            value: Some(OptionValue::Int(0)),
        },
        SimOption {
            desc: descriptor(
                "brightness",
                "Brightness",
                "Controls the brightness of the acquired image.",
                OptionType::Fixed,
                OptionUnit::Percent,
                range(-100.0, 100.0, 0.0),
            ),
            value: Some(OptionValue::Fixed(0.0)),
        },
        SimOption {
            desc: descriptor(
                "tl-x",
                "Top-left x",
                "Top-left x position of scan area.",
                OptionType::Fixed,
                OptionUnit::Mm,
                range(0.0, PAGE_WIDTH_MM, 0.0),
            ),
            value: Some(OptionValue::Fixed(0.0)),
        },
        SimOption { desc: threshold, value: Some(OptionValue::Int(50)) },
        SimOption {
            desc: descriptor(
                "calibrate",
                "Calibrate",
                "Run a calibration cycle.",
                OptionType::Button,
                OptionUnit::None,
                None,
            ),
            value: None,
        },
    ]
}

fn within(constraint: &Option<OptionConstraint>, v: f64) -> bool {
    match constraint {
        Some(OptionConstraint::Range { min, max, quant }) => {
            if v < *min || v > *max {
                return false;
            }
            *quant <= 0.0 || ((v - min) % quant).abs() < f64::EPSILON
        }
        _ => true,
    }
}

fn check_value(desc: &OptionDescriptor, value: OptionValue) -> Result<OptionValue, BackendError> {
    let invalid = |v: &OptionValue| BackendError::InvalidValue(format!("{:?} is not valid for {}", v, desc.name));
    match (desc.option_type, value) {
        (OptionType::Bool, OptionValue::Int(v)) if v == 0 || v == 1 => Ok(OptionValue::Int(v)),
        (OptionType::Int, OptionValue::Int(v)) if within(&desc.constraint, v as f64) => Ok(OptionValue::Int(v)),
        (OptionType::Fixed, OptionValue::Fixed(v)) if within(&desc.constraint, v) => Ok(OptionValue::Fixed(v)),
        (OptionType::Fixed, OptionValue::Int(v)) if within(&desc.constraint, v as f64) => {
            Ok(OptionValue::Fixed(v as f64))
        }
        (OptionType::String, OptionValue::Text(s)) => match &desc.constraint {
            Some(OptionConstraint::List { values }) if !values.iter().any(|a| a.as_text() == Some(s.as_str())) => {
                Err(invalid(&OptionValue::Text(s)))
            }
            _ => Ok(OptionValue::Text(s)),
        },
        (OptionType::Group, _) => Err(BackendError::Unsupported(format!("{} is a group", desc.name))),
        (_, v) => Err(invalid(&v)),
    }
}

struct SimulatedSession {
    device: SimulatedDeviceConfig,
    options: Vec<SimOption>,
    open: Arc<Mutex<HashSet<String>>>,
    closed: bool,
}

impl SimulatedSession {
    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.closed {
            Err(BackendError::Io(format!("session for {} is closed", self.device.name)))
        } else {
            Ok(())
        }
    }

    fn find(&self, key: &str) -> Result<&SimOption, BackendError> {
        self.options
            .iter()
            .find(|o| o.desc.name == key)
            .ok_or_else(|| BackendError::InvalidValue(format!("unknown option: {}", key)))
    }

    fn find_mut(&mut self, key: &str) -> Result<&mut SimOption, BackendError> {
        self.options
            .iter_mut()
            .find(|o| o.desc.name == key)
            .ok_or_else(|| BackendError::InvalidValue(format!("unknown option: {}", key)))
    }

    fn text(&self, key: &str) -> String {
        self.find(key)
            .ok()
            .and_then(|o| o.value.as_ref())
            .and_then(|v| v.as_text())
            .unwrap_or_default()
            .to_string()
    }

    fn int(&self, key: &str) -> Option<i64> {
        match self.find(key).ok().and_then(|o| o.value.as_ref()) {
            Some(OptionValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    fn brightness(&self) -> f64 {
        match self.find("brightness").ok().and_then(|o| o.value.as_ref()) {
            Some(OptionValue::Fixed(v)) => *v,
            _ => 0.0,
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        let mut dpi = self.int("resolution").unwrap_or(150);
        if self.int("preview") == Some(1) {
            dpi = dpi.min(PREVIEW_DPI);
        }
        let px = |mm: f64| ((mm / 25.4) * dpi as f64).round().max(1.0) as u32;
        (px(PAGE_WIDTH_MM), px(PAGE_HEIGHT_MM))
    }

    fn render_page(&self, page: u32) -> DynamicImage {
        let (w, h) = self.dimensions();
        let shift = (self.brightness() * 1.27) as i32;
        let level = move |x: u32, y: u32| -> u8 {
            let base = ((x + y + page * 37) % 256) as i32;
            (base + shift).clamp(0, 255) as u8
        };
        match self.text("mode").as_str() {
            "Gray" => DynamicImage::ImageLuma8(GrayImage::from_fn(w, h, |x, y| Luma([level(x, y)]))),
            "Lineart" => {
                let cut = (self.int("threshold").unwrap_or(50) * 255 / 100) as u8;
                DynamicImage::ImageLuma8(GrayImage::from_fn(w, h, |x, y| {
                    Luma([if level(x, y) >= cut { 255 } else { 0 }])
                }))
            }
            _ => DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
                let l = level(x, y);
                Rgb([l, l.wrapping_add(85), l.wrapping_add(170)])
            })),
        }
    }
}

impl BackendSession for SimulatedSession {
    fn parameters(&mut self) -> Result<RawParameters, BackendError> {
        self.ensure_open()?;
        let (w, h) = self.dimensions();
        let w = w as i32;
        let (format, depth, bytes_per_line) = match self.text("mode").as_str() {
            "Gray" => (FrameFormat::Gray, 8, w),
            "Lineart" => (FrameFormat::Gray, 1, (w + 7) / 8),
            _ => (FrameFormat::Rgb, 8, w * 3),
        };
        Ok(RawParameters { format, last_frame: true, resolution: (w, h as i32), depth, bytes_per_line })
    }

    fn option_keys(&mut self) -> Result<Vec<String>, BackendError> {
        self.ensure_open()?;
        Ok(self.options.iter().map(|o| o.desc.name.clone()).collect())
    }

    fn describe_option(&mut self, key: &str) -> Result<OptionDescriptor, BackendError> {
        self.ensure_open()?;
        Ok(self.find(key)?.desc.clone())
    }

    fn get_option(&mut self, key: &str) -> Result<OptionValue, BackendError> {
        self.ensure_open()?;
        let opt = self.find(key)?;
        if !opt.desc.is_active() {
            return Err(BackendError::InvalidValue(format!("option {} is inactive", key)));
        }
        opt.value.clone().ok_or_else(|| BackendError::Unsupported(format!("option {} has no value", key)))
    }

    fn set_option(&mut self, key: &str, value: OptionValue) -> Result<(), BackendError> {
        self.ensure_open()?;
        let opt = self.find_mut(key)?;
        if opt.desc.cap & CAP_SOFT_SELECT == 0 {
            return Err(BackendError::Unsupported(format!("option {} is read-only", key)));
        }
        if !opt.desc.is_active() {
            return Err(BackendError::InvalidValue(format!("option {} is inactive", key)));
        }
        if opt.desc.option_type == OptionType::Button {
            tracing::debug!("Pressed {} on {}", key, self.device.name);
            return Ok(());
        }
        opt.value = Some(check_value(&opt.desc, value)?);

        if key == "mode" {
            let lineart = self.text("mode") == "Lineart";
            let threshold = self.find_mut("threshold")?;
            if lineart {
                threshold.desc.cap &= !CAP_INACTIVE;
            } else {
                threshold.desc.cap |= CAP_INACTIVE;
            }
        }
        Ok(())
    }

    fn scan(&mut self) -> Result<DynamicImage, BackendError> {
        self.ensure_open()?;
        Ok(self.render_page(1))
    }

    fn multi_scan(&mut self) -> Box<dyn Iterator<Item = Result<DynamicImage, BackendError>> + '_> {
        if let Err(e) = self.ensure_open() {
            return Box::new(std::iter::once(Err(e)));
        }
        let pages = if self.text("source") == "ADF" { self.device.feeder_pages } else { 1 };
        if pages == 0 {
            return Box::new(std::iter::once(Err(BackendError::NoDocuments)));
        }
        let this = &*self;
        Box::new((1..=pages).map(move |page| Ok(this.render_page(page))))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            lock_open(&self.open).remove(&self.device.name);
        }
    }
}
