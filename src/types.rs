use serde::{Deserialize, Serialize};

use crate::backend::{OptionConstraint, OptionDescriptor, OptionType, OptionUnit, OptionValue, RawParameters};
use crate::device::DeviceStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub name: String,
    pub model: String,
    pub vendor: String,
    pub device_type: String,
    pub status: DeviceStatus,
    pub job_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceParameter {
    pub format: String,
    pub last_frame: bool,
    pub pixels_per_line: i32,
    pub lines: i32,
    pub depth: i32,
    pub bytes_per_line: i32,
}

impl From<RawParameters> for DeviceParameter {
    fn from(p: RawParameters) -> Self {
        Self {
            format: p.format.as_str().to_string(),
            last_frame: p.last_frame,
            pixels_per_line: p.resolution.0,
            lines: p.resolution.1,
            depth: p.depth,
            bytes_per_line: p.bytes_per_line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceOption {
    pub name: String,
    pub identifier: String,
    pub title: String,
    pub description: String,
    pub active: bool,
    /// Only read for active options.
    pub value: Option<OptionValue>,
    pub option_type: OptionType,
    pub unit: OptionUnit,
    pub size: i32,
    pub cap: u32,
    pub constraint: Option<OptionConstraint>,
}

impl DeviceOption {
    pub(crate) fn from_descriptor(desc: OptionDescriptor, identifier: String, value: Option<OptionValue>) -> Self {
        Self {
            active: desc.is_active(),
            name: desc.name,
            identifier,
            title: desc.title,
            description: desc.description,
            value,
            option_type: desc.option_type,
            unit: desc.unit,
            size: desc.size,
            cap: desc.cap,
            constraint: desc.constraint,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetOptionQuery {
    pub option_name: String,
    pub option_value: String,
}
