//! Scan jobs.
//!
//! A [`Job`] is created by `Device::scan` and filled by exactly one capture
//! task. Any number of readers may take snapshots while pages arrive; pages are
//! only ever appended, so a reader sees a prefix of the final page list.

use std::borrow::Cow;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use image::{codecs::jpeg::JpegEncoder, ColorType, DynamicImage, ImageError};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Started,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Started)
    }
}

/// Point-in-time view of a job, as served over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_number: usize,
    /// Base64 encoded JPEG pages in capture order.
    pub pages: Vec<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub error: String,
}

/// Shared handle to a job. Cloning yields another handle to the same job.
#[derive(Debug, Clone)]
pub struct Job {
    job_number: usize,
    inner: Arc<RwLock<JobRecord>>,
}

impl Job {
    pub(crate) fn new(job_number: usize) -> Self {
        let record = JobRecord {
            job_number,
            pages: Vec::new(),
            start_date: Utc::now(),
            end_date: None,
            status: JobStatus::Started,
            error: String::new(),
        };
        Self { job_number, inner: Arc::new(RwLock::new(record)) }
    }

    pub fn job_number(&self) -> usize {
        self.job_number
    }

    pub async fn snapshot(&self) -> JobRecord {
        self.inner.read().await.clone()
    }

    pub async fn status(&self) -> JobStatus {
        self.inner.read().await.status
    }

    pub async fn page_count(&self) -> usize {
        self.inner.read().await.pages.len()
    }

    /// Appends an encoded page. Ignored once the job reached a terminal status.
    pub(crate) async fn add_page(&self, page: String) -> bool {
        let mut job = self.inner.write().await;
        if job.status.is_terminal() {
            return false;
        }
        job.pages.push(page);
        true
    }

    pub(crate) async fn complete(&self) -> bool {
        self.finish(JobStatus::Completed, String::new()).await
    }

    pub(crate) async fn fail(&self, message: impl Into<String>) -> bool {
        self.finish(JobStatus::Error, message.into()).await
    }

    async fn finish(&self, status: JobStatus, error: String) -> bool {
        let mut job = self.inner.write().await;
        if job.status.is_terminal() {
            return false;
        }
        job.status = status;
        job.error = error;
        job.end_date = Some(Utc::now());
        true
    }
}

/// Encodes a captured page as JPEG and returns it base64 encoded.
pub fn encode_page(image: &DynamicImage, quality: u8) -> Result<String, ImageError> {
    // JPEG only takes 8-bit gray or RGB
    let image = match image.color() {
        ColorType::L8 | ColorType::Rgb8 => Cow::Borrowed(image),
        ColorType::L16 | ColorType::La8 | ColorType::La16 => Cow::Owned(DynamicImage::ImageLuma8(image.to_luma8())),
        _ => Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8())),
    };
    let mut buf = Vec::new();
    image.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
    Ok(STANDARD.encode(&buf))
}
