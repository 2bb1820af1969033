//! Background capture procedure.
//!
//! One detached task per `Device::scan`. The driver calls and JPEG encoding run
//! on the blocking pool and hand encoded pages over a bounded channel; the async
//! side appends them to the job as they arrive. Faults end up on the job and the
//! device status, since nobody is waiting for this task.

use std::sync::Arc;

use image::ImageError;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task;
use tracing::{info, warn};

use crate::backend::{BackendError, SharedSession};
use crate::device::{lock_session, read_options, Device};
use crate::job::{encode_page, Job};

/// Identifier of the option selecting the paper source.
pub const SOURCE_OPTION: &str = "source";
/// Source value that selects a single-page capture.
pub const FLATBED_SOURCE: &str = "flatbed";

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("failed to encode page: {0}")]
    Encode(#[from] ImageError),
    #[error("capture aborted: {0}")]
    Aborted(String),
}

pub(crate) async fn run_capture(device: Arc<Device>, job: Job, session: SharedSession) {
    let cfg = device.capture_config().clone();
    let (tx, mut rx) = mpsc::channel::<String>(cfg.page_buffer.max(1));

    let worker = task::spawn_blocking(move || capture_pages(&session, cfg.jpeg_quality, &tx));

    let mut pages: u64 = 0;
    while let Some(page) = rx.recv().await {
        if job.add_page(page).await {
            pages += 1;
        }
    }

    let outcome = match worker.await {
        Ok(res) => res,
        Err(e) => Err(CaptureError::Aborted(e.to_string())),
    };

    let metrics = device.metrics();
    metrics.add_pages(pages);
    match outcome {
        Ok(()) => {
            metrics.inc_scans_completed();
            info!("Job {} on {} completed with {} page(s)", job.job_number(), device.name(), pages);
            device.finish_scan(&job, Ok(())).await;
        }
        Err(e) => {
            metrics.inc_scans_failed();
            warn!("Job {} on {} failed: {}", job.job_number(), device.name(), e);
            device.finish_scan(&job, Err(e.to_string())).await;
        }
    }
}

fn capture_pages(session: &SharedSession, quality: u8, tx: &mpsc::Sender<String>) -> Result<(), CaptureError> {
    let mut guard = lock_session(session);
    let s = guard.handle();

    let source = read_options(s)?.into_iter().find(|o| o.identifier == SOURCE_OPTION);
    let flatbed = match source {
        Some(opt) => match opt.value.as_ref().and_then(|v| v.as_text()) {
            Some(value) => value.eq_ignore_ascii_case(FLATBED_SOURCE),
            None => true,
        },
        None => {
            warn!("Device has no {} option, capturing a single page", SOURCE_OPTION);
            true
        }
    };

    if flatbed {
        let image = s.scan()?;
        send_page(tx, encode_page(&image, quality)?)?;
        return Ok(());
    }

    let mut captured = 0usize;
    for image in s.multi_scan() {
        let image = match image {
            Ok(image) => image,
            // An emptied feeder ends the batch once something was captured
            Err(BackendError::NoDocuments) if captured > 0 => break,
            Err(e) => return Err(e.into()),
        };
        send_page(tx, encode_page(&image, quality)?)?;
        captured += 1;
    }
    Ok(())
}

fn send_page(tx: &mpsc::Sender<String>, page: String) -> Result<(), CaptureError> {
    tx.blocking_send(page).map_err(|_| CaptureError::Aborted("job no longer accepts pages".into()))
}
