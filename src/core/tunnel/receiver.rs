//! Receiver pipeline: accept the peer's data channel, classify file vs
//! archive by its label, and write or extract the payload.
//!
//! The on-data-channel handler is installed on the SCTP transport before
//! the signal exchange, so the channel the sender opens is never missed.
//! All terminal outcomes (completed, declined, failed) flow back to the
//! foreground task over an mpsc channel — nothing exits from inside a
//! transport callback.

use crate::core::archive::{self, ArchiveOptions};
use crate::core::transfer::checksum::ChecksumWriter;
use crate::core::transfer::metadata;
use crate::core::transfer::progress::{
    format_duration, format_size, format_speed, Progress, ProgressRenderer,
};
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::sctp_transport::RTCSctpTransport;

// ── Configuration & outcomes ─────────────────────────────────────────────────

/// Receiver behavior, passed into the on-data-channel handler.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Accept transfers and overwrite existing targets without prompting.
    pub auto_accept: bool,
}

/// Terminal result of one incoming channel, reported to the main task.
#[derive(Debug)]
pub enum ReceiveOutcome {
    Completed(ReceiveSummary),
    /// The user said no; the channel is ignored and the session keeps
    /// waiting.
    Declined,
    Failed(String),
}

#[derive(Debug)]
pub struct ReceiveSummary {
    pub name: String,
    pub bytes: u64,
    pub elapsed: Duration,
    pub checksum: Option<String>,
}

// ── Handler installation ─────────────────────────────────────────────────────

/// Register the on-data-channel handler on the SCTP transport.
pub fn install_handler(
    sctp: &Arc<RTCSctpTransport>,
    cfg: ReceiverConfig,
    events: mpsc::UnboundedSender<ReceiveOutcome>,
) {
    sctp.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let cfg = cfg.clone();
        let events = events.clone();
        Box::pin(async move {
            if let Err(e) = accept_channel(dc, cfg, events.clone()).await {
                let msg = format!("{e:#}");
                error!(event = "receive_setup_failure", error = %msg);
                let _ = events.send(ReceiveOutcome::Failed(msg));
            }
        })
    }));
}

async fn accept_channel(
    dc: Arc<RTCDataChannel>,
    cfg: ReceiverConfig,
    events: mpsc::UnboundedSender<ReceiveOutcome>,
) -> Result<()> {
    let label = dc.label().to_owned();
    debug!(event = "data_channel", label = %label, id = dc.id());

    let (target, is_archive) = classify_label(&label);
    if target.is_empty() {
        bail!("unusable channel label {label:?}");
    }
    let kind = if is_archive { "directory" } else { "file" };

    // stat Ok ⇒ target exists; NotFound ⇒ no collision; anything else is
    // fatal so permission problems don't get masked.
    let target_exists = match std::fs::metadata(&target) {
        Ok(_) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(e).with_context(|| format!("failed to check existing {target}")),
    };

    if cfg.auto_accept {
        if target_exists {
            debug!(event = "auto_overwrite", target = %target);
        }
    } else {
        info!(event = "prompting_accept", kind, target = %target);
        if !confirm_blocking(&format!("Receive {kind} {target}?")) {
            decline(&events);
            return Ok(());
        }
        if target_exists && !confirm_blocking(&format!("{kind} {target} exists. Overwrite?")) {
            decline(&events);
            return Ok(());
        }
    }

    if is_archive {
        receive_archive(dc, target, events)
    } else {
        receive_file(dc, target, events)
    }
}

/// Derive the output name from the channel label. The label comes from the
/// remote peer, so it is sanitized down to a single path component; a
/// `.tar.gz` suffix selects archive mode and is stripped from the target.
fn classify_label(label: &str) -> (String, bool) {
    let name = metadata::sanitize_filename(label);
    match name.strip_suffix(".tar.gz") {
        Some(dir) => (dir.to_string(), true),
        None => (name, false),
    }
}

fn confirm_blocking(question: &str) -> bool {
    let question = question.to_owned();
    tokio::task::block_in_place(move || crate::utils::prompt::confirm(&question))
}

fn decline(events: &mpsc::UnboundedSender<ReceiveOutcome>) {
    info!(event = "transfer_declined");
    println!("Transfer declined.");
    let _ = events.send(ReceiveOutcome::Declined);
}

/// Recover from a poisoned lock; the sink state is still consistent enough
/// to report an error through the usual path.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ── File mode ────────────────────────────────────────────────────────────────

/// Receive-side write state for a single file channel.
///
/// Generic over the sink so the message/finalize logic is testable without
/// a transport.
struct FileSink<W: Write> {
    writer: Option<ChecksumWriter<W>>,
    first_message: bool,
    expected_size: Option<i64>,
    expected_checksum: Option<String>,
    error: Option<String>,
}

impl<W: Write> FileSink<W> {
    fn new(writer: W) -> Self {
        Self {
            writer: Some(ChecksumWriter::new(writer)),
            first_message: true,
            expected_size: None,
            expected_checksum: None,
            error: None,
        }
    }

    /// Handle one inbound datagram. Returns the number of payload bytes
    /// written (0 for the metadata envelope).
    fn ingest(&mut self, data: &[u8]) -> usize {
        if self.error.is_some() {
            return 0;
        }

        if std::mem::take(&mut self.first_message) && metadata::is_metadata_message(data) {
            self.ingest_metadata(data);
            return 0;
        }

        let Some(writer) = self.writer.as_mut() else {
            return 0;
        };
        match writer.write_all(data) {
            Ok(()) => data.len(),
            Err(e) => {
                self.error = Some(format!("failed to write data: {e}"));
                0
            }
        }
    }

    fn ingest_metadata(&mut self, data: &[u8]) {
        match metadata::unwrap_metadata(data) {
            Ok(meta) => {
                if let Err(e) = meta.validate() {
                    self.error = Some(format!("invalid transfer metadata: {e}"));
                    return;
                }
                debug!(event = "metadata_received", filename = %meta.filename, size = meta.size);
                self.expected_size = Some(meta.size);
                if !meta.checksum.is_empty() {
                    self.expected_checksum = Some(meta.checksum);
                }
            }
            Err(e) => self.error = Some(format!("bad metadata message: {e}")),
        }
    }

    /// Close out the file: flush, then verify size and checksum against
    /// the metadata, when any was sent.
    fn finalize(&mut self) -> Result<(u64, String), String> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let Some(mut writer) = self.writer.take() else {
            return Err("file already finalized".into());
        };
        if let Err(e) = writer.flush() {
            return Err(format!("failed to flush file: {e}"));
        }
        let bytes = writer.bytes_written();
        let sum_hex = writer.sum_hex();
        drop(writer);

        if let Some(expected) = self.expected_size {
            if expected >= 0 && bytes < expected as u64 {
                return Err(format!(
                    "transfer truncated: received {bytes} of {expected} bytes"
                ));
            }
        }
        if let Some(expected) = &self.expected_checksum {
            if !expected.eq_ignore_ascii_case(&sum_hex) {
                return Err(format!(
                    "checksum mismatch: expected {expected}, got {sum_hex}"
                ));
            }
        }
        Ok((bytes, sum_hex))
    }
}

fn receive_file(
    dc: Arc<RTCDataChannel>,
    target: String,
    events: mpsc::UnboundedSender<ReceiveOutcome>,
) -> Result<()> {
    let file = File::create(&target).with_context(|| format!("failed to create {target}"))?;
    let sink = Arc::new(Mutex::new(FileSink::new(file)));

    let progress = Arc::new(Progress::new(0));
    let stop_render = ProgressRenderer::spawn("Receiving", Arc::clone(&progress)).detach();

    {
        let sink = Arc::clone(&sink);
        let progress = Arc::clone(&progress);
        let events = events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let sink = Arc::clone(&sink);
            let progress = Arc::clone(&progress);
            let events = events.clone();
            Box::pin(async move {
                let mut s = lock(&sink);
                let written = s.ingest(&msg.data);
                if let Some(e) = s.error.clone() {
                    // Abort the session instead of writing a corrupt file.
                    error!(event = "receive_write_failure", error = %e);
                    let _ = events.send(ReceiveOutcome::Failed(e));
                    return;
                }
                drop(s);
                progress.update(written as u64);
            })
        }));
    }

    let label = dc.label().to_owned();
    let dc_handle = Arc::clone(&dc);
    dc_handle.on_close(Box::new(move || {
        let sink = Arc::clone(&sink);
        let progress = Arc::clone(&progress);
        let events = events.clone();
        let stop_render = stop_render.clone();
        let target = target.clone();
        let label = label.clone();
        Box::pin(async move {
            let _ = stop_render.send(true);
            debug!(event = "channel_closed", label = %label);

            let outcome = match lock(&sink).finalize() {
                Ok((bytes, sum_hex)) => ReceiveOutcome::Completed(ReceiveSummary {
                    name: target,
                    bytes,
                    elapsed: progress.elapsed(),
                    checksum: Some(sum_hex),
                }),
                Err(e) => ReceiveOutcome::Failed(e),
            };
            let _ = events.send(outcome);
        })
    }));

    Ok(())
}

// ── Archive mode ─────────────────────────────────────────────────────────────

fn receive_archive(
    dc: Arc<RTCDataChannel>,
    target: String,
    events: mpsc::UnboundedSender<ReceiveOutcome>,
) -> Result<()> {
    let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

    let progress = Arc::new(Progress::new(0));
    let stop_render = ProgressRenderer::spawn("Receiving", Arc::clone(&progress)).detach();

    {
        let buffer = Arc::clone(&buffer);
        let progress = Arc::clone(&progress);
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let buffer = Arc::clone(&buffer);
            let progress = Arc::clone(&progress);
            Box::pin(async move {
                let n = msg.data.len();
                lock(&buffer).extend_from_slice(&msg.data);
                progress.update(n as u64);
            })
        }));
    }

    let dc_handle = Arc::clone(&dc);
    dc_handle.on_close(Box::new(move || {
        let buffer = Arc::clone(&buffer);
        let progress = Arc::clone(&progress);
        let events = events.clone();
        let stop_render = stop_render.clone();
        let target = target.clone();
        Box::pin(async move {
            let _ = stop_render.send(true);
            let buf = std::mem::take(&mut *lock(&buffer));
            let total = buf.len() as u64;
            debug!(event = "archive_received", bytes = total);

            let outcome = match extract_archive(buf, &target).await {
                Ok(dest) => {
                    info!(event = "archive_extracted", dest = %dest.display());
                    ReceiveOutcome::Completed(ReceiveSummary {
                        name: target,
                        bytes: total,
                        elapsed: progress.elapsed(),
                        checksum: None,
                    })
                }
                Err(e) => ReceiveOutcome::Failed(format!("{e:#}")),
            };
            let _ = events.send(outcome);
        })
    }));

    Ok(())
}

/// Extract a buffered archive into `<cwd>/<target>/`.
async fn extract_archive(buf: Vec<u8>, target: &str) -> Result<PathBuf> {
    let dest = std::env::current_dir()
        .context("failed to get current directory")?
        .join(target);
    let dest_clone = dest.clone();

    tokio::task::spawn_blocking(move || -> Result<()> {
        std::fs::create_dir_all(&dest_clone)
            .with_context(|| format!("failed to create directory {}", dest_clone.display()))?;
        archive::extract_tar_gz(&buf[..], &dest_clone, &ArchiveOptions::default())
            .context("failed to extract archive")
    })
    .await
    .context("extract task panicked")??;

    Ok(dest)
}

pub fn print_receive_summary(summary: &ReceiveSummary) {
    let secs = summary.elapsed.as_secs_f64();
    let avg = if secs > 0.0 {
        summary.bytes as f64 / secs
    } else {
        0.0
    };
    println!();
    println!("Receive complete");
    println!("File: {} ({})", summary.name, format_size(summary.bytes));
    println!(
        "Time: {}, Avg: {}",
        format_duration(summary.elapsed),
        format_speed(avg)
    );
    if let Some(sum) = &summary.checksum {
        debug!(event = "receive_checksum", sha256 = %sum);
    }
}
