//! Sender pipeline: stream a file or directory archive over the data
//! channel in fixed-size chunks.
//!
//! Sends are strictly sequential; the transport preserves message
//! boundaries and order, and backpressure is applied by watching the
//! channel's buffered amount against a high-water mark. The channel is
//! closed immediately on EOF — the receiver drains whatever SCTP has
//! buffered before its close callback fires.

use crate::core::archive::{self, ArchiveOptions};
use crate::core::config::{BACKPRESSURE_POLL_INTERVAL, CHUNK_SIZE, DC_BUFFERED_AMOUNT_HIGH};
use crate::core::transfer::checksum::ChecksumReader;
use crate::core::transfer::progress::{
    format_duration, format_size, format_speed, Progress, ProgressRenderer,
};
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

/// What a completed send looked like.
#[derive(Debug)]
pub struct SendSummary {
    pub label: String,
    pub bytes_sent: u64,
    pub elapsed: Duration,
    pub checksum: String,
}

/// Stream `source` over the open channel. Directories are archived into an
/// in-memory tar.gz first; files stream straight from disk.
pub async fn send_source(
    dc: &Arc<RTCDataChannel>,
    source: &Path,
    is_directory: bool,
    total: u64,
) -> Result<SendSummary> {
    debug!(event = "channel_open", label = %dc.label(), id = dc.id());

    let (reader, total): (Box<dyn Read + Send>, u64) = if is_directory {
        info!(event = "archive_create_start", path = %source.display());
        let src = source.to_path_buf();
        let buf = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut buf = Vec::new();
            archive::create_tar_gz(&mut buf, &src, &ArchiveOptions::default())?;
            Ok(buf)
        })
        .await
        .context("archive task panicked")?
        .context("failed to create archive")?;
        info!(event = "archive_created", bytes = buf.len());
        let len = buf.len() as u64;
        (Box::new(Cursor::new(buf)), len)
    } else {
        let file =
            File::open(source).with_context(|| format!("failed to open {}", source.display()))?;
        (Box::new(file), total)
    };

    let mut reader = ChecksumReader::new(reader);
    let progress = Arc::new(Progress::new(total));
    let renderer = ProgressRenderer::spawn("Sending", Arc::clone(&progress));

    // One reusable chunk buffer for the whole transfer.
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let send_result = async {
        loop {
            let n = reader.read(&mut chunk).context("failed reading source")?;
            if n == 0 {
                break;
            }
            wait_for_buffer_space(dc, n).await?;
            dc.send(&Bytes::copy_from_slice(&chunk[..n]))
                .await
                .context("send failed")?;
            progress.update(n as u64);
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    renderer.finish().await;
    let close_result = dc.close().await;

    send_result?;
    close_result.context("failed to close data channel")?;

    let elapsed = progress.elapsed();
    info!(
        event = "send_complete",
        bytes = reader.bytes_read(),
        elapsed_ms = elapsed.as_millis() as u64
    );

    Ok(SendSummary {
        label: dc.label().to_owned(),
        bytes_sent: reader.bytes_read(),
        elapsed,
        checksum: reader.sum_hex(),
    })
}

/// Suspend until the SCTP send buffer has room for the next message.
async fn wait_for_buffer_space(dc: &Arc<RTCDataChannel>, next_msg_size: usize) -> Result<()> {
    loop {
        if dc.ready_state() == RTCDataChannelState::Closed {
            bail!("data channel '{}' closed during send", dc.label());
        }
        if dc.buffered_amount().await as usize + next_msg_size <= DC_BUFFERED_AMOUNT_HIGH {
            return Ok(());
        }
        tokio::time::sleep(BACKPRESSURE_POLL_INTERVAL).await;
    }
}

pub fn print_send_summary(summary: &SendSummary) {
    let secs = summary.elapsed.as_secs_f64();
    let avg = if secs > 0.0 {
        summary.bytes_sent as f64 / secs
    } else {
        0.0
    };
    println!();
    println!("Sent transfer complete");
    println!("File size: {}", format_size(summary.bytes_sent));
    println!(
        "Time: {}, Avg: {}",
        format_duration(summary.elapsed),
        format_speed(avg)
    );
    debug!(event = "send_checksum", label = %summary.label, sha256 = %summary.checksum);
}
