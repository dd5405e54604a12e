//! Handshake I/O: emitting the local signal blob and reading the remote one.
//!
//! The blob is plain ASCII written on its own line — never wrapped in box
//! drawing or other decoration — so copy-paste out of an SSH session
//! preserves it byte-for-byte. Reading accepts stdin (until EOF or a blank
//! line after content) or a file path polled until it turns non-empty.

use crate::core::config::SIGNAL_POLL_INTERVAL;
use crate::utils::clipboard;
use anyhow::{bail, Context, Result};
use crossterm::tty::IsTty;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Where the local signal goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalSink {
    Stdout,
    File(PathBuf),
}

impl SignalSink {
    /// `None` or `-` means stdout.
    pub fn parse(arg: Option<&str>) -> Self {
        match arg {
            None | Some("-") | Some("") => SignalSink::Stdout,
            Some(path) => SignalSink::File(PathBuf::from(path)),
        }
    }
}

/// Where the remote signal comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalSource {
    Stdin,
    File(PathBuf),
}

impl SignalSource {
    /// `None` or `-` means stdin.
    pub fn parse(arg: Option<&str>) -> Self {
        match arg {
            None | Some("-") | Some("") => SignalSource::Stdin,
            Some(path) => SignalSource::File(PathBuf::from(path)),
        }
    }
}

/// Write the local signal blob to its sink. In interactive stdout mode the
/// blob is additionally offered to the system clipboard; clipboard failure
/// is only a warning.
pub fn emit_signal(blob: &str, sink: &SignalSink, copy_to_clipboard: bool) -> Result<()> {
    match sink {
        SignalSink::Stdout => {
            println!("Your connection signal:");
            println!();
            println!("{blob}");
            println!();

            if copy_to_clipboard && std::io::stdout().is_tty() {
                if clipboard::copy_to_clipboard(blob) {
                    eprintln!("Copied to clipboard.");
                } else {
                    warn!(event = "clipboard_unavailable");
                    eprintln!("Clipboard unavailable; copy manually.");
                }
            }
        }
        SignalSink::File(path) => {
            std::fs::write(path, format!("{blob}\n"))
                .with_context(|| format!("failed to write signal to {}", path.display()))?;
            debug!(event = "signal_written", path = %path.display());
        }
    }
    Ok(())
}

/// Read the remote signal blob from its source.
///
/// Stdin mode blocks until EOF or a blank line following pasted content.
/// File mode polls every 100 ms until the file exists and is non-empty, or
/// the timeout expires.
pub async fn read_remote_signal(source: &SignalSource, timeout: Duration) -> Result<String> {
    match source {
        SignalSource::Stdin => read_from_stdin().await,
        SignalSource::File(path) => {
            let deadline = Instant::now() + timeout;
            loop {
                if let Ok(content) = tokio::fs::read_to_string(path).await {
                    let trimmed = content.trim();
                    if !trimmed.is_empty() {
                        debug!(event = "signal_read", path = %path.display());
                        return Ok(trimmed.to_string());
                    }
                }
                if Instant::now() >= deadline {
                    bail!(
                        "timed out after {:?} waiting for remote signal at {}",
                        timeout,
                        path.display()
                    );
                }
                tokio::time::sleep(SIGNAL_POLL_INTERVAL).await;
            }
        }
    }
}

async fn read_from_stdin() -> Result<String> {
    println!("Paste the peer signal and press Enter (Ctrl+D also works).");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut collected = String::new();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            if collected.is_empty() {
                continue; // ignore leading blank lines
            }
            break; // blank line after content ends the paste
        }
        collected.push_str(line);
    }

    if collected.is_empty() {
        bail!("no signal received on stdin");
    }
    Ok(collected)
}
