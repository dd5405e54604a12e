//! Transfer progress tracking.
//!
//! [`Progress`] is a lock-free counter shared between the byte-moving loop
//! (writer) and the progress-line renderer (reader). Updates are atomic
//! adds; snapshots never observe a decrease.

use crate::core::config::PROGRESS_RENDER_INTERVAL;
use crossterm::tty::IsTty;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Thread-safe progress counter for a single transfer.
pub struct Progress {
    total_bytes: u64,
    transferred: AtomicU64,
    start: Instant,
}

/// A consistent snapshot of transfer metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressMetrics {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    /// Completion percentage, clamped to 0–100. 0 when the total is unknown.
    pub percentage: f64,
    pub bytes_per_second: f64,
    pub eta: Duration,
    pub elapsed: Duration,
}

impl Progress {
    /// Create a tracker for a transfer of `total_bytes` (0 = unknown).
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            transferred: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    /// Add `n` transferred bytes. `n = 0` is a no-op.
    pub fn update(&self, n: u64) {
        if n > 0 {
            self.transferred.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// True when the transfer is done, or when the total is unknown.
    pub fn is_complete(&self) -> bool {
        self.total_bytes == 0 || self.transferred_bytes() >= self.total_bytes
    }

    /// Snapshot all metrics at once.
    pub fn metrics(&self) -> ProgressMetrics {
        let transferred = self.transferred_bytes();
        let elapsed = self.elapsed();
        let secs = elapsed.as_secs_f64();

        let percentage = if self.total_bytes > 0 {
            (transferred as f64 / self.total_bytes as f64 * 100.0).min(100.0)
        } else {
            0.0
        };

        let bytes_per_second = if secs > 0.0 && transferred > 0 {
            transferred as f64 / secs
        } else {
            0.0
        };

        let eta = if bytes_per_second > 0.0 && transferred < self.total_bytes {
            let remaining = (self.total_bytes - transferred) as f64;
            Duration::from_secs_f64(remaining / bytes_per_second)
        } else {
            Duration::ZERO
        };

        ProgressMetrics {
            total_bytes: self.total_bytes,
            transferred_bytes: transferred,
            percentage,
            bytes_per_second,
            eta,
            elapsed,
        }
    }
}

// ── Formatting helpers ───────────────────────────────────────────────────────

/// Format a byte count with decimal units (KB = 1000 B).
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1000;
    const MB: u64 = 1000 * KB;
    const GB: u64 = 1000 * MB;
    const TB: u64 = 1000 * GB;

    match bytes {
        b if b >= TB => format!("{:.1} TB", b as f64 / TB as f64),
        b if b >= GB => format!("{:.1} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{b} B"),
    }
}

/// Format a transfer speed in bytes per second.
pub fn format_speed(bytes_per_second: f64) -> String {
    format!("{}/s", format_size(bytes_per_second as u64))
}

/// Format a duration as `HH:MM:SS`.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

/// One-line progress display, e.g.
/// `Sending [42.0%] 4.2 MB / 10.0 MB | 1.3 MB/s | ETA: 00:00:04`.
pub fn format_progress_line(prefix: &str, m: &ProgressMetrics) -> String {
    if m.total_bytes > 0 {
        format!(
            "{} [{:.1}%] {} / {} | {} | ETA: {}",
            prefix,
            m.percentage,
            format_size(m.transferred_bytes),
            format_size(m.total_bytes),
            format_speed(m.bytes_per_second),
            format_duration(m.eta),
        )
    } else {
        format!(
            "{} {} | {}",
            prefix,
            format_size(m.transferred_bytes),
            format_speed(m.bytes_per_second),
        )
    }
}

// ── Renderer ─────────────────────────────────────────────────────────────────

/// Background task that redraws a progress line on a TTY every ~200 ms.
///
/// Does nothing when stdout is not a terminal, so piped output stays clean.
pub struct ProgressRenderer {
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressRenderer {
    pub fn spawn(prefix: &'static str, progress: Arc<Progress>) -> Self {
        let (stop, mut stopped) = watch::channel(false);

        let handle = tokio::spawn(async move {
            if !std::io::stdout().is_tty() {
                return;
            }
            let mut ticker = tokio::time::interval(PROGRESS_RENDER_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let line = format_progress_line(prefix, &progress.metrics());
                        print!("\r{line}");
                        let _ = std::io::stdout().flush();
                    }
                    _ = stopped.changed() => {
                        let line = format_progress_line(prefix, &progress.metrics());
                        println!("\r{line}");
                        return;
                    }
                }
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Draw the final line and wait for the render task to finish.
    pub async fn finish(mut self) {
        let _ = self.stop.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Hand back a clonable stop handle and let the render task run
    /// unsupervised. Used where the renderer must be finished from inside
    /// an event callback that cannot own it.
    pub fn detach(mut self) -> watch::Sender<bool> {
        self.handle.take();
        self.stop.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_update_and_percentage() {
        let p = Progress::new(200);
        assert_eq!(p.metrics().percentage, 0.0);
        p.update(50);
        assert_eq!(p.metrics().percentage, 25.0);
        p.update(0); // no-op
        assert_eq!(p.transferred_bytes(), 50);
        p.update(300);
        assert_eq!(p.metrics().percentage, 100.0);
    }

    #[test]
    fn test_unknown_total() {
        let p = Progress::new(0);
        p.update(1234);
        let m = p.metrics();
        assert_eq!(m.percentage, 0.0);
        assert_eq!(m.eta, Duration::ZERO);
        assert!(p.is_complete());
    }

    #[test]
    fn test_is_complete() {
        let p = Progress::new(10);
        assert!(!p.is_complete());
        p.update(10);
        assert!(p.is_complete());
    }

    #[test]
    fn test_concurrent_updates_are_monotonic() {
        let p = Arc::new(Progress::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let p = Arc::clone(&p);
            handles.push(thread::spawn(move || {
                let mut last = 0;
                for _ in 0..1000 {
                    p.update(1);
                    let seen = p.transferred_bytes();
                    assert!(seen >= last);
                    last = seen;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(p.transferred_bytes(), 4000);
    }

    #[test]
    fn test_format_size_decimal() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(999), "999 B");
        assert_eq!(format_size(1000), "1.0 KB");
        assert_eq!(format_size(1500), "1.5 KB");
        assert_eq!(format_size(1_000_000), "1.0 MB");
        assert_eq!(format_size(2_500_000_000), "2.5 GB");
        assert_eq!(format_size(3_000_000_000_000), "3.0 TB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(1500.0), "1.5 KB/s");
        assert_eq!(format_speed(0.0), "0 B/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_duration(Duration::from_secs(61)), "00:01:01");
        assert_eq!(format_duration(Duration::from_secs(3661)), "01:01:01");
        assert_eq!(format_duration(Duration::from_secs(90_000)), "25:00:00");
    }

    #[test]
    fn test_progress_line_known_total() {
        let p = Progress::new(1000);
        p.update(500);
        let line = format_progress_line("Sending", &p.metrics());
        assert!(line.starts_with("Sending [50.0%] 500 B / 1.0 KB"), "{line}");
    }

    #[test]
    fn test_progress_line_unknown_total() {
        let p = Progress::new(0);
        p.update(500);
        let line = format_progress_line("Receiving", &p.metrics());
        assert!(line.starts_with("Receiving 500 B"), "{line}");
        assert!(!line.contains('%'));
    }
}
