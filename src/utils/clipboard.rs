//! Cross-platform clipboard utilities.
//!
//! Copies the handshake blob to the system clipboard by piping it into the
//! platform's clipboard tool. Failure here is never fatal — the blob is
//! always printed to the terminal as well.

use std::io::Write;
use std::process::{Command, Stdio};

/// Copy text to the system clipboard.
///
/// Returns `true` on success. Tools tried per platform:
/// - Windows: `clip`
/// - macOS: `pbcopy`
/// - Linux/BSD: `xclip`, then `wl-copy`
pub fn copy_to_clipboard(text: &str) -> bool {
    candidates()
        .iter()
        .any(|(cmd, args)| pipe_into(cmd, args, text).is_ok())
}

#[cfg(windows)]
fn candidates() -> &'static [(&'static str, &'static [&'static str])] {
    &[("clip", &[])]
}

#[cfg(target_os = "macos")]
fn candidates() -> &'static [(&'static str, &'static [&'static str])] {
    &[("pbcopy", &[])]
}

#[cfg(all(not(windows), not(target_os = "macos")))]
fn candidates() -> &'static [(&'static str, &'static [&'static str])] {
    &[
        ("xclip", &["-selection", "clipboard"]),
        ("wl-copy", &[]),
    ]
}

fn pipe_into(cmd: &str, args: &[&str], text: &str) -> std::io::Result<()> {
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(text.as_bytes())?;
    }
    let status = child.wait()?;
    if !status.success() {
        return Err(std::io::Error::other(format!("{cmd} exited with {status}")));
    }
    Ok(())
}
