//! Tar.gz bridge for directory transfers.
//!
//! `create_tar_gz` walks a directory into a gzip-compressed tar stream with
//! forward-slash relative paths; `extract_tar_gz` unpacks one, refusing any
//! entry whose path is absolute, carries a drive letter, or contains `..`.

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use glob::Pattern;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Builder, EntryType, Header};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Archive creation/extraction behavior.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Glob patterns to skip, matched against both the entry basename and
    /// its full relative path.
    pub exclude_patterns: Vec<String>,
    /// Follow symbolic links instead of archiving them as links.
    pub follow_symlinks: bool,
    /// Preserve file permissions and timestamps on extraction.
    pub preserve_permissions: bool,
    /// Gzip level 1-9; 0 means the library default.
    pub compression_level: u32,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            exclude_patterns: Vec::new(),
            follow_symlinks: false,
            preserve_permissions: true,
            compression_level: 0,
        }
    }
}

impl ArchiveOptions {
    fn compression(&self) -> Compression {
        match self.compression_level {
            1..=9 => Compression::new(self.compression_level),
            _ => Compression::default(),
        }
    }
}

/// True when `path` names a directory.
pub fn is_directory(path: &Path) -> Result<bool> {
    let info =
        std::fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    Ok(info.is_dir())
}

// ── Create ───────────────────────────────────────────────────────────────────

/// Archive `src_path` into `writer` as gzip-compressed tar. Returns the
/// number of content bytes written (file payloads, before compression).
pub fn create_tar_gz<W: Write>(writer: W, src_path: &Path, opts: &ArchiveOptions) -> Result<u64> {
    let src_info = std::fs::metadata(src_path)
        .with_context(|| format!("source path error: {}", src_path.display()))?;

    let gz = GzEncoder::new(writer, opts.compression());
    let mut tar = Builder::new(gz);
    tar.follow_symlinks(opts.follow_symlinks);

    let mut bytes_written: u64 = 0;

    if !src_info.is_dir() {
        // A single file archives under its basename.
        let name = src_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".into());
        tar.append_path_with_name(src_path, &name)
            .with_context(|| format!("failed to archive {}", src_path.display()))?;
        bytes_written += src_info.len();
        finish(tar)?;
        return Ok(bytes_written);
    }

    let excludes = compile_patterns(&opts.exclude_patterns)?;
    let mut walker = WalkDir::new(src_path)
        .follow_links(opts.follow_symlinks)
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.context("directory walk error")?;
        let path = entry.path();
        let rel = match path.strip_prefix(src_path) {
            Ok(r) if !r.as_os_str().is_empty() => r,
            _ => continue, // the root itself
        };
        let rel_name = slash_path(rel);

        if is_excluded(&rel_name, &excludes) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            debug!(event = "archive_exclude", path = %rel_name);
            continue;
        }

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            // Only reachable when not following links.
            append_symlink(&mut tar, path, &rel_name)?;
        } else if file_type.is_dir() {
            tar.append_path_with_name(path, format!("{rel_name}/"))
                .with_context(|| format!("failed to archive dir {}", path.display()))?;
        } else {
            tar.append_path_with_name(path, &rel_name)
                .with_context(|| format!("failed to archive {}", path.display()))?;
            bytes_written += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }

    finish(tar)?;
    Ok(bytes_written)
}

fn finish<W: Write>(tar: Builder<GzEncoder<W>>) -> Result<()> {
    let gz = tar.into_inner().context("tar close error")?;
    gz.finish().context("gzip close error")?;
    Ok(())
}

fn append_symlink<W: Write>(tar: &mut Builder<W>, path: &Path, rel_name: &str) -> Result<()> {
    let target = std::fs::read_link(path)
        .with_context(|| format!("readlink error: {}", path.display()))?;
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Symlink);
    header.set_size(0);
    header.set_mode(0o777);
    tar.append_link(&mut header, rel_name, &target)
        .with_context(|| format!("failed to archive symlink {}", path.display()))?;
    Ok(())
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).with_context(|| format!("bad exclude pattern {p:?}")))
        .collect()
}

fn is_excluded(rel_name: &str, patterns: &[Pattern]) -> bool {
    let base = rel_name.rsplit('/').next().unwrap_or(rel_name);
    patterns
        .iter()
        .any(|p| p.matches(base) || p.matches(rel_name))
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// ── Extract ──────────────────────────────────────────────────────────────────

/// Unpack a gzip-compressed tar stream under `dest_path`. Entry paths are
/// validated before anything touches the filesystem; unsupported entry
/// types are skipped.
pub fn extract_tar_gz<R: Read>(reader: R, dest_path: &Path, opts: &ArchiveOptions) -> Result<()> {
    let gz = GzDecoder::new(reader);
    let mut archive = tar::Archive::new(gz);

    for entry in archive.entries().context("tar read error")? {
        let mut entry = entry.context("tar read error")?;
        let raw_path = entry.path().context("tar entry path error")?.into_owned();

        if !is_valid_entry_path(&raw_path) {
            bail!("invalid path in archive: {}", raw_path.display());
        }
        let target = dest_path.join(&raw_path);

        if let Some(parent) = target.parent() {
            create_dir_all_mode(parent, 0o750)?;
        }

        let header = entry.header();
        match header.entry_type() {
            EntryType::Directory => {
                let mode = if opts.preserve_permissions {
                    header.mode().unwrap_or(0o750)
                } else {
                    0o750
                };
                create_dir_all_mode(&target, mode)?;
            }
            EntryType::Regular => {
                let mode = if opts.preserve_permissions {
                    header.mode().unwrap_or(0o600)
                } else {
                    0o600
                };
                let mtime = header.mtime().unwrap_or(0);
                extract_file(&mut entry, &target, mode, mtime, opts.preserve_permissions)?;
            }
            EntryType::Symlink => {
                let link = header
                    .link_name()
                    .context("tar symlink target error")?
                    .map(|l| l.into_owned());
                match link {
                    Some(link) => extract_symlink(&target, &link)?,
                    None => warn!(event = "archive_symlink_missing_target", path = %raw_path.display()),
                }
            }
            other => {
                debug!(event = "archive_skip_entry", entry_type = ?other, path = %raw_path.display());
            }
        }
    }

    Ok(())
}

fn extract_file<R: Read>(
    entry: &mut R,
    target: &Path,
    mode: u32,
    mtime: u64,
    preserve: bool,
) -> Result<()> {
    let mut file = open_with_mode(target, mode)
        .with_context(|| format!("create file error: {}", target.display()))?;
    std::io::copy(entry, &mut file)
        .with_context(|| format!("write file error: {}", target.display()))?;
    drop(file);

    if preserve && mtime > 0 {
        let t = filetime::FileTime::from_unix_time(mtime as i64, 0);
        // Timestamp restore is best-effort.
        let _ = filetime::set_file_times(target, t, t);
    }
    Ok(())
}

#[cfg(unix)]
fn open_with_mode(path: &Path, mode: u32) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
}

#[cfg(not(unix))]
fn open_with_mode(path: &Path, _mode: u32) -> std::io::Result<File> {
    File::create(path)
}

#[cfg(unix)]
fn create_dir_all_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    if path.is_dir() {
        return Ok(());
    }
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .with_context(|| format!("mkdir error: {}", path.display()))
}

#[cfg(not(unix))]
fn create_dir_all_mode(path: &Path, _mode: u32) -> Result<()> {
    std::fs::create_dir_all(path).with_context(|| format!("mkdir error: {}", path.display()))
}

#[cfg(unix)]
fn extract_symlink(target: &Path, link: &Path) -> Result<()> {
    let _ = std::fs::remove_file(target);
    std::os::unix::fs::symlink(link, target)
        .with_context(|| format!("create symlink error: {}", target.display()))
}

#[cfg(not(unix))]
fn extract_symlink(target: &Path, link: &Path) -> Result<()> {
    warn!(event = "archive_symlink_unsupported", target = %target.display(), link = %link.display());
    Ok(())
}

/// Reject entry paths that could land outside the destination: absolute
/// paths, drive letters, or any `..` segment.
fn is_valid_entry_path(path: &Path) -> bool {
    let s = path.to_string_lossy();
    if s.is_empty() || s.starts_with('/') || s.contains("..") {
        return false;
    }
    if s.len() >= 2 && s.as_bytes()[1] == b':' {
        return false;
    }
    path.components().all(|c| matches!(c, Component::Normal(_)))
}
