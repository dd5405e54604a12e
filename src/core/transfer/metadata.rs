//! Transfer metadata envelope.
//!
//! A JSON blob prefixed with the ASCII marker `HT_META:`, optionally sent as
//! the first data-channel message when semantic file info (size, checksum,
//! mode) is needed beyond what the channel label carries. Filenames from the
//! remote peer are untrusted: [`Metadata::validate`] rejects traversal
//! attempts and [`Metadata::safe_filename`] never yields a name that
//! escapes the receiver's working directory.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Marker prepended to metadata messages to distinguish them from file data.
pub const METADATA_PREFIX: &[u8] = b"HT_META:";

/// Information about the file being transferred.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Name of the file, a single path component.
    pub filename: String,
    /// Size in bytes.
    pub size: i64,
    /// SHA-256 checksum, lowercase hex.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
    /// Unix permission bits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    /// Modification time, seconds since the Unix epoch.
    #[serde(rename = "modtime", default, skip_serializing_if = "Option::is_none")]
    pub mod_time: Option<i64>,
    #[serde(rename = "is_directory", default, skip_serializing_if = "is_false")]
    pub is_directory: bool,
    #[serde(rename = "is_archive", default, skip_serializing_if = "is_false")]
    pub is_archive: bool,
}

fn is_false(b: &bool) -> bool {
    !b
}

impl Metadata {
    pub fn new(filename: impl Into<String>, size: i64) -> Self {
        Self {
            filename: filename.into(),
            size,
            ..Default::default()
        }
    }

    /// Build metadata from an existing regular file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let info = std::fs::metadata(path)
            .with_context(|| format!("failed to stat {}", path.display()))?;
        if info.is_dir() {
            bail!("path is a directory, not a file");
        }
        Ok(Self {
            filename: basename(path),
            size: info.len() as i64,
            mode: file_mode(&info),
            mod_time: mod_time_secs(&info),
            ..Default::default()
        })
    }

    /// Build metadata from a file or directory path. Directories are marked
    /// as archives and get a `.tar.gz` name; their size is filled in later,
    /// once the archive exists.
    pub fn from_path(path: &Path) -> Result<Self> {
        let info = std::fs::metadata(path)
            .with_context(|| format!("failed to stat {}", path.display()))?;

        let mut m = Self {
            filename: basename(path),
            mode: file_mode(&info),
            mod_time: mod_time_secs(&info),
            is_directory: info.is_dir(),
            ..Default::default()
        };

        if info.is_dir() {
            m.is_archive = true;
            if !m.filename.ends_with(".tar.gz") {
                m.filename.push_str(".tar.gz");
            }
        } else {
            m.size = info.len() as i64;
        }
        Ok(m)
    }

    /// Like [`Metadata::from_file`], additionally computing the SHA-256
    /// checksum of the file contents.
    pub fn from_file_with_checksum(path: &Path) -> Result<Self> {
        let mut m = Self::from_file(path)?;
        let sum = super::checksum::calculate_file_checksum(path)
            .context("failed to calculate checksum")?;
        m.checksum = hex::encode(sum);
        Ok(m)
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = checksum.into();
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_mod_time(mut self, mod_time: i64) -> Self {
        self.mod_time = Some(mod_time);
        self
    }

    /// Check that the metadata is safe to act on. Filenames that are empty,
    /// absolute, contain traversal segments, backslashes, or a drive-letter
    /// prefix are rejected.
    pub fn validate(&self) -> Result<()> {
        if self.filename.is_empty() {
            bail!("filename cannot be empty");
        }
        if self.size < 0 {
            bail!("size cannot be negative");
        }
        let f = &self.filename;
        if f.starts_with('/') || Path::new(f).is_absolute() {
            bail!("invalid filename: absolute path not allowed");
        }
        if f.contains("..") {
            bail!("invalid filename: path traversal not allowed");
        }
        if f.contains('\\') {
            bail!("invalid filename: backslashes not allowed");
        }
        if f.len() >= 2 && f.as_bytes()[1] == b':' {
            bail!("invalid filename: absolute path not allowed");
        }
        Ok(())
    }

    /// A sanitized basename, safe to join to the receiver's working
    /// directory even if [`Metadata::validate`] was skipped.
    pub fn safe_filename(&self) -> String {
        sanitize_filename(&self.filename)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("failed to encode metadata")
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            bail!("empty metadata");
        }
        serde_json::from_slice(data).context("failed to decode metadata")
    }

    /// Prefix the JSON encoding with [`METADATA_PREFIX`] for transmission.
    pub fn wrap_for_transfer(&self) -> Result<Vec<u8>> {
        let encoded = self.encode()?;
        let mut out = Vec::with_capacity(METADATA_PREFIX.len() + encoded.len());
        out.extend_from_slice(METADATA_PREFIX);
        out.extend_from_slice(&encoded);
        Ok(out)
    }
}

/// True when `data` carries a metadata envelope.
pub fn is_metadata_message(data: &[u8]) -> bool {
    data.starts_with(METADATA_PREFIX)
}

/// Strip the marker and decode the metadata.
pub fn unwrap_metadata(data: &[u8]) -> Result<Metadata> {
    if !is_metadata_message(data) {
        bail!("not a metadata message");
    }
    Metadata::decode(&data[METADATA_PREFIX.len()..])
}

/// Reduce an untrusted name to a single safe path component.
///
/// Backslashes become separators, drive letters are dropped, and only the
/// last non-dot component survives. Falls back to `unnamed`.
pub fn sanitize_filename(name: &str) -> String {
    let mut s = name.replace('\\', "/");
    if s.len() >= 2 && s.as_bytes()[1] == b':' {
        s.drain(..2);
    }
    let base = s
        .split('/')
        .rev()
        .find(|part| !part.is_empty() && *part != "." && *part != "..");
    match base {
        Some(b) => b.to_string(),
        None => "unnamed".to_string(),
    }
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(unix)]
fn file_mode(info: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(info.permissions().mode())
}

#[cfg(not(unix))]
fn file_mode(_info: &std::fs::Metadata) -> Option<u32> {
    None
}

fn mod_time_secs(info: &std::fs::Metadata) -> Option<i64> {
    info.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_wrap_unwrap_round_trip() {
        let m = Metadata::new("notes.txt", 42)
            .with_checksum("ab".repeat(32))
            .with_mode(0o644)
            .with_mod_time(1_700_000_000);
        let wrapped = m.wrap_for_transfer().unwrap();
        assert!(is_metadata_message(&wrapped));
        assert_eq!(unwrap_metadata(&wrapped).unwrap(), m);
    }

    #[test]
    fn test_is_metadata_message() {
        assert!(is_metadata_message(b"HT_META:{}"));
        assert!(!is_metadata_message(b"HT_MET"));
        assert!(!is_metadata_message(b"random chunk bytes"));
        assert!(!is_metadata_message(b""));
    }

    #[test]
    fn test_unwrap_rejects_non_metadata() {
        assert!(unwrap_metadata(b"just bytes").is_err());
        assert!(unwrap_metadata(b"HT_META:").is_err());
        assert!(unwrap_metadata(b"HT_META:not json").is_err());
    }

    #[test]
    fn test_validate_accepts_plain_names() {
        for name in ["file.txt", "with space.bin", "dir.tar.gz", ".hidden"] {
            assert!(Metadata::new(name, 1).validate().is_ok(), "{name}");
        }
    }

    #[test]
    fn test_validate_rejects_traversal() {
        let bad = [
            "",
            "../etc/passwd",
            "a/../../b",
            "..",
            "/etc/passwd",
            "C:\\Windows\\system32",
            "C:/Windows",
            "dir\\file.txt",
            "ok/../sneaky",
        ];
        for name in bad {
            assert!(Metadata::new(name, 1).validate().is_err(), "{name:?}");
        }
        assert!(Metadata::new("f", -1).validate().is_err());
    }

    #[test]
    fn test_safe_filename() {
        let cases = [
            ("file.txt", "file.txt"),
            ("a/b/c.txt", "c.txt"),
            ("../../../etc/passwd", "passwd"),
            ("/etc/shadow", "shadow"),
            ("C:\\Windows\\evil.exe", "evil.exe"),
            ("dir\\sub\\x", "x"),
            ("..", "unnamed"),
            (".", "unnamed"),
            ("", "unnamed"),
            ("a/..", "a"),
            ("trailing/", "trailing"),
        ];
        for (input, expected) in cases {
            assert_eq!(Metadata::new(input, 0).safe_filename(), expected, "{input:?}");
        }
    }

    #[test]
    fn test_safe_filename_never_escapes_base() {
        let hostile = [
            "../../../etc/passwd",
            "/etc/shadow",
            "C:\\evil",
            "..\\..\\up",
            "a/../../..",
            "....//....//x",
        ];
        let base = PathBuf::from("/tmp/recv");
        for name in hostile {
            let safe = Metadata::new(name, 0).safe_filename();
            let joined = base.join(&safe);
            assert!(joined.starts_with(&base), "{name:?} -> {safe:?}");
            assert!(!safe.contains('/') && !safe.contains('\\'), "{safe:?}");
        }
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![7u8; 100]).unwrap();

        let m = Metadata::from_file(&path).unwrap();
        assert_eq!(m.filename, "data.bin");
        assert_eq!(m.size, 100);
        assert!(!m.is_directory);
        assert!(m.validate().is_ok());

        assert!(Metadata::from_file(dir.path()).is_err());
    }

    #[test]
    fn test_from_path_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("project");
        std::fs::create_dir(&sub).unwrap();

        let m = Metadata::from_path(&sub).unwrap();
        assert!(m.is_directory);
        assert!(m.is_archive);
        assert_eq!(m.filename, "project.tar.gz");
        assert_eq!(m.size, 0);
    }

    #[test]
    fn test_from_file_with_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"Hello, World!").unwrap();

        let m = Metadata::from_file_with_checksum(&path).unwrap();
        assert_eq!(
            m.checksum,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_json_field_names() {
        let m = Metadata::new("f", 1).with_mod_time(5);
        let json = String::from_utf8(m.encode().unwrap()).unwrap();
        assert!(json.contains("\"filename\""), "{json}");
        assert!(json.contains("\"modtime\""), "{json}");
        // Empty/false optionals are omitted.
        assert!(!json.contains("checksum"), "{json}");
        assert!(!json.contains("is_directory"), "{json}");
    }
}
