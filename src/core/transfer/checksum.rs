//! SHA-256 checksum streams.
//!
//! Read/write wrappers that tee bytes through a hasher on their way to or
//! from an underlying source/sink, so a transfer's digest is available the
//! moment the last byte moves. The writer hashes only the bytes the inner
//! sink actually accepted.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Wraps a reader, hashing everything read through it.
pub struct ChecksumReader<R> {
    inner: R,
    hasher: Sha256,
    bytes_read: u64,
}

impl<R: Read> ChecksumReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_read: 0,
        }
    }

    /// Digest of all bytes read so far.
    pub fn sum(&self) -> [u8; 32] {
        self.hasher.clone().finalize().into()
    }

    /// Digest as lowercase hex.
    pub fn sum_hex(&self) -> String {
        hex::encode(self.sum())
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl<R: Read> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            self.bytes_read += n as u64;
        }
        Ok(n)
    }
}

/// Wraps a writer, hashing everything accepted by it.
pub struct ChecksumWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes_written: u64,
}

impl<W: Write> ChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_written: 0,
        }
    }

    /// Digest of all bytes written so far.
    pub fn sum(&self) -> [u8; 32] {
        self.hasher.clone().finalize().into()
    }

    /// Digest as lowercase hex.
    pub fn sum_hex(&self) -> String {
        hex::encode(self.sum())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if n > 0 {
            // Hash only what the sink took; a short write must not
            // poison the digest.
            self.hasher.update(&buf[..n]);
            self.bytes_written += n as u64;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ── File helpers ─────────────────────────────────────────────────────────────

/// Stream a file through SHA-256 and return its digest.
pub fn calculate_file_checksum(path: &Path) -> Result<[u8; 32]> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = ChecksumReader::new(file);
    io::copy(&mut reader, &mut io::sink())
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(reader.sum())
}

/// Stream a file through SHA-256 and compare against `expected`.
pub fn verify_file_checksum(path: &Path, expected: &[u8]) -> Result<bool> {
    Ok(calculate_file_checksum(path)?.as_slice() == expected)
}

/// Parse a hex-encoded SHA-256 digest.
pub fn checksum_from_hex(hex_str: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str).context("invalid checksum hex")?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("invalid checksum length: expected 32 bytes, got {len}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // SHA-256 of the empty string / of "Hello, World!".
    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const HELLO_SHA256: &str = "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";

    #[test]
    fn test_reader_matches_direct_hash() {
        let data = b"Hello, World!";
        let mut reader = ChecksumReader::new(&data[..]);
        let mut out = Vec::new();
        io::copy(&mut reader, &mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.bytes_read(), data.len() as u64);
        assert_eq!(reader.sum_hex(), HELLO_SHA256);
    }

    #[test]
    fn test_writer_matches_direct_hash() {
        let mut writer = ChecksumWriter::new(Vec::new());
        writer.write_all(b"Hello, ").unwrap();
        writer.write_all(b"World!").unwrap();
        assert_eq!(writer.bytes_written(), 13);
        assert_eq!(writer.sum_hex(), HELLO_SHA256);
        assert_eq!(writer.into_inner(), b"Hello, World!");
    }

    #[test]
    fn test_empty_stream() {
        let reader = ChecksumReader::new(io::empty());
        assert_eq!(reader.sum_hex(), EMPTY_SHA256);
        let writer = ChecksumWriter::new(Vec::new());
        assert_eq!(writer.sum_hex(), EMPTY_SHA256);
    }

    #[test]
    fn test_running_digest_is_observable_mid_stream() {
        let mut writer = ChecksumWriter::new(Vec::new());
        writer.write_all(b"Hello, World!").unwrap();
        let mid = writer.sum_hex();
        assert_eq!(mid, HELLO_SHA256);
        writer.write_all(b"more").unwrap();
        assert_ne!(writer.sum_hex(), mid);
    }

    /// A sink that accepts at most one byte per call.
    struct Trickle(Vec<u8>);

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf.is_empty() {
                return Ok(0);
            }
            self.0.push(buf[0]);
            Ok(1)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writer_hashes_only_accepted_bytes() {
        let mut writer = ChecksumWriter::new(Trickle(Vec::new()));
        let n = writer.write(b"Hello, World!").unwrap();
        assert_eq!(n, 1);
        assert_eq!(writer.bytes_written(), 1);
        // Digest covers "H" only.
        let mut h = Sha256::new();
        h.update(b"H");
        assert_eq!(writer.sum_hex(), hex::encode(h.finalize()));
    }

    #[test]
    fn test_file_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"Hello, World!").unwrap();

        let sum = calculate_file_checksum(&path).unwrap();
        assert_eq!(hex::encode(sum), HELLO_SHA256);
        assert!(verify_file_checksum(&path, &sum).unwrap());
        assert!(!verify_file_checksum(&path, &[0u8; 32]).unwrap());
    }

    #[test]
    fn test_checksum_from_hex() {
        let sum = checksum_from_hex(HELLO_SHA256).unwrap();
        assert_eq!(hex::encode(sum), HELLO_SHA256);
        assert!(checksum_from_hex("abcd").is_err());
        assert!(checksum_from_hex("not-hex").is_err());
    }
}
