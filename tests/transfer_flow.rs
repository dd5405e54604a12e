//! Cross-module flows exercised the way the pipelines drive them: archive a
//! tree into the sender's in-memory buffer, chunk it like the data channel
//! would, reassemble on the receiving side, extract, and verify bytes.

use hypertunnel::core::archive::{create_tar_gz, extract_tar_gz, ArchiveOptions};
use hypertunnel::core::crypto;
use hypertunnel::core::signal::{self, compact};
use hypertunnel::core::transfer::checksum::{calculate_file_checksum, ChecksumReader};
use hypertunnel::core::transfer::metadata::Metadata;
use std::fs;
use std::io::Read;
use std::path::Path;

const CHUNK_SIZE: usize = 65534;

fn write(path: &Path, content: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Split a payload into data-channel sized messages.
fn chunks(data: &[u8]) -> Vec<Vec<u8>> {
    data.chunks(CHUNK_SIZE).map(|c| c.to_vec()).collect()
}

#[test]
fn directory_transfer_reproduces_tree() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("testdir");
    write(&src.join("file1.txt"), b"Hello, World!");
    write(&src.join("subdir/file2.txt"), b"Test content");
    write(&src.join("subdir2/deep/file5"), b"Deep file");

    // Sender: archive into memory, then stream in chunks.
    let mut archive = Vec::new();
    create_tar_gz(&mut archive, &src, &ArchiveOptions::default()).unwrap();

    // Receiver: accumulate chunks, then extract under a fresh directory.
    let mut received = Vec::new();
    for chunk in chunks(&archive) {
        assert!(chunk.len() <= CHUNK_SIZE);
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, archive);

    let dest = dir.path().join("out/testdir");
    fs::create_dir_all(&dest).unwrap();
    extract_tar_gz(&received[..], &dest, &ArchiveOptions::default()).unwrap();

    assert_eq!(fs::read(dest.join("file1.txt")).unwrap(), b"Hello, World!");
    assert_eq!(fs::read(dest.join("subdir/file2.txt")).unwrap(), b"Test content");
    assert_eq!(fs::read(dest.join("subdir2/deep/file5")).unwrap(), b"Deep file");
}

#[test]
fn large_payload_checksum_survives_chunking() {
    // 256 KiB of deterministic pseudo-random bytes.
    let mut state = 0x1234_5678_u64;
    let data: Vec<u8> = (0..256 * 1024)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect();

    let mut reader = ChecksumReader::new(&data[..]);
    let mut sent = Vec::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        sent.extend_from_slice(&buf[..n]);
    }
    assert_eq!(sent.len(), data.len());

    // Receiver writes the same bytes; digests agree.
    let mut writer = hypertunnel::core::transfer::checksum::ChecksumWriter::new(Vec::new());
    std::io::Write::write_all(&mut writer, &sent).unwrap();
    assert_eq!(writer.sum_hex(), reader.sum_hex());
}

#[test]
fn file_metadata_checksum_matches_disk_digest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payload.bin");
    fs::write(&path, b"Hello, World!").unwrap();

    let meta = Metadata::from_file_with_checksum(&path).unwrap();
    let disk = calculate_file_checksum(&path).unwrap();
    assert_eq!(meta.checksum, hex::encode(disk));
    assert_eq!(meta.size, 13);
}

#[test]
fn signal_blob_fits_a_terminal_line_better_than_json() {
    let s = canonical_signal();
    let compact_blob = signal::encode(&s).unwrap();
    let json_blob = signal::encode_json(&s).unwrap();

    assert!(compact_blob.starts_with("SA"));
    assert!(json_blob.starts_with("ey"));
    assert!(compact_blob.len() * 2 <= json_blob.len());

    // Both decode back to the same signal.
    assert_eq!(signal::decode(&compact_blob).unwrap(), s);
    assert_eq!(signal::decode(&json_blob).unwrap(), s);
}

#[test]
fn compact_blob_round_trips_after_copy_paste_mangling() {
    let s = canonical_signal();
    let blob = compact::encode_compact(&s).unwrap();
    // Terminal paste commonly adds surrounding whitespace and newlines.
    let pasted = format!("\n   {blob}\n\n");
    assert_eq!(signal::decode(&pasted).unwrap(), s);
}

#[test]
fn encrypt_then_transfer_then_decrypt() {
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("secret.txt");
    fs::write(&plain, "the plan: meet at dawn").unwrap();

    let enc = crypto::encrypt_file(&plain, "shared-passphrase", 1024).unwrap();

    // Simulate the transfer of the encrypted file byte-for-byte.
    let payload = fs::read(&enc).unwrap();
    let received = dir.path().join("received.enc");
    fs::write(&received, chunks(&payload).concat()).unwrap();

    let dec = crypto::decrypt_file(&received, "shared-passphrase", 1024).unwrap();
    assert_eq!(fs::read(dec).unwrap(), b"the plan: meet at dawn");
}

fn canonical_signal() -> signal::Signal {
    use hypertunnel::core::signal::*;
    Signal {
        ice_candidates: vec![
            IceCandidate {
                foundation: "3537766002".into(),
                priority: 2130706431,
                address: "192.168.1.100".into(),
                protocol: IceProtocol::Udp,
                port: 31545,
                typ: CandidateType::Host,
                component: 1,
                ..Default::default()
            },
            IceCandidate {
                foundation: "842163049".into(),
                priority: 1694498815,
                address: "203.0.113.42".into(),
                protocol: IceProtocol::Udp,
                port: 54321,
                typ: CandidateType::Srflx,
                component: 1,
                related_address: "192.168.1.100".into(),
                related_port: 31545,
            },
            IceCandidate {
                foundation: "1677722412".into(),
                priority: 33562367,
                address: "198.51.100.5".into(),
                protocol: IceProtocol::Udp,
                port: 3478,
                typ: CandidateType::Relay,
                component: 1,
                related_address: "192.168.1.100".into(),
                related_port: 31545,
            },
        ],
        ice_parameters: IceParameters {
            username_fragment: "GOXteffFpNfkHMrj".into(),
            password: "lceNxPWPURZrbEPXWczKSrsRwIppKSZQ".into(),
            ice_lite: false,
        },
        dtls_parameters: DtlsParameters {
            role: DtlsRole::Client,
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".into(),
                value: "2f:a0:55:de:c2:70:55:aa:ef:6c:af:64:8e:68:90:03:0a:e2:cf:39:8d:a6:5d:ab:c9:fe:0d:b8:d6:aa:82:db".into(),
            }],
        },
        sctp_capabilities: SctpCapabilities { max_message_size: 0 },
    }
}
