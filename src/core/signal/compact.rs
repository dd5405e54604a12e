//! HyperTunnel Compact Protocol (HTCP): the binary signal codec.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! 'H' | version:1 |
//!   ufrag_len:1 | ufrag:N | pwd_len:1 | pwd:N |
//!   dtls_role:1 | dtls_fingerprint:32 |
//!   cand_count:1 | candidates…
//! ```
//!
//! Each candidate:
//!
//! ```text
//! foundation_len:1 | foundation:N |
//!   priority:4 | addr_len:1 | addr:N | port:2 |
//!   packed:1   (high nibble = type, low nibble = protocol)
//!   [type != host]  rel_addr_len:1 | rel_addr:N | rel_port:2
//! ```
//!
//! The result is wrapped in standard base64, which keeps a multi-candidate
//! signal well under half the size of the JSON encoding — short enough for
//! a single terminal copy-paste. Strings longer than 255 bytes are
//! truncated silently; fingerprints shorter than 32 bytes are zero-padded.

use super::{
    CandidateType, DtlsFingerprint, DtlsParameters, IceCandidate, IceParameters, IceProtocol,
    SctpCapabilities, Signal,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

const HTCP_MAGIC: u8 = b'H';
const HTCP_VERSION: u8 = 1;
const FINGERPRINT_SIZE: usize = 32;

// magic + version + ufrag_len + pwd_len + role + fingerprint + cand_count
const MIN_SIZE: usize = 1 + 1 + 1 + 1 + 1 + FINGERPRINT_SIZE + 1;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("invalid HTCP magic byte")]
    InvalidMagic,
    #[error("unsupported HTCP version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid signal data")]
    InvalidSignal,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid fingerprint hex: {0}")]
    Fingerprint(#[from] hex::FromHexError),
    #[error("invalid JSON signal: {0}")]
    Json(#[from] serde_json::Error),
}

/// True when a base64 blob is in compact format: HTCP starts with `'H'`,
/// which base64-encodes to the prefix `SA`. (JSON blobs start with `ey`.)
pub fn is_compact_format(encoded: &str) -> bool {
    encoded.starts_with("SA")
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Encode a signal into a base64-wrapped HTCP blob.
pub fn encode_compact(signal: &Signal) -> Result<String, SignalError> {
    let mut buf = Vec::with_capacity(128);

    buf.push(HTCP_MAGIC);
    buf.push(HTCP_VERSION);

    put_str(&mut buf, &signal.ice_parameters.username_fragment);
    put_str(&mut buf, &signal.ice_parameters.password);

    buf.push(signal.dtls_parameters.role.into());
    buf.extend_from_slice(&fingerprint_bytes(&signal.dtls_parameters)?);

    let count = signal.ice_candidates.len().min(255);
    buf.push(count as u8);
    for candidate in &signal.ice_candidates[..count] {
        encode_candidate(&mut buf, candidate);
    }

    Ok(STANDARD.encode(buf))
}

fn encode_candidate(buf: &mut Vec<u8>, c: &IceCandidate) {
    put_str(buf, &c.foundation);
    buf.extend_from_slice(&c.priority.to_be_bytes());
    put_str(buf, &c.address);
    buf.extend_from_slice(&c.port.to_be_bytes());

    let packed = (c.typ.code() << 4) | (c.protocol.code() & 0x0f);
    buf.push(packed);

    if c.typ != CandidateType::Host {
        let rel = truncate(c.related_address.as_bytes());
        buf.push(rel.len() as u8);
        if !rel.is_empty() {
            buf.extend_from_slice(rel);
            buf.extend_from_slice(&c.related_port.to_be_bytes());
        }
    }
}

/// First fingerprint as exactly 32 raw bytes: colons stripped, hex decoded,
/// zero-padded or cut to size. All zeroes when no fingerprint is present.
fn fingerprint_bytes(dtls: &DtlsParameters) -> Result<[u8; FINGERPRINT_SIZE], SignalError> {
    let mut out = [0u8; FINGERPRINT_SIZE];
    if let Some(fp) = dtls.fingerprints.first() {
        let mut bytes = hex::decode(fp.value.replace(':', ""))?;
        bytes.resize(FINGERPRINT_SIZE, 0);
        out.copy_from_slice(&bytes[..FINGERPRINT_SIZE]);
    }
    Ok(out)
}

/// Write a length-prefixed string, silently truncated to 255 bytes.
fn put_str(buf: &mut Vec<u8>, s: &str) {
    let bytes = truncate(s.as_bytes());
    buf.push(bytes.len() as u8);
    buf.extend_from_slice(bytes);
}

fn truncate(bytes: &[u8]) -> &[u8] {
    &bytes[..bytes.len().min(255)]
}

// ── Decoding ─────────────────────────────────────────────────────────────────

/// Decode a base64-wrapped HTCP blob back into a [`Signal`].
pub fn decode_compact(encoded: &str) -> Result<Signal, SignalError> {
    let data = STANDARD.decode(encoded.trim())?;

    if data.len() < 2 {
        return Err(SignalError::InvalidSignal);
    }
    if data[0] != HTCP_MAGIC {
        return Err(SignalError::InvalidMagic);
    }
    if data[1] != HTCP_VERSION {
        return Err(SignalError::UnsupportedVersion(data[1]));
    }
    if data.len() < MIN_SIZE {
        return Err(SignalError::InvalidSignal);
    }

    let mut r = Reader::new(&data[2..]);

    let username_fragment = r.read_str()?;
    let password = r.read_str()?;

    let role = r.read_u8()?.into();
    let fingerprint = r.read_bytes(FINGERPRINT_SIZE)?;
    let value = fingerprint
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":");

    let count = r.read_u8()? as usize;
    let mut ice_candidates = Vec::with_capacity(count);
    for _ in 0..count {
        ice_candidates.push(decode_candidate(&mut r)?);
    }

    Ok(Signal {
        ice_candidates,
        ice_parameters: IceParameters {
            username_fragment,
            password,
            ice_lite: false,
        },
        dtls_parameters: DtlsParameters {
            role,
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".into(),
                value,
            }],
        },
        // Compact peers accept the transport default.
        sctp_capabilities: SctpCapabilities {
            max_message_size: 0,
        },
    })
}

fn decode_candidate(r: &mut Reader<'_>) -> Result<IceCandidate, SignalError> {
    let foundation = r.read_str()?;
    let priority = r.read_u32()?;
    let address = r.read_str()?;
    let port = r.read_u16()?;

    let packed = r.read_u8()?;
    let typ = CandidateType::from_code((packed >> 4) & 0x0f);
    let protocol = IceProtocol::from_code(packed & 0x0f);

    let mut related_address = String::new();
    let mut related_port = 0;
    if typ != CandidateType::Host {
        let rel_len = r.read_u8()? as usize;
        if rel_len > 0 {
            related_address = String::from_utf8_lossy(r.read_bytes(rel_len)?).into_owned();
            related_port = r.read_u16()?;
        }
    }

    Ok(IceCandidate {
        foundation,
        priority,
        address,
        protocol,
        port,
        typ,
        component: 1, // always 1 for data channels
        related_address,
        related_port,
    })
}

/// Bounds-checked cursor over the decoded payload. Every accessor verifies
/// the remaining length before slicing.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], SignalError> {
        let end = self.pos.checked_add(n).ok_or(SignalError::InvalidSignal)?;
        if end > self.data.len() {
            return Err(SignalError::InvalidSignal);
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, SignalError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, SignalError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, SignalError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_str(&mut self) -> Result<String, SignalError> {
        let len = self.read_u8()? as usize;
        Ok(String::from_utf8_lossy(self.read_bytes(len)?).into_owned())
    }
}
