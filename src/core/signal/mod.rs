//! Handshake signal: model types and the two blob codecs.
//!
//! A [`Signal`] carries everything a peer needs to bring the tunnel up:
//! ICE parameters and candidates, the DTLS role and certificate
//! fingerprint, and the SCTP capabilities. It crosses between peers as a
//! single base64 blob over any trusted side channel (terminal copy-paste,
//! chat, carrier pigeon).
//!
//! Two encodings coexist:
//! - **HTCP** (HyperTunnel Compact Protocol, [`compact`]) — the compact
//!   binary layout new peers emit. Base64 of it always starts with `SA`.
//! - **JSON** — the legacy layout (base64 of a JSON object, starts with
//!   `ey`), kept for interop with older senders.
//!
//! [`decode`] sniffs the prefix and dispatches; [`encode`] emits HTCP and
//! only falls back to JSON if compact encoding fails.

pub mod compact;
pub mod exchange;
pub mod role;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use compact::SignalError;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ── Model ────────────────────────────────────────────────────────────────────

/// Everything exchanged out-of-band to establish the tunnel.
///
/// Immutable once emitted; constructed once per session after ICE
/// gathering finishes, consumed once on the peer side.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub ice_candidates: Vec<IceCandidate>,
    pub ice_parameters: IceParameters,
    pub dtls_parameters: DtlsParameters,
    pub sctp_capabilities: SctpCapabilities,
}

/// A transport address advertised by ICE for connectivity checks.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub address: String,
    pub protocol: IceProtocol,
    pub port: u16,
    #[serde(rename = "type")]
    pub typ: CandidateType,
    pub component: u16,
    /// Base address for reflexive/relay candidates; empty for host.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub related_address: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub related_port: u16,
}

fn is_zero(p: &u16) -> bool {
    *p == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    #[default]
    Host,
    Srflx,
    Prflx,
    Relay,
}

impl CandidateType {
    /// HTCP wire code (high nibble of the packed type/protocol byte).
    pub fn code(self) -> u8 {
        match self {
            CandidateType::Host => 0,
            CandidateType::Srflx => 1,
            CandidateType::Prflx => 2,
            CandidateType::Relay => 3,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => CandidateType::Srflx,
            2 => CandidateType::Prflx,
            3 => CandidateType::Relay,
            _ => CandidateType::Host,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceProtocol {
    #[default]
    Udp,
    Tcp,
}

impl IceProtocol {
    /// HTCP wire code (low nibble of the packed type/protocol byte).
    pub fn code(self) -> u8 {
        match self {
            IceProtocol::Udp => 1,
            IceProtocol::Tcp => 2,
        }
    }

    pub fn from_code(code: u8) -> Self {
        if code == 2 {
            IceProtocol::Tcp
        } else {
            IceProtocol::Udp
        }
    }
}

/// Local ICE credentials.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    #[serde(default)]
    pub ice_lite: bool,
}

/// DTLS role and certificate fingerprints.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DtlsParameters {
    pub role: DtlsRole,
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// A hash of the DTLS certificate, binding DTLS to the signaled identity.
/// `value` is colon-separated lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

/// DTLS role. Serialized as its raw byte, both in HTCP and in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum DtlsRole {
    #[default]
    Auto,
    Client,
    Server,
}

impl From<u8> for DtlsRole {
    fn from(v: u8) -> Self {
        match v {
            2 => DtlsRole::Client,
            3 => DtlsRole::Server,
            _ => DtlsRole::Auto,
        }
    }
}

impl From<DtlsRole> for u8 {
    fn from(r: DtlsRole) -> Self {
        match r {
            DtlsRole::Auto => 1,
            DtlsRole::Client => 2,
            DtlsRole::Server => 3,
        }
    }
}

/// SCTP association limits. `max_message_size` of 0 means "transport
/// default".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SctpCapabilities {
    pub max_message_size: u32,
}

// ── Codec dispatch ───────────────────────────────────────────────────────────

/// Encode a signal for out-of-band exchange. Emits HTCP; falls back to the
/// JSON encoding if the compact encoder rejects the signal.
pub fn encode(signal: &Signal) -> Result<String, SignalError> {
    match compact::encode_compact(signal) {
        Ok(blob) => {
            debug!(event = "signal_encoded", format = "htcp", chars = blob.len());
            Ok(blob)
        }
        Err(e) => {
            debug!(event = "compact_encode_fallback", %e, "falling back to JSON");
            encode_json(signal)
        }
    }
}

/// Encode a signal as base64-wrapped JSON (legacy format).
pub fn encode_json(signal: &Signal) -> Result<String, SignalError> {
    let json = serde_json::to_vec(signal)?;
    Ok(STANDARD.encode(json))
}

/// Decode a signal blob, auto-detecting the format: HTCP blobs start with
/// `SA` (base64 of the `H` magic), JSON blobs with `ey` (base64 of `{`).
pub fn decode(input: &str) -> Result<Signal, SignalError> {
    let input = input.trim();
    if compact::is_compact_format(input) {
        debug!(event = "signal_decode", format = "htcp");
        return compact::decode_compact(input);
    }
    debug!(event = "signal_decode", format = "json");
    let bytes = STANDARD.decode(input)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
pub(crate) fn test_signal() -> Signal {
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
