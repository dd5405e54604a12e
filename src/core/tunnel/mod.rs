//! Transport orchestrator: drives the ICE/DTLS/SCTP lifecycle.
//!
//! One [`Tunnel`] per session. The bring-up sequence is strictly monotonic:
//!
//! ```text
//! Init → Gathering → Gathered → RemoteSignalReceived →
//!      IceStarting → IceStarted → DtlsStarting → DtlsStarted →
//!      SctpStarting → SctpStarted → DataChannelActive → Closed
//! ```
//!
//! There is no retry within a session; any transport failure surfaces the
//! error and ends the process. Transport-library callbacks (gathered
//! candidates, incoming channels, messages, closes) are bridged into mpsc
//! channels consumed by the foreground task, so completion and failure
//! always flow back through `run_sender` / `run_receiver` rather than
//! exiting from inside a callback.

pub mod receiver;
pub mod sender;

use crate::core::config::STUN_SERVER;
use crate::core::signal::exchange::{self, SignalSink, SignalSource};
use crate::core::signal::role::{determine_role_with_dtls, IceRole};
use crate::core::signal::{
    self, CandidateType, DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters,
    IceProtocol, SctpCapabilities, Signal,
};
use anyhow::{bail, Context, Result};
use receiver::{ReceiveOutcome, ReceiverConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::data_channel_parameters::DataChannelParameters;
use webrtc::data_channel::RTCDataChannel;
use webrtc::dtls_transport::dtls_parameters::DTLSParameters;
use webrtc::dtls_transport::dtls_role::DTLSRole;
use webrtc::dtls_transport::RTCDtlsTransport;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_gatherer::{RTCIceGatherOptions, RTCIceGatherer};
use webrtc::ice_transport::ice_parameters::RTCIceParameters;
use webrtc::ice_transport::ice_protocol::RTCIceProtocol;
use webrtc::ice_transport::ice_role::RTCIceRole;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::ice_transport::RTCIceTransport;
use webrtc::sctp_transport::sctp_transport_capabilities::SCTPTransportCapabilities;
use webrtc::sctp_transport::RTCSctpTransport;

// ── Configuration ────────────────────────────────────────────────────────────

/// Session-level settings for the signal exchange.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub signal_out: SignalSink,
    pub signal_in: SignalSource,
    pub signal_timeout: Duration,
    pub copy_signal: bool,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            signal_out: SignalSink::Stdout,
            signal_in: SignalSource::Stdin,
            signal_timeout: crate::core::config::DEFAULT_SIGNAL_TIMEOUT,
            copy_signal: false,
        }
    }
}

// ── State machine ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TunnelState {
    Init,
    Gathering,
    Gathered,
    RemoteSignalReceived,
    IceStarting,
    IceStarted,
    DtlsStarting,
    DtlsStarted,
    SctpStarting,
    SctpStarted,
    DataChannelActive,
    Closed,
}

// ── Tunnel ───────────────────────────────────────────────────────────────────

/// Owns the ICE gatherer and the ICE/DTLS/SCTP transport stack.
pub struct Tunnel {
    api: API,
    gatherer: Arc<RTCIceGatherer>,
    ice: Arc<RTCIceTransport>,
    dtls: Arc<RTCDtlsTransport>,
    sctp: Arc<RTCSctpTransport>,
    state: TunnelState,
}

impl Tunnel {
    /// Build the transport stack with the default STUN server.
    pub fn new() -> Result<Self> {
        let api = APIBuilder::new().build();

        let gatherer = Arc::new(
            api.new_ice_gatherer(RTCIceGatherOptions {
                ice_servers: vec![RTCIceServer {
                    urls: vec![STUN_SERVER.to_owned()],
                    ..Default::default()
                }],
                ..Default::default()
            })
            .context("failed to create ICE gatherer")?,
        );
        let ice = Arc::new(api.new_ice_transport(Arc::clone(&gatherer)));
        let dtls = Arc::new(
            api.new_dtls_transport(Arc::clone(&ice), vec![])
                .context("failed to create DTLS transport")?,
        );
        let sctp = Arc::new(
            api.new_sctp_transport(Arc::clone(&dtls))
                .context("failed to create SCTP transport")?,
        );

        Ok(Self {
            api,
            gatherer,
            ice,
            dtls,
            sctp,
            state: TunnelState::Init,
        })
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn sctp(&self) -> &Arc<RTCSctpTransport> {
        &self.sctp
    }

    fn advance(&mut self, next: TunnelState) -> Result<()> {
        if next <= self.state {
            bail!("invalid tunnel transition {:?} -> {next:?}", self.state);
        }
        debug!(event = "tunnel_state", from = ?self.state, to = ?next);
        self.state = next;
        Ok(())
    }

    /// Gather local ICE candidates and block until the sentinel (a `None`
    /// candidate) signals that gathering has finished.
    pub async fn gather(&mut self) -> Result<()> {
        self.advance(TunnelState::Gathering)?;

        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
        let mut done_tx = Some(done_tx);
        self.gatherer
            .on_local_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                match &candidate {
                    Some(c) => {
                        debug!(event = "ice_candidate_gathered", address = %c.address, port = c.port, typ = ?c.typ);
                    }
                    // Dropping the sender wakes the waiter below.
                    None => {
                        done_tx.take();
                    }
                }
                Box::pin(async {})
            }));

        self.gatherer.gather().await.context("ICE gather failed")?;
        let _ = done_rx.recv().await;

        self.advance(TunnelState::Gathered)
    }

    /// Snapshot the local transport parameters as an exchangeable signal.
    pub async fn local_signal(&self) -> Result<Signal> {
        let candidates = self
            .gatherer
            .get_local_candidates()
            .await
            .context("failed to read local candidates")?;
        let ice_parameters = self
            .gatherer
            .get_local_parameters()
            .await
            .context("failed to read local ICE parameters")?;
        let dtls_parameters = self
            .dtls
            .get_local_parameters()
            .context("failed to read local DTLS parameters")?;
        let sctp_capabilities = self.sctp.get_capabilities();

        Ok(Signal {
            ice_candidates: candidates.iter().map(candidate_from_rtc).collect(),
            ice_parameters: ice_parameters_from_rtc(&ice_parameters),
            dtls_parameters: dtls_parameters_from_rtc(&dtls_parameters),
            sctp_capabilities: SctpCapabilities {
                max_message_size: sctp_capabilities.max_message_size,
            },
        })
    }

    /// Start ICE, DTLS, and SCTP against the peer's signal. The ICE role is
    /// negotiated symmetrically so either peer may start first.
    pub async fn start(&mut self, remote: &Signal) -> Result<()> {
        self.advance(TunnelState::RemoteSignalReceived)?;

        let remote_candidates: Vec<RTCIceCandidate> =
            remote.ice_candidates.iter().map(candidate_to_rtc).collect();
        self.ice
            .set_remote_candidates(&remote_candidates)
            .await
            .context("failed to set remote candidates")?;

        let local_ice = ice_parameters_from_rtc(
            &self
                .gatherer
                .get_local_parameters()
                .await
                .context("failed to read local ICE parameters")?,
        );
        let local_dtls = dtls_parameters_from_rtc(
            &self
                .dtls
                .get_local_parameters()
                .context("failed to read local DTLS parameters")?,
        );
        let role = determine_role_with_dtls(
            &local_ice,
            &remote.ice_parameters,
            &local_dtls,
            &remote.dtls_parameters,
        );
        info!(event = "ice_role_negotiated", role = ?role);

        self.advance(TunnelState::IceStarting)?;
        let rtc_role = match role {
            IceRole::Controlling => RTCIceRole::Controlling,
            IceRole::Controlled => RTCIceRole::Controlled,
        };
        self.ice
            .start(&ice_parameters_to_rtc(&remote.ice_parameters), Some(rtc_role))
            .await
            .context("ICE start failed")?;
        self.advance(TunnelState::IceStarted)?;

        self.advance(TunnelState::DtlsStarting)?;
        self.dtls
            .start(dtls_parameters_to_rtc(&remote.dtls_parameters))
            .await
            .context("DTLS start failed")?;
        self.advance(TunnelState::DtlsStarted)?;

        self.advance(TunnelState::SctpStarting)?;
        self.sctp
            .start(SCTPTransportCapabilities {
                max_message_size: remote.sctp_capabilities.max_message_size,
            })
            .await
            .context("SCTP start failed")?;
        self.advance(TunnelState::SctpStarted)
    }

    /// Open the sender's data channel: ordered, labelled with the source
    /// name. The SCTP association assigns the stream id.
    pub async fn open_data_channel(&mut self, label: &str) -> Result<Arc<RTCDataChannel>> {
        let params = DataChannelParameters {
            label: label.to_owned(),
            ordered: true,
            ..Default::default()
        };
        let dc = Arc::new(
            self.api
                .new_data_channel(Arc::clone(&self.sctp), params)
                .await
                .context("failed to open data channel")?,
        );
        self.advance(TunnelState::DataChannelActive)?;
        info!(event = "data_channel_opened", label = %dc.label(), id = dc.id());
        Ok(dc)
    }

    /// Tear the transport stack down. Errors on shutdown are ignored; the
    /// session is over either way.
    pub async fn close(&mut self) {
        let _ = self.sctp.stop().await;
        let _ = self.dtls.stop().await;
        let _ = self.ice.stop().await;
        self.state = TunnelState::Closed;
        debug!(event = "tunnel_closed");
    }
}

// ── Session drivers ──────────────────────────────────────────────────────────

/// Emit the local signal, ingest the remote one.
async fn exchange_signals(tunnel: &mut Tunnel, cfg: &TunnelConfig) -> Result<Signal> {
    tunnel.gather().await?;
    let local = tunnel.local_signal().await?;
    let blob = signal::encode(&local)?;
    exchange::emit_signal(&blob, &cfg.signal_out, cfg.copy_signal)?;

    let remote_blob = exchange::read_remote_signal(&cfg.signal_in, cfg.signal_timeout).await?;
    let remote = signal::decode(&remote_blob).context("failed to decode remote signal")?;
    info!(
        event = "remote_signal_received",
        candidates = remote.ice_candidates.len()
    );
    Ok(remote)
}

/// Send one file or directory to the peer. Returns once the transfer
/// completed (or failed) and the channel is closed.
pub async fn run_sender(source: &Path, cfg: TunnelConfig) -> Result<()> {
    let info = std::fs::metadata(source)
        .with_context(|| format!("file does not exist: {}", source.display()))?;
    let is_directory = info.is_dir();
    let total = if is_directory { 0 } else { info.len() };

    if is_directory {
        println!("Sender started (directory mode)");
    } else {
        println!("Sender started");
    }

    let mut tunnel = Tunnel::new()?;
    let remote = exchange_signals(&mut tunnel, &cfg).await?;
    tunnel.start(&remote).await?;

    let label = data_channel_label(source, is_directory)?;
    let dc = tunnel.open_data_channel(&label).await?;

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Result<sender::SendSummary>>();
    {
        let dc = Arc::clone(&dc);
        let source = source.to_path_buf();
        let dc_handle = Arc::clone(&dc);
        dc_handle.on_open(Box::new(move || {
            Box::pin(async move {
                let result = sender::send_source(&dc, &source, is_directory, total).await;
                let _ = done_tx.send(result);
            })
        }));
    }

    let result = done_rx
        .recv()
        .await
        .unwrap_or_else(|| Err(anyhow::anyhow!("data channel closed before transfer started")));
    tunnel.close().await;

    let summary = result?;
    sender::print_send_summary(&summary);
    Ok(())
}

/// Wait for the peer to open a data channel and receive its payload.
/// Returns once a transfer completed; declined channels keep the session
/// waiting for another one.
pub async fn run_receiver(cfg: TunnelConfig, recv_cfg: ReceiverConfig) -> Result<()> {
    println!("Receiver started");

    let mut tunnel = Tunnel::new()?;
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ReceiveOutcome>();
    receiver::install_handler(tunnel.sctp(), recv_cfg, events_tx);

    let remote = exchange_signals(&mut tunnel, &cfg).await?;
    tunnel.start(&remote).await?;

    loop {
        match events_rx.recv().await {
            Some(ReceiveOutcome::Completed(summary)) => {
                tunnel.close().await;
                receiver::print_receive_summary(&summary);
                return Ok(());
            }
            Some(ReceiveOutcome::Declined) => {
                // Keep the session open for another channel.
                continue;
            }
            Some(ReceiveOutcome::Failed(msg)) => {
                tunnel.close().await;
                bail!(msg);
            }
            None => bail!("transport closed before a transfer completed"),
        }
    }
}

/// The channel label is the basename of the source, with `.tar.gz`
/// appended for directories so the receiver knows to extract.
fn data_channel_label(source: &Path, is_directory: bool) -> Result<String> {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("source has no basename: {}", source.display()))?;
    Ok(if is_directory {
        format!("{name}.tar.gz")
    } else {
        name
    })
}

// ── Conversions to/from the transport library's types ────────────────────────

fn candidate_from_rtc(c: &RTCIceCandidate) -> IceCandidate {
    IceCandidate {
        foundation: c.foundation.clone(),
        priority: c.priority,
        address: c.address.clone(),
        protocol: match c.protocol {
            RTCIceProtocol::Tcp => IceProtocol::Tcp,
            _ => IceProtocol::Udp,
        },
        port: c.port,
        typ: match c.typ {
            RTCIceCandidateType::Srflx => CandidateType::Srflx,
            RTCIceCandidateType::Prflx => CandidateType::Prflx,
            RTCIceCandidateType::Relay => CandidateType::Relay,
            _ => CandidateType::Host,
        },
        component: c.component,
        related_address: c.related_address.clone(),
        related_port: c.related_port,
    }
}

fn candidate_to_rtc(c: &IceCandidate) -> RTCIceCandidate {
    RTCIceCandidate {
        foundation: c.foundation.clone(),
        priority: c.priority,
        address: c.address.clone(),
        protocol: match c.protocol {
            IceProtocol::Tcp => RTCIceProtocol::Tcp,
            IceProtocol::Udp => RTCIceProtocol::Udp,
        },
        port: c.port,
        typ: match c.typ {
            CandidateType::Host => RTCIceCandidateType::Host,
            CandidateType::Srflx => RTCIceCandidateType::Srflx,
            CandidateType::Prflx => RTCIceCandidateType::Prflx,
            CandidateType::Relay => RTCIceCandidateType::Relay,
        },
        component: c.component,
        related_address: c.related_address.clone(),
        related_port: c.related_port,
        ..Default::default()
    }
}

fn ice_parameters_from_rtc(p: &RTCIceParameters) -> IceParameters {
    IceParameters {
        username_fragment: p.username_fragment.clone(),
        password: p.password.clone(),
        ice_lite: p.ice_lite,
    }
}

fn ice_parameters_to_rtc(p: &IceParameters) -> RTCIceParameters {
    RTCIceParameters {
        username_fragment: p.username_fragment.clone(),
        password: p.password.clone(),
        ice_lite: p.ice_lite,
    }
}

fn dtls_parameters_from_rtc(p: &DTLSParameters) -> DtlsParameters {
    DtlsParameters {
        role: match p.role {
            DTLSRole::Client => DtlsRole::Client,
            DTLSRole::Server => DtlsRole::Server,
            _ => DtlsRole::Auto,
        },
        fingerprints: p
            .fingerprints
            .iter()
            .map(|f| DtlsFingerprint {
                algorithm: f.algorithm.clone(),
                value: f.value.clone(),
            })
            .collect(),
    }
}

fn dtls_parameters_to_rtc(p: &DtlsParameters) -> DTLSParameters {
    DTLSParameters {
        role: match p.role {
            DtlsRole::Client => DTLSRole::Client,
            DtlsRole::Server => DTLSRole::Server,
            DtlsRole::Auto => DTLSRole::Auto,
        },
        fingerprints: p
            .fingerprints
            .iter()
            .map(|f| webrtc::dtls_transport::dtls_fingerprint::RTCDtlsFingerprint {
                algorithm: f.algorithm.clone(),
                value: f.value.clone(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_data_channel_label() {
        assert_eq!(
            data_channel_label(&PathBuf::from("/tmp/video.mp4"), false).unwrap(),
            "video.mp4"
        );
        assert_eq!(
            data_channel_label(&PathBuf::from("/tmp/photos"), true).unwrap(),
            "photos.tar.gz"
        );
        assert!(data_channel_label(&PathBuf::from("/"), false).is_err());
    }

    #[test]
    fn test_candidate_conversion_round_trip() {
        let ours = IceCandidate {
            foundation: "842163049".into(),
            priority: 1694498815,
            address: "203.0.113.42".into(),
            protocol: IceProtocol::Udp,
            port: 54321,
            typ: CandidateType::Srflx,
            component: 1,
            related_address: "192.168.1.100".into(),
            related_port: 31545,
        };
        assert_eq!(candidate_from_rtc(&candidate_to_rtc(&ours)), ours);
    }

    #[test]
    fn test_unspecified_rtc_types_default_sanely() {
        let rtc = RTCIceCandidate {
            address: "10.0.0.1".into(),
            port: 9,
            ..Default::default()
        };
        let ours = candidate_from_rtc(&rtc);
        assert_eq!(ours.typ, CandidateType::Host);
        assert_eq!(ours.protocol, IceProtocol::Udp);
    }

    #[test]
    fn test_dtls_parameter_conversion_round_trip() {
        let ours = DtlsParameters {
            role: DtlsRole::Client,
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".into(),
                value: "aa:bb".into(),
            }],
        };
        assert_eq!(dtls_parameters_from_rtc(&dtls_parameters_to_rtc(&ours)), ours);
    }

    #[test]
    fn test_state_transitions_are_monotonic() {
        let mut tunnel = match Tunnel::new() {
            Ok(t) => t,
            // No network stack available in this environment; nothing to test.
            Err(_) => return,
        };
        assert_eq!(tunnel.state(), TunnelState::Init);
        tunnel.advance(TunnelState::Gathering).unwrap();
        tunnel.advance(TunnelState::Gathered).unwrap();
        assert!(tunnel.advance(TunnelState::Gathering).is_err());
        assert!(tunnel.advance(TunnelState::Gathered).is_err());
        tunnel.advance(TunnelState::Closed).unwrap();
    }
}
