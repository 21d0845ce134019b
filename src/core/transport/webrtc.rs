//! WebRTC media transport.
//!
//! One peer connection per call attempt, carrying a single send/receive
//! audio transceiver (G.711 u-law) and the ordered `oai-events` data
//! channel. The offer is sent only after ICE gathering completes, so the
//! relay receives every candidate in one SDP.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_PCMU, MediaEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::audio::{
    CaptureSource, CaptureStream, FrameReceiver, PCMU_CLOCK_RATE, PlaybackSink,
    linear_to_ulaw, resample_linear, ulaw_to_linear,
};
use super::base::{
    AudioConstraints, CONTROL_CHANNEL_LABEL, ChannelState, IceState, LocalAudioTrack,
    MediaTransport, SignalingState, TransportEvent, TransportEventSender,
};
use crate::core::call::{CallError, CallResult, ConnectFailure};

/// Default public STUN server.
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

const STREAM_ID: &str = "voice-call";

/// Configuration for [`WebRtcTransport`].
#[derive(Debug, Clone)]
pub struct WebRtcConfig {
    /// STUN/TURN URLs; empty means host candidates only
    pub ice_servers: Vec<String>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
        }
    }
}

struct PeerSession {
    pc: Arc<RTCPeerConnection>,
    sender: Arc<RTCRtpSender>,
    sender_id: String,
    control: Arc<RTCDataChannel>,
    outbound: Arc<TrackLocalStaticSample>,
    pump: Option<JoinHandle<()>>,
}

struct LiveCapture {
    track: LocalAudioTrack,
    stream: CaptureStream,
}

/// [`MediaTransport`] backed by webrtc-rs.
pub struct WebRtcTransport {
    config: WebRtcConfig,
    capture: Arc<dyn CaptureSource>,
    playback: Option<Arc<dyn PlaybackSink>>,
    peer: Mutex<Option<PeerSession>>,
    local: Mutex<Option<LiveCapture>>,
}

impl WebRtcTransport {
    pub fn new(config: WebRtcConfig, capture: Arc<dyn CaptureSource>) -> Self {
        Self {
            config,
            capture,
            playback: None,
            peer: Mutex::new(None),
            local: Mutex::new(None),
        }
    }

    /// Route remote audio to `sink`.
    pub fn with_playback(mut self, sink: Arc<dyn PlaybackSink>) -> Self {
        self.playback = Some(sink);
        self
    }

    fn build_api() -> CallResult<API> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: pcmu_capability(),
                    payload_type: 0,
                    stats_id: String::new(),
                },
                RTPCodecType::Audio,
            )
            .map_err(|e| transport_failure("register codec", e))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| transport_failure("register interceptors", e))?;

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }

    fn peer_connection(&self) -> CallResult<Arc<RTCPeerConnection>> {
        self.peer
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.pc))
            .ok_or(CallError::NotConnected)
    }

    fn replace_pump(&self, pump: Option<JoinHandle<()>>) {
        let mut peer = self.peer.lock();
        match peer.as_mut() {
            Some(session) => {
                if let Some(old) = std::mem::replace(&mut session.pump, pump) {
                    old.abort();
                }
            }
            None => {
                if let Some(orphan) = pump {
                    orphan.abort();
                }
            }
        }
    }

    async fn close_peer(&self) {
        let session = self.peer.lock().take();
        let Some(mut session) = session else {
            return;
        };

        if let Some(pump) = session.pump.take() {
            pump.abort();
        }
        if let Err(e) = session.control.close().await {
            debug!("Control channel close: {}", e);
        }
        if let Err(e) = session.pc.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
        info!("Peer connection closed");
    }

    fn watch_peer(&self, pc: &RTCPeerConnection, events: &TransportEventSender) {
        let tx = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            debug!("ICE connection state: {}", state);
            if let Some(mapped) = map_ice_state(state) {
                let _ = tx.send(TransportEvent::IceStateChanged(mapped));
            }
            Box::pin(async {})
        }));

        let tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!("Peer connection state: {}", state);
            if state == RTCPeerConnectionState::Failed {
                let _ = tx.send(TransportEvent::Failed("peer connection failed".to_string()));
            }
            Box::pin(async {})
        }));

        let tx = events.clone();
        let playback = self.playback.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let tx = tx.clone();
            let playback = playback.clone();
            tokio::spawn(play_remote(track, tx, playback));
            Box::pin(async {})
        }));
    }

    fn watch_control(channel: &RTCDataChannel, events: &TransportEventSender) {
        let tx = events.clone();
        channel.on_open(Box::new(move || {
            info!("Control channel '{}' open", CONTROL_CHANNEL_LABEL);
            let _ = tx.send(TransportEvent::ControlChannelStateChanged(ChannelState::Open));
            Box::pin(async {})
        }));

        let tx = events.clone();
        channel.on_close(Box::new(move || {
            debug!("Control channel closed");
            let _ = tx.send(TransportEvent::ControlChannelStateChanged(ChannelState::Closed));
            Box::pin(async {})
        }));

        let tx = events.clone();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    let _ = tx.send(TransportEvent::ControlMessage(text));
                }
                Err(_) => warn!("Dropping non-UTF-8 control frame ({} bytes)", msg.data.len()),
            }
            Box::pin(async {})
        }));
    }
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn acquire_local_audio(
        &self,
        constraints: &AudioConstraints,
    ) -> CallResult<LocalAudioTrack> {
        if let Some(live) = self.local.lock().as_ref() {
            return Ok(live.track.clone());
        }

        let stream = self.capture.start(constraints).await?;
        let track = LocalAudioTrack {
            id: format!("mic-{}", Uuid::new_v4()),
            sample_rate: constraints.sample_rate,
        };
        info!("Local audio acquired: {}", track.id);

        *self.local.lock() = Some(LiveCapture {
            track: track.clone(),
            stream,
        });
        Ok(track)
    }

    fn local_audio(&self) -> Option<LocalAudioTrack> {
        self.local.lock().as_ref().map(|l| l.track.clone())
    }

    async fn open(&self, events: TransportEventSender) -> CallResult<()> {
        self.close_peer().await;

        let api = Self::build_api()?;
        let ice_servers = if self.config.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.config.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| transport_failure("create peer connection", e))?,
        );
        self.watch_peer(&pc, &events);

        let transceiver = pc
            .add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendrecv,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| transport_failure("add audio transceiver", e))?;
        let sender = transceiver.sender().await;

        // RTCP must be read for interceptors to work
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        let control = pc
            .create_data_channel(
                CONTROL_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| transport_failure("create control channel", e))?;
        Self::watch_control(&control, &events);

        // Bound once for the life of the peer; frames flow only while a pump writes to it
        let outbound = Arc::new(TrackLocalStaticSample::new(
            pcmu_capability(),
            format!("audio-{}", Uuid::new_v4()),
            STREAM_ID.to_string(),
        ));
        if let Err(e) = bind_outbound(&sender, &outbound).await {
            let _ = pc.close().await;
            return Err(e);
        }

        *self.peer.lock() = Some(PeerSession {
            pc,
            sender,
            sender_id: Uuid::new_v4().to_string(),
            control,
            outbound,
            pump: None,
        });
        Ok(())
    }

    async fn create_offer(&self) -> CallResult<String> {
        let pc = self.peer_connection()?;
        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| transport_failure("create offer", e))?;

        let mut gathering = pc.gathering_complete_promise().await;
        pc.set_local_description(offer)
            .await
            .map_err(|e| transport_failure("set local description", e))?;
        let _ = gathering.recv().await;

        let local = pc.local_description().await.ok_or_else(|| {
            CallError::ConnectError(ConnectFailure::Transport(
                "no local description after gathering".to_string(),
            ))
        })?;
        debug!("Offer ready ({} bytes)", local.sdp.len());
        Ok(local.sdp)
    }

    fn signaling_state(&self) -> SignalingState {
        match self.peer.lock().as_ref() {
            Some(session) => map_signaling_state(session.pc.signaling_state()),
            None => SignalingState::Closed,
        }
    }

    async fn apply_answer(&self, sdp: &str) -> CallResult<()> {
        let pc = self.peer_connection()?;
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| transport_failure("parse answer", e))?;
        pc.set_remote_description(answer)
            .await
            .map_err(|e| transport_failure("set remote description", e))
    }

    async fn attach_to_sender(&self, track: Option<&LocalAudioTrack>) -> CallResult<()> {
        let (sender, outbound) = {
            let peer = self.peer.lock();
            let session = peer.as_ref().ok_or(CallError::NotConnected)?;
            (Arc::clone(&session.sender), Arc::clone(&session.outbound))
        };

        match track {
            Some(track) => {
                let frames = self
                    .local
                    .lock()
                    .as_ref()
                    .filter(|live| live.track.id == track.id)
                    .map(|live| live.stream.frames())
                    .ok_or_else(|| {
                        CallError::DeviceError(format!("capture track {} is not live", track.id))
                    })?;

                bind_outbound(&sender, &outbound).await?;
                let pump = tokio::spawn(pump_capture(frames, track.sample_rate, outbound));
                self.replace_pump(Some(pump));
                debug!("Capture track {} attached", track.id);
            }
            None => {
                // The sender keeps its track; without a pump nothing is written
                self.replace_pump(None);
                debug!("Audio sender detached");
            }
        }
        Ok(())
    }

    fn sender_id(&self) -> Option<String> {
        self.peer.lock().as_ref().map(|s| s.sender_id.clone())
    }

    async fn sender_count(&self) -> usize {
        match self.peer_connection() {
            Ok(pc) => pc.get_senders().await.len(),
            Err(_) => 0,
        }
    }

    async fn send_control(&self, text: &str) -> CallResult<()> {
        let control = self
            .peer
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.control))
            .ok_or(CallError::NotConnected)?;

        if control.ready_state() != RTCDataChannelState::Open {
            return Err(CallError::ChannelError(format!(
                "channel is {}",
                control.ready_state()
            )));
        }
        control
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(|e| CallError::ChannelError(e.to_string()))
    }

    async fn close(&self) {
        self.close_peer().await;

        if let Some(live) = self.local.lock().take() {
            live.stream.stop();
            info!("Local audio released: {}", live.track.id);
        }
        if let Some(sink) = &self.playback {
            sink.flush();
        }
    }
}

// =============================================================================
// Media Tasks
// =============================================================================

async fn pump_capture(frames: FrameReceiver, sample_rate: u32, track: Arc<TrackLocalStaticSample>) {
    let mut frames = frames.lock().await;
    while let Some(frame) = frames.recv().await {
        let duration = Duration::from_micros(frame.len() as u64 * 1_000_000 / sample_rate as u64);
        let payload: Vec<u8> = resample_linear(&frame, sample_rate, PCMU_CLOCK_RATE)
            .into_iter()
            .map(linear_to_ulaw)
            .collect();

        let sample = Sample {
            data: Bytes::from(payload),
            duration,
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            warn!("Stopping capture pump: {}", e);
            break;
        }
    }
}

async fn play_remote(
    track: Arc<TrackRemote>,
    events: TransportEventSender,
    playback: Option<Arc<dyn PlaybackSink>>,
) {
    info!("Remote {:?} track started", track.kind());
    let mut announced = false;
    while let Ok((packet, _)) = track.read_rtp().await {
        if !announced {
            let _ = events.send(TransportEvent::RemoteAudioStarted);
            announced = true;
        }
        if let Some(sink) = &playback {
            let pcm: Vec<i16> = packet.payload.iter().map(|&b| ulaw_to_linear(b)).collect();
            sink.write(&pcm, PCMU_CLOCK_RATE);
        }
    }
    debug!("Remote track ended");
}

// =============================================================================
// Helpers
// =============================================================================

fn pcmu_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_PCMU.to_owned(),
        clock_rate: PCMU_CLOCK_RATE,
        channels: 1,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

/// Make `sender` carry `outbound`, leaving it alone when it already does.
///
/// The sender is never handed `None`: webrtc-rs drops its encodings on a
/// `None` track and rejects every later replacement.
async fn bind_outbound(
    sender: &RTCRtpSender,
    outbound: &Arc<TrackLocalStaticSample>,
) -> CallResult<()> {
    if let Some(current) = sender.track().await {
        if current.id() == outbound.id() {
            return Ok(());
        }
    }
    let local: Arc<dyn TrackLocal + Send + Sync> = outbound.clone();
    sender
        .replace_track(Some(local))
        .await
        .map_err(|e| transport_failure("attach track", e))
}

fn transport_failure(context: &str, err: impl std::fmt::Display) -> CallError {
    CallError::ConnectError(ConnectFailure::Transport(format!("{context}: {err}")))
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<IceState> {
    match state {
        RTCIceConnectionState::New => Some(IceState::New),
        RTCIceConnectionState::Checking => Some(IceState::Checking),
        RTCIceConnectionState::Connected => Some(IceState::Connected),
        RTCIceConnectionState::Completed => Some(IceState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceState::Failed),
        RTCIceConnectionState::Closed => Some(IceState::Closed),
        RTCIceConnectionState::Unspecified => None,
    }
}

fn map_signaling_state(state: RTCSignalingState) -> SignalingState {
    match state {
        RTCSignalingState::Stable | RTCSignalingState::Unspecified => SignalingState::Stable,
        RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
        RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
        RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
        RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
        RTCSignalingState::Closed => SignalingState::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::audio::{NoCapture, WavCapture, WavRecorder};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn host_only() -> WebRtcConfig {
        WebRtcConfig {
            ice_servers: vec![],
        }
    }

    fn write_tone(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("mic.wav");
        let recorder = WavRecorder::create(&path, 24000).unwrap();
        let tone: Vec<i16> = (0..4800).map(|i| ((i % 48) as i16 - 24) * 500).collect();
        recorder.write(&tone, 24000);
        recorder.finish().unwrap();
        path
    }

    async fn bound_track_id(transport: &WebRtcTransport) -> Option<String> {
        let sender = transport.peer.lock().as_ref().map(|s| Arc::clone(&s.sender))?;
        sender.track().await.map(|t| t.id().to_string())
    }

    fn outbound_id(transport: &WebRtcTransport) -> Option<String> {
        transport.peer.lock().as_ref().map(|s| s.outbound.id().to_string())
    }

    fn pump_running(transport: &WebRtcTransport) -> bool {
        transport
            .peer
            .lock()
            .as_ref()
            .and_then(|s| s.pump.as_ref())
            .is_some_and(|p| !p.is_finished())
    }

    #[test]
    fn test_map_ice_state() {
        assert_eq!(map_ice_state(RTCIceConnectionState::Completed), Some(IceState::Completed));
        assert_eq!(map_ice_state(RTCIceConnectionState::Failed), Some(IceState::Failed));
        assert_eq!(map_ice_state(RTCIceConnectionState::Unspecified), None);
    }

    #[test]
    fn test_map_signaling_state() {
        assert_eq!(
            map_signaling_state(RTCSignalingState::HaveLocalOffer),
            SignalingState::HaveLocalOffer
        );
        assert_eq!(map_signaling_state(RTCSignalingState::Closed), SignalingState::Closed);
    }

    #[test]
    fn test_default_ice_server() {
        assert_eq!(WebRtcConfig::default().ice_servers, vec![DEFAULT_ICE_SERVER.to_string()]);
    }

    #[tokio::test]
    async fn test_closed_before_open() {
        let transport = WebRtcTransport::new(WebRtcConfig::default(), Arc::new(NoCapture));
        assert_eq!(transport.signaling_state(), SignalingState::Closed);
        assert_eq!(transport.sender_count().await, 0);
        assert!(transport.sender_id().is_none());
        assert_eq!(transport.send_control("{}").await, Err(CallError::NotConnected));
        transport.close().await;
    }

    #[tokio::test]
    async fn test_open_creates_single_sender() {
        let transport = WebRtcTransport::new(
            WebRtcConfig {
                ice_servers: vec![],
            },
            Arc::new(NoCapture),
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.open(tx).await.unwrap();

        assert_eq!(transport.sender_count().await, 1);
        assert_eq!(transport.signaling_state(), SignalingState::Stable);
        let first_id = transport.sender_id();
        assert!(first_id.is_some());

        transport.attach_to_sender(None).await.unwrap();
        assert_eq!(transport.sender_count().await, 1);
        assert_eq!(transport.sender_id(), first_id);

        transport.close().await;
        assert_eq!(transport.signaling_state(), SignalingState::Closed);
    }

    #[tokio::test]
    async fn test_open_binds_outbound_track() {
        let transport = WebRtcTransport::new(host_only(), Arc::new(NoCapture));
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.open(tx).await.unwrap();

        let outbound = outbound_id(&transport);
        assert!(outbound.is_some());
        assert_eq!(bound_track_id(&transport).await, outbound);
        assert!(!pump_running(&transport));

        transport.close().await;
    }

    #[tokio::test]
    async fn test_mic_toggles_reuse_single_sender() {
        let dir = TempDir::new().unwrap();
        let capture = Arc::new(WavCapture::new(write_tone(&dir)));
        let transport = WebRtcTransport::new(host_only(), capture);
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.open(tx).await.unwrap();

        let track = transport
            .acquire_local_audio(&AudioConstraints::default())
            .await
            .unwrap();
        let sender_id = transport.sender_id();
        let outbound = outbound_id(&transport);

        for round in 0..4 {
            let attached = transport.attach_to_sender(Some(&track)).await;
            assert!(attached.is_ok(), "attach #{round}: {attached:?}");
            assert!(pump_running(&transport));

            let detached = transport.attach_to_sender(None).await;
            assert!(detached.is_ok(), "detach #{round}: {detached:?}");
            assert!(!pump_running(&transport));

            assert_eq!(transport.sender_count().await, 1);
            assert_eq!(transport.sender_id(), sender_id);
            assert_eq!(bound_track_id(&transport).await, outbound);
        }

        transport.attach_to_sender(Some(&track)).await.unwrap();
        assert!(pump_running(&transport));

        transport.close().await;
        assert!(transport.local_audio().is_none());
    }

    #[tokio::test]
    async fn test_attach_unknown_track_is_device_error() {
        let transport = WebRtcTransport::new(host_only(), Arc::new(NoCapture));
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.open(tx).await.unwrap();

        let stale = LocalAudioTrack {
            id: "mic-stale".to_string(),
            sample_rate: 24000,
        };
        assert!(matches!(
            transport.attach_to_sender(Some(&stale)).await,
            Err(CallError::DeviceError(_))
        ));
        assert_eq!(transport.sender_count().await, 1);

        transport.close().await;
    }

    #[tokio::test]
    async fn test_offer_sets_local_description() {
        let transport = WebRtcTransport::new(
            WebRtcConfig {
                ice_servers: vec![],
            },
            Arc::new(NoCapture),
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.open(tx).await.unwrap();

        let sdp = transport.create_offer().await.unwrap();
        assert!(sdp.contains("m=audio"));
        assert!(sdp.contains("PCMU"));
        assert_eq!(transport.signaling_state(), SignalingState::HaveLocalOffer);

        transport.close().await;
    }
}
