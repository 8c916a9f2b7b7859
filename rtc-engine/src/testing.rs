//! In-process loopback engine
//!
//! A deterministic stand-in for the real engine. Every request completes
//! synchronously on the calling (worker) thread by invoking the observer,
//! so tests can drive the whole bridge without network or devices.
//!
//! Behaviour summary:
//! - offers/answers carry synthetic SDP
//! - the first local description gathers two host candidates, then
//!   end-of-candidates
//! - a remote offer/answer announces one remote audio stream and track
//! - completing offer/answer connects ICE, opens data channels and has the
//!   far end announce a mirror of each channel
//! - data channels echo every message sent on them
//! - mandatory constraints outside the supported set fail with
//!   `ConstraintNotSatisfiedError`

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::constraints::{ConstraintList, MediaStreamConstraints, NativeConstraint};
use crate::engine::{
    AudioDevice, EngineFactory, EngineObserver, EnginePeerConnection, EngineProvider,
};
use crate::error::{EngineError, Result};
use crate::types::{
    DataChannelInfo, DataChannelInit, DataChannelState, IceCandidate, IceConnectionState,
    IceGatheringState, MediaStreamInfo, MediaStreamTrackState, MessageData, PeerConnectionState,
    RequestId, RtcConfiguration, RtcStats, SdpType, SessionDescription, SignalingState, SourceId,
    StatsReport, TrackInfo, TrackKind,
};

/// Constraint names the loopback engine accepts as mandatory by default
pub const DEFAULT_SUPPORTED_CONSTRAINTS: &[&str] = &[
    "autoGainControl",
    "channelCount",
    "deviceId",
    "echoCancellation",
    "facingMode",
    "frameRate",
    "height",
    "noiseSuppression",
    "OfferToReceiveAudio",
    "OfferToReceiveVideo",
    "sampleRate",
    "width",
];

const DTMF_ALPHABET: &str = "0123456789ABCDabcd#*,";

/// Construction and teardown counters shared by everything a provider builds
#[derive(Debug, Default)]
pub struct LoopbackCounters {
    factories_created: AtomicUsize,
    factories_destroyed: AtomicUsize,
    audio_devices_created: AtomicUsize,
    audio_devices_terminated: AtomicUsize,
    peer_connections_created: AtomicUsize,
    early_terminations: AtomicUsize,
}

impl LoopbackCounters {
    pub fn factories_created(&self) -> usize {
        self.factories_created.load(Ordering::SeqCst)
    }

    pub fn factories_destroyed(&self) -> usize {
        self.factories_destroyed.load(Ordering::SeqCst)
    }

    pub fn audio_devices_created(&self) -> usize {
        self.audio_devices_created.load(Ordering::SeqCst)
    }

    pub fn audio_devices_terminated(&self) -> usize {
        self.audio_devices_terminated.load(Ordering::SeqCst)
    }

    pub fn peer_connections_created(&self) -> usize {
        self.peer_connections_created.load(Ordering::SeqCst)
    }

    /// Factories constructed and not yet dropped
    pub fn live_factories(&self) -> usize {
        self.factories_created()
            .saturating_sub(self.factories_destroyed())
    }

    /// Audio device terminations that ran while a factory was still alive
    pub fn early_terminations(&self) -> usize {
        self.early_terminations.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct LoopbackSettings {
    supported: BTreeSet<String>,
    deny_user_media: bool,
    fail_factory: bool,
    construct_delay: Duration,
}

impl LoopbackSettings {
    fn unsatisfied<'a>(&self, constraints: &'a ConstraintList) -> Option<&'a NativeConstraint> {
        constraints
            .mandatory()
            .iter()
            .find(|c| !self.supported.contains(&c.key))
    }
}

/// [`EngineProvider`] for the loopback engine
#[derive(Debug, Clone)]
pub struct LoopbackProvider {
    counters: Arc<LoopbackCounters>,
    settings: LoopbackSettings,
}

impl LoopbackProvider {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(LoopbackCounters::default()),
            settings: LoopbackSettings {
                supported: DEFAULT_SUPPORTED_CONSTRAINTS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                deny_user_media: false,
                fail_factory: false,
                construct_delay: Duration::ZERO,
            },
        }
    }

    /// Replace the set of constraint names accepted as mandatory
    pub fn with_supported_constraints<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.supported = names.into_iter().map(Into::into).collect();
        self
    }

    /// Make `get_user_media` fail with `PermissionDeniedError`
    pub fn deny_user_media(mut self) -> Self {
        self.settings.deny_user_media = true;
        self
    }

    /// Make factory construction fail
    pub fn failing(mut self) -> Self {
        self.settings.fail_factory = true;
        self
    }

    /// Sleep this long inside factory construction
    pub fn with_construct_delay(mut self, delay: Duration) -> Self {
        self.settings.construct_delay = delay;
        self
    }

    pub fn counters(&self) -> Arc<LoopbackCounters> {
        Arc::clone(&self.counters)
    }
}

impl Default for LoopbackProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineProvider for LoopbackProvider {
    fn create_audio_device(&self) -> Result<Option<Arc<dyn AudioDevice>>> {
        self.counters.audio_devices_created.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Arc::new(LoopbackAudioDevice {
            counters: Arc::clone(&self.counters),
        })))
    }

    fn create_factory(
        &self,
        audio_device: Option<Arc<dyn AudioDevice>>,
    ) -> Result<Arc<dyn EngineFactory>> {
        if !self.settings.construct_delay.is_zero() {
            thread::sleep(self.settings.construct_delay);
        }
        if self.settings.fail_factory {
            return Err(EngineError::operation("loopback factory construction disabled"));
        }

        self.counters.factories_created.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            audio_device = ?audio_device.as_ref().map(|d| d.name()),
            "loopback factory created"
        );

        Ok(Arc::new(LoopbackFactory {
            counters: Arc::clone(&self.counters),
            settings: Arc::new(self.settings.clone()),
            next_stream: AtomicU64::new(1),
        }))
    }
}

struct LoopbackAudioDevice {
    counters: Arc<LoopbackCounters>,
}

impl AudioDevice for LoopbackAudioDevice {
    fn name(&self) -> &str {
        "loopback-audio"
    }

    fn terminate(&self) {
        if self.counters.live_factories() > 0 {
            self.counters.early_terminations.fetch_add(1, Ordering::SeqCst);
        }
        self.counters
            .audio_devices_terminated
            .fetch_add(1, Ordering::SeqCst);
    }
}

struct LoopbackFactory {
    counters: Arc<LoopbackCounters>,
    settings: Arc<LoopbackSettings>,
    next_stream: AtomicU64,
}

impl EngineFactory for LoopbackFactory {
    fn create_peer_connection(
        &self,
        source: SourceId,
        config: &RtcConfiguration,
        constraints: &ConstraintList,
        observer: Arc<dyn EngineObserver>,
    ) -> Result<Box<dyn EnginePeerConnection>> {
        for server in &config.ice_servers {
            for url in &server.urls {
                let known = ["stun:", "stuns:", "turn:", "turns:"]
                    .iter()
                    .any(|scheme| url.starts_with(scheme));
                if !known {
                    return Err(EngineError::type_error(format!(
                        "unsupported ICE server url {url}"
                    )));
                }
            }
        }
        if let Some(c) = self.settings.unsatisfied(constraints) {
            return Err(EngineError::constraint_not_satisfied(
                c.key.clone(),
                format!("loopback engine does not support {}", c.key),
            ));
        }

        self.counters
            .peer_connections_created
            .fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(LoopbackPeerConnection {
            source,
            observer,
            settings: Arc::clone(&self.settings),
            signaling: SignalingState::Stable,
            has_remote: false,
            gathered: false,
            connected: false,
            closed: false,
            channels: Vec::new(),
            remote_stream: None,
            session_version: 0,
            next_channel_id: 0,
        }))
    }

    fn get_user_media(&self, constraints: &MediaStreamConstraints) -> Result<MediaStreamInfo> {
        if self.settings.deny_user_media {
            return Err(EngineError::permission_denied("loopback capture denied"));
        }

        let flags = constraints.track_types();
        if flags.is_empty() {
            return Err(EngineError::type_error("audio or video must be requested"));
        }

        let stream_id = format!(
            "loopback-local-{}",
            self.next_stream.fetch_add(1, Ordering::Relaxed)
        );
        let mut tracks = Vec::new();
        for kind in TrackKind::ALL {
            if !flags.includes(*kind) {
                continue;
            }
            let list = constraints.constraints_for(*kind);
            if let Some(c) = self.settings.unsatisfied(&list) {
                return Err(EngineError::constraint_not_satisfied(
                    c.key.clone(),
                    format!("loopback capture cannot satisfy {}={}", c.key, c.value),
                ));
            }
            tracks.push(TrackInfo {
                id: format!("{stream_id}-{kind}"),
                kind: *kind,
                label: format!("Loopback {kind}"),
                enabled: true,
                ready_state: MediaStreamTrackState::Live,
            });
        }

        Ok(MediaStreamInfo {
            id: stream_id,
            tracks,
        })
    }
}

impl Drop for LoopbackFactory {
    fn drop(&mut self) {
        self.counters
            .factories_destroyed
            .fetch_add(1, Ordering::SeqCst);
        tracing::debug!("loopback factory destroyed");
    }
}

struct LoopbackPeerConnection {
    source: SourceId,
    observer: Arc<dyn EngineObserver>,
    settings: Arc<LoopbackSettings>,
    signaling: SignalingState,
    has_remote: bool,
    gathered: bool,
    connected: bool,
    closed: bool,
    channels: Vec<DataChannelInfo>,
    remote_stream: Option<MediaStreamInfo>,
    session_version: u64,
    next_channel_id: u16,
}

impl LoopbackPeerConnection {
    fn reject_if_closed(&self, request: RequestId) -> bool {
        if self.closed {
            self.observer.on_error(
                self.source,
                Some(request),
                EngineError::invalid_state("peer connection is closed"),
            );
        }
        self.closed
    }

    fn reject_unsatisfied(&self, request: RequestId, constraints: &ConstraintList) -> bool {
        match self.settings.unsatisfied(constraints) {
            Some(c) => {
                self.observer.on_error(
                    self.source,
                    Some(request),
                    EngineError::constraint_not_satisfied(
                        c.key.clone(),
                        format!("loopback engine does not support {}", c.key),
                    ),
                );
                true
            }
            None => false,
        }
    }

    fn synthetic_sdp(&mut self, kind: SdpType) -> String {
        self.session_version += 1;
        format!(
            "v=0\r\no=loopback {} {} IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=group:BUNDLE 0\r\n\
             m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=mid:0\r\na=x-loopback-type:{}\r\n",
            self.source.as_u64(),
            self.session_version,
            kind
        )
    }

    fn set_signaling(&mut self, state: SignalingState) {
        if self.signaling != state {
            self.signaling = state;
            self.observer.on_signaling_state_change(self.source, state);
        }
    }

    fn reject_transition(&self, request: RequestId, side: &str, description: &SessionDescription) {
        self.observer.on_error(
            self.source,
            Some(request),
            EngineError::invalid_state(format!(
                "cannot set {side} {} in signaling state {}",
                description.sdp_type, self.signaling
            )),
        );
    }

    fn gather_candidates(&mut self) {
        if self.gathered {
            return;
        }
        self.gathered = true;

        let base_port = 50_000 + (self.source.as_u64() % 1_000) as u32 * 10;
        self.observer
            .on_ice_gathering_state_change(self.source, IceGatheringState::Gathering);
        for i in 0..2u32 {
            let candidate = IceCandidate::new(
                format!(
                    "candidate:{} 1 udp {} 127.0.0.1 {} typ host",
                    i + 1,
                    2_130_706_431 - i,
                    base_port + i
                ),
                Some("0".to_string()),
                Some(0),
            );
            self.observer.on_ice_candidate(self.source, Some(candidate));
        }
        self.observer.on_ice_candidate(self.source, None);
        self.observer
            .on_ice_gathering_state_change(self.source, IceGatheringState::Complete);
    }

    fn announce_remote_stream(&mut self) {
        if self.remote_stream.is_some() {
            return;
        }
        let stream_id = format!("loopback-remote-{}", self.source.as_u64());
        let track = TrackInfo {
            id: format!("{stream_id}-audio"),
            kind: TrackKind::Audio,
            label: "Loopback remote audio".to_string(),
            enabled: true,
            ready_state: MediaStreamTrackState::Live,
        };
        let stream = MediaStreamInfo {
            id: stream_id.clone(),
            tracks: vec![track.clone()],
        };
        self.observer.on_add_stream(self.source, stream.clone());
        self.observer.on_track(self.source, track, vec![stream_id]);
        self.remote_stream = Some(stream);
    }

    fn connect(&mut self) {
        if self.connected {
            return;
        }
        self.connected = true;

        let source = self.source;
        self.observer
            .on_ice_connection_state_change(source, IceConnectionState::Checking);
        self.observer
            .on_connection_state_change(source, PeerConnectionState::Connecting);
        self.observer
            .on_ice_connection_state_change(source, IceConnectionState::Connected);
        self.observer
            .on_connection_state_change(source, PeerConnectionState::Connected);

        for channel in &mut self.channels {
            if channel.ready_state == DataChannelState::Connecting {
                channel.ready_state = DataChannelState::Open;
                self.observer.on_data_channel_state_change(
                    source,
                    channel.label.clone(),
                    DataChannelState::Open,
                );
            }
        }
        for channel in self.channels.iter().filter(|c| !c.negotiated) {
            self.observer.on_data_channel(source, channel.clone());
        }
    }

    fn stats_timestamp() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1_000.0)
            .unwrap_or_default()
    }
}

impl EnginePeerConnection for LoopbackPeerConnection {
    fn create_offer(&mut self, request: RequestId, constraints: &ConstraintList) {
        if self.reject_if_closed(request) || self.reject_unsatisfied(request, constraints) {
            return;
        }
        let sdp = self.synthetic_sdp(SdpType::Offer);
        self.observer.on_session_description(
            self.source,
            request,
            SessionDescription::new(SdpType::Offer, sdp),
        );
    }

    fn create_answer(&mut self, request: RequestId, constraints: &ConstraintList) {
        if self.reject_if_closed(request) {
            return;
        }
        if self.signaling != SignalingState::HaveRemoteOffer {
            self.observer.on_error(
                self.source,
                Some(request),
                EngineError::invalid_state("createAnswer needs a remote offer"),
            );
            return;
        }
        if self.reject_unsatisfied(request, constraints) {
            return;
        }
        let sdp = self.synthetic_sdp(SdpType::Answer);
        self.observer.on_session_description(
            self.source,
            request,
            SessionDescription::new(SdpType::Answer, sdp),
        );
    }

    fn set_local_description(&mut self, request: RequestId, description: SessionDescription) {
        if self.reject_if_closed(request) {
            return;
        }
        let next = match (self.signaling, description.sdp_type) {
            (SignalingState::Stable, SdpType::Offer) => SignalingState::HaveLocalOffer,
            (SignalingState::HaveRemoteOffer, SdpType::Answer) => SignalingState::Stable,
            (SignalingState::HaveRemoteOffer, SdpType::PrAnswer) => {
                SignalingState::HaveLocalPrAnswer
            }
            (SignalingState::HaveLocalPrAnswer, SdpType::Answer) => SignalingState::Stable,
            (SignalingState::HaveLocalOffer, SdpType::Rollback) => SignalingState::Stable,
            _ => {
                self.reject_transition(request, "local", &description);
                return;
            }
        };

        self.set_signaling(next);
        self.observer.on_operation_complete(self.source, request);

        if description.sdp_type != SdpType::Rollback {
            self.gather_candidates();
        }
        if next == SignalingState::Stable && description.sdp_type == SdpType::Answer {
            self.connect();
        }
    }

    fn set_remote_description(&mut self, request: RequestId, description: SessionDescription) {
        if self.reject_if_closed(request) {
            return;
        }
        let next = match (self.signaling, description.sdp_type) {
            (SignalingState::Stable, SdpType::Offer) => SignalingState::HaveRemoteOffer,
            (SignalingState::HaveLocalOffer, SdpType::Answer) => SignalingState::Stable,
            (SignalingState::HaveLocalOffer, SdpType::PrAnswer) => {
                SignalingState::HaveRemotePrAnswer
            }
            (SignalingState::HaveRemotePrAnswer, SdpType::Answer) => SignalingState::Stable,
            (SignalingState::HaveRemoteOffer, SdpType::Rollback) => SignalingState::Stable,
            _ => {
                self.reject_transition(request, "remote", &description);
                return;
            }
        };

        if description.sdp_type != SdpType::Rollback {
            self.has_remote = true;
        }
        self.set_signaling(next);
        self.observer.on_operation_complete(self.source, request);

        if matches!(description.sdp_type, SdpType::Offer | SdpType::Answer) {
            self.announce_remote_stream();
        }
        if next == SignalingState::Stable && description.sdp_type == SdpType::Answer {
            self.connect();
        }
    }

    fn add_ice_candidate(&mut self, request: RequestId, candidate: IceCandidate) {
        if self.reject_if_closed(request) {
            return;
        }
        if !self.has_remote {
            self.observer.on_error(
                self.source,
                Some(request),
                EngineError::invalid_state("remote description not set"),
            );
            return;
        }
        tracing::trace!(
            source = %self.source,
            end_of_candidates = candidate.is_end_of_candidates(),
            "loopback accepted remote candidate"
        );
        self.observer.on_operation_complete(self.source, request);
    }

    fn create_data_channel(
        &mut self,
        label: &str,
        init: &DataChannelInit,
    ) -> Result<DataChannelInfo> {
        if self.closed {
            return Err(EngineError::invalid_state("peer connection is closed"));
        }
        init.validate()?;

        let mut init = init.clone();
        if init.id.is_none() {
            init.id = Some(self.next_channel_id);
            self.next_channel_id = self.next_channel_id.wrapping_add(1);
        }
        let state = if self.connected {
            DataChannelState::Open
        } else {
            DataChannelState::Connecting
        };
        let info = DataChannelInfo::new(label, &init, state);

        let first = self.channels.is_empty();
        self.channels.push(info.clone());

        if self.connected {
            self.observer.on_data_channel_state_change(
                self.source,
                info.label.clone(),
                DataChannelState::Open,
            );
        } else if first {
            self.observer.on_negotiation_needed(self.source);
        }

        Ok(info)
    }

    fn send(&mut self, label: &str, data: MessageData) -> Result<()> {
        if self.closed {
            return Err(EngineError::invalid_state("peer connection is closed"));
        }
        let channel = self
            .channels
            .iter()
            .find(|c| c.label == label)
            .ok_or_else(|| EngineError::operation(format!("no data channel labelled {label:?}")))?;
        if channel.ready_state != DataChannelState::Open {
            return Err(EngineError::invalid_state(format!(
                "data channel {label:?} is {}",
                channel.ready_state
            )));
        }

        self.observer.on_message(self.source, label.to_string(), data);
        Ok(())
    }

    fn insert_dtmf(&mut self, request: RequestId, tones: &str, duration: Duration, gap: Duration) {
        if self.reject_if_closed(request) {
            return;
        }
        if let Some(bad) = tones.chars().find(|c| !DTMF_ALPHABET.contains(*c)) {
            self.observer.on_error(
                self.source,
                Some(request),
                EngineError::invalid_character(format!("invalid DTMF tone {bad:?}")),
            );
            return;
        }

        tracing::trace!(source = %self.source, tones, ?duration, ?gap, "loopback playing DTMF");
        for tone in tones.chars() {
            self.observer
                .on_dtmf_tone_change(self.source, tone.to_ascii_uppercase().to_string());
        }
        self.observer.on_dtmf_tone_change(self.source, String::new());
        self.observer.on_operation_complete(self.source, request);
    }

    fn get_stats(&mut self, request: RequestId) {
        if self.reject_if_closed(request) {
            return;
        }
        let timestamp = Self::stats_timestamp();
        let open_channels = self
            .channels
            .iter()
            .filter(|c| c.ready_state == DataChannelState::Open)
            .count();

        let report = StatsReport {
            stats: vec![
                RtcStats {
                    id: "P".to_string(),
                    stats_type: "peer-connection".to_string(),
                    timestamp,
                    values: [("dataChannelsOpened".to_string(), open_channels.to_string())]
                        .into_iter()
                        .collect(),
                },
                RtcStats {
                    id: "T01".to_string(),
                    stats_type: "transport".to_string(),
                    timestamp,
                    values: [(
                        "dtlsState".to_string(),
                        if self.connected { "connected" } else { "new" }.to_string(),
                    )]
                    .into_iter()
                    .collect(),
                },
            ],
        };
        self.observer.on_stats_report(self.source, request, report);
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.signaling = SignalingState::Closed;

        for channel in &mut self.channels {
            if channel.ready_state != DataChannelState::Closed {
                channel.ready_state = DataChannelState::Closed;
                self.observer.on_data_channel_state_change(
                    self.source,
                    channel.label.clone(),
                    DataChannelState::Closed,
                );
            }
        }
        tracing::debug!(source = %self.source, "loopback peer connection closed");
    }
}
