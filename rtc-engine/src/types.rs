//! W3C WebRTC value types shared by the engine seam and the bridge
//!
//! String-valued enumerations keep the exact W3C spelling
//! (`"have-local-offer"`, `"very-low"`, ...) for `as_str`, `FromStr` and
//! serde.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// Declares a W3C string enumeration
macro_rules! w3c_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident => $text:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// Every value, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The W3C string form
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::error::ParseError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::error::ParseError::UnknownValue {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use w3c_enum;

w3c_enum! {
    /// `RTCSdpType`
    SdpType {
        Offer => "offer",
        PrAnswer => "pranswer",
        Answer => "answer",
        Rollback => "rollback",
    }
}

w3c_enum! {
    /// `RTCSignalingState`
    SignalingState {
        Stable => "stable",
        HaveLocalOffer => "have-local-offer",
        HaveRemoteOffer => "have-remote-offer",
        HaveLocalPrAnswer => "have-local-pranswer",
        HaveRemotePrAnswer => "have-remote-pranswer",
        Closed => "closed",
    }
}

w3c_enum! {
    /// `RTCIceGatheringState`
    IceGatheringState {
        New => "new",
        Gathering => "gathering",
        Complete => "complete",
    }
}

w3c_enum! {
    /// `RTCIceConnectionState`
    IceConnectionState {
        New => "new",
        Checking => "checking",
        Connected => "connected",
        Completed => "completed",
        Failed => "failed",
        Disconnected => "disconnected",
        Closed => "closed",
    }
}

w3c_enum! {
    /// `RTCPeerConnectionState`
    PeerConnectionState {
        New => "new",
        Connecting => "connecting",
        Connected => "connected",
        Disconnected => "disconnected",
        Failed => "failed",
        Closed => "closed",
    }
}

w3c_enum! {
    /// `RTCDataChannelState`
    DataChannelState {
        Connecting => "connecting",
        Open => "open",
        Closing => "closing",
        Closed => "closed",
    }
}

w3c_enum! {
    /// `RTCPriorityType`
    PriorityType {
        VeryLow => "very-low",
        Low => "low",
        Medium => "medium",
        High => "high",
    }
}

w3c_enum! {
    /// `MediaStreamTrackState`
    MediaStreamTrackState {
        Live => "live",
        Ended => "ended",
    }
}

w3c_enum! {
    /// `MediaDeviceKind`
    MediaDeviceKind {
        AudioInput => "audioinput",
        AudioOutput => "audiooutput",
        VideoInput => "videoinput",
    }
}

w3c_enum! {
    /// `MediaStreamTrack.kind`
    TrackKind {
        Audio => "audio",
        Video => "video",
    }
}

impl Default for SignalingState {
    fn default() -> Self {
        SignalingState::Stable
    }
}

impl Default for IceGatheringState {
    fn default() -> Self {
        IceGatheringState::New
    }
}

impl Default for IceConnectionState {
    fn default() -> Self {
        IceConnectionState::New
    }
}

impl Default for PeerConnectionState {
    fn default() -> Self {
        PeerConnectionState::New
    }
}

impl Default for PriorityType {
    fn default() -> Self {
        PriorityType::Low
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Identifies the engine object (peer connection) an event originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(u64);

impl SourceId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// Identifies one asynchronous request (create offer, get stats, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request-{}", self.0)
    }
}

// ============================================================================
// Track selection
// ============================================================================

/// Set of track kinds, as a bit mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TrackTypeFlags(u8);

impl TrackTypeFlags {
    pub const NONE: TrackTypeFlags = TrackTypeFlags(0x00);
    pub const AUDIO: TrackTypeFlags = TrackTypeFlags(0x01);
    pub const VIDEO: TrackTypeFlags = TrackTypeFlags(0x02);
    pub const AUDIO_VIDEO: TrackTypeFlags = TrackTypeFlags(0x03);
    pub const ALL: TrackTypeFlags = TrackTypeFlags(0xFF);

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: TrackTypeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Whether tracks of `kind` are selected
    pub fn includes(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.contains(Self::AUDIO),
            TrackKind::Video => self.contains(Self::VIDEO),
        }
    }
}

impl BitOr for TrackTypeFlags {
    type Output = TrackTypeFlags;

    fn bitor(self, rhs: TrackTypeFlags) -> TrackTypeFlags {
        TrackTypeFlags(self.0 | rhs.0)
    }
}

// ============================================================================
// Session and ICE
// ============================================================================

/// `RTCSessionDescriptionInit`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }
}

/// `RTCIceCandidateInit`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(
        candidate: impl Into<String>,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_mline_index,
        }
    }

    /// An empty candidate string marks the end of candidates
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.is_empty()
    }
}

/// `RTCIceServer`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl IceServer {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            ..Default::default()
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.credential = credential.into();
        self
    }
}

/// `RTCConfiguration`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RtcConfiguration {
    pub ice_servers: Vec<IceServer>,
}

// ============================================================================
// Data channels
// ============================================================================

/// `RTCDataChannelInit`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataChannelInit {
    pub ordered: bool,
    pub max_packet_life_time: Option<u16>,
    pub max_retransmits: Option<u16>,
    pub protocol: String,
    pub negotiated: bool,
    pub id: Option<u16>,
    pub priority: PriorityType,
}

impl Default for DataChannelInit {
    fn default() -> Self {
        Self {
            ordered: true,
            max_packet_life_time: None,
            max_retransmits: None,
            protocol: String::new(),
            negotiated: false,
            id: None,
            priority: PriorityType::Low,
        }
    }
}

impl DataChannelInit {
    /// Reject combinations the W3C API refuses with a `TypeError`
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.max_packet_life_time.is_some() && self.max_retransmits.is_some() {
            return Err(crate::error::EngineError::type_error(
                "maxPacketLifeTime and maxRetransmits are mutually exclusive",
            ));
        }
        if self.negotiated && self.id.is_none() {
            return Err(crate::error::EngineError::type_error(
                "negotiated data channels need an id",
            ));
        }
        Ok(())
    }
}

/// Snapshot of a data channel as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChannelInfo {
    pub label: String,
    pub id: Option<u16>,
    pub protocol: String,
    pub ordered: bool,
    pub negotiated: bool,
    pub priority: PriorityType,
    pub ready_state: DataChannelState,
}

impl DataChannelInfo {
    pub fn new(
        label: impl Into<String>,
        init: &DataChannelInit,
        ready_state: DataChannelState,
    ) -> Self {
        Self {
            label: label.into(),
            id: init.id,
            protocol: init.protocol.clone(),
            ordered: init.ordered,
            negotiated: init.negotiated,
            priority: init.priority,
            ready_state,
        }
    }
}

/// Payload carried by a data channel message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum MessageData {
    Text(String),
    Binary(Vec<u8>),
}

impl MessageData {
    pub fn len(&self) -> usize {
        match self {
            MessageData::Text(text) => text.len(),
            MessageData::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageData::Text(text) => Some(text),
            MessageData::Binary(_) => None,
        }
    }
}

impl From<&str> for MessageData {
    fn from(text: &str) -> Self {
        MessageData::Text(text.to_string())
    }
}

impl From<Vec<u8>> for MessageData {
    fn from(bytes: Vec<u8>) -> Self {
        MessageData::Binary(bytes)
    }
}

// ============================================================================
// Media
// ============================================================================

/// Snapshot of a media track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
    pub label: String,
    pub enabled: bool,
    pub ready_state: MediaStreamTrackState,
}

/// Snapshot of a media stream and its tracks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStreamInfo {
    pub id: String,
    pub tracks: Vec<TrackInfo>,
}

impl MediaStreamInfo {
    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &TrackInfo> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }

    pub fn track_types(&self) -> TrackTypeFlags {
        self.tracks.iter().fold(TrackTypeFlags::NONE, |flags, track| match track.kind {
            TrackKind::Audio => flags | TrackTypeFlags::AUDIO,
            TrackKind::Video => flags | TrackTypeFlags::VIDEO,
        })
    }
}

// ============================================================================
// Stats
// ============================================================================

/// One `RTCStats` dictionary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcStats {
    pub id: String,
    #[serde(rename = "type")]
    pub stats_type: String,
    pub timestamp: f64,
    pub values: BTreeMap<String, String>,
}

/// `RTCStatsReport`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatsReport {
    pub stats: Vec<RtcStats>,
}

impl StatsReport {
    pub fn get(&self, id: &str) -> Option<&RtcStats> {
        self.stats.iter().find(|s| s.id == id)
    }

    pub fn of_type<'a>(&'a self, stats_type: &'a str) -> impl Iterator<Item = &'a RtcStats> {
        self.stats.iter().filter(move |s| s.stats_type == stats_type)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}
