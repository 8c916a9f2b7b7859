//! Typed events delivered to script callbacks
//!
//! Every asynchronous engine notification becomes exactly one [`RtcEvent`]
//! variant. Each event names the [`SourceId`] it came from; events that
//! answer a request also carry its [`RequestId`].

use std::fmt;
use std::str::FromStr;

use rtc_engine::{
    DataChannelInfo, DataChannelState, EngineError, IceCandidate, IceConnectionState,
    IceGatheringState, MediaStreamInfo, MessageData, PeerConnectionState, RequestId,
    SessionDescription, SignalingState, SourceId, StatsReport, TrackInfo,
};
use serde::Serialize;

use crate::error::BridgeError;

/// An engine event on its way to script
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RtcEvent {
    /// `createOffer` / `createAnswer` result
    SessionDescription {
        source: SourceId,
        request: RequestId,
        description: SessionDescription,
    },
    /// A request without a result value succeeded
    OperationComplete { source: SourceId, request: RequestId },
    /// A request failed, or the engine reported an unsolicited error
    Error {
        source: SourceId,
        request: Option<RequestId>,
        error: EngineError,
    },
    /// `None` marks the end of candidate gathering
    IceCandidate {
        source: SourceId,
        candidate: Option<IceCandidate>,
    },
    AddStream {
        source: SourceId,
        stream: MediaStreamInfo,
    },
    RemoveStream {
        source: SourceId,
        stream: MediaStreamInfo,
    },
    Track {
        source: SourceId,
        track: TrackInfo,
        stream_ids: Vec<String>,
    },
    DataChannel {
        source: SourceId,
        channel: DataChannelInfo,
    },
    DataChannelStateChange {
        source: SourceId,
        label: String,
        state: DataChannelState,
    },
    Message {
        source: SourceId,
        label: String,
        data: MessageData,
    },
    /// An empty tone marks the end of the tone buffer
    DtmfToneChange { source: SourceId, tone: String },
    StatsReport {
        source: SourceId,
        request: RequestId,
        report: StatsReport,
    },
    SignalingStateChange {
        source: SourceId,
        state: SignalingState,
    },
    IceGatheringStateChange {
        source: SourceId,
        state: IceGatheringState,
    },
    IceConnectionStateChange {
        source: SourceId,
        state: IceConnectionState,
    },
    ConnectionStateChange {
        source: SourceId,
        state: PeerConnectionState,
    },
    NegotiationNeeded { source: SourceId },
    /// `getUserMedia` result
    UserMedia {
        source: SourceId,
        request: RequestId,
        stream: MediaStreamInfo,
    },
}

impl RtcEvent {
    pub fn source(&self) -> SourceId {
        match self {
            RtcEvent::SessionDescription { source, .. }
            | RtcEvent::OperationComplete { source, .. }
            | RtcEvent::Error { source, .. }
            | RtcEvent::IceCandidate { source, .. }
            | RtcEvent::AddStream { source, .. }
            | RtcEvent::RemoveStream { source, .. }
            | RtcEvent::Track { source, .. }
            | RtcEvent::DataChannel { source, .. }
            | RtcEvent::DataChannelStateChange { source, .. }
            | RtcEvent::Message { source, .. }
            | RtcEvent::DtmfToneChange { source, .. }
            | RtcEvent::StatsReport { source, .. }
            | RtcEvent::SignalingStateChange { source, .. }
            | RtcEvent::IceGatheringStateChange { source, .. }
            | RtcEvent::IceConnectionStateChange { source, .. }
            | RtcEvent::ConnectionStateChange { source, .. }
            | RtcEvent::NegotiationNeeded { source }
            | RtcEvent::UserMedia { source, .. } => *source,
        }
    }

    /// The request this event answers, if any
    pub fn request(&self) -> Option<RequestId> {
        match self {
            RtcEvent::SessionDescription { request, .. }
            | RtcEvent::OperationComplete { request, .. }
            | RtcEvent::StatsReport { request, .. }
            | RtcEvent::UserMedia { request, .. } => Some(*request),
            RtcEvent::Error { request, .. } => *request,
            _ => None,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            RtcEvent::SessionDescription { .. } => EventKind::SessionDescription,
            RtcEvent::OperationComplete { .. } => EventKind::OperationComplete,
            RtcEvent::Error { .. } => EventKind::Error,
            RtcEvent::IceCandidate { .. } => EventKind::IceCandidate,
            RtcEvent::AddStream { .. } => EventKind::AddStream,
            RtcEvent::RemoveStream { .. } => EventKind::RemoveStream,
            RtcEvent::Track { .. } => EventKind::Track,
            RtcEvent::DataChannel { .. } => EventKind::DataChannel,
            RtcEvent::DataChannelStateChange { .. } => EventKind::DataChannelStateChange,
            RtcEvent::Message { .. } => EventKind::Message,
            RtcEvent::DtmfToneChange { .. } => EventKind::DtmfToneChange,
            RtcEvent::StatsReport { .. } => EventKind::StatsReport,
            RtcEvent::SignalingStateChange { .. } => EventKind::SignalingStateChange,
            RtcEvent::IceGatheringStateChange { .. } => EventKind::IceGatheringStateChange,
            RtcEvent::IceConnectionStateChange { .. } => EventKind::IceConnectionStateChange,
            RtcEvent::ConnectionStateChange { .. } => EventKind::ConnectionStateChange,
            RtcEvent::NegotiationNeeded { .. } => EventKind::NegotiationNeeded,
            RtcEvent::UserMedia { .. } => EventKind::UserMedia,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RtcEvent::Error { .. })
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            RtcEvent::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    /// JSON form handed to hosts that marshal events as strings
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Discriminant of [`RtcEvent`], used as the handler-slot key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EventKind {
    SessionDescription,
    OperationComplete,
    Error,
    IceCandidate,
    AddStream,
    RemoveStream,
    Track,
    DataChannel,
    DataChannelStateChange,
    Message,
    DtmfToneChange,
    StatsReport,
    SignalingStateChange,
    IceGatheringStateChange,
    IceConnectionStateChange,
    ConnectionStateChange,
    NegotiationNeeded,
    UserMedia,
}

impl EventKind {
    /// Kinds that script can subscribe to by callback name
    pub const SLOTS: &'static [EventKind] = &[
        EventKind::Error,
        EventKind::IceCandidate,
        EventKind::AddStream,
        EventKind::RemoveStream,
        EventKind::Track,
        EventKind::DataChannel,
        EventKind::DataChannelStateChange,
        EventKind::Message,
        EventKind::DtmfToneChange,
        EventKind::SignalingStateChange,
        EventKind::IceGatheringStateChange,
        EventKind::IceConnectionStateChange,
        EventKind::ConnectionStateChange,
        EventKind::NegotiationNeeded,
    ];

    /// Script callback attribute for this kind
    ///
    /// `None` for kinds that only answer a request.
    pub fn callback_name(&self) -> Option<&'static str> {
        match self {
            EventKind::Error => Some("onerror"),
            EventKind::IceCandidate => Some("onicecandidate"),
            EventKind::AddStream => Some("onaddstream"),
            EventKind::RemoveStream => Some("onremovestream"),
            EventKind::Track => Some("ontrack"),
            EventKind::DataChannel => Some("ondatachannel"),
            EventKind::DataChannelStateChange => Some("ondatachannelstatechange"),
            EventKind::Message => Some("onmessage"),
            EventKind::DtmfToneChange => Some("ontonechange"),
            EventKind::SignalingStateChange => Some("onsignalingstatechange"),
            EventKind::IceGatheringStateChange => Some("onicegatheringstatechange"),
            EventKind::IceConnectionStateChange => Some("oniceconnectionstatechange"),
            EventKind::ConnectionStateChange => Some("onconnectionstatechange"),
            EventKind::NegotiationNeeded => Some("onnegotiationneeded"),
            EventKind::SessionDescription
            | EventKind::OperationComplete
            | EventKind::StatsReport
            | EventKind::UserMedia => None,
        }
    }

    pub fn from_callback_name(name: &str) -> Option<EventKind> {
        EventKind::SLOTS
            .iter()
            .copied()
            .find(|kind| kind.callback_name() == Some(name))
    }

    pub fn is_slot(&self) -> bool {
        self.callback_name().is_some()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.callback_name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{self:?}"),
        }
    }
}

impl FromStr for EventKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::from_callback_name(s).ok_or_else(|| BridgeError::UnknownCallback(s.to_string()))
    }
}
