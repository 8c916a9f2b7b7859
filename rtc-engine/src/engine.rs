//! The seam between the bridge and the communication engine
//!
//! The engine itself (media, ICE, codecs) is a black box. The bridge talks
//! to it only through these traits: an [`EngineProvider`] builds the shared
//! factory, the factory builds peer connections, and every asynchronous
//! result comes back through the [`EngineObserver`] hooks on the engine's
//! worker thread.

use std::sync::Arc;
use std::time::Duration;

use crate::constraints::{ConstraintList, MediaStreamConstraints};
use crate::error::{EngineError, Result};
use crate::types::{
    DataChannelInfo, DataChannelInit, DataChannelState, IceCandidate, IceConnectionState,
    IceGatheringState, MediaStreamInfo, MessageData, PeerConnectionState, RequestId,
    RtcConfiguration, SessionDescription, SignalingState, SourceId, StatsReport, TrackInfo,
};

/// Audio device module handed to the factory at construction
pub trait AudioDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Stop device I/O; called once during teardown, after the factory is dropped
    fn terminate(&self) {}
}

/// Constructs the process-wide engine objects
pub trait EngineProvider: Send + Sync {
    /// Create the audio device, or `None` to let the engine use its default
    fn create_audio_device(&self) -> Result<Option<Arc<dyn AudioDevice>>>;

    /// Create the shared factory
    fn create_factory(
        &self,
        audio_device: Option<Arc<dyn AudioDevice>>,
    ) -> Result<Arc<dyn EngineFactory>>;
}

/// Shared, expensive engine factory
pub trait EngineFactory: Send + Sync {
    fn create_peer_connection(
        &self,
        source: SourceId,
        config: &RtcConfiguration,
        constraints: &ConstraintList,
        observer: Arc<dyn EngineObserver>,
    ) -> Result<Box<dyn EnginePeerConnection>>;

    /// Open local capture devices
    fn get_user_media(&self, constraints: &MediaStreamConstraints) -> Result<MediaStreamInfo>;
}

/// One engine-side peer connection
///
/// Methods are only ever called on the worker thread. Methods taking a
/// [`RequestId`] complete asynchronously through the observer, reporting
/// either a result or `on_error` with the same request id.
pub trait EnginePeerConnection: Send {
    fn create_offer(&mut self, request: RequestId, constraints: &ConstraintList);

    fn create_answer(&mut self, request: RequestId, constraints: &ConstraintList);

    fn set_local_description(&mut self, request: RequestId, description: SessionDescription);

    fn set_remote_description(&mut self, request: RequestId, description: SessionDescription);

    fn add_ice_candidate(&mut self, request: RequestId, candidate: IceCandidate);

    fn create_data_channel(
        &mut self,
        label: &str,
        init: &DataChannelInit,
    ) -> Result<DataChannelInfo>;

    fn send(&mut self, label: &str, data: MessageData) -> Result<()>;

    fn insert_dtmf(&mut self, request: RequestId, tones: &str, duration: Duration, gap: Duration);

    fn get_stats(&mut self, request: RequestId);

    fn close(&mut self);
}

/// Event hooks raised by the engine on its worker thread
///
/// Implementations must not block: the engine stalls if these do.
pub trait EngineObserver: Send + Sync {
    /// `createOffer` / `createAnswer` succeeded
    fn on_session_description(
        &self,
        source: SourceId,
        request: RequestId,
        description: SessionDescription,
    );

    /// A request with no result value succeeded
    fn on_operation_complete(&self, source: SourceId, request: RequestId);

    /// A request failed, or the engine reports an unsolicited error
    fn on_error(&self, source: SourceId, request: Option<RequestId>, error: EngineError);

    /// `None` marks the end of candidate gathering
    fn on_ice_candidate(&self, source: SourceId, candidate: Option<IceCandidate>);

    fn on_add_stream(&self, source: SourceId, stream: MediaStreamInfo);

    fn on_remove_stream(&self, source: SourceId, stream: MediaStreamInfo);

    fn on_track(&self, source: SourceId, track: TrackInfo, stream_ids: Vec<String>);

    /// The remote side opened a data channel
    fn on_data_channel(&self, source: SourceId, channel: DataChannelInfo);

    fn on_data_channel_state_change(
        &self,
        source: SourceId,
        label: String,
        state: DataChannelState,
    );

    fn on_message(&self, source: SourceId, label: String, data: MessageData);

    /// An empty tone marks the end of the tone buffer
    fn on_dtmf_tone_change(&self, source: SourceId, tone: String);

    fn on_stats_report(&self, source: SourceId, request: RequestId, report: StatsReport);

    fn on_signaling_state_change(&self, source: SourceId, state: SignalingState);

    fn on_ice_gathering_state_change(&self, source: SourceId, state: IceGatheringState);

    fn on_ice_connection_state_change(&self, source: SourceId, state: IceConnectionState);

    fn on_connection_state_change(&self, source: SourceId, state: PeerConnectionState);

    fn on_negotiation_needed(&self, source: SourceId);
}
