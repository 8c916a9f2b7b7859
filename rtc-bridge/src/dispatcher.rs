//! Engine observer that turns hooks into queued events
//!
//! [`EventDispatcher`] runs on the engine's worker thread. Each hook builds
//! one [`RtcEvent`], resolves the callback target it is meant for and pushes
//! it onto the [`CallbackQueue`]. Nothing here waits on the script thread.
//!
//! Routing:
//! - events carrying a request id go to that request's one-shot target
//! - everything else goes to the `(source, kind)` slot set by script
//! - errors without a request id go to the source's `onerror` slot
//! - with no route the event is dropped; nobody is listening

use std::sync::Arc;

use callback_queue::{CallbackQueue, TargetId};
use dashmap::DashMap;
use rtc_engine::{
    DataChannelInfo, DataChannelState, EngineError, EngineObserver, IceCandidate,
    IceConnectionState, IceGatheringState, MediaStreamInfo, MessageData, PeerConnectionState,
    RequestId, SessionDescription, SignalingState, SourceId, StatsReport, TrackInfo,
};

use crate::event::{EventKind, RtcEvent};

/// Where events for each source and request should be delivered
#[derive(Debug, Default)]
pub struct EventRoutes {
    slots: DashMap<(SourceId, EventKind), TargetId>,
    requests: DashMap<RequestId, (SourceId, TargetId)>,
}

impl EventRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point a handler slot at `target`, returning the target it replaced
    pub fn bind_slot(
        &self,
        source: SourceId,
        kind: EventKind,
        target: TargetId,
    ) -> Option<TargetId> {
        self.slots.insert((source, kind), target)
    }

    pub fn unbind_slot(&self, source: SourceId, kind: EventKind) -> Option<TargetId> {
        self.slots.remove(&(source, kind)).map(|(_, target)| target)
    }

    pub fn slot(&self, source: SourceId, kind: EventKind) -> Option<TargetId> {
        self.slots.get(&(source, kind)).map(|entry| *entry)
    }

    pub fn bind_request(&self, request: RequestId, source: SourceId, target: TargetId) {
        self.requests.insert(request, (source, target));
    }

    pub fn unbind_request(&self, request: RequestId) -> Option<TargetId> {
        self.requests.remove(&request).map(|(_, (_, target))| target)
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// Resolve the target for `event`
    ///
    /// A request binding is consumed by the first event that answers it.
    pub fn route(&self, event: &RtcEvent) -> Option<TargetId> {
        let source = event.source();
        if let Some(request) = event.request() {
            if let Some(target) = self.unbind_request(request) {
                return Some(target);
            }
        }
        let kind = event.kind();
        if kind.is_slot() {
            self.slot(source, kind)
        } else {
            None
        }
    }

    /// Drop every slot and request binding of `source`
    ///
    /// Returns the targets that were bound so the caller can unregister them.
    pub fn forget_source(&self, source: SourceId) -> Vec<TargetId> {
        let mut targets = Vec::new();
        self.slots.retain(|(slot_source, _), target| {
            if *slot_source == source {
                targets.push(*target);
                false
            } else {
                true
            }
        });
        self.requests.retain(|_, (request_source, target)| {
            if *request_source == source {
                targets.push(*target);
                false
            } else {
                true
            }
        });
        targets
    }
}

/// [`EngineObserver`] feeding the callback queue
pub struct EventDispatcher {
    queue: Arc<CallbackQueue<RtcEvent>>,
    routes: EventRoutes,
    signaling: DashMap<SourceId, SignalingState>,
}

impl EventDispatcher {
    pub fn new(queue: Arc<CallbackQueue<RtcEvent>>) -> Self {
        Self {
            queue,
            routes: EventRoutes::new(),
            signaling: DashMap::new(),
        }
    }

    pub fn routes(&self) -> &EventRoutes {
        &self.routes
    }

    pub fn queue(&self) -> &Arc<CallbackQueue<RtcEvent>> {
        &self.queue
    }

    /// Route `event` and push it; returns whether it was queued
    pub fn dispatch(&self, event: RtcEvent) -> bool {
        match self.routes.route(&event) {
            Some(target) => {
                self.queue.push_value(target, event);
                true
            }
            None => {
                tracing::trace!(
                    source = %event.source(),
                    kind = ?event.kind(),
                    "no callback bound; event dropped"
                );
                false
            }
        }
    }

    /// Last signaling state the engine reported for `source`
    pub fn signaling_state(&self, source: SourceId) -> SignalingState {
        self.signaling
            .get(&source)
            .map(|state| *state)
            .unwrap_or_default()
    }

    /// Start tracking signaling state for a new connection
    pub(crate) fn track_source(&self, source: SourceId) {
        self.signaling.insert(source, SignalingState::Stable);
    }

    pub(crate) fn mark_closed(&self, source: SourceId) {
        self.signaling.insert(source, SignalingState::Closed);
    }

    /// Forget all routing and state of `source`
    pub(crate) fn forget_source(&self, source: SourceId) -> Vec<TargetId> {
        self.signaling.remove(&source);
        self.routes.forget_source(source)
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("pending", &self.queue.len())
            .field("routes", &self.routes)
            .finish()
    }
}

impl EngineObserver for EventDispatcher {
    fn on_session_description(
        &self,
        source: SourceId,
        request: RequestId,
        description: SessionDescription,
    ) {
        self.dispatch(RtcEvent::SessionDescription {
            source,
            request,
            description,
        });
    }

    fn on_operation_complete(&self, source: SourceId, request: RequestId) {
        self.dispatch(RtcEvent::OperationComplete { source, request });
    }

    fn on_error(&self, source: SourceId, request: Option<RequestId>, error: EngineError) {
        tracing::debug!(%source, ?request, "engine reported {}", error);
        self.dispatch(RtcEvent::Error {
            source,
            request,
            error,
        });
    }

    fn on_ice_candidate(&self, source: SourceId, candidate: Option<IceCandidate>) {
        self.dispatch(RtcEvent::IceCandidate { source, candidate });
    }

    fn on_add_stream(&self, source: SourceId, stream: MediaStreamInfo) {
        self.dispatch(RtcEvent::AddStream { source, stream });
    }

    fn on_remove_stream(&self, source: SourceId, stream: MediaStreamInfo) {
        self.dispatch(RtcEvent::RemoveStream { source, stream });
    }

    fn on_track(&self, source: SourceId, track: TrackInfo, stream_ids: Vec<String>) {
        self.dispatch(RtcEvent::Track {
            source,
            track,
            stream_ids,
        });
    }

    fn on_data_channel(&self, source: SourceId, channel: DataChannelInfo) {
        self.dispatch(RtcEvent::DataChannel { source, channel });
    }

    fn on_data_channel_state_change(
        &self,
        source: SourceId,
        label: String,
        state: DataChannelState,
    ) {
        self.dispatch(RtcEvent::DataChannelStateChange { source, label, state });
    }

    fn on_message(&self, source: SourceId, label: String, data: MessageData) {
        self.dispatch(RtcEvent::Message { source, label, data });
    }

    fn on_dtmf_tone_change(&self, source: SourceId, tone: String) {
        self.dispatch(RtcEvent::DtmfToneChange { source, tone });
    }

    fn on_stats_report(&self, source: SourceId, request: RequestId, report: StatsReport) {
        self.dispatch(RtcEvent::StatsReport {
            source,
            request,
            report,
        });
    }

    fn on_signaling_state_change(&self, source: SourceId, state: SignalingState) {
        // Sources already forgotten stay forgotten
        if let Some(mut tracked) = self.signaling.get_mut(&source) {
            *tracked = state;
        }
        self.dispatch(RtcEvent::SignalingStateChange { source, state });
    }

    fn on_ice_gathering_state_change(&self, source: SourceId, state: IceGatheringState) {
        self.dispatch(RtcEvent::IceGatheringStateChange { source, state });
    }

    fn on_ice_connection_state_change(&self, source: SourceId, state: IceConnectionState) {
        self.dispatch(RtcEvent::IceConnectionStateChange { source, state });
    }

    fn on_connection_state_change(&self, source: SourceId, state: PeerConnectionState) {
        self.dispatch(RtcEvent::ConnectionStateChange { source, state });
    }

    fn on_negotiation_needed(&self, source: SourceId) {
        self.dispatch(RtcEvent::NegotiationNeeded { source });
    }
}
