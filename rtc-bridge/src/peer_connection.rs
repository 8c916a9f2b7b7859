//! Script-facing peer connection
//!
//! Every method returns immediately. Engine work is posted to the worker
//! thread; its results come back as [`RtcEvent`]s through the bridge's
//! callback queue, either to the per-request `on_result` callback or to the
//! handler slot script installed for that kind of event.
//!
//! The engine-side object lives behind a [`Guarded`] slot that only the
//! worker thread touches. Dropping a `PeerConnection` unregisters all of its
//! callbacks first, then closes and drops the engine object on the worker,
//! and only then releases the factory handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use callback_queue::{Guarded, TargetId};
use rtc_engine::{
    build_constraints, DataChannelInfo, DataChannelInit, EngineError, EngineObserver,
    EnginePeerConnection, IceCandidate, MediaConstraintSets, MessageData, RequestId,
    SessionDescription, SignalingState, SourceId,
};

use crate::bridge::BridgeShared;
use crate::error::{BridgeError, Result};
use crate::event::{EventKind, RtcEvent};
use crate::factory::FactoryHandle;
use crate::worker::WorkerHandle;

/// Default duration of one DTMF tone
pub const DEFAULT_DTMF_DURATION: Duration = Duration::from_millis(100);
/// Default gap between DTMF tones
pub const DEFAULT_DTMF_GAP: Duration = Duration::from_millis(70);

const MIN_DTMF_DURATION: Duration = Duration::from_millis(40);
const MAX_DTMF_DURATION: Duration = Duration::from_millis(6000);
const MIN_DTMF_GAP: Duration = Duration::from_millis(30);

type EngineSlot = Arc<Guarded<Option<Box<dyn EnginePeerConnection>>>>;

/// A peer connection owned by script
pub struct PeerConnection {
    shared: Arc<BridgeShared>,
    source: SourceId,
    engine: EngineSlot,
    handle: Option<FactoryHandle>,
    closed: AtomicBool,
}

impl PeerConnection {
    pub(crate) fn new(
        shared: Arc<BridgeShared>,
        source: SourceId,
        engine: Box<dyn EnginePeerConnection>,
        handle: FactoryHandle,
    ) -> Self {
        Self {
            shared,
            source,
            engine: Arc::new(Guarded::new("peer-connection", Some(engine))),
            handle: Some(handle),
            closed: AtomicBool::new(false),
        }
    }

    /// Id carried by every event this connection raises
    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn signaling_state(&self) -> SignalingState {
        if self.is_closed() {
            SignalingState::Closed
        } else {
            self.shared.dispatcher.signaling_state(self.source)
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ========================================================================
    // Handler slots
    // ========================================================================

    /// Install `handler` for every event of `kind` from this connection
    ///
    /// Replaces (and unregisters) any previous handler for the same kind.
    /// Events already queued for the replaced handler are dropped.
    pub fn set_handler<F>(&self, kind: EventKind, handler: F) -> Result<TargetId>
    where
        F: Fn(&RtcEvent) + Send + Sync + 'static,
    {
        if !kind.is_slot() {
            return Err(BridgeError::NotASlot(kind));
        }

        let target = self.shared.targets.register(handler);
        if let Some(previous) = self
            .shared
            .dispatcher
            .routes()
            .bind_slot(self.source, kind, target)
        {
            self.shared.targets.unregister(previous);
        }
        tracing::trace!(source = %self.source, %kind, %target, "handler installed");
        Ok(target)
    }

    /// [`set_handler`](Self::set_handler) by W3C callback name, e.g. `"onicecandidate"`
    pub fn set_handler_by_name<F>(&self, name: &str, handler: F) -> Result<TargetId>
    where
        F: Fn(&RtcEvent) + Send + Sync + 'static,
    {
        let kind: EventKind = name.parse()?;
        self.set_handler(kind, handler)
    }

    /// Remove the handler for `kind`; returns whether one was installed
    pub fn clear_handler(&self, kind: EventKind) -> bool {
        match self.shared.dispatcher.routes().unbind_slot(self.source, kind) {
            Some(target) => self.shared.targets.unregister(target),
            None => false,
        }
    }

    // ========================================================================
    // Negotiation
    // ========================================================================

    pub fn create_offer<F>(
        &self,
        constraints: Option<&MediaConstraintSets>,
        on_result: F,
    ) -> Result<RequestId>
    where
        F: Fn(&RtcEvent) + Send + Sync + 'static,
    {
        let constraints = build_constraints(constraints);
        self.request(on_result, move |pc, request| pc.create_offer(request, &constraints))
    }

    pub fn create_answer<F>(
        &self,
        constraints: Option<&MediaConstraintSets>,
        on_result: F,
    ) -> Result<RequestId>
    where
        F: Fn(&RtcEvent) + Send + Sync + 'static,
    {
        let constraints = build_constraints(constraints);
        self.request(on_result, move |pc, request| pc.create_answer(request, &constraints))
    }

    pub fn set_local_description<F>(
        &self,
        description: SessionDescription,
        on_result: F,
    ) -> Result<RequestId>
    where
        F: Fn(&RtcEvent) + Send + Sync + 'static,
    {
        self.request(on_result, move |pc, request| {
            pc.set_local_description(request, description)
        })
    }

    pub fn set_remote_description<F>(
        &self,
        description: SessionDescription,
        on_result: F,
    ) -> Result<RequestId>
    where
        F: Fn(&RtcEvent) + Send + Sync + 'static,
    {
        self.request(on_result, move |pc, request| {
            pc.set_remote_description(request, description)
        })
    }

    pub fn add_ice_candidate<F>(&self, candidate: IceCandidate, on_result: F) -> Result<RequestId>
    where
        F: Fn(&RtcEvent) + Send + Sync + 'static,
    {
        self.request(on_result, move |pc, request| pc.add_ice_candidate(request, candidate))
    }

    // ========================================================================
    // Data channels
    // ========================================================================

    /// Create a data channel
    ///
    /// Waits for the worker, so it must not be called from inside an async
    /// runtime; there it fails with [`BridgeError::BlockingInRuntime`]. An
    /// invalid `init` fails with a `TypeError` before anything is posted.
    /// Without `init` the configured default priority applies.
    pub fn create_data_channel(
        &self,
        label: &str,
        init: Option<DataChannelInit>,
    ) -> Result<DataChannelInfo> {
        let init = init.unwrap_or_else(|| DataChannelInit {
            priority: self.shared.config.default_data_channel_priority,
            ..Default::default()
        });
        init.validate()?;

        let label = label.to_string();
        self.call(move |pc| pc.create_data_channel(&label, &init))
    }

    /// Send on the data channel labelled `label`
    ///
    /// Fails with `InvalidStateError` unless the channel is open. Waits for
    /// the worker like [`create_data_channel`](Self::create_data_channel).
    pub fn send(&self, label: &str, data: impl Into<MessageData>) -> Result<()> {
        let label = label.to_string();
        let data = data.into();
        self.call(move |pc| pc.send(&label, data))
    }

    // ========================================================================
    // DTMF and stats
    // ========================================================================

    /// Queue DTMF tones
    ///
    /// `duration` is clamped to 40..=6000 ms and `gap` to at least 30 ms.
    /// The handler for [`EventKind::DtmfToneChange`] sees each tone, then an
    /// empty tone; `on_result` sees completion or `InvalidCharacterError`.
    pub fn insert_dtmf<F>(
        &self,
        tones: &str,
        duration: Option<Duration>,
        gap: Option<Duration>,
        on_result: F,
    ) -> Result<RequestId>
    where
        F: Fn(&RtcEvent) + Send + Sync + 'static,
    {
        let tones = tones.to_string();
        let duration = duration
            .unwrap_or(DEFAULT_DTMF_DURATION)
            .clamp(MIN_DTMF_DURATION, MAX_DTMF_DURATION);
        let gap = gap.unwrap_or(DEFAULT_DTMF_GAP).max(MIN_DTMF_GAP);
        self.request(on_result, move |pc, request| pc.insert_dtmf(request, &tones, duration, gap))
    }

    pub fn get_stats<F>(&self, on_result: F) -> Result<RequestId>
    where
        F: Fn(&RtcEvent) + Send + Sync + 'static,
    {
        self.request(on_result, |pc, request| pc.get_stats(request))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Close the connection
    ///
    /// Idempotent. Handlers stay installed; later requests fail with an
    /// `InvalidStateError` event.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.dispatcher.mark_closed(self.source);
        tracing::debug!(source = %self.source, "closing peer connection");

        let engine = Arc::clone(&self.engine);
        self.worker()?.post(move || {
            if let Some(pc) = engine.lock().as_mut() {
                pc.close();
            }
        })
    }

    fn worker(&self) -> Result<&WorkerHandle> {
        self.handle
            .as_ref()
            .map(FactoryHandle::worker)
            .ok_or(BridgeError::Closed)
    }

    /// Post `op` with a fresh request bound to `on_result`
    fn request<H, F>(&self, on_result: H, op: F) -> Result<RequestId>
    where
        H: Fn(&RtcEvent) + Send + Sync + 'static,
        F: FnOnce(&mut dyn EnginePeerConnection, RequestId) + Send + 'static,
    {
        let worker = self.worker()?.clone();
        let request = self.shared.bind_request(self.source, on_result);
        let engine = Arc::clone(&self.engine);
        let dispatcher = Arc::clone(&self.shared.dispatcher);
        let source = self.source;

        let posted = worker.post(move || {
            let mut slot = engine.lock();
            match slot.as_mut() {
                Some(pc) => op(pc.as_mut(), request),
                None => dispatcher.on_error(
                    source,
                    Some(request),
                    EngineError::invalid_state("peer connection is closed"),
                ),
            }
        });

        if let Err(e) = posted {
            self.shared.abandon_request(request);
            return Err(e);
        }
        Ok(request)
    }

    /// Run `op` on the worker and wait for its result
    fn call<F, R>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&mut dyn EnginePeerConnection) -> rtc_engine::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        self.worker()?.call(move || match engine.lock().as_mut() {
            Some(pc) => op(pc.as_mut()).map_err(BridgeError::from),
            None => Err(BridgeError::Closed),
        })?
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);

        for target in self.shared.dispatcher.forget_source(self.source) {
            self.shared.targets.unregister(target);
        }

        let Some(handle) = self.handle.take() else {
            return;
        };
        let engine = Arc::clone(&self.engine);
        let worker = handle.worker().clone();

        if worker.is_running() {
            let source = self.source;
            let posted = worker.post(move || {
                if let Some(mut pc) = engine.lock().take() {
                    pc.close();
                }
                tracing::debug!(%source, "engine peer connection dropped");
                drop(handle);
            });
            if posted.is_ok() {
                return;
            }
        }

        // Worker already gone; nothing else can touch the engine object
        if let Some(mut pc) = self.engine.lock().take() {
            pc.close();
        }
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("source", &self.source)
            .field("closed", &self.is_closed())
            .finish()
    }
}
