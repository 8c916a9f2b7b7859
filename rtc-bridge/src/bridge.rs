//! Script-facing entry point
//!
//! An [`RtcBridge`] belongs to one script context. It owns the callback
//! queue and target table for that context, creates peer connections and
//! answers `getUserMedia`. The host calls [`RtcBridge::drain`] on its script
//! thread whenever it gets a turn, or when the notify hook tells it events
//! are pending.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use callback_queue::{CallbackQueue, DrainReport, QueueStats, TargetTable};
use rtc_engine::{
    build_constraints, EngineError, EngineObserver, MediaConstraintSets, MediaStreamConstraints,
    RequestId, RtcConfiguration, SourceId,
};

use crate::config::BridgeConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::Result;
use crate::event::RtcEvent;
use crate::factory::ConnectionFactoryRegistry;
use crate::peer_connection::PeerConnection;

/// Source id used for events not tied to a peer connection
pub const BRIDGE_SOURCE: SourceId = SourceId::new(0);

/// State shared between a bridge and its peer connections
pub(crate) struct BridgeShared {
    pub(crate) registry: Arc<ConnectionFactoryRegistry>,
    pub(crate) config: BridgeConfig,
    pub(crate) queue: Arc<CallbackQueue<RtcEvent>>,
    pub(crate) targets: TargetTable<RtcEvent>,
    pub(crate) dispatcher: Arc<EventDispatcher>,
    next_source: AtomicU64,
    next_request: AtomicU64,
}

impl BridgeShared {
    pub(crate) fn next_source(&self) -> SourceId {
        SourceId::new(self.next_source.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_request(&self) -> RequestId {
        RequestId::new(self.next_request.fetch_add(1, Ordering::Relaxed))
    }

    /// Register `on_result` as the one-shot target for a new request
    pub(crate) fn bind_request<F>(&self, source: SourceId, on_result: F) -> RequestId
    where
        F: Fn(&RtcEvent) + Send + Sync + 'static,
    {
        let request = self.next_request();
        let target = self.targets.register_once(on_result);
        self.dispatcher.routes().bind_request(request, source, target);
        request
    }

    /// Undo [`bind_request`](Self::bind_request) for a request never posted
    pub(crate) fn abandon_request(&self, request: RequestId) {
        if let Some(target) = self.dispatcher.routes().unbind_request(request) {
            self.targets.unregister(target);
        }
    }
}

/// Bridge between one script context and the shared engine
pub struct RtcBridge {
    shared: Arc<BridgeShared>,
}

impl RtcBridge {
    /// Create a bridge on `registry`
    ///
    /// Uses the registry's configuration. The factory itself is only built
    /// once something needs it.
    pub fn new(registry: Arc<ConnectionFactoryRegistry>) -> Self {
        let config = registry.config().clone();
        let queue = Arc::new(CallbackQueue::with_warn_threshold(config.queue_warn_threshold));
        let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&queue)));

        Self {
            shared: Arc::new(BridgeShared {
                registry,
                config,
                queue,
                targets: TargetTable::new(),
                dispatcher,
                next_source: AtomicU64::new(BRIDGE_SOURCE.as_u64() + 1),
                next_request: AtomicU64::new(1),
            }),
        }
    }

    /// Create a bridge on the process-wide registry
    ///
    /// Returns `None` until [`ConnectionFactoryRegistry::install_global`] ran.
    pub fn from_global() -> Option<Self> {
        ConnectionFactoryRegistry::global().map(Self::new)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &Arc<ConnectionFactoryRegistry> {
        &self.shared.registry
    }

    /// Deliver every pending event to its callback
    ///
    /// Must always be called from the same (script) thread. Callbacks run
    /// with no bridge lock held and may call back into the bridge.
    pub fn drain(&self) -> DrainReport {
        self.shared.queue.drain_all(&self.shared.targets)
    }

    /// Number of events waiting for [`drain`](Self::drain)
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.queue.stats()
    }

    /// Install a hook called (on the worker thread) when events become pending
    ///
    /// The hook should schedule a drain on the script thread, not drain itself.
    pub fn set_notify<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.queue.set_notify(hook);
    }

    pub fn clear_notify(&self) {
        self.shared.queue.clear_notify();
    }

    /// Open local capture devices
    ///
    /// `on_result` receives either [`RtcEvent::UserMedia`] or an
    /// [`RtcEvent::Error`] (`PermissionDeniedError`,
    /// `ConstraintNotSatisfiedError`, ...).
    pub fn get_user_media<F>(
        &self,
        constraints: MediaStreamConstraints,
        on_result: F,
    ) -> Result<RequestId>
    where
        F: Fn(&RtcEvent) + Send + Sync + 'static,
    {
        let handle = self.shared.registry.acquire()?;
        let request = self.shared.bind_request(BRIDGE_SOURCE, on_result);
        let dispatcher = Arc::clone(&self.shared.dispatcher);
        let worker = handle.worker().clone();

        tracing::debug!(%request, tracks = ?constraints.track_types(), "getUserMedia");
        let posted = worker.post(move || {
            let result = handle
                .factory()
                .map_err(|_| EngineError::invalid_state("engine factory released"))
                .and_then(|factory| factory.get_user_media(&constraints));
            match result {
                Ok(stream) => {
                    dispatcher.dispatch(RtcEvent::UserMedia {
                        source: BRIDGE_SOURCE,
                        request,
                        stream,
                    });
                }
                Err(error) => dispatcher.on_error(BRIDGE_SOURCE, Some(request), error),
            }
            // Released on the worker; the last release detaches the worker
            drop(handle);
        });

        if let Err(e) = posted {
            self.shared.abandon_request(request);
            return Err(e);
        }
        Ok(request)
    }

    /// Create a peer connection
    ///
    /// An empty ICE server list in `configuration` is replaced by the
    /// configured defaults. Mandatory constraints the engine cannot satisfy
    /// fail synchronously.
    pub fn peer_connection(
        &self,
        configuration: Option<RtcConfiguration>,
        constraints: Option<&MediaConstraintSets>,
    ) -> Result<PeerConnection> {
        let handle = self.shared.registry.acquire()?;
        let source = self.shared.next_source();

        let mut configuration = configuration.unwrap_or_default();
        if configuration.ice_servers.is_empty() {
            configuration.ice_servers = self.shared.config.default_ice_servers.clone();
        }
        let constraints = build_constraints(constraints);

        let observer: Arc<dyn EngineObserver> = self.shared.dispatcher.clone();
        let engine = handle
            .factory()?
            .create_peer_connection(source, &configuration, &constraints, observer)?;

        self.shared.dispatcher.track_source(source);
        tracing::debug!(%source, generation = handle.generation(), "peer connection created");
        Ok(PeerConnection::new(Arc::clone(&self.shared), source, engine, handle))
    }
}

impl std::fmt::Debug for RtcBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcBridge")
            .field("pending", &self.shared.queue.len())
            .field("targets", &self.shared.targets.len())
            .field("registry", &self.shared.registry)
            .finish()
    }
}
