//! Cross-thread bridge between a WebRTC engine and a script thread
//!
//! The engine runs on its own worker thread and reports results through
//! observer hooks. Script callbacks must run on the host's script thread and
//! must never fire on an object that is gone. This crate connects the two:
//!
//! - [`ConnectionFactoryRegistry`] builds the shared engine factory, worker
//!   thread and audio device lazily and tears them down after the last
//!   [`FactoryHandle`] is released
//! - [`EventDispatcher`] turns every engine hook into one [`RtcEvent`] and
//!   pushes it on a [`CallbackQueue`](callback_queue::CallbackQueue)
//! - [`RtcBridge::drain`] delivers queued events on the script thread, in the
//!   order the engine raised them
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rtc_bridge::prelude::*;
//!
//! let engine = Arc::new(MyEngine::new());
//! let registry = ConnectionFactoryRegistry::new(engine, BridgeConfig::default())?;
//! let bridge = RtcBridge::new(registry);
//!
//! let pc = bridge.peer_connection(None, None)?;
//! pc.set_handler_by_name("onicecandidate", |event| println!("{event:?}"))?;
//! pc.create_offer(None, |event| println!("offer: {event:?}"))?;
//!
//! // On every turn of the host's script loop
//! bridge.drain();
//! ```
//!
//! # Architecture
//!
//! ```text
//! script thread                 worker thread (tokio current_thread)
//!      │ pc.create_offer ──post──▶ EnginePeerConnection::create_offer
//!      │                                   │ observer hook
//!      │                           EventDispatcher ── route ──▶ CallbackQueue::push
//!      │ bridge.drain() ◀───────────────────────────────────────────┘
//!      ▼ callback(&RtcEvent)
//! ```

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod factory;
pub mod logging;
pub mod peer_connection;
pub mod worker;

pub use bridge::{RtcBridge, BRIDGE_SOURCE};
pub use config::BridgeConfig;
pub use dispatcher::{EventDispatcher, EventRoutes};
pub use error::{BridgeError, Result};
pub use event::{EventKind, RtcEvent};
pub use factory::{ConnectionFactoryRegistry, FactoryHandle, RegistryState};
pub use logging::{init_logging, init_logging_from_env, LoggingError, LoggingMode};
pub use peer_connection::PeerConnection;
pub use worker::{Worker, WorkerHandle};

// Re-export the pieces hosts need alongside the bridge
pub use callback_queue::{DrainReport, QueueStats, Released, TargetId};
pub use rtc_engine;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::bridge::RtcBridge;
    pub use crate::config::BridgeConfig;
    pub use crate::error::{BridgeError, Result};
    pub use crate::event::{EventKind, RtcEvent};
    pub use crate::factory::{ConnectionFactoryRegistry, FactoryHandle};
    pub use crate::peer_connection::PeerConnection;
    pub use rtc_engine::{
        DataChannelInit, IceCandidate, MediaConstraintSets, MediaStreamConstraints,
        RtcConfiguration, SdpType, SessionDescription,
    };
}
