//! Engine seam for rtc-bridge
//!
//! This crate holds everything the bridge needs to know about the
//! communication engine without depending on a concrete one:
//!
//! - [`engine`]: the provider/factory/peer-connection/observer traits
//! - [`types`]: W3C WebRTC value types with their exact string spellings
//! - [`constraints`]: translation of `ideal`/`exact` constraint sets into the
//!   engine's mandatory/optional list
//! - [`error`]: DOM-named engine errors
//! - `testing` (feature `test-support`): an in-process loopback engine
//!
//! # Example
//!
//! ```rust
//! use rtc_engine::{build_constraints, MediaConstraintSets, SignalingState};
//!
//! let list = build_constraints(Some(&MediaConstraintSets::new().exact("sampleRate", "48000")));
//! assert_eq!(list.mandatory().len(), 1);
//!
//! let state: SignalingState = "have-local-offer".parse().unwrap();
//! assert_eq!(state, SignalingState::HaveLocalOffer);
//! ```

pub mod constraints;
pub mod engine;
pub mod error;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use constraints::{
    build_constraints, ConstraintList, MediaConstraintSet, MediaConstraintSets,
    MediaStreamConstraints, NativeConstraint,
};
pub use engine::{AudioDevice, EngineFactory, EngineObserver, EnginePeerConnection, EngineProvider};
pub use error::{DomErrorName, EngineError, ParseError, Result};
pub use types::{
    DataChannelInfo, DataChannelInit, DataChannelState, IceCandidate, IceConnectionState,
    IceGatheringState, IceServer, MediaDeviceKind, MediaStreamInfo, MediaStreamTrackState,
    MessageData, PeerConnectionState, PriorityType, RequestId, RtcConfiguration, RtcStats, SdpType,
    SessionDescription, SignalingState, SourceId, StatsReport, TrackInfo, TrackKind, TrackTypeFlags,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::constraints::{
        build_constraints, ConstraintList, MediaConstraintSets, MediaStreamConstraints,
    };
    pub use crate::engine::{EngineFactory, EngineObserver, EnginePeerConnection, EngineProvider};
    pub use crate::error::{EngineError, Result};
    pub use crate::types::*;
}
