//! Translation of declarative constraint sets into the engine's native list
//!
//! A [`MediaConstraintSets`] holds an optional `ideal` map (preferences) and
//! an optional `exact` map (requirements). [`build_constraints`] turns them
//! into a [`ConstraintList`] where exact entries become mandatory and ideal
//! entries become optional. Names are not validated here; the engine decides
//! what it understands.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{TrackKind, TrackTypeFlags};

/// Name → value map, ordered so that the built list is deterministic
pub type MediaConstraintSet = BTreeMap<String, String>;

/// `ideal` / `exact` constraint maps
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraintSets {
    pub ideal: Option<MediaConstraintSet>,
    pub exact: Option<MediaConstraintSet>,
}

impl MediaConstraintSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a soft preference
    pub fn ideal(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.ideal
            .get_or_insert_with(MediaConstraintSet::new)
            .insert(name.into(), value.into());
        self
    }

    /// Add a hard requirement
    pub fn exact(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.exact
            .get_or_insert_with(MediaConstraintSet::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ideal.as_ref().map_or(true, |m| m.is_empty())
            && self.exact.as_ref().map_or(true, |m| m.is_empty())
    }
}

/// One entry of the engine's constraint list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeConstraint {
    pub key: String,
    pub value: String,
}

impl NativeConstraint {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Native constraint representation: mandatory and optional entries
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConstraintList {
    mandatory: Vec<NativeConstraint>,
    optional: Vec<NativeConstraint>,
}

impl ConstraintList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mandatory(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.mandatory.push(NativeConstraint::new(key, value));
    }

    pub fn add_optional(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.optional.push(NativeConstraint::new(key, value));
    }

    pub fn mandatory(&self) -> &[NativeConstraint] {
        &self.mandatory
    }

    pub fn optional(&self) -> &[NativeConstraint] {
        &self.optional
    }

    pub fn find_mandatory(&self, key: &str) -> Option<&str> {
        self.mandatory
            .iter()
            .find(|c| c.key == key)
            .map(|c| c.value.as_str())
    }

    pub fn find_optional(&self, key: &str) -> Option<&str> {
        self.optional
            .iter()
            .find(|c| c.key == key)
            .map(|c| c.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.mandatory.len() + self.optional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mandatory.is_empty() && self.optional.is_empty()
    }
}

/// Build the engine constraint list for `sets`
///
/// `None` yields an empty list.
///
/// ```rust
/// use rtc_engine::{build_constraints, MediaConstraintSets};
///
/// let sets = MediaConstraintSets::new()
///     .ideal("echoCancellation", "true")
///     .exact("sampleRate", "48000");
/// let list = build_constraints(Some(&sets));
///
/// assert_eq!(list.find_mandatory("sampleRate"), Some("48000"));
/// assert_eq!(list.find_optional("echoCancellation"), Some("true"));
/// ```
pub fn build_constraints(sets: Option<&MediaConstraintSets>) -> ConstraintList {
    let mut list = ConstraintList::new();
    let Some(sets) = sets else {
        return list;
    };

    if let Some(exact) = &sets.exact {
        for (key, value) in exact {
            list.add_mandatory(key.as_str(), value.as_str());
        }
    }
    if let Some(ideal) = &sets.ideal {
        for (key, value) in ideal {
            list.add_optional(key.as_str(), value.as_str());
        }
    }

    tracing::trace!(
        mandatory = list.mandatory.len(),
        optional = list.optional.len(),
        "built constraint list"
    );
    list
}

/// `MediaStreamConstraints` for `getUserMedia`
///
/// `Some` requests a track kind (with possibly empty constraints), `None`
/// leaves it out.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaStreamConstraints {
    pub audio: Option<MediaConstraintSets>,
    pub video: Option<MediaConstraintSets>,
}

impl MediaStreamConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: Some(MediaConstraintSets::default()),
            video: None,
        }
    }

    pub fn audio_video() -> Self {
        Self {
            audio: Some(MediaConstraintSets::default()),
            video: Some(MediaConstraintSets::default()),
        }
    }

    /// Which track kinds are requested
    pub fn track_types(&self) -> TrackTypeFlags {
        let mut flags = TrackTypeFlags::NONE;
        if self.audio.is_some() {
            flags = flags | TrackTypeFlags::AUDIO;
        }
        if self.video.is_some() {
            flags = flags | TrackTypeFlags::VIDEO;
        }
        flags
    }

    /// Engine constraint list for one track kind
    pub fn constraints_for(&self, kind: TrackKind) -> ConstraintList {
        match kind {
            TrackKind::Audio => build_constraints(self.audio.as_ref()),
            TrackKind::Video => build_constraints(self.video.as_ref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_builds_empty_list() {
        assert!(build_constraints(None).is_empty());
        assert!(build_constraints(Some(&MediaConstraintSets::default())).is_empty());
    }

    #[test]
    fn test_exact_mandatory_ideal_optional() {
        let sets = MediaConstraintSets::new()
            .ideal("echoCancellation", "true")
            .ideal("noiseSuppression", "false")
            .exact("sampleRate", "48000");
        let list = build_constraints(Some(&sets));

        assert_eq!(list.mandatory().len(), 1);
        assert_eq!(list.optional().len(), 2);
        assert_eq!(list.find_mandatory("sampleRate"), Some("48000"));
        assert_eq!(list.find_optional("echoCancellation"), Some("true"));
        assert_eq!(list.find_mandatory("echoCancellation"), None);
    }

    #[test]
    fn test_unknown_names_pass_through() {
        let sets = MediaConstraintSets::new().exact("x-vendor-knob", "11");
        let list = build_constraints(Some(&sets));
        assert_eq!(list.find_mandatory("x-vendor-knob"), Some("11"));
    }

    #[test]
    fn test_same_name_in_both_maps() {
        let sets = MediaConstraintSets::new()
            .ideal("width", "1280")
            .exact("width", "640");
        let list = build_constraints(Some(&sets));
        assert_eq!(list.find_mandatory("width"), Some("640"));
        assert_eq!(list.find_optional("width"), Some("1280"));
    }

    #[test]
    fn test_stream_constraints_track_types() {
        assert_eq!(MediaStreamConstraints::default().track_types(), TrackTypeFlags::NONE);
        assert_eq!(MediaStreamConstraints::audio_only().track_types(), TrackTypeFlags::AUDIO);
        assert_eq!(
            MediaStreamConstraints::audio_video().track_types(),
            TrackTypeFlags::AUDIO_VIDEO
        );
    }

    mod properties {
        use crate::constraints::{build_constraints, MediaConstraintSet, MediaConstraintSets};
        use proptest::prelude::*;

        fn extra_ideals() -> impl Strategy<Value = MediaConstraintSet> {
            prop::collection::btree_map("[a-zA-Z]{1,12}", "[a-z0-9]{0,6}", 0..8)
        }

        proptest! {
            #[test]
            fn prop_exact_stays_mandatory(extra in extra_ideals()) {
                let mut ideal = extra;
                ideal.insert("echoCancellation".to_string(), "true".to_string());
                ideal.remove("sampleRate");
                let sets = MediaConstraintSets {
                    ideal: Some(ideal.clone()),
                    exact: Some([("sampleRate".to_string(), "48000".to_string())].into()),
                };

                let list = build_constraints(Some(&sets));
                prop_assert_eq!(list.find_mandatory("sampleRate"), Some("48000"));
                prop_assert_eq!(list.find_optional("echoCancellation"), Some("true"));
                prop_assert_eq!(list.mandatory().len(), 1);
                prop_assert_eq!(list.optional().len(), ideal.len());
            }
        }
    }
}
