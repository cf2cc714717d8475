use crate::my_types::*;
use crate::optical_flow::FlowFeature;

/// Address of a track slot inside the engine. The generation changes every
/// time the slot is recycled, so a handle to a track which is gone no longer
/// resolves, even after its storage holds another track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TrackHandle {
    pub(crate) slot: usize,
    pub(crate) generation: u32,
}

/// A feature followed across frames, by optical flow while it can and by
/// detection and association once flow has lost it.
#[derive(Clone, Debug)]
pub struct HybridTrack<D> {
    /// Unique for the lifetime of the engine, never reused
    pub feature_id: FeatureId,
    /// Current location estimate
    pub pixel: Vector2d,
    pub descriptor: D,
    /// Set assigned by the detector when the track was spawned
    pub detector_set_id: usize,
    /// Created the first time the track is seeded and kept while the number
    /// of pyramid levels does not change
    pub flow: Option<FlowFeature>,
    pub spawn_frame_id: FrameId,
    /// Equal to the current frame id while the track is active
    pub last_seen_frame_id: FrameId,
    /// Set once the track has been reacquired through association
    pub respawned: bool,
}

impl<D> HybridTrack<D> {
    pub(crate) fn new(descriptor: D) -> Self {
        Self {
            feature_id: 0,
            pixel: Vector2d::zeros(),
            descriptor,
            detector_set_id: 0,
            flow: None,
            spawn_frame_id: -1,
            last_seen_frame_id: -1,
            respawned: false,
        }
    }

    pub fn is_seen_in(&self, frame_id: FrameId) -> bool {
        self.last_seen_frame_id == frame_id
    }

    /// Active and never reacquired, i.e. followed by optical flow alone since
    /// it was spawned
    pub fn is_pure_flow(&self, frame_id: FrameId) -> bool {
        !self.respawned && self.is_seen_in(frame_id)
    }
}
