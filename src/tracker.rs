use anyhow::{bail, Result};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::{debug, trace, warn};

use crate::associate::{AssociateDescription2D, AssociateDescriptionSets2D, Candidate};
use crate::config::{EngineConfig, RespawnPolicy};
use crate::descriptor::TupleDesc;
use crate::detector::DetectDescribePoint;
use crate::feature::{HybridTrack, TrackHandle};
use crate::frame::PyramidFrame;
use crate::image::Image;
use crate::my_types::*;
use crate::optical_flow::PyramidFlowTracker;
use crate::prune::{PruneCloseTracks, PrunePoint};
use crate::track_pool::TrackPool;

/// Combines optical flow with detect-describe-associate tracking. Tracks are
/// followed by optical flow; when flow loses one it becomes inactive and is
/// kept around until a detection is associated with it again.
///
/// Every frame the caller runs, in this order:
/// [`update_tracks`](Self::update_tracks),
/// [`prune_active_tracks_which_are_too_close`](Self::prune_active_tracks_which_are_too_close),
/// [`associate_inactive_tracks`](Self::associate_inactive_tracks),
/// [`spawn_new_tracks`](Self::spawn_new_tracks) and
/// [`drop_excessive_inactive_tracks`](Self::drop_excessive_inactive_tracks).
/// Each step consumes what the previous one produced; calling them out of
/// order silently produces wrong tracks.
pub struct HybridTrackEngine<D: TupleDesc> {
    flow: Box<dyn PyramidFlowTracker>,
    detector: Box<dyn DetectDescribePoint<D>>,
    associate: AssociateDescriptionSets2D<D>,
    prune_close: Option<PruneCloseTracks>,
    respawn: RespawnPolicy,
    max_inactive_tracks: usize,
    rand: Xoshiro256PlusPlus,

    tracks: TrackPool<D>,
    spawned: Vec<TrackHandle>,

    /// frame the flow tracker works on, set by `update_tracks`
    frame: Option<PyramidFrame>,
    image_width: usize,
    image_height: usize,

    // Incremented at the start of every `update_tracks`. -1 before the first frame.
    frame_id: FrameId,
    // used to assign feature ids
    total_tracks: u64,

    // association scratch
    known_sets: Vec<usize>,
    detected_sets: Vec<usize>,
    // pruning scratch
    prune_points: Vec<PrunePoint>,
    prune_handles: Vec<TrackHandle>,
    prune_dropped: Vec<usize>,
}

impl<D: TupleDesc> HybridTrackEngine<D> {
    /// Fails if the associator can match a source or a destination more than once
    pub fn new(
        flow: Box<dyn PyramidFlowTracker>,
        detector: Box<dyn DetectDescribePoint<D>>,
        associator: Box<dyn AssociateDescription2D<D>>,
        config: &EngineConfig,
    ) -> Result<Self> {
        if !associator.unique_source() || !associator.unique_destination() {
            bail!("associations must be unique");
        }
        if !config.too_close_radius.is_finite() {
            bail!("too close radius must be finite, got {}", config.too_close_radius);
        }

        let mut associate = AssociateDescriptionSets2D::new(associator);
        associate.initialize_sets(detector.number_of_sets());

        Ok(Self {
            flow,
            detector,
            associate,
            prune_close: make_pruner(config.too_close_radius),
            respawn: config.respawn,
            max_inactive_tracks: config.max_inactive_tracks,
            rand: Xoshiro256PlusPlus::seed_from_u64(config.seed),
            tracks: TrackPool::new(),
            spawned: vec![],
            frame: None,
            image_width: 0,
            image_height: 0,
            frame_id: -1,
            total_tracks: 0,
            known_sets: vec![],
            detected_sets: vec![],
            prune_points: vec![],
            prune_handles: vec![],
            prune_dropped: vec![],
        })
    }

    /// Puts the engine back into its initial state. Track storage is kept for
    /// reuse. Until the next `update_tracks` there is no frame to associate
    /// with or spawn from.
    pub fn reset(&mut self) {
        self.drop_all_tracks();
        self.associate.clear();
        self.frame = None;
        self.total_tracks = 0;
        self.frame_id = -1;
    }

    /// Moves every active track into `frame` with optical flow. Tracks which
    /// flow loses become inactive. Returns the previous frame so its buffers
    /// can be reused.
    pub fn update_tracks(&mut self, frame: PyramidFrame) -> Option<PyramidFrame> {
        self.image_width = frame.width();
        self.image_height = frame.height();
        self.tracks.begin_frame();
        self.spawned.clear();
        if self.frame_id == -1 {
            self.associate
                .initialize_associator(self.image_width, self.image_height);
        }
        self.frame_id += 1;

        // Reverse order: a swap-remove only moves tracks which were already processed
        let mut lost = 0;
        for i in (0..self.tracks.active().len()).rev() {
            let h = self.tracks.active()[i];
            let Some(track) = self.tracks.get_mut(h) else {
                continue;
            };
            let tracked = match track.flow.as_mut() {
                Some(flow) => self.flow.track(&frame, flow),
                None => false,
            };
            if tracked {
                track.last_seen_frame_id = self.frame_id;
                if let Some(flow) = &track.flow {
                    track.pixel = flow.pixel;
                }
            } else {
                // still around as an inactive track
                self.tracks.deactivate(h);
                lost += 1;
            }
        }

        debug!(
            frame_id = self.frame_id,
            active = self.tracks.active().len(),
            lost,
            "flow update"
        );
        self.frame.replace(frame)
    }

    /// Drops active tracks which have drifted on top of each other and no
    /// longer add information. Does nothing if the radius is not positive.
    pub fn prune_active_tracks_which_are_too_close(&mut self) {
        let Some(prune) = self.prune_close.as_mut() else {
            return;
        };

        self.prune_handles.clear();
        self.prune_handles.extend_from_slice(self.tracks.active());
        self.prune_points.clear();
        for &h in &self.prune_handles {
            if let Some(track) = self.tracks.get(h) {
                self.prune_points.push(PrunePoint {
                    pixel: track.pixel,
                    feature_id: track.feature_id,
                });
            }
        }

        prune.init(self.image_width, self.image_height);
        prune.process(&self.prune_points, &mut self.prune_dropped);
        for &index in &self.prune_dropped {
            let removed = self.tracks.drop_track(self.prune_handles[index]);
            debug_assert!(removed);
        }
        if !self.prune_dropped.is_empty() {
            debug!(frame_id = self.frame_id, pruned = self.prune_dropped.len(), "pruned close tracks");
        }
    }

    /// Detects features in `image` and associates them with every known
    /// track. Inactive tracks which are matched become active again, at the
    /// detected location.
    pub fn associate_inactive_tracks(&mut self, image: &Image) {
        let Some(frame) = self.frame.as_ref() else {
            warn!("associate_inactive_tracks called before update_tracks");
            return;
        };

        self.detector.detect(image);
        let detections = self.detector.detections();

        {
            let detected: Vec<Candidate<'_, D>> = detections
                .iter()
                .map(|d| Candidate {
                    pixel: d.pixel,
                    descriptor: &d.descriptor,
                })
                .collect();
            self.detected_sets.clear();
            self.detected_sets.extend(detections.iter().map(|d| d.set_id));

            // Active tracks take part too. A detection which belongs to an
            // active track then can't be claimed by an inactive one, which
            // cuts down on false reacquisitions.
            let mut known = Vec::with_capacity(self.tracks.all().len());
            self.known_sets.clear();
            for &h in self.tracks.all() {
                if let Some(track) = self.tracks.get(h) {
                    known.push(Candidate {
                        pixel: track.pixel,
                        descriptor: &track.descriptor,
                    });
                    self.known_sets.push(track.detector_set_id);
                }
            }

            self.associate
                .associate(&known, &self.known_sets, &detected, &self.detected_sets);
        }

        let mut reacquired = 0;
        let mut corrected = 0;
        for m in self.associate.matches() {
            let h = self.tracks.all()[m.src];
            let pixel = detections[m.dst].pixel;
            let Some(track) = self.tracks.get_mut(h) else {
                continue;
            };

            let active = track.is_seen_in(self.frame_id);
            let update = match self.respawn {
                RespawnPolicy::NonPureFlow => !track.is_pure_flow(self.frame_id),
                RespawnPolicy::InactiveOnly => !active,
                RespawnPolicy::Always => true,
            };
            if !update {
                continue;
            }

            track.respawned = true;
            track.last_seen_frame_id = self.frame_id;
            track.pixel = pixel;
            let levels = frame.level_count();
            if track.flow.as_ref().map_or(true, |f| f.level_count() != levels) {
                track.flow = Some(self.flow.create_feature(levels));
            }
            if let Some(flow) = track.flow.as_mut() {
                if !self.flow.set_description(frame, pixel, flow) {
                    trace!(feature_id = track.feature_id, "could not describe reacquired track");
                }
            }

            if active {
                corrected += 1;
            } else {
                self.tracks.activate(h);
                reacquired += 1;
            }
        }

        debug!(
            frame_id = self.frame_id,
            detections = detections.len(),
            matches = self.associate.matches().len(),
            reacquired,
            corrected,
            "association"
        );
    }

    /// Starts a track for every detection which was not associated with an
    /// existing track. Must be called after `associate_inactive_tracks`.
    pub fn spawn_new_tracks(&mut self) {
        let Some(frame) = self.frame.as_ref() else {
            warn!("spawn_new_tracks called before update_tracks");
            return;
        };

        let detections = self.detector.detections();
        let levels = frame.level_count();
        for &index in self.associate.unassociated_destination() {
            let detection = &detections[index];
            let h = self.tracks.spawn(&detection.descriptor);
            let Some(track) = self.tracks.get_mut(h) else {
                continue;
            };

            // the flow state depends on the number of pyramid levels
            if track.flow.as_ref().map_or(true, |f| f.level_count() != levels) {
                track.flow = Some(self.flow.create_feature(levels));
            }
            track.feature_id = self.total_tracks;
            self.total_tracks += 1;
            // kept even if undescribed, flow then loses it on the next frame
            if let Some(flow) = track.flow.as_mut() {
                if !self.flow.set_description(frame, detection.pixel, flow) {
                    trace!(feature_id = track.feature_id, "could not describe spawned track");
                }
            }

            track.respawned = false;
            track.spawn_frame_id = self.frame_id;
            track.last_seen_frame_id = self.frame_id;
            track.detector_set_id = detection.set_id;
            track.pixel = detection.pixel;

            self.spawned.push(h);
        }

        debug!(frame_id = self.frame_id, spawned = self.spawned.len(), "spawned tracks");
    }

    /// Drops randomly selected inactive tracks until there are at most
    /// `max_inactive_tracks` of them
    pub fn drop_excessive_inactive_tracks(&mut self) {
        let mut dropped = 0;
        while self.tracks.inactive().len() > self.max_inactive_tracks {
            let index = self.rand.gen_range(0..self.tracks.inactive().len());
            let h = self.tracks.inactive()[index];
            self.tracks.drop_track(h);
            dropped += 1;
        }
        if dropped > 0 {
            debug!(frame_id = self.frame_id, dropped, "dropped inactive tracks");
        }
    }

    /// Stops tracking `track`. Returns false if it was not being tracked.
    pub fn drop_track(&mut self, track: TrackHandle) -> bool {
        self.tracks.drop_track(track)
    }

    pub fn drop_track_by_feature_id(&mut self, feature_id: FeatureId) -> bool {
        let found = self
            .tracks
            .all()
            .iter()
            .copied()
            .find(|&h| self.tracks.get(h).map_or(false, |t| t.feature_id == feature_id));
        match found {
            Some(h) => self.tracks.drop_track(h),
            None => false,
        }
    }

    /// Drops every track and clears the per-frame outputs
    pub fn drop_all_tracks(&mut self) {
        self.tracks.clear();
        self.spawned.clear();
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn total_tracks_created(&self) -> u64 {
        self.total_tracks
    }

    pub fn track(&self, handle: TrackHandle) -> Option<&HybridTrack<D>> {
        self.tracks.get(handle)
    }

    /// Resolves a list of handles, e.g. `engine.tracks(engine.tracks_active())`
    pub fn tracks<'a>(&'a self, handles: &'a [TrackHandle]) -> impl Iterator<Item = &'a HybridTrack<D>> + 'a {
        handles.iter().filter_map(move |&h| self.tracks.get(h))
    }

    pub fn tracks_all(&self) -> &[TrackHandle] {
        self.tracks.all()
    }

    pub fn tracks_active(&self) -> &[TrackHandle] {
        self.tracks.active()
    }

    pub fn tracks_inactive(&self) -> &[TrackHandle] {
        self.tracks.inactive()
    }

    /// Tracks spawned during the current frame
    pub fn tracks_spawned(&self) -> &[TrackHandle] {
        &self.spawned
    }

    /// Tracks dropped during the current frame
    pub fn tracks_dropped(&self) -> &[TrackHandle] {
        self.tracks.dropped()
    }

    pub fn max_inactive_tracks(&self) -> usize {
        self.max_inactive_tracks
    }

    pub fn set_max_inactive_tracks(&mut self, max_inactive_tracks: usize) {
        self.max_inactive_tracks = max_inactive_tracks;
    }

    pub fn too_close_radius(&self) -> f64 {
        self.prune_close.as_ref().map_or(0., |p| p.radius())
    }

    pub fn set_too_close_radius(&mut self, radius: f64) {
        self.prune_close = make_pruner(radius);
    }

    pub fn respawn_policy(&self) -> RespawnPolicy {
        self.respawn
    }

    pub fn set_respawn_policy(&mut self, respawn: RespawnPolicy) {
        self.respawn = respawn;
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &TrackPool<D> {
        &self.tracks
    }
}

fn make_pruner(radius: f64) -> Option<PruneCloseTracks> {
    if radius > 0. {
        Some(PruneCloseTracks::new(radius))
    } else {
        None
    }
}
