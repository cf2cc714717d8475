use anyhow::Result;

use crate::associate::{AssociateConfig, AssociateNearest2D};
use crate::config::EngineConfig;
use crate::descriptor::TupleDescF64;
use crate::detector::FastNccDetector;
use crate::frame::PyramidFrame;
use crate::image::Image;
use crate::optical_flow::{FlowConfig, PyramidKlt};
use crate::tracker::HybridTrackEngine;

#[derive(Clone, Debug)]
pub struct PointTrackerConfig {
    /// pyramid levels including the full resolution image
    pub levels: usize,
    pub fast_threshold: i16,
    pub max_features: usize,
    pub flow: FlowConfig,
    pub associate: AssociateConfig,
    pub engine: EngineConfig,
}

impl Default for PointTrackerConfig {
    fn default() -> Self {
        Self {
            levels: 3,
            fast_threshold: 20,
            max_features: 300,
            flow: FlowConfig::default(),
            associate: AssociateConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// Ready to use point tracker: pyramidal KLT for flow, FAST corners with a
/// patch description for detection and nearest neighbour association.
///
/// [`process`](Self::process) runs one frame through the engine. New tracks
/// are only started when [`spawn_tracks`](Self::spawn_tracks) is called,
/// which lets the caller decide how many tracks it wants.
pub struct HybridPointTracker {
    engine: HybridTrackEngine<TupleDescF64>,
    levels: usize,
    unused_frame: Option<PyramidFrame>,
}

impl HybridPointTracker {
    pub fn new(config: &PointTrackerConfig) -> Result<Self> {
        let engine = HybridTrackEngine::<TupleDescF64>::new(
            Box::new(PyramidKlt::new(config.flow.clone())),
            Box::new(FastNccDetector::new(config.fast_threshold, config.max_features)),
            Box::new(AssociateNearest2D::new(config.associate.clone())),
            &config.engine,
        )?;
        Ok(Self {
            engine,
            levels: config.levels,
            unused_frame: None,
        })
    }

    pub fn process(&mut self, image: &Image) -> Result<()> {
        let frame = PyramidFrame::new(image, self.levels, self.unused_frame.take())?;
        self.unused_frame = self.engine.update_tracks(frame);
        self.engine.prune_active_tracks_which_are_too_close();
        self.engine.associate_inactive_tracks(image);
        // spawning only adds active tracks so capping can happen before it
        self.engine.drop_excessive_inactive_tracks();
        Ok(())
    }

    /// Spawns tracks from the detections of the latest frame which were not
    /// associated with a track
    pub fn spawn_tracks(&mut self) {
        self.engine.spawn_new_tracks();
    }

    pub fn reset(&mut self) {
        self.engine.reset();
    }

    pub fn engine(&self) -> &HybridTrackEngine<TupleDescF64> {
        &self.engine
    }
}
