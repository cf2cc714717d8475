use nalgebra as na;

pub type Vector2d = na::Vector2<f64>;
pub type Matrix2d = na::Matrix2<f64>;
pub type Matrixd = na::DMatrix<f64>;

/// Identity of a track. Assigned from a monotonically increasing counter and
/// never handed out twice by the same engine, even when track storage is reused.
pub type FeatureId = u64;

/// Frame counter. -1 before the first frame has been processed.
pub type FrameId = i64;
