use nalgebra as na;

use crate::frame::PyramidFrame;
use crate::image::*;
use crate::my_types::*;

/// Single feature pyramidal optical flow. Every track owns one [`FlowFeature`]
/// which the tracker seeds with [`set_description`] and then advances one
/// frame at a time with [`track`].
///
/// [`set_description`]: PyramidFlowTracker::set_description
/// [`track`]: PyramidFlowTracker::track
pub trait PyramidFlowTracker {
    /// Allocates flow state for a pyramid with `levels` levels
    fn create_feature(&self, levels: usize) -> FlowFeature;

    /// Captures the appearance around `pixel` in `frame`. Returns false if no
    /// level could be described, in which case the next `track` call fails.
    fn set_description(&mut self, frame: &PyramidFrame, pixel: Vector2d, feature: &mut FlowFeature) -> bool;

    /// Moves the feature into `frame`. On success `feature.pixel` holds the
    /// new location.
    fn track(&mut self, frame: &PyramidFrame, feature: &mut FlowFeature) -> bool;
}

/// Template of one pyramid level
#[derive(Clone, Debug)]
pub struct FlowTemplate {
    pub intensity: Matrixd,
    pub ix: Matrixd,
    pub iy: Matrixd,
    /// inverse of the spatial gradient matrix
    pub gradient_inv: Matrix2d,
    pub valid: bool,
}

impl FlowTemplate {
    fn empty() -> Self {
        Self {
            intensity: Matrixd::zeros(0, 0),
            ix: Matrixd::zeros(0, 0),
            iy: Matrixd::zeros(0, 0),
            gradient_inv: Matrix2d::zeros(),
            valid: false,
        }
    }
}

/// Per-track optical flow state
#[derive(Clone, Debug)]
pub struct FlowFeature {
    /// location at level 0
    pub pixel: Vector2d,
    pub levels: Vec<FlowTemplate>,
}

impl FlowFeature {
    pub fn new(levels: usize) -> Self {
        Self {
            pixel: Vector2d::zeros(),
            levels: (0..levels).map(|_| FlowTemplate::empty()).collect(),
        }
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn is_described(&self) -> bool {
        self.levels.first().map_or(false, |l| l.valid)
    }
}

#[derive(Clone, Debug)]
pub struct FlowConfig {
    /// maximum iterations per level
    pub iterations: usize,
    /// the window is (2 * radius + 1) pixels wide
    pub window_radius: usize,
    /// stop iterating once the update is below this many pixels
    pub term: f64,
    /// smallest eigenvalue of the gradient matrix, divided by window area
    pub min_eigenvalue: f64,
    /// largest mean absolute intensity error accepted at level 0
    pub max_error: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            iterations: 15,
            window_radius: 4,
            term: 0.05,
            min_eigenvalue: 0.1,
            max_error: 25.,
        }
    }
}

/// Inverse compositional pyramidal KLT.
/// ref http://robots.stanford.edu/cs223b04/algo_tracking.pdf
pub struct PyramidKlt {
    config: FlowConfig,
    it: Matrixd,
}

impl PyramidKlt {
    pub fn new(config: FlowConfig) -> Self {
        let side = 2 * config.window_radius + 1;
        Self {
            config,
            it: na::DMatrix::zeros(side, side),
        }
    }

    fn describe_level(&self, frame: &PyramidFrame, level: usize, u: Vector2d, template: &mut FlowTemplate) -> bool {
        template.valid = false;
        let r = self.config.window_radius;
        let image = frame.get_image_at_level(level);
        if !window_inside(image, u, r) {
            return false;
        }
        fill_window(image, u, r, &mut template.intensity);
        fill_window(&frame.deriv_x[level], u, r, &mut template.ix);
        fill_window(&frame.deriv_y[level], u, r, &mut template.iy);

        let gradient = spatial_gradient(&template.ix, &template.iy);
        let area = template.ix.len() as f64;
        if gradient.symmetric_eigenvalues().min() / area < self.config.min_eigenvalue {
            return false;
        }
        match gradient.try_inverse() {
            Some(inv) => {
                template.gradient_inv = inv;
                template.valid = true;
                true
            }
            None => false,
        }
    }
}

impl PyramidFlowTracker for PyramidKlt {
    fn create_feature(&self, levels: usize) -> FlowFeature {
        FlowFeature::new(levels)
    }

    fn set_description(&mut self, frame: &PyramidFrame, pixel: Vector2d, feature: &mut FlowFeature) -> bool {
        feature.pixel = pixel;
        if feature.level_count() != frame.level_count() {
            *feature = self.create_feature(frame.level_count());
            feature.pixel = pixel;
        }

        let mut any = false;
        for level in 0..feature.levels.len() {
            let u = pixel / frame.scale_at_level(level);
            any |= self.describe_level(frame, level, u, &mut feature.levels[level]);
        }
        // tracking ends at level 0 so without it there is nothing to track
        any && feature.is_described()
    }

    fn track(&mut self, frame: &PyramidFrame, feature: &mut FlowFeature) -> bool {
        if feature.level_count() != frame.level_count() || !feature.is_described() {
            return false;
        }
        let r = self.config.window_radius;
        let term2 = self.config.term.powi(2);
        let p0 = feature.pixel;

        // displacement in the coordinates of the current level
        let mut g = Vector2d::zeros();
        for level in (0..feature.levels.len()).rev() {
            let template = &feature.levels[level];
            if !template.valid {
                if level > 0 {
                    g *= 2.;
                }
                continue;
            }

            let image = frame.get_image_at_level(level);
            let u = p0 / frame.scale_at_level(level);
            let mut p = u + g;
            for _ in 0..self.config.iterations {
                if !window_inside(image, p, r) {
                    return false;
                }
                fill_window(image, p, r, &mut self.it);
                let d = flow_vector(template, &self.it);
                p += d;
                if d.norm_squared() < term2 {
                    break;
                }
            }

            g = p - u;
            if level > 0 {
                g *= 2.;
            }
        }

        let p = p0 + g;
        let image = frame.get_image_at_level(0);
        if !window_inside(image, p, r) {
            return false;
        }
        fill_window(image, p, r, &mut self.it);
        let template = &feature.levels[0];
        let error = (&template.intensity - &self.it).abs().sum() / self.it.len() as f64;
        if error > self.config.max_error {
            return false;
        }

        // refresh the template at the new location
        self.set_description(frame, p, feature)
    }
}

/// Gauss-Newton step from the template gradient and the current residual
fn flow_vector(template: &FlowTemplate, it: &Matrixd) -> Vector2d {
    let mut b = Vector2d::zeros();
    for y in 0..it.nrows() {
        for x in 0..it.ncols() {
            let e = template.intensity[(y, x)] - it[(y, x)];
            b[0] += e * template.ix[(y, x)];
            b[1] += e * template.iy[(y, x)];
        }
    }
    template.gradient_inv * b
}

fn spatial_gradient(ix: &Matrixd, iy: &Matrixd) -> Matrix2d {
    assert_eq!(ix.nrows(), iy.nrows());
    assert_eq!(ix.ncols(), iy.ncols());

    let mut x2 = 0.;
    let mut y2 = 0.;
    let mut xy = 0.;

    for y in 0..iy.nrows() {
        for x in 0..ix.ncols() {
            x2 += ix[(y, x)] * ix[(y, x)];
            y2 += iy[(y, x)] * iy[(y, x)];
            xy += ix[(y, x)] * iy[(y, x)];
        }
    }

    Matrix2d::new(x2, xy, xy, y2)
}

/// True if a window of radius `r` around `center` can be interpolated
fn window_inside<S: Sampled>(level: &S, center: Vector2d, r: usize) -> bool {
    let (w, h) = level.shape();
    if w == 0 || h == 0 {
        return false;
    }
    let r = r as f64;
    center[0] - r >= 0.
        && center[1] - r >= 0.
        && center[0] + r <= (w - 1) as f64
        && center[1] + r <= (h - 1) as f64
}

fn fill_window<S: Sampled>(level: &S, center: Vector2d, r: usize, grid: &mut Matrixd) {
    let side = 2 * r + 1;
    if grid.nrows() != side || grid.ncols() != side {
        *grid = na::DMatrix::zeros(side, side);
    }
    let r = r as i32;
    for (y_ind, y) in (-r..=r).enumerate() {
        for (x_ind, x) in (-r..=r).enumerate() {
            grid[(y_ind, x_ind)] = bilinear(level, center + Vector2d::new(x as f64, y as f64));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::draw_blob;

    fn blob_frame(center: Vector2d, levels: usize) -> PyramidFrame {
        let mut image = Image::filled(128, 128, 100);
        draw_blob(&mut image, center, 3., 120.);
        PyramidFrame::new(&image, levels, None).unwrap()
    }

    #[test]
    fn test_flow() {
        let p0 = Vector2d::new(60.3, 58.7);
        let motion = Vector2d::new(3.5, -2.25);
        let frame0 = blob_frame(p0, 3);
        let frame1 = blob_frame(p0 + motion, 3);

        let mut flow = PyramidKlt::new(FlowConfig::default());
        let mut feature = flow.create_feature(3);
        assert!(flow.set_description(&frame0, p0, &mut feature));
        assert!(flow.track(&frame1, &mut feature));

        let err = (feature.pixel - p0) - motion;
        assert!(err.norm() < 0.5, "optical flow err {}", err.norm());
    }

    #[test]
    fn test_flow_lost_when_blob_vanishes() {
        let p0 = Vector2d::new(64., 64.);
        let frame0 = blob_frame(p0, 3);
        let empty = PyramidFrame::new(&Image::filled(128, 128, 100), 3, None).unwrap();

        let mut flow = PyramidKlt::new(FlowConfig::default());
        let mut feature = flow.create_feature(3);
        assert!(flow.set_description(&frame0, p0, &mut feature));
        assert!(!flow.track(&empty, &mut feature));
    }

    #[test]
    fn test_no_texture_is_not_described() {
        let frame = PyramidFrame::new(&Image::filled(64, 64, 30), 2, None).unwrap();
        let mut flow = PyramidKlt::new(FlowConfig::default());
        let mut feature = flow.create_feature(2);
        assert!(!flow.set_description(&frame, Vector2d::new(30., 30.), &mut feature));
        assert!(!flow.track(&frame, &mut feature));
    }

    #[test]
    fn test_feature_resized_to_pyramid() {
        let frame = blob_frame(Vector2d::new(64., 64.), 3);
        let mut flow = PyramidKlt::new(FlowConfig::default());
        let mut feature = flow.create_feature(1);
        assert!(flow.set_description(&frame, Vector2d::new(64., 64.), &mut feature));
        assert_eq!(feature.level_count(), 3);
    }

    #[test]
    fn test_window_inside() {
        // Coordinate (0, 0) means center of top-left pixel. Thus (9, 9) is the
        // center of the bottom-right pixel for 10x10 image.
        let image = Image::filled(10, 10, 0);
        assert!(window_inside(&image, Vector2d::new(4.5, 4.5), 3));
        assert!(window_inside(&image, Vector2d::new(3.0, 6.0), 3));
        assert!(!window_inside(&image, Vector2d::new(2.9, 4.5), 3));
        assert!(!window_inside(&image, Vector2d::new(4.5, 6.1), 3));
    }
}
