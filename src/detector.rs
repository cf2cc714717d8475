use crate::descriptor::TupleDescF64;
use crate::image::Image;
use crate::my_types::*;

/// One detected and described point
#[derive(Clone, Debug)]
pub struct Detection<D> {
    pub pixel: Vector2d,
    pub descriptor: D,
    /// Partition label. Association only happens within the same set.
    pub set_id: usize,
}

/// Detects points in an image and describes them
pub trait DetectDescribePoint<D> {
    fn detect(&mut self, image: &Image);

    /// Results of the latest `detect` call
    fn detections(&self) -> &[Detection<D>];

    /// Set ids reported by this detector are in `0..number_of_sets()`
    fn number_of_sets(&self) -> usize;
}

/// Set of points whose center is brighter than the surrounding circle
pub const SET_BRIGHT: usize = 0;
/// Set of points whose center is darker than the surrounding circle
pub const SET_DARK: usize = 1;

const FAST_VARIANT_N: usize = 12;

/// A Bresenham circle.
/// ref https://en.wikipedia.org/wiki/Midpoint_circle_algorithm
const CIRCLE_RADIUS: usize = 3;
const CIRCLE: [[i32; 2]; 16] = [
    [0, -3],
    [1, -3],
    [2, -2],
    [3, -1],
    [3, 0],
    [3, 1],
    [2, 2],
    [1, 3],
    [0, 3],
    [-1, 3],
    [-2, 2],
    [-3, 1],
    [-3, 0],
    [-3, -1],
    [-2, -2],
    [-1, -3],
];

/// FAST corners described by a zero mean, unit norm pixel patch. Bright and
/// dark corners are reported in separate sets.
pub struct FastNccDetector {
    threshold: i16,
    max_features: usize,
    nms_radius: usize,
    describe_radius: usize,
    scores: Vec<f32>,
    candidates: Vec<(f32, usize, usize, usize)>,
    detections: Vec<Detection<TupleDescF64>>,
}

impl FastNccDetector {
    pub fn new(threshold: i16, max_features: usize) -> Self {
        FastNccDetector {
            threshold,
            max_features,
            nms_radius: 3,
            describe_radius: 5,
            scores: vec![],
            candidates: vec![],
            detections: vec![],
        }
    }

    /// Returns the set and score of a corner at (x, y), if it is one
    fn corner(&self, image: &Image, x: i32, y: i32) -> Option<(usize, f32)> {
        let center = image.value_i32(x, y) as i16;
        let mut brighter = [false; 16];
        let mut darker = [false; 16];
        let mut bright_score = 0.;
        let mut dark_score = 0.;
        for (i, [dx, dy]) in CIRCLE.iter().enumerate() {
            let v = image.value_i32(x + dx, y + dy) as i16;
            if center > v + self.threshold {
                brighter[i] = true;
                bright_score += (center - v - self.threshold) as f32;
            } else if center < v - self.threshold {
                darker[i] = true;
                dark_score += (v - center - self.threshold) as f32;
            }
        }
        if longest_arc(&brighter) >= FAST_VARIANT_N {
            Some((SET_BRIGHT, bright_score))
        } else if longest_arc(&darker) >= FAST_VARIANT_N {
            Some((SET_DARK, dark_score))
        } else {
            None
        }
    }

    fn is_local_maximum(&self, width: usize, height: usize, x: usize, y: usize) -> bool {
        let score = self.scores[y * width + x];
        let r = self.nms_radius;
        for ny in y.saturating_sub(r)..usize::min(y + r + 1, height) {
            for nx in x.saturating_sub(r)..usize::min(x + r + 1, width) {
                if nx == x && ny == y {
                    continue;
                }
                let other = self.scores[ny * width + nx];
                // ties go to the first in raster order
                if other > score || (other == score && (ny, nx) < (y, x)) {
                    return false;
                }
            }
        }
        true
    }
}

impl DetectDescribePoint<TupleDescF64> for FastNccDetector {
    fn detect(&mut self, image: &Image) {
        self.detections.clear();
        self.candidates.clear();
        let (w, h) = (image.width, image.height);
        self.scores.clear();
        self.scores.resize(w * h, 0.);

        let margin = usize::max(CIRCLE_RADIUS, self.describe_radius);
        if w <= 2 * margin || h <= 2 * margin {
            return;
        }

        let mut sets = vec![0; w * h];
        for y in margin..h - margin {
            for x in margin..w - margin {
                if let Some((set_id, score)) = self.corner(image, x as i32, y as i32) {
                    self.scores[y * w + x] = score;
                    sets[y * w + x] = set_id;
                }
            }
        }
        for y in margin..h - margin {
            for x in margin..w - margin {
                let score = self.scores[y * w + x];
                if score > 0. && self.is_local_maximum(w, h, x, y) {
                    self.candidates.push((score, x, y, sets[y * w + x]));
                }
            }
        }

        self.candidates
            .sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        self.candidates.truncate(self.max_features);

        for &(_, x, y, set_id) in &self.candidates {
            self.detections.push(Detection {
                pixel: Vector2d::new(x as f64, y as f64),
                descriptor: describe_ncc(image, x, y, self.describe_radius),
                set_id,
            });
        }
    }

    fn detections(&self) -> &[Detection<TupleDescF64>] {
        &self.detections
    }

    fn number_of_sets(&self) -> usize {
        2
    }
}

/// Length of the longest run of `true` on the circle, wrapping around
fn longest_arc(flags: &[bool; 16]) -> usize {
    let mut best = 0;
    let mut run = 0;
    for i in 0..32 {
        if flags[i % 16] {
            run += 1;
            best = usize::max(best, run);
        } else {
            run = 0;
        }
    }
    usize::min(best, 16)
}

/// Zero mean, unit norm patch around (x, y)
fn describe_ncc(image: &Image, x: usize, y: usize, r: usize) -> TupleDescF64 {
    let mut desc = TupleDescF64::new(0);
    for py in y - r..=y + r {
        for px in x - r..=x + r {
            desc.data.push(image.value(px, py) as f64);
        }
    }
    let mean = desc.data.iter().sum::<f64>() / desc.data.len() as f64;
    desc.data.iter_mut().for_each(|v| *v -= mean);
    let norm = desc.data.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0. {
        desc.data.iter_mut().for_each(|v| *v /= norm);
    }
    desc
}
