use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::image::Image;
use crate::my_types::*;

/// Adds a gaussian bump of peak `contrast` centered at `center`. A negative
/// contrast draws a dark blob. Values are clamped to the u8 range.
pub fn draw_blob(image: &mut Image, center: Vector2d, sigma: f64, contrast: f64) {
    let reach = (4. * sigma).ceil();
    let x0 = (center[0] - reach).floor().max(0.) as usize;
    let y0 = (center[1] - reach).floor().max(0.) as usize;
    let x1 = ((center[0] + reach).ceil().max(0.) as usize).min(image.width);
    let y1 = ((center[1] + reach).ceil().max(0.) as usize).min(image.height);
    let denominator = 2. * sigma * sigma;
    for y in y0..y1 {
        for x in x0..x1 {
            let dx = x as f64 - center[0];
            let dy = y as f64 - center[1];
            let v = image.value(x, y) as f64 + contrast * (-(dx * dx + dy * dy) / denominator).exp();
            image.set_value(x, y, v.round().clamp(0., 255.) as u8);
        }
    }
}

/// Blob moving at a constant velocity, bouncing off the image borders
#[derive(Clone, Debug)]
pub struct Blob {
    pub start: Vector2d,
    /// pixels per frame
    pub velocity: Vector2d,
    pub sigma: f64,
    pub contrast: f64,
    /// Frames `first..last` during which the blob is not drawn
    pub hidden: Option<(usize, usize)>,
}

/// Renders a sequence of frames with moving bright and dark blobs on a flat
/// background. Blobs can be hidden for a few frames to imitate occlusions.
pub struct SyntheticScene {
    pub width: usize,
    pub height: usize,
    pub background: u8,
    /// distance kept from the image border
    pub margin: f64,
    pub blobs: Vec<Blob>,
}

impl SyntheticScene {
    pub fn new(width: usize, height: usize, blobs: Vec<Blob>) -> Self {
        Self {
            width,
            height,
            background: 100,
            margin: 16.,
            blobs,
        }
    }

    /// Places blobs on a jittered grid with `spacing` pixels between cells.
    /// Every `blink_every`-th blob disappears for `blink_length` frames once.
    pub fn random(width: usize, height: usize, spacing: f64, blink_every: usize, blink_length: usize, seed: u64) -> Self {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut scene = Self::new(width, height, vec![]);
        let jitter = spacing / 8.;
        let mut y = scene.margin + spacing / 2.;
        while y < height as f64 - scene.margin {
            let mut x = scene.margin + spacing / 2.;
            while x < width as f64 - scene.margin {
                let index = scene.blobs.len();
                let hidden = if blink_every > 0 && index % blink_every == blink_every - 1 {
                    let first = rng.gen_range(5..30);
                    Some((first, first + blink_length))
                } else {
                    None
                };
                let bright = rng.gen_bool(0.5);
                scene.blobs.push(Blob {
                    start: Vector2d::new(x + rng.gen_range(-jitter..jitter), y + rng.gen_range(-jitter..jitter)),
                    velocity: Vector2d::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)),
                    // different widths give different descriptions
                    sigma: rng.gen_range(2.0..4.0),
                    contrast: if bright { 110. } else { -100. },
                    hidden,
                });
                x += spacing;
            }
            y += spacing;
        }
        scene
    }

    pub fn position(&self, blob: &Blob, frame: usize) -> Vector2d {
        let p = blob.start + blob.velocity * frame as f64;
        Vector2d::new(
            bounce(p[0], self.margin, self.width as f64 - self.margin),
            bounce(p[1], self.margin, self.height as f64 - self.margin),
        )
    }

    pub fn is_visible(&self, blob: &Blob, frame: usize) -> bool {
        blob.hidden
            .map_or(true, |(first, last)| frame < first || frame >= last)
    }

    pub fn render(&self, frame: usize) -> Image {
        let mut image = Image::filled(self.width, self.height, self.background);
        for blob in &self.blobs {
            if self.is_visible(blob, frame) {
                draw_blob(&mut image, self.position(blob, frame), blob.sigma, blob.contrast);
            }
        }
        image
    }

    /// Index and location of the visible blob nearest to `pixel`
    pub fn nearest_blob(&self, pixel: Vector2d, frame: usize) -> Option<(usize, f64)> {
        self.blobs
            .iter()
            .enumerate()
            .filter(|(_, b)| self.is_visible(b, frame))
            .map(|(i, b)| (i, (self.position(b, frame) - pixel).norm()))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// Reflects `v` into `[low, high]`
fn bounce(v: f64, low: f64, high: f64) -> f64 {
    let range = high - low;
    if range <= 0. {
        return low;
    }
    let t = (v - low).rem_euclid(2. * range);
    if t <= range {
        low + t
    } else {
        high - (t - range)
    }
}
