use ndarray as nd;

use crate::my_types::*;

/// Row-major grayscale image storage
#[derive(Clone, Debug)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

/// Image derivative, indexed as `[[y, x]]`
pub type GradientImage = nd::Array2<f32>;

impl Image {
    /// Create an empty image
    pub fn empty() -> Image {
        Image {
            data: vec![],
            width: 0,
            height: 0,
        }
    }

    /// Create an image filled with a single value
    pub fn filled(width: usize, height: usize, value: u8) -> Image {
        Image {
            data: vec![value; width * height],
            width,
            height,
        }
    }

    /// Clear the image storage
    pub fn clear(&mut self) {
        self.data.clear();
        self.width = 0;
        self.height = 0;
    }

    #[inline(always)]
    pub fn value(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline(always)]
    pub fn value_i32(&self, x: i32, y: i32) -> u8 {
        self.data[y as usize * self.width + x as usize]
    }

    #[inline(always)]
    pub fn set_value(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }
}

/// Anything that can be sampled with sub-pixel interpolation
pub trait Sampled {
    fn shape(&self) -> (usize, usize);
    fn at(&self, x: usize, y: usize) -> f64;
}

impl Sampled for Image {
    fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline(always)]
    fn at(&self, x: usize, y: usize) -> f64 {
        self.value(x, y) as f64
    }
}

impl Sampled for GradientImage {
    fn shape(&self) -> (usize, usize) {
        (self.ncols(), self.nrows())
    }

    #[inline(always)]
    fn at(&self, x: usize, y: usize) -> f64 {
        self[[y, x]] as f64
    }
}

/// Bilinear interpolation. The caller guarantees `p` lies inside
/// `[0, width - 1] x [0, height - 1]`.
pub fn bilinear<S: Sampled>(image: &S, p: Vector2d) -> f64 {
    let (w, h) = image.shape();
    let x0 = p[0].floor() as usize;
    let y0 = p[1].floor() as usize;
    let x1 = usize::min(x0 + 1, w - 1);
    let y1 = usize::min(y0 + 1, h - 1);
    let ax = p[0] - x0 as f64;
    let ay = p[1] - y0 as f64;
    (1. - ay) * ((1. - ax) * image.at(x0, y0) + ax * image.at(x1, y0))
        + ay * ((1. - ax) * image.at(x0, y1) + ax * image.at(x1, y1))
}
