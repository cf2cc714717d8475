use anyhow::{ensure, Result};

use crate::image::{GradientImage, Image};
use crate::pyramid::{scharr, Pyramid};

/// Everything the flow tracker needs from one video frame: the image, its
/// pyramid and the x/y derivative of every pyramid level.
#[derive(Debug)]
pub struct PyramidFrame {
    /// original image
    pub image: Image,
    /// downsized images
    pub pyramid: Pyramid,
    /// derivatives, one per level including the original image
    pub deriv_x: Vec<GradientImage>,
    pub deriv_y: Vec<GradientImage>,
}

impl PyramidFrame {
    /// Builds the pyramid of `input`. Buffers of `unused_frame` are reused when
    /// given, so a caller can hand back the frame it got from the tracker.
    pub fn new(input: &Image, levels: usize, unused_frame: Option<PyramidFrame>) -> Result<Self> {
        ensure!(levels >= 1, "a pyramid needs at least one level");

        let mut frame = if let Some(mut unused_frame) = unused_frame {
            // Move data buffer from old unused frame to the new frame to avoid allocation
            unused_frame.image.clear();
            unused_frame
        } else {
            PyramidFrame {
                image: Image::empty(),
                pyramid: Pyramid::empty(),
                deriv_x: vec![],
                deriv_y: vec![],
            }
        };

        frame.image.data.extend(input.data.iter());
        frame.image.width = input.width;
        frame.image.height = input.height;
        frame.pyramid.compute(&frame.image, levels - 1)?;

        frame.deriv_x.truncate(levels);
        frame.deriv_y.truncate(levels);
        while frame.deriv_x.len() < levels {
            frame.deriv_x.push(GradientImage::zeros((0, 0)));
            frame.deriv_y.push(GradientImage::zeros((0, 0)));
        }
        for level in 0..levels {
            let image = if level == 0 {
                &frame.image
            } else {
                &frame.pyramid.levels[level - 1]
            };
            scharr(image, &mut frame.deriv_x[level], &mut frame.deriv_y[level]);
        }

        Ok(frame)
    }

    /// Number of levels, including the full resolution image
    pub fn level_count(&self) -> usize {
        self.pyramid.levels.len() + 1
    }

    pub fn get_image_at_level(&self, level: usize) -> &Image {
        if level == 0 {
            &self.image
        } else {
            &self.pyramid.levels[level - 1]
        }
    }

    /// Scale of a level relative to the original image
    pub fn scale_at_level(&self, level: usize) -> f64 {
        (1u32 << level) as f64
    }

    pub fn width(&self) -> usize {
        self.image.width
    }

    pub fn height(&self) -> usize {
        self.image.height
    }
}
