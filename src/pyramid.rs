use anyhow::{bail, Result};

use crate::image::{GradientImage, Image};

/// Downscaled copies of an image. `levels[0]` is half the size of the parent.
#[derive(Debug)]
pub struct Pyramid {
    pub levels: Vec<Image>,
    pub parent_size: [usize; 2],
}

impl Pyramid {
    pub fn empty() -> Self {
        Self {
            levels: vec![],
            parent_size: [0; 2],
        }
    }

    pub fn compute(&mut self, frame: &Image, level_count: usize) -> Result<()> {
        self.compute_levels(frame, level_count)?;
        self.parent_size = [frame.width, frame.height];
        Ok(())
    }

    fn compute_levels(&mut self, frame: &Image, level_count: usize) -> Result<()> {
        self.levels.truncate(level_count);
        while self.levels.len() < level_count {
            self.levels.push(Image::empty())
        }
        if level_count == 0 {
            return Ok(());
        }
        downscale(frame, &mut self.levels[0])?;
        for i in 0..(level_count - 1) {
            let rest = &mut self.levels[i..];
            if let Some((parent, rest)) = rest.split_first_mut() {
                downscale(parent, &mut rest[0])?;
            }
        }
        Ok(())
    }
}

/// 3x3 binomial blur applied before dropping every other pixel, sums to 16
const KERNEL: [[u16; 3]; 3] = [[1, 2, 1], [2, 4, 2], [1, 2, 1]];

/// Pixel at `(x, y)`, coordinates outside the image use the nearest border pixel
fn clamped(image: &Image, x: i32, y: i32) -> u8 {
    let x = x.clamp(0, image.width as i32 - 1);
    let y = y.clamp(0, image.height as i32 - 1);
    image.value_i32(x, y)
}

/// Blurs `parent` and stores every other pixel of it in `child`
fn downscale(parent: &Image, child: &mut Image) -> Result<()> {
    let (w, h) = (parent.width, parent.height);
    if w < 2 || h < 2 || w % 2 != 0 || h % 2 != 0 {
        bail!("cannot downscale image with shape {w} x {h}");
    }

    child.data.clear();
    child.width = w / 2;
    child.height = h / 2;
    for y in (0..h as i32).step_by(2) {
        for x in (0..w as i32).step_by(2) {
            let mut sum = 0;
            for (dy, row) in KERNEL.iter().enumerate() {
                for (dx, &weight) in row.iter().enumerate() {
                    sum += weight * clamped(parent, x + dx as i32 - 1, y + dy as i32 - 1) as u16;
                }
            }
            child.data.push((sum / 16) as u8);
        }
    }
    Ok(())
}

/// Scharr derivative of a whole image, borders use the nearest pixel.
/// ref https://theailearner.com/tag/scharr-operator/
pub fn scharr(image: &Image, out_x: &mut GradientImage, out_y: &mut GradientImage) {
    let w = image.width as i32;
    let h = image.height as i32;
    let shape = (image.height, image.width);
    if out_x.dim() != shape {
        *out_x = GradientImage::zeros(shape);
    }
    if out_y.dim() != shape {
        *out_y = GradientImage::zeros(shape);
    }

    let v = |x: i32, y: i32| -> f32 { clamped(image, x, y) as f32 };

    for y in 0..h {
        for x in 0..w {
            out_x[[y as usize, x as usize]] = (10. * v(x + 1, y)
                + 3. * v(x + 1, y + 1)
                + 3. * v(x + 1, y - 1)
                - 10. * v(x - 1, y)
                - 3. * v(x - 1, y + 1)
                - 3. * v(x - 1, y - 1))
                / 32.;
            out_y[[y as usize, x as usize]] = (10. * v(x, y + 1)
                + 3. * v(x + 1, y + 1)
                + 3. * v(x - 1, y + 1)
                - 10. * v(x, y - 1)
                - 3. * v(x + 1, y - 1)
                - 3. * v(x - 1, y - 1))
                / 32.;
        }
    }
}
