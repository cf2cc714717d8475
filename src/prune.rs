use log::trace;

use crate::my_types::*;

/// Smallest grid cell in pixels. Cells are never smaller than the radius, but
/// tiny radii would otherwise allocate one cell per pixel.
const MIN_CELL_SIZE: f64 = 8.;

/// Point handed to the pruner
#[derive(Clone, Copy, Debug)]
pub struct PrunePoint {
    pub pixel: Vector2d,
    pub feature_id: FeatureId,
}

/// Finds tracks which are within a radius of each other using a grid with
/// cells at least as large as the radius. When two tracks are too close the one with
/// the larger feature id is dropped.
pub struct PruneCloseTracks {
    radius: f64,
    cell_size: f64,
    grid_width: usize,
    grid_height: usize,
    cells: Vec<Vec<usize>>,
    dropped: Vec<bool>,
}

impl PruneCloseTracks {
    pub fn new(radius: f64) -> Self {
        Self {
            radius,
            cell_size: radius.max(MIN_CELL_SIZE),
            grid_width: 0,
            grid_height: 0,
            cells: vec![],
            dropped: vec![],
        }
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Sizes the grid for an image
    pub fn init(&mut self, width: usize, height: usize) {
        self.grid_width = (width as f64 / self.cell_size).ceil() as usize + 1;
        self.grid_height = (height as f64 / self.cell_size).ceil() as usize + 1;
        self.cells.resize_with(self.grid_width * self.grid_height, Vec::new);
    }

    fn cell_of(&self, pixel: Vector2d) -> (usize, usize) {
        let cx = (pixel[0] / self.cell_size).floor().max(0.) as usize;
        let cy = (pixel[1] / self.cell_size).floor().max(0.) as usize;
        (
            usize::min(cx, self.grid_width - 1),
            usize::min(cy, self.grid_height - 1),
        )
    }

    /// Writes into `dropped` the index of every point which should be removed
    pub fn process(&mut self, points: &[PrunePoint], dropped: &mut Vec<usize>) {
        dropped.clear();
        if self.grid_width == 0 || self.grid_height == 0 {
            return;
        }
        for cell in self.cells.iter_mut() {
            cell.clear();
        }
        for (i, p) in points.iter().enumerate() {
            let (cx, cy) = self.cell_of(p.pixel);
            self.cells[cy * self.grid_width + cx].push(i);
        }

        self.dropped.clear();
        self.dropped.resize(points.len(), false);
        let radius2 = self.radius * self.radius;
        for (i, p) in points.iter().enumerate() {
            if self.dropped[i] {
                continue;
            }
            let (cx, cy) = self.cell_of(p.pixel);
            'search: for ny in cy.saturating_sub(1)..usize::min(cy + 2, self.grid_height) {
                for nx in cx.saturating_sub(1)..usize::min(cx + 2, self.grid_width) {
                    for &j in &self.cells[ny * self.grid_width + nx] {
                        if j == i || self.dropped[j] {
                            continue;
                        }
                        let q = &points[j];
                        if (p.pixel - q.pixel).norm_squared() > radius2 {
                            continue;
                        }
                        // keep the older track
                        if q.feature_id > p.feature_id {
                            self.dropped[j] = true;
                        } else {
                            self.dropped[i] = true;
                            break 'search;
                        }
                    }
                }
            }
        }

        dropped.extend((0..points.len()).filter(|&i| self.dropped[i]));
        trace!("pruned {} of {} tracks", dropped.len(), points.len());
    }
}
