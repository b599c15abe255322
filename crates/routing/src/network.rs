//! Drainage network topology
//!
//! Builds adjacency structures over channel pixels from a D8
//! flow-direction raster: a single-downstream lookup, a fixed-width
//! upstream lookup, catchment labels keyed by outlet, and the topological
//! routing order used by all routers.
//!
//! Flow direction encoding:
//! ```text
//!   4  3  2
//!   5  0  1
//!   6  7  8
//! ```
//! 0 = pit/outlet (no outflow), 1-8 = direction to the downstream cell.
//!
//! The flow-direction field is cut to the channel mask: a channel pixel
//! draining onto a non-channel cell, or off the grid, becomes an outlet.

use fluvia_core::{Error, Raster, RasterElement, Result};
use ndarray::Array2;
use tracing::info;

use crate::schedule::RoutingOrder;

/// D8 neighbor offsets: (row_offset, col_offset)
/// Indexed to match the direction encoding (1=E, 2=NE, ..., 8=SE)
const D8_OFFSETS: [(isize, isize); 8] = [
    (0, 1),   // 1: E
    (-1, 1),  // 2: NE
    (-1, 0),  // 3: N
    (-1, -1), // 4: NW
    (0, -1),  // 5: W
    (1, -1),  // 6: SW
    (1, 0),   // 7: S
    (1, 1),   // 8: SE
];

/// Padding value in the fixed-width upstream lookup
pub const NO_UPSTREAM: i32 = -1;

/// A cell has at most 8 neighbors, so at most 8 upstream pixels
pub const MAX_UPSTREAM_PIXELS: usize = 8;

/// Routing method assigned to a channel pixel.
///
/// Resolved once at initialization from the method mask; the scheduler
/// produces disjoint batch sets per method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMethod {
    /// 4-point implicit kinematic wave
    Kinematic,
    /// Variable-parameter Muskingum-Cunge-Todini
    Mct,
}

/// Drainage network over the channel pixels of a raster grid.
///
/// Channel pixels are compressed to indices `0..n` in row-major raster
/// order; all per-pixel fields in the routing crate use this compressed
/// indexing. The downstream lookup uses `n` as the outlet sentinel.
#[derive(Debug, Clone)]
pub struct ChannelNetwork {
    rows: usize,
    cols: usize,
    /// Compressed index -> flat raster index
    cell_index: Vec<u32>,
    /// Compressed downstream lookup; `n` for outlets
    downstream: Vec<u32>,
    /// Fixed-width upstream lookup, padded with [`NO_UPSTREAM`]
    upstream: Array2<i32>,
    /// Number of valid entries per row of `upstream`
    num_upstream: Vec<u8>,
    /// Outlet (compressed index) of the catchment each pixel drains to
    catchment: Vec<u32>,
    /// Compressed indices of the outlets
    outlets: Vec<u32>,
    /// Topological routing order over the full channel network
    order: RoutingOrder,
}

impl ChannelNetwork {
    /// Build the drainage network from a D8 flow-direction raster and a
    /// channel mask (non-zero = channel pixel).
    ///
    /// # Errors
    /// - `Error::SizeMismatch` if the rasters disagree in shape
    /// - `Error::CycleDetected` if the flow directions form a loop
    pub fn from_flow_direction(flow_dir: &Raster<u8>, channels: &Raster<u8>) -> Result<Self> {
        let (rows, cols) = flow_dir.shape();
        let (mr, mc) = channels.shape();
        if (rows, cols) != (mr, mc) {
            return Err(Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar: mr,
                ac: mc,
            });
        }

        // Compress channel cells in row-major order; pixel_index maps the
        // flat raster index back to the compressed index (-1 off-channel)
        let mut cell_index = Vec::new();
        let mut pixel_index = vec![-1_i32; rows * cols];
        for row in 0..rows {
            for col in 0..cols {
                let on_channel = unsafe { channels.get_unchecked(row, col) } != 0;
                if on_channel {
                    pixel_index[row * cols + col] = cell_index.len() as i32;
                    cell_index.push((row * cols + col) as u32);
                }
            }
        }
        let n = cell_index.len();
        let sentinel = n as u32;

        // Downstream lookup, with the flow field cut to the channel mask:
        // draining off the mask or off the grid makes a pixel an outlet.
        let mut downstream = vec![sentinel; n];
        for (pix, &cell) in cell_index.iter().enumerate() {
            let row = cell as usize / cols;
            let col = cell as usize % cols;
            let dir = unsafe { flow_dir.get_unchecked(row, col) };
            if dir == 0 || dir > 8 {
                continue; // pit
            }
            let (dr, dc) = D8_OFFSETS[(dir - 1) as usize];
            let nr = row as isize + dr;
            let nc = col as isize + dc;
            if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                continue; // drains off the grid
            }
            let target = pixel_index[nr as usize * cols + nc as usize];
            if target >= 0 {
                downstream[pix] = target as u32;
            }
        }

        // Fixed-width upstream lookup
        let mut upstream = Array2::from_elem((n, MAX_UPSTREAM_PIXELS), NO_UPSTREAM);
        let mut num_upstream = vec![0u8; n];
        for pix in 0..n {
            let d = downstream[pix];
            if d == sentinel {
                continue;
            }
            let d = d as usize;
            upstream[(d, num_upstream[d] as usize)] = pix as i32;
            num_upstream[d] += 1;
        }

        let order = RoutingOrder::schedule(&downstream, &vec![true; n])?;

        // Catchment labels: walk the routing order from the outlets up;
        // a pixel inherits the outlet label of its downstream pixel,
        // which lies in a later batch and is therefore already labeled.
        let mut catchment = vec![0u32; n];
        let mut outlets = Vec::new();
        for &pix in order.pixels().iter().rev() {
            let pix = pix as usize;
            if downstream[pix] == sentinel {
                catchment[pix] = pix as u32;
                outlets.push(pix as u32);
            } else {
                catchment[pix] = catchment[downstream[pix] as usize];
            }
        }
        outlets.sort_unstable();

        info!(
            pixels = n,
            outlets = outlets.len(),
            batches = order.num_batches(),
            "channel network built"
        );

        Ok(Self {
            rows,
            cols,
            cell_index,
            downstream,
            upstream,
            num_upstream,
            catchment,
            outlets,
            order,
        })
    }

    /// Number of channel pixels
    pub fn num_pixels(&self) -> usize {
        self.cell_index.len()
    }

    /// Grid shape (rows, cols)
    pub fn grid_shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Downstream lookup; `num_pixels()` marks an outlet
    pub fn downstream(&self) -> &[u32] {
        &self.downstream
    }

    /// Outlet sentinel in the downstream lookup
    pub fn outlet_sentinel(&self) -> u32 {
        self.num_pixels() as u32
    }

    /// Whether `pixel` is a catchment outlet
    pub fn is_outlet(&self, pixel: usize) -> bool {
        self.downstream[pixel] == self.outlet_sentinel()
    }

    /// Compressed indices of the outlets, ascending
    pub fn outlets(&self) -> &[u32] {
        &self.outlets
    }

    /// Outlet label of the catchment `pixel` drains to
    pub fn catchment(&self) -> &[u32] {
        &self.catchment
    }

    /// Upstream pixels of `pixel`
    pub fn upstream_pixels(&self, pixel: usize) -> impl Iterator<Item = usize> + '_ {
        self.upstream
            .row(pixel)
            .to_slice()
            .expect("upstream lookup rows are contiguous")
            .iter()
            .take(self.num_upstream[pixel] as usize)
            .map(|&u| u as usize)
    }

    /// Routing order over the full channel network
    pub fn order(&self) -> &RoutingOrder {
        &self.order
    }

    /// Schedule a method-masked subnetwork (see [`RoutingOrder::schedule`])
    pub fn schedule_subset(&self, member: &[bool]) -> Result<RoutingOrder> {
        RoutingOrder::schedule(&self.downstream, member)
    }

    /// Sum of `field` over the immediate upstream pixels of every pixel
    pub fn upstream_sum(&self, field: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.num_pixels()];
        self.upstream_sum_into(field, &mut out);
        out
    }

    /// In-place variant of [`ChannelNetwork::upstream_sum`]
    pub fn upstream_sum_into(&self, field: &[f64], out: &mut [f64]) {
        for pix in 0..self.num_pixels() {
            let mut sum = 0.0;
            for u in self.upstream_pixels(pix) {
                sum += field[u];
            }
            out[pix] = sum;
        }
    }

    /// Per-pixel routing-method tags from an MCT mask raster
    /// (non-zero = MCT pixel).
    pub fn routing_methods(&self, mct_mask: &Raster<u8>) -> Result<Vec<RoutingMethod>> {
        let mask = self.compress(mct_mask)?;
        Ok(mask
            .into_iter()
            .map(|v| {
                if v != 0 {
                    RoutingMethod::Mct
                } else {
                    RoutingMethod::Kinematic
                }
            })
            .collect())
    }

    /// Extract the channel-pixel values of a raster map into a compressed
    /// vector aligned with this network's pixel indexing.
    pub fn compress<T: RasterElement>(&self, map: &Raster<T>) -> Result<Vec<T>> {
        let (mr, mc) = map.shape();
        if (self.rows, self.cols) != (mr, mc) {
            return Err(Error::SizeMismatch {
                er: self.rows,
                ec: self.cols,
                ar: mr,
                ac: mc,
            });
        }
        Ok(self
            .cell_index
            .iter()
            .map(|&cell| unsafe { map.get_unchecked(cell as usize / self.cols, cell as usize % self.cols) })
            .collect())
    }

    /// Explode a compressed channel-pixel vector back onto the raster
    /// grid, filling non-channel cells with `fill`.
    pub fn decompress<T: RasterElement>(&self, field: &[T], fill: T) -> Result<Raster<T>> {
        if field.len() != self.num_pixels() {
            return Err(Error::FieldLength {
                expected: self.num_pixels(),
                actual: field.len(),
            });
        }
        let mut out = Raster::filled(self.rows, self.cols, fill);
        for (pix, &cell) in self.cell_index.iter().enumerate() {
            out.set(cell as usize / self.cols, cell as usize % self.cols, field[pix])?;
        }
        Ok(out)
    }
}
