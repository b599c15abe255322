//! Routing-order scheduler
//!
//! Partitions the pixels of a drainage (sub)network into ordered batches
//! such that every pixel's upstream dependencies lie in strictly earlier
//! batches. Pixels within one batch are mutually independent and may be
//! routed in parallel; batches must be processed in series, headwaters
//! first, outlets last.
//!
//! Ordering follows the layered decomposition of:
//! Liu et al. (2014), A layered approach to parallel computing for
//! spatially distributed hydrological modeling, Environmental Modelling &
//! Software 51, 221-227.

use fluvia_core::{Error, Result};

/// Ordered batch partition of a channel (sub)network.
///
/// Pixels are kept as one array sorted by `(batch, pixel)`; each batch is
/// a contiguous range into that array, so slicing a batch is O(1).
///
/// Batch index = max topological distance over the network minus the
/// pixel's own distance from its outlet: headwater pixels land in batch 0,
/// outlet pixels in the last batch.
#[derive(Debug, Clone)]
pub struct RoutingOrder {
    /// Member pixels sorted by (batch, pixel index)
    ordered_pixels: Vec<u32>,
    /// Cumulative batch boundaries; batch `b` is
    /// `ordered_pixels[batch_bounds[b]..batch_bounds[b + 1]]`
    batch_bounds: Vec<usize>,
    /// Full-domain membership mask
    member: Vec<bool>,
    /// Topological distance from the outlet (`u32::MAX` for non-members)
    distance: Vec<u32>,
}

impl RoutingOrder {
    /// Schedule the subset of pixels selected by `member` against a
    /// downstream lookup over the full pixel domain.
    ///
    /// `downstream[p]` is the compressed index of `p`'s downstream pixel,
    /// or `downstream.len() as u32` (the outlet sentinel) for pits. An
    /// edge belongs to the subnetwork only when both of its endpoints are
    /// members; a member draining to a non-member is an outlet of the
    /// subnetwork.
    ///
    /// # Errors
    /// `Error::CycleDetected` if some member pixel never reaches an
    /// outlet, i.e. the flow-direction map is malformed.
    pub fn schedule(downstream: &[u32], member: &[bool]) -> Result<Self> {
        let n = downstream.len();
        if member.len() != n {
            return Err(Error::FieldLength {
                expected: n,
                actual: member.len(),
            });
        }
        let sentinel = n as u32;

        // Upstream adjacency of the subnetwork in compressed sparse form.
        // Every pixel has at most one downstream pixel, so each member
        // contributes at most one edge.
        let is_sub_edge = |p: usize| -> Option<u32> {
            let d = downstream[p];
            if d != sentinel && member[d as usize] {
                Some(d)
            } else {
                None
            }
        };

        let mut counts = vec![0u32; n + 1];
        for p in 0..n {
            if !member[p] {
                continue;
            }
            if let Some(d) = is_sub_edge(p) {
                counts[d as usize] += 1;
            }
        }
        let mut bounds = vec![0u32; n + 1];
        for p in 0..n {
            bounds[p + 1] = bounds[p] + counts[p];
        }
        let mut ups = vec![0u32; bounds[n] as usize];
        let mut fill = bounds.clone();
        for p in 0..n {
            if !member[p] {
                continue;
            }
            if let Some(d) = is_sub_edge(p) {
                ups[fill[d as usize] as usize] = p as u32;
                fill[d as usize] += 1;
            }
        }

        // Breadth-first traversal from the outlets towards the headwaters.
        // Distance 0 at the outlets, +1 per upstream hop.
        let mut distance = vec![u32::MAX; n];
        let mut queue: Vec<u32> = Vec::new();
        let mut num_members = 0usize;
        for p in 0..n {
            if !member[p] {
                continue;
            }
            num_members += 1;
            if is_sub_edge(p).is_none() {
                distance[p] = 0;
                queue.push(p as u32);
            }
        }

        let mut visited = queue.len();
        let mut max_distance = 0u32;
        while let Some(p) = queue.pop() {
            let d = distance[p as usize] + 1;
            for &u in &ups[bounds[p as usize] as usize..bounds[p as usize + 1] as usize] {
                distance[u as usize] = d;
                max_distance = max_distance.max(d);
                visited += 1;
                queue.push(u);
            }
        }

        if visited != num_members {
            // Some pixel never reached distance 0: the flow-direction map
            // contains a loop.
            let pixel = (0..n)
                .find(|&p| member[p] && distance[p] == u32::MAX)
                .unwrap_or(0);
            return Err(Error::CycleDetected { pixel });
        }

        // Counting sort by batch; ascending pixel iteration keeps pixels
        // sorted within each batch.
        let num_batches = if num_members == 0 {
            0
        } else {
            max_distance as usize + 1
        };
        let mut batch_counts = vec![0usize; num_batches];
        for p in 0..n {
            if member[p] {
                batch_counts[(max_distance - distance[p]) as usize] += 1;
            }
        }
        let mut batch_bounds = vec![0usize; num_batches + 1];
        for b in 0..num_batches {
            batch_bounds[b + 1] = batch_bounds[b] + batch_counts[b];
        }
        let mut ordered_pixels = vec![0u32; num_members];
        let mut cursor = batch_bounds.clone();
        for p in 0..n {
            if member[p] {
                let b = (max_distance - distance[p]) as usize;
                ordered_pixels[cursor[b]] = p as u32;
                cursor[b] += 1;
            }
        }

        Ok(Self {
            ordered_pixels,
            batch_bounds,
            member: member.to_vec(),
            distance,
        })
    }

    /// Number of member pixels
    pub fn num_pixels(&self) -> usize {
        self.ordered_pixels.len()
    }

    /// Number of batches
    pub fn num_batches(&self) -> usize {
        self.batch_bounds.len().saturating_sub(1)
    }

    /// Pixels of batch `b`, sorted by pixel index
    pub fn batch(&self, b: usize) -> &[u32] {
        &self.ordered_pixels[self.batch_bounds[b]..self.batch_bounds[b + 1]]
    }

    /// Iterate over batches in processing order (headwaters to outlets)
    pub fn batches(&self) -> impl Iterator<Item = &[u32]> {
        (0..self.num_batches()).map(move |b| self.batch(b))
    }

    /// All member pixels sorted by (batch, pixel)
    pub fn pixels(&self) -> &[u32] {
        &self.ordered_pixels
    }

    /// Whether `pixel` belongs to this (sub)network
    pub fn contains(&self, pixel: usize) -> bool {
        self.member[pixel]
    }

    /// Full-domain membership mask
    pub fn member(&self) -> &[bool] {
        &self.member
    }

    /// Topological distance from the outlet, if `pixel` is a member
    pub fn distance_from_outlet(&self, pixel: usize) -> Option<u32> {
        if self.member[pixel] {
            Some(self.distance[pixel])
        } else {
            None
        }
    }

    /// Batch index of `pixel`, if it is a member
    pub fn batch_of(&self, pixel: usize) -> Option<usize> {
        self.distance_from_outlet(pixel)
            .map(|d| self.num_batches() - 1 - d as usize)
    }
}
