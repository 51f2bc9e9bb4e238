//! CPU rendition of the five counting-sort stages.
//!
//! Mirrors the WGSL entry points one function per stage and shares the depth encoding and
//! bucketing helpers with the GPU path, so the GPU output can be checked against it.

use glam::Vec3;

use super::{ModelInfo, MAX_WORKGROUPS, WORKGROUP_SIZE};

/// Order-preserving map from f32 to u32: `a < b` iff `encode_depth(a) < encode_depth(b)`
pub fn encode_depth(depth: f32) -> u32 {
    let bits = depth.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

pub fn decode_depth(key: u32) -> f32 {
    if key & 0x8000_0000 != 0 {
        f32::from_bits(key & 0x7fff_ffff)
    } else {
        f32::from_bits(!key)
    }
}

/// Linear remap of `depth` into `[0, range]`. Degenerate ranges collapse into bucket 0.
pub fn depth_bucket(depth: f32, min: f32, max: f32, range: u32) -> u32 {
    if max <= min {
        return 0;
    }
    let t = (depth - min) / (max - min) * range as f32;
    (t.floor().max(0.0) as u32).min(range)
}

/// Indirect dispatch written by stage 1 for `count` points
pub fn dispatch_grid(count: u32) -> [u32; 3] {
    dispatch_grid_with_limit(count, MAX_WORKGROUPS)
}

/// Rows of at most `max_x` workgroups, as many rows as needed
pub fn dispatch_grid_with_limit(count: u32, max_x: u32) -> [u32; 3] {
    let groups = count.div_ceil(WORKGROUP_SIZE);
    let x = groups.min(max_x);
    let y = if x > 0 { groups.div_ceil(x) } else { 1 };
    [x, y, 1]
}

/// Point handled by the invocation at `global_id` in a grid `groups_x` workgroups wide
pub fn flat_index(global_id: [u32; 2], groups_x: u32) -> u64 {
    global_id[1] as u64 * groups_x as u64 * WORKGROUP_SIZE as u64 + global_id[0] as u64
}

/// Invocations launched by `grid`
pub fn covered_points(grid: [u32; 3]) -> u64 {
    grid.iter().map(|&g| g as u64).product::<u64>() * WORKGROUP_SIZE as u64
}

/// Stage 1: true point count from the indirect vertex count
pub fn point_count(vertex_count: u32, vertices_per_point: u32, capacity: u32) -> u32 {
    (vertex_count / vertices_per_point.max(1)).min(capacity)
}

pub fn camera_depth(point: Vec3, camera_position: Vec3, camera_direction: Vec3) -> f32 {
    (point - camera_position).dot(camera_direction)
}

/// Everything the GPU path produces, in CPU form
#[derive(Debug, Clone, PartialEq)]
pub struct SortOutput {
    pub model_info: ModelInfo,
    /// Bucket index per point
    pub keys: Vec<u32>,
    pub histogram: Vec<u32>,
    /// Starting slot per bucket, farthest bucket first
    pub offsets: Vec<u32>,
    /// Point index per output slot
    pub order: Vec<u32>,
}

/// Stage 2: count plus min/max depth
pub fn compute_range(depths: &[f32]) -> ModelInfo {
    let (min, max) = depths.iter().fold((u32::MAX, 0u32), |(lo, hi), &d| {
        let key = encode_depth(d);
        (lo.min(key), hi.max(key))
    });
    ModelInfo::from_raw([depths.len() as u32, min, max])
}

/// Stage 3: bucket keys and the histogram over `range + 1` buckets
pub fn compute_histogram(depths: &[f32], info: &ModelInfo, range: u32) -> (Vec<u32>, Vec<u32>) {
    let mut histogram = vec![0u32; range as usize + 1];
    let keys = depths
        .iter()
        .map(|&d| {
            let bucket = depth_bucket(d, info.min_depth, info.max_depth, range);
            histogram[bucket as usize] += 1;
            bucket
        })
        .collect();
    (keys, histogram)
}

/// Stage 4: reverse exclusive scan, so the farthest bucket starts at slot 0
pub fn accumulate(histogram: &[u32]) -> Vec<u32> {
    let mut offsets = vec![0u32; histogram.len()];
    let mut running = 0u32;
    for bucket in (0..histogram.len()).rev() {
        offsets[bucket] = running;
        running += histogram[bucket];
    }
    offsets
}

/// Stage 5: claim a slot per point; the offsets double as write cursors
pub fn scatter(keys: &[u32], offsets: &[u32]) -> Vec<u32> {
    let mut cursors = offsets.to_vec();
    let mut order = vec![0u32; keys.len()];
    for (index, &bucket) in keys.iter().enumerate() {
        let slot = &mut cursors[bucket as usize];
        order[*slot as usize] = index as u32;
        *slot += 1;
    }
    order
}

/// Run all five stages over `positions`
pub fn counting_sort(
    positions: &[Vec3],
    camera_position: Vec3,
    camera_direction: Vec3,
    range: u32,
) -> SortOutput {
    let depths: Vec<f32> = positions
        .iter()
        .map(|&p| camera_depth(p, camera_position, camera_direction))
        .collect();

    let model_info = compute_range(&depths);
    let (keys, histogram) = compute_histogram(&depths, &model_info, range);
    let offsets = accumulate(&histogram);
    let order = scatter(&keys, &offsets);

    SortOutput {
        model_info,
        keys,
        histogram,
        offsets,
        order,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_encoding_preserves_order() {
        let values = [-1e6f32, -2.5, -0.0, 0.0, 1e-7, 0.5, 3.0, 1e9];
        for pair in values.windows(2) {
            assert!(encode_depth(pair[0]) <= encode_depth(pair[1]), "{:?}", pair);
        }
        for v in values {
            assert_eq!(decode_depth(encode_depth(v)), v);
        }
    }

    #[test]
    fn test_bucket_edges() {
        assert_eq!(depth_bucket(0.0, 0.0, 1.0, 10), 0);
        assert_eq!(depth_bucket(1.0, 0.0, 1.0, 10), 10);
        assert_eq!(depth_bucket(0.55, 0.0, 1.0, 10), 5);
        assert_eq!(depth_bucket(3.0, 3.0, 3.0, 10), 0);
    }

    #[test]
    fn test_dispatch_grid() {
        assert_eq!(dispatch_grid(0), [0, 1, 1]);
        assert_eq!(dispatch_grid(1), [1, 1, 1]);
        assert_eq!(dispatch_grid(WORKGROUP_SIZE), [1, 1, 1]);
        assert_eq!(dispatch_grid(WORKGROUP_SIZE + 1), [2, 1, 1]);
        assert_eq!(dispatch_grid(MAX_WORKGROUPS * WORKGROUP_SIZE), [MAX_WORKGROUPS, 1, 1]);
        assert_eq!(
            dispatch_grid(MAX_WORKGROUPS * WORKGROUP_SIZE + 1),
            [MAX_WORKGROUPS, 2, 1]
        );
    }

    #[test]
    fn test_grid_covers_clouds_beyond_one_row() {
        for count in [4096u32 * 4096, 8192 * 8192, 16384 * 16384] {
            let grid = dispatch_grid(count);
            assert!(grid[0] <= MAX_WORKGROUPS && grid[1] <= MAX_WORKGROUPS);
            let covered = covered_points(grid);
            assert!(covered >= count as u64, "{} points, {} covered", count, covered);
            // No more than one partial row of spare invocations
            assert!(covered - (count as u64) < grid[0] as u64 * WORKGROUP_SIZE as u64);
        }
    }

    #[test]
    fn test_grid_indices_hit_every_point_once() {
        let count = 10 * WORKGROUP_SIZE + 7;
        let grid = dispatch_grid_with_limit(count, 3);
        assert_eq!(grid, [3, 4, 1]);

        let mut hits = vec![0u32; count as usize];
        for y in 0..grid[1] {
            for x in 0..grid[0] * WORKGROUP_SIZE {
                let index = flat_index([x, y], grid[0]);
                if index < count as u64 {
                    hits[index as usize] += 1;
                }
            }
        }
        assert!(hits.iter().all(|&h| h == 1));
    }

    #[test]
    fn test_point_count_from_vertices() {
        assert_eq!(point_count(300, 3, 1000), 100);
        assert_eq!(point_count(300, 1, 100), 100);
        assert_eq!(point_count(7, 0, 100), 7);
    }

    #[test]
    fn test_accumulate_back_to_front() {
        assert_eq!(accumulate(&[2, 0, 3]), vec![3, 3, 0]);
    }

    #[test]
    fn test_small_sort() {
        let positions = [
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, 3.0),
            Vec3::new(0.0, 0.0, 2.0),
        ];
        let out = counting_sort(&positions, Vec3::ZERO, Vec3::Z, 4);
        assert_eq!(out.model_info.count, 3);
        assert_eq!(out.model_info.min_depth, 1.0);
        assert_eq!(out.model_info.max_depth, 3.0);
        assert_eq!(out.keys, vec![0, 4, 2]);
        assert_eq!(out.order, vec![1, 2, 0]);
    }
}
