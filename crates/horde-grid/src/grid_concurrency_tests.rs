//! Concurrent insertion tests
//!
//! These tests verify that the spin-locked buckets:
//! - Accept insertions from many threads at once
//! - Produce the same membership as a sequential build
//! - Never hold the same entity twice in one bucket

#[cfg(test)]
mod tests {
    use crate::{EntityRef, GridConfig, GridCoord, GridEntry, Layer, SpatialGrid};
    use glam::{UVec3, Vec3};
    use rayon::prelude::*;
    use std::collections::HashSet;

    fn make_grid() -> SpatialGrid {
        SpatialGrid::new(GridConfig::from_min_corner(
            Vec3::ZERO,
            Vec3::new(50.0, 50.0, 100.0),
            UVec3::new(16, 16, 2),
        ))
        .unwrap()
    }

    fn random_entries(count: usize, seed: u64) -> Vec<GridEntry> {
        let mut rng = fastrand::Rng::with_seed(seed);
        (0..count)
            .map(|i| {
                let pos = Vec3::new(
                    rng.f32() * 900.0 - 50.0,
                    rng.f32() * 900.0 - 50.0,
                    rng.f32() * 200.0,
                );
                GridEntry::new(EntityRef(i as u64), pos, 1.0 + rng.f32() * 10.0)
            })
            .collect()
    }

    fn bucket_sets(grid: &SpatialGrid, layer: Layer) -> Vec<HashSet<u64>> {
        let dims = grid.dims();
        let mut sets = Vec::new();
        for z in 0..dims.z {
            for y in 0..dims.y {
                for x in 0..dims.x {
                    let entries = grid.bucket_entries(layer, GridCoord::new(x, y, z));
                    let set: HashSet<u64> = entries.iter().map(|e| e.hash).collect();
                    assert_eq!(set.len(), entries.len(), "duplicate entry in bucket");
                    sets.push(set);
                }
            }
        }
        sets
    }

    #[test]
    fn test_parallel_insert_matches_sequential() {
        let entries = random_entries(10_000, 7);

        let mut sequential = make_grid();
        for entry in &entries {
            sequential.insert(Layer::Agents, *entry);
        }

        let mut parallel = make_grid();
        {
            let writer = parallel.writer();
            entries.par_iter().for_each(|entry| {
                writer.insert(Layer::Agents, *entry);
            });
        }

        assert_eq!(parallel.layer_len(Layer::Agents), entries.len());
        assert_eq!(
            bucket_sets(&sequential, Layer::Agents),
            bucket_sets(&parallel, Layer::Agents)
        );
        assert_eq!(
            sequential.layer_max_radius(Layer::Agents),
            parallel.layer_max_radius(Layer::Agents)
        );
    }

    #[test]
    fn test_parallel_duplicate_insert_is_deduplicated() {
        let entries = random_entries(2_000, 11);
        let mut grid = make_grid();
        {
            let writer = grid.writer();
            // Every entry is inserted from four tasks at once
            (0..4 * entries.len()).into_par_iter().for_each(|i| {
                writer.insert(Layer::Agents, entries[i % entries.len()]);
            });
        }

        assert_eq!(grid.layer_len(Layer::Agents), entries.len());
        let total: usize = bucket_sets(&grid, Layer::Agents).iter().map(|s| s.len()).sum();
        assert_eq!(total, entries.len());
    }

    #[test]
    fn test_hot_bucket_contention() {
        let mut grid = make_grid();
        {
            let writer = grid.writer();
            (0..5_000u64).into_par_iter().for_each(|i| {
                let entry = GridEntry::new(EntityRef(i), Vec3::new(10.0, 10.0, 10.0), 1.0);
                writer.insert(Layer::Obstacles, entry);
            });
        }
        let hot = grid.bucket_entries(Layer::Obstacles, GridCoord::new(0, 0, 0));
        assert_eq!(hot.len(), 5_000);
        assert_eq!(grid.stats().largest_bucket, 5_000);
        assert_eq!(grid.stats().occupied_buckets, [0, 1, 0]);
    }

    #[test]
    fn test_refill_after_clear() {
        let entries = random_entries(500, 3);
        let mut grid = make_grid();
        for _ in 0..3 {
            grid.clear_dynamic();
            let writer = grid.writer();
            entries.par_iter().for_each(|entry| {
                writer.insert(Layer::Agents, *entry);
            });
        }
        assert_eq!(grid.layer_len(Layer::Agents), 500);
        assert_eq!(grid.stats().entities[0], 500);
    }
}
