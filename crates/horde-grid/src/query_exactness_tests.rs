//! Query exactness tests
//!
//! Compares grid queries against brute-force scans over randomly placed
//! entities, including entities and queries outside the grid bounds.

#[cfg(test)]
mod tests {
    use crate::{
        EntityRef, GridConfig, GridEntry, KeepCount, Layer, QueryParams, SortMode, SpatialGrid,
    };
    use glam::{UVec3, Vec3};
    use horde_common::distance_point_segment_squared;
    use std::collections::HashSet;

    struct Fixture {
        grid: SpatialGrid,
        entries: Vec<GridEntry>,
    }

    fn random_point(rng: &mut fastrand::Rng) -> Vec3 {
        Vec3::new(
            rng.f32() * 1400.0 - 200.0,
            rng.f32() * 1400.0 - 200.0,
            rng.f32() * 300.0 - 50.0,
        )
    }

    fn fixture(seed: u64, count: usize) -> Fixture {
        // Anisotropic cells so bucket boundaries differ per axis
        let config = GridConfig::from_min_corner(
            Vec3::ZERO,
            Vec3::new(100.0, 75.0, 100.0),
            UVec3::new(10, 14, 2),
        );
        let mut grid = SpatialGrid::new(config).unwrap();
        let mut rng = fastrand::Rng::with_seed(seed);
        let entries: Vec<GridEntry> = (0..count)
            .map(|i| GridEntry::new(EntityRef(i as u64), random_point(&mut rng), rng.f32() * 40.0))
            .collect();
        for entry in &entries {
            grid.insert(Layer::Agents, *entry);
        }
        Fixture { grid, entries }
    }

    fn ids(hits: impl IntoIterator<Item = EntityRef>) -> HashSet<u64> {
        hits.into_iter().map(|e| e.0).collect()
    }

    #[test]
    fn test_sphere_query_matches_brute_force() {
        let f = fixture(42, 600);
        let mut rng = fastrand::Rng::with_seed(1);

        for _ in 0..200 {
            let origin = random_point(&mut rng);
            let radius = rng.f32() * 250.0;
            let result = f.grid.query_sphere(origin, radius, &QueryParams::default());

            let expected = ids(f.entries.iter().filter_map(|e| {
                let reach = radius + e.radius;
                ((e.position - origin).length_squared() <= reach * reach).then_some(e.entity)
            }));
            assert_eq!(ids(result.entities()), expected, "origin {origin} radius {radius}");
        }
    }

    #[test]
    fn test_sweep_query_matches_brute_force() {
        let f = fixture(5, 600);
        let mut rng = fastrand::Rng::with_seed(2);

        for _ in 0..150 {
            let start = random_point(&mut rng);
            let end = random_point(&mut rng);
            let radius = rng.f32() * 120.0;
            let found = ids(f.grid.query_sweep(start, end, radius, &QueryParams::default()).entities());

            for e in &f.entries {
                let reach = radius + e.radius;
                let d = distance_point_segment_squared(e.position, start, end).sqrt();
                // Entities sitting on the boundary may go either way
                if (d - reach).abs() < 1e-2 {
                    continue;
                }
                assert_eq!(found.contains(&e.entity.0), d < reach, "entity {:?}", e.entity);
            }
        }
    }

    #[test]
    fn test_sweep_query_is_symmetric() {
        let f = fixture(9, 400);
        let mut rng = fastrand::Rng::with_seed(3);

        for _ in 0..100 {
            let a = random_point(&mut rng);
            let b = random_point(&mut rng);
            let radius = rng.f32() * 80.0;
            let forward = ids(f.grid.query_sweep(a, b, radius, &QueryParams::default()).entities());
            let backward = ids(f.grid.query_sweep(b, a, radius, &QueryParams::default()).entities());

            for id in forward.symmetric_difference(&backward) {
                let e = &f.entries[*id as usize];
                let d = distance_point_segment_squared(e.position, a, b).sqrt();
                assert!((d - (radius + e.radius)).abs() < 1e-2);
            }
        }
    }

    #[test]
    fn test_sweep_sort_relative_to_start() {
        let f = fixture(13, 300);
        let a = Vec3::new(0.0, 0.0, 50.0);
        let b = Vec3::new(1000.0, 1000.0, 50.0);
        let params = QueryParams::new().with_sort(SortMode::NearToFar);

        let result = f.grid.query_sweep(a, b, 60.0, &params);
        for pair in result.hits.windows(2) {
            assert!(pair[0].dist_sq <= pair[1].dist_sq);
            assert!(
                (pair[0].position.distance_squared(a) - pair[0].dist_sq).abs() < 1e-2
            );
        }

        let reversed = f.grid.query_sweep(b, a, 60.0, &params);
        assert_eq!(result.len(), reversed.len());
        if let (Some(first), Some(last)) = (result.hits.first(), reversed.hits.last()) {
            assert_eq!(first.entity, last.entity);
        }
    }

    #[test]
    fn test_top_k_returns_nearest() {
        let f = fixture(21, 500);
        let mut rng = fastrand::Rng::with_seed(4);

        for _ in 0..50 {
            let origin = random_point(&mut rng);
            let params = QueryParams::new()
                .with_keep(KeepCount::Nearest(5))
                .with_sort(SortMode::NearToFar);
            let result = f.grid.query_sphere(origin, 300.0, &params);

            let mut all: Vec<(f32, u64)> = f
                .entries
                .iter()
                .filter(|e| {
                    let reach = 300.0 + e.radius;
                    (e.position - origin).length_squared() <= reach * reach
                })
                .map(|e| (e.position.distance_squared(origin), e.entity.0))
                .collect();
            all.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

            let expected: Vec<f32> = all.iter().take(5).map(|p| p.0).collect();
            let got: Vec<f32> = result.hits.iter().map(|h| h.dist_sq).collect();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_sector_full_circle_equals_cylinder() {
        let f = fixture(33, 500);
        let mut rng = fastrand::Rng::with_seed(5);

        for _ in 0..100 {
            let origin = random_point(&mut rng);
            let radius = rng.f32() * 200.0;
            let height = rng.f32() * 200.0;
            let result = f.grid.query_sector(
                origin,
                radius,
                height,
                Vec3::Y,
                360.0,
                &QueryParams::default(),
            );

            let expected = ids(f.entries.iter().filter_map(|e| {
                let planar = glam::Vec2::new(e.position.x - origin.x, e.position.y - origin.y);
                let reach = radius + e.radius;
                let inside = planar.length_squared() <= reach * reach
                    && (e.position.z - origin.z).abs() <= height * 0.5 + e.radius;
                inside.then_some(e.entity)
            }));
            assert_eq!(ids(result.entities()), expected);
        }
    }

    #[test]
    fn test_huge_radius_finds_everything() {
        let f = fixture(17, 200);
        let all = ids(f.entries.iter().map(|e| e.entity));
        let params = QueryParams::default();

        let sphere = f.grid.query_sphere(Vec3::new(500.0, 500.0, 50.0), 1e12, &params);
        assert_eq!(ids(sphere.entities()), all);

        let sweep = f.grid.query_sweep(
            Vec3::new(100.0, 100.0, 50.0),
            Vec3::new(900.0, 900.0, 50.0),
            1e12,
            &params,
        );
        assert_eq!(ids(sweep.entities()), all);

        // A degenerate sweep behaves like the sphere
        let point = Vec3::new(-5000.0, 0.0, 0.0);
        let sweep = f.grid.query_sweep(point, point, 1e12, &params);
        assert_eq!(ids(sweep.entities()), all);
    }
}
