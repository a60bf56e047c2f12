//! Sphere, swept-sphere and sector queries over a [`SpatialGrid`]
//!
//! All three shapes share one pipeline:
//!
//! 1. resolve candidate buckets (box or swept capsule, clamped to the grid),
//! 2. visit every entity once, de-duplicated by entity hash,
//! 3. exact shape test,
//! 4. ignore list, then tag/closure filter,
//! 5. optional occlusion trace against the obstacle layers,
//! 6. bounded top-K selection (max-heap keyed by squared distance),
//! 7. optional final sort.

use std::collections::{BinaryHeap, HashSet};

use glam::{Vec2, Vec3};
use horde_common::{
    closest_point_on_segment, deg_to_rad, distance_point_segment_squared,
    distance_segment_segment_2d_squared, to_2d, OrderedF32,
};

use crate::{
    EntityRef, EntryShape, GridCoord, GridEntry, Layer, LayerMask, ObstacleArena, SpatialGrid,
    TagMask,
};

/// Planar distances below this count as coincident for the sector angle test
const COINCIDENT_EPSILON_SQ: f32 = 1e-6;

/// Ordering applied to query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum SortMode {
    /// Results come back in no particular order
    #[default]
    None,
    /// Ascending squared distance from the sort origin
    NearToFar,
    /// Descending squared distance from the sort origin
    FarToNear,
}

/// How many results a query keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum KeepCount {
    /// Every matching entity
    #[default]
    All,
    /// The K entities closest to the sort origin
    Nearest(usize),
}

impl KeepCount {
    /// Maps the conventional signed count, where any negative value means
    /// "keep everything"
    pub fn from_signed(count: i32) -> Self {
        if count < 0 {
            KeepCount::All
        } else {
            KeepCount::Nearest(count as usize)
        }
    }
}

/// Caller-supplied predicate evaluated on each candidate entry
pub type EntryPredicate<'a> = &'a (dyn Fn(&GridEntry) -> bool + Sync);

/// Capability filter: required tags, excluded tags and an optional closure
#[derive(Clone, Copy, Default)]
pub struct Filter<'a> {
    pub require: TagMask,
    pub exclude: TagMask,
    pub predicate: Option<EntryPredicate<'a>>,
}

impl std::fmt::Debug for Filter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("require", &self.require)
            .field("exclude", &self.exclude)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl<'a> Filter<'a> {
    /// Entries must carry every bit of `tags`
    pub fn requiring(tags: TagMask) -> Self {
        Self {
            require: tags,
            ..Default::default()
        }
    }

    pub fn with_exclude(mut self, tags: TagMask) -> Self {
        self.exclude = tags;
        self
    }

    pub fn with_predicate(mut self, predicate: EntryPredicate<'a>) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Returns true if the entry passes every part of the filter
    pub fn accepts(&self, entry: &GridEntry) -> bool {
        entry.tags.contains(self.require)
            && !entry.tags.intersects(self.exclude)
            && self.predicate.map_or(true, |p| p(entry))
    }
}

/// Line-of-sight requirement between a check origin and each hit
#[derive(Debug, Clone, Copy)]
pub struct Occlusion<'a> {
    /// Trace start; the query origin (or sweep start) when unset
    pub origin: Option<Vec3>,
    /// Radius of the traced sphere
    pub radius: f32,
    /// Obstacle layers that block the trace
    pub layers: LayerMask,
    /// Arena used to test edge entries exactly instead of by bounding sphere
    pub arena: Option<&'a ObstacleArena>,
}

impl<'a> Occlusion<'a> {
    pub fn new(radius: f32) -> Self {
        Self {
            origin: None,
            radius,
            layers: LayerMask::ALL_OBSTACLES,
            arena: None,
        }
    }

    pub fn with_origin(mut self, origin: Vec3) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_arena(mut self, arena: &'a ObstacleArena) -> Self {
        self.arena = Some(arena);
        self
    }
}

/// Options shared by every query shape
#[derive(Debug, Clone, Copy)]
pub struct QueryParams<'a> {
    /// Layers searched for candidates
    pub layers: LayerMask,
    pub keep: KeepCount,
    pub sort: SortMode,
    /// Point distances are measured from; the query origin when unset
    pub sort_origin: Option<Vec3>,
    /// Entities that never appear in the results
    pub ignore: &'a [EntityRef],
    pub filter: Filter<'a>,
    pub occlusion: Option<Occlusion<'a>>,
}

impl Default for QueryParams<'_> {
    fn default() -> Self {
        Self {
            layers: LayerMask::AGENTS,
            keep: KeepCount::All,
            sort: SortMode::None,
            sort_origin: None,
            ignore: &[],
            filter: Filter::default(),
            occlusion: None,
        }
    }
}

impl<'a> QueryParams<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layers(mut self, layers: impl Into<LayerMask>) -> Self {
        self.layers = layers.into();
        self
    }

    pub fn with_keep(mut self, keep: KeepCount) -> Self {
        self.keep = keep;
        self
    }

    pub fn with_sort(mut self, sort: SortMode) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_sort_origin(mut self, origin: Vec3) -> Self {
        self.sort_origin = Some(origin);
        self
    }

    pub fn ignoring(mut self, ignore: &'a [EntityRef]) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn with_filter(mut self, filter: Filter<'a>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_occlusion(mut self, occlusion: Occlusion<'a>) -> Self {
        self.occlusion = Some(occlusion);
        self
    }
}

/// One entity returned by a query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryHit {
    pub entity: EntityRef,
    pub hash: u64,
    pub tags: TagMask,
    pub shape: EntryShape,
    /// Entity centre
    pub position: Vec3,
    pub radius: f32,
    /// Point on the entity surface facing the query shape
    pub location: Vec3,
    /// Centre of the query shape at the moment of contact
    pub shape_location: Vec3,
    /// Squared distance from the sort origin to the entity centre
    pub dist_sq: f32,
}

/// Outcome of a query
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub hits: Vec<QueryHit>,
}

impl QueryResult {
    /// True when at least one entity matched
    pub fn hit(&self) -> bool {
        !self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QueryHit> {
        self.hits.iter()
    }

    /// Entities in result order
    pub fn entities(&self) -> Vec<EntityRef> {
        self.hits.iter().map(|h| h.entity).collect()
    }

    /// Closest hit regardless of sort mode
    pub fn nearest(&self) -> Option<&QueryHit> {
        self.hits
            .iter()
            .min_by(|a, b| a.dist_sq.total_cmp(&b.dist_sq))
    }
}

impl IntoIterator for QueryResult {
    type Item = QueryHit;
    type IntoIter = std::vec::IntoIter<QueryHit>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.into_iter()
    }
}

/// Candidate ranked by the scratch distance stored in its entry
struct Candidate {
    entry: GridEntry,
    location: Vec3,
    shape_location: Vec3,
}

impl Candidate {
    fn key(&self) -> (OrderedF32, u64) {
        (OrderedF32(self.entry.dist_sq), self.entry.hash)
    }

    fn into_hit(self) -> QueryHit {
        QueryHit {
            entity: self.entry.entity,
            hash: self.entry.hash,
            tags: self.entry.tags,
            shape: self.entry.shape,
            position: self.entry.position,
            radius: self.entry.radius,
            location: self.location,
            shape_location: self.shape_location,
            dist_sq: self.entry.dist_sq,
        }
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// Accumulates accepted candidates, bounded when K is finite
enum Collector {
    All(Vec<Candidate>),
    Nearest {
        limit: usize,
        heap: BinaryHeap<Candidate>,
    },
}

impl Collector {
    fn new(keep: KeepCount) -> Self {
        match keep {
            KeepCount::All => Collector::All(Vec::new()),
            KeepCount::Nearest(limit) => Collector::Nearest {
                limit,
                heap: BinaryHeap::with_capacity(limit + 1),
            },
        }
    }

    /// Whether a candidate at `dist_sq` could still make it into the result
    fn admits(&self, dist_sq: f32) -> bool {
        match self {
            Collector::All(_) => true,
            Collector::Nearest { limit, heap } => {
                heap.len() < *limit
                    || heap.peek().map_or(true, |top| dist_sq < top.entry.dist_sq)
            }
        }
    }

    fn push(&mut self, candidate: Candidate) {
        match self {
            Collector::All(list) => list.push(candidate),
            Collector::Nearest { limit, heap } => {
                heap.push(candidate);
                if heap.len() > *limit {
                    heap.pop();
                }
            }
        }
    }

    fn into_vec(self) -> Vec<Candidate> {
        match self {
            Collector::All(list) => list,
            Collector::Nearest { heap, .. } => heap.into_vec(),
        }
    }
}

fn valid_extent(value: f32) -> bool {
    value.is_finite() && value >= 0.0
}

impl SpatialGrid {
    /// Finds entities overlapping the sphere at `origin`: centre distance no
    /// greater than `radius` plus the entity radius
    pub fn query_sphere(&self, origin: Vec3, radius: f32, params: &QueryParams<'_>) -> QueryResult {
        if !origin.is_finite() || !valid_extent(radius) {
            return QueryResult::default();
        }

        let cells = |layer: Layer| {
            let grow = self.layer_max_radius(layer);
            self.buckets_in_box(origin, Vec3::splat(radius + grow))
        };

        let test = |entry: &GridEntry| {
            let offset = entry.position - origin;
            let reach = radius + entry.radius;
            if offset.length_squared() > reach * reach {
                return None;
            }
            let dir = offset.normalize_or_zero();
            Some((entry.position - dir * entry.radius, origin))
        };

        self.run_query(params, origin, cells, test)
    }

    /// Finds entities touched by a sphere of `radius` moving from `start` to
    /// `end`. The result set does not depend on the sweep direction.
    pub fn query_sweep(
        &self,
        start: Vec3,
        end: Vec3,
        radius: f32,
        params: &QueryParams<'_>,
    ) -> QueryResult {
        if !start.is_finite() || !end.is_finite() || !valid_extent(radius) {
            return QueryResult::default();
        }

        let cells = |layer: Layer| {
            let grow = self.layer_max_radius(layer);
            self.buckets_along_segment(start, end, radius + grow)
        };

        let test = |entry: &GridEntry| {
            let closest = closest_point_on_segment(entry.position, start, end);
            let offset = entry.position - closest;
            let reach = radius + entry.radius;
            if offset.length_squared() > reach * reach {
                return None;
            }
            let dir = offset.normalize_or_zero();
            if dir == Vec3::ZERO {
                return Some((entry.position, closest));
            }
            let location = entry.position - dir * entry.radius;
            Some((location, location - dir * radius))
        };

        self.run_query(params, start, cells, test)
    }

    /// Finds entities inside a vertical cone slice.
    ///
    /// `height` is the full vertical band centred on `origin`; the planar
    /// angle between `direction` and the entity must be within half of
    /// `angle_degrees`. Angles of 360 or more, or a zero direction, make a
    /// full cylinder.
    pub fn query_sector(
        &self,
        origin: Vec3,
        radius: f32,
        height: f32,
        direction: Vec3,
        angle_degrees: f32,
        params: &QueryParams<'_>,
    ) -> QueryResult {
        if !origin.is_finite()
            || !direction.is_finite()
            || !valid_extent(radius)
            || !valid_extent(height)
            || angle_degrees.is_nan()
        {
            return QueryResult::default();
        }

        let forward = to_2d(direction).normalize_or_zero();
        let full_circle = angle_degrees >= 360.0 || forward == Vec2::ZERO;
        let cos_half = (deg_to_rad(angle_degrees.clamp(0.0, 360.0)) * 0.5).cos();
        let half_height = height * 0.5;

        let cells = |layer: Layer| {
            let grow = self.layer_max_radius(layer);
            let half = Vec3::new(radius + grow, radius + grow, half_height + grow);
            self.buckets_in_box(origin, half)
        };

        let test = |entry: &GridEntry| {
            let offset = entry.position - origin;
            let planar = to_2d(offset);
            let planar_sq = planar.length_squared();
            let reach = radius + entry.radius;
            if planar_sq > reach * reach {
                return None;
            }
            if offset.z.abs() > half_height + entry.radius {
                return None;
            }

            if planar_sq <= COINCIDENT_EPSILON_SQ {
                return Some((entry.position, origin));
            }
            let toward = planar / planar_sq.sqrt();
            if !full_circle && forward.dot(toward) < cos_half {
                return None;
            }
            let location = entry.position - Vec3::new(toward.x, toward.y, 0.0) * entry.radius;
            Some((location, origin))
        };

        self.run_query(params, origin, cells, test)
    }

    /// Returns true if nothing in the obstacle layers blocks a sphere of
    /// `radius` moving from `from` to `to`
    pub fn line_of_sight(
        &self,
        from: Vec3,
        to: Vec3,
        radius: f32,
        arena: Option<&ObstacleArena>,
    ) -> bool {
        !self.trace_blocked(from, to, radius, LayerMask::ALL_OBSTACLES, arena, None)
    }

    fn trace_blocked(
        &self,
        from: Vec3,
        to: Vec3,
        radius: f32,
        layers: LayerMask,
        arena: Option<&ObstacleArena>,
        target: Option<EntityRef>,
    ) -> bool {
        let radius = radius.max(0.0);
        let mut seen: HashSet<u64> = HashSet::new();

        for layer in layers.layers() {
            let grow = self.layer_max_radius(layer);
            for coord in self.buckets_along_segment(from, to, radius + grow) {
                for entry in self.bucket_entries(layer, coord) {
                    if Some(entry.entity) == target || !seen.insert(entry.hash) {
                        continue;
                    }
                    if blocks_trace(entry, from, to, radius, arena) {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn run_query<C, T>(
        &self,
        params: &QueryParams<'_>,
        origin: Vec3,
        cells_for: C,
        test: T,
    ) -> QueryResult
    where
        C: Fn(Layer) -> Vec<GridCoord>,
        T: Fn(&GridEntry) -> Option<(Vec3, Vec3)>,
    {
        if params.keep == KeepCount::Nearest(0) {
            return QueryResult::default();
        }

        let sort_origin = params.sort_origin.unwrap_or(origin);
        let mut seen: HashSet<u64> = HashSet::new();
        let mut collector = Collector::new(params.keep);
        let mut visited = 0usize;

        for layer in params.layers.layers() {
            for coord in cells_for(layer) {
                for entry in self.bucket_entries(layer, coord) {
                    if !seen.insert(entry.hash) {
                        continue;
                    }
                    visited += 1;

                    let Some((location, shape_location)) = test(entry) else {
                        continue;
                    };
                    if params.ignore.contains(&entry.entity) || !params.filter.accepts(entry) {
                        continue;
                    }

                    let mut ranked = *entry;
                    ranked.dist_sq = entry.position.distance_squared(sort_origin);
                    if !collector.admits(ranked.dist_sq) {
                        continue;
                    }

                    if let Some(occlusion) = &params.occlusion {
                        let from = occlusion.origin.unwrap_or(origin);
                        if self.trace_blocked(
                            from,
                            location,
                            occlusion.radius,
                            occlusion.layers,
                            occlusion.arena,
                            Some(entry.entity),
                        ) {
                            continue;
                        }
                    }

                    collector.push(Candidate {
                        entry: ranked,
                        location,
                        shape_location,
                    });
                }
            }
        }

        let mut hits: Vec<QueryHit> = collector
            .into_vec()
            .into_iter()
            .map(Candidate::into_hit)
            .collect();

        match params.sort {
            SortMode::None => {}
            SortMode::NearToFar => hits.sort_by(|a, b| a.dist_sq.total_cmp(&b.dist_sq)),
            SortMode::FarToNear => hits.sort_by(|a, b| b.dist_sq.total_cmp(&a.dist_sq)),
        }

        log::trace!("query visited {} entities, kept {}", visited, hits.len());

        QueryResult { hits }
    }
}

fn blocks_trace(
    entry: &GridEntry,
    from: Vec3,
    to: Vec3,
    radius: f32,
    arena: Option<&ObstacleArena>,
) -> bool {
    if let (EntryShape::Edge(id), Some(arena)) = (entry.shape, arena) {
        if let Some(edge) = arena.get(id) {
            let z_min = from.z.min(to.z) - radius;
            let z_max = from.z.max(to.z) + radius;
            if !edge.overlaps_height(z_min, z_max) {
                return false;
            }
            let d2 = distance_segment_segment_2d_squared(
                to_2d(from),
                to_2d(to),
                edge.point,
                arena.end_point(id),
            );
            return d2 <= radius * radius;
        }
    }

    let reach = radius + entry.radius;
    distance_point_segment_squared(entry.position, from, to) < reach * reach
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GridConfig;
    use glam::UVec3;

    fn scenario_grid() -> SpatialGrid {
        SpatialGrid::new(GridConfig::from_min_corner(
            Vec3::ZERO,
            Vec3::splat(100.0),
            UVec3::new(10, 10, 1),
        ))
        .unwrap()
    }

    fn agent(id: u64, x: f32, y: f32, radius: f32) -> GridEntry {
        GridEntry::new(EntityRef(id), Vec3::new(x, y, 50.0), radius)
    }

    #[test]
    fn test_sphere_query_scenario() {
        let mut grid = scenario_grid();
        grid.insert(Layer::Agents, agent(1, 50.0, 50.0, 20.0));

        let result = grid.query_sphere(Vec3::new(60.0, 50.0, 50.0), 30.0, &QueryParams::default());
        assert!(result.hit());
        assert_eq!(result.len(), 1);
        assert_eq!(result.hits[0].entity, EntityRef(1));
        assert!((result.hits[0].dist_sq - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_sphere_query_hit_location() {
        let mut grid = scenario_grid();
        grid.insert(Layer::Agents, agent(1, 200.0, 200.0, 10.0));

        let result = grid.query_sphere(Vec3::new(150.0, 200.0, 50.0), 45.0, &QueryParams::default());
        let hit = result.hits[0];
        assert!((hit.location - Vec3::new(190.0, 200.0, 50.0)).length() < 1e-4);
        assert_eq!(hit.shape_location, Vec3::new(150.0, 200.0, 50.0));

        let miss = grid.query_sphere(Vec3::new(150.0, 200.0, 50.0), 39.0, &QueryParams::default());
        assert!(!miss.hit());
    }

    #[test]
    fn test_keep_nearest_sorted() {
        let mut grid = scenario_grid();
        for i in 0..8u64 {
            grid.insert(Layer::Agents, agent(i, 100.0 + i as f32 * 50.0, 500.0, 1.0));
        }

        let params = QueryParams::new()
            .with_keep(KeepCount::Nearest(3))
            .with_sort(SortMode::NearToFar);
        let result = grid.query_sphere(Vec3::new(100.0, 500.0, 50.0), 1000.0, &params);
        assert_eq!(result.entities(), vec![EntityRef(0), EntityRef(1), EntityRef(2)]);

        let params = params.with_sort(SortMode::FarToNear);
        let result = grid.query_sphere(Vec3::new(100.0, 500.0, 50.0), 1000.0, &params);
        assert_eq!(result.entities(), vec![EntityRef(2), EntityRef(1), EntityRef(0)]);

        let params = QueryParams::new().with_keep(KeepCount::Nearest(0));
        assert!(!grid.query_sphere(Vec3::new(100.0, 500.0, 50.0), 1000.0, &params).hit());

        let params = QueryParams::new().with_keep(KeepCount::from_signed(-1));
        assert_eq!(grid.query_sphere(Vec3::new(100.0, 500.0, 50.0), 1000.0, &params).len(), 8);
    }

    #[test]
    fn test_ignore_and_filter() {
        let mut grid = scenario_grid();
        let friend = TagMask::bit(0);
        let enemy = TagMask::bit(1);
        grid.insert(Layer::Agents, agent(1, 500.0, 500.0, 5.0).with_tags(friend));
        grid.insert(Layer::Agents, agent(2, 510.0, 500.0, 5.0).with_tags(enemy));
        grid.insert(Layer::Agents, agent(3, 520.0, 500.0, 5.0).with_tags(enemy));

        let origin = Vec3::new(500.0, 500.0, 50.0);
        let ignore = [EntityRef(3)];
        let params = QueryParams::new()
            .with_filter(Filter::requiring(enemy))
            .ignoring(&ignore);
        assert_eq!(grid.query_sphere(origin, 100.0, &params).entities(), vec![EntityRef(2)]);

        let only_first = |e: &GridEntry| e.entity == EntityRef(1);
        let params = QueryParams::new().with_filter(Filter::default().with_predicate(&only_first));
        assert_eq!(grid.query_sphere(origin, 100.0, &params).entities(), vec![EntityRef(1)]);

        let params = QueryParams::new().with_filter(Filter::default().with_exclude(enemy));
        assert_eq!(grid.query_sphere(origin, 100.0, &params).entities(), vec![EntityRef(1)]);
    }

    #[test]
    fn test_sweep_query() {
        let mut grid = scenario_grid();
        grid.insert(Layer::Agents, agent(1, 500.0, 520.0, 5.0));
        grid.insert(Layer::Agents, agent(2, 500.0, 600.0, 5.0));
        grid.insert(Layer::Agents, agent(3, 50.0, 500.0, 5.0));

        let start = Vec3::new(100.0, 500.0, 50.0);
        let end = Vec3::new(900.0, 500.0, 50.0);
        let params = QueryParams::new().with_sort(SortMode::NearToFar);
        let result = grid.query_sweep(start, end, 20.0, &params);
        assert_eq!(result.entities(), vec![EntityRef(1)]);

        let hit = result.hits[0];
        assert!((hit.location - Vec3::new(500.0, 515.0, 50.0)).length() < 1e-3);
        assert!((hit.shape_location - Vec3::new(500.0, 495.0, 50.0)).length() < 1e-3);

        // Start point is included in the capsule
        let result = grid.query_sweep(start, end, 50.0, &params);
        assert!(result.entities().contains(&EntityRef(3)));
    }

    #[test]
    fn test_degenerate_sweep_is_sphere() {
        let mut grid = scenario_grid();
        grid.insert(Layer::Agents, agent(1, 300.0, 300.0, 5.0));
        let p = Vec3::new(310.0, 300.0, 50.0);
        assert!(grid.query_sweep(p, p, 6.0, &QueryParams::default()).hit());
        assert!(!grid.query_sweep(p, p, 4.0, &QueryParams::default()).hit());
    }

    #[test]
    fn test_sector_query() {
        let mut grid = scenario_grid();
        grid.insert(Layer::Agents, agent(1, 600.0, 500.0, 5.0)); // ahead
        grid.insert(Layer::Agents, agent(2, 400.0, 500.0, 5.0)); // behind
        grid.insert(Layer::Agents, agent(3, 500.0, 600.0, 5.0)); // left
        grid.insert(
            Layer::Agents,
            GridEntry::new(EntityRef(4), Vec3::new(600.0, 510.0, 95.0), 5.0),
        ); // ahead but too high

        let origin = Vec3::new(500.0, 500.0, 50.0);
        let params = QueryParams::new().with_sort(SortMode::NearToFar);

        let result = grid.query_sector(origin, 150.0, 40.0, Vec3::X, 90.0, &params);
        assert_eq!(result.entities(), vec![EntityRef(1)]);

        let result = grid.query_sector(origin, 150.0, 40.0, Vec3::X, 180.0, &params);
        let mut found = result.entities();
        found.sort();
        assert_eq!(found, vec![EntityRef(1), EntityRef(3)]);

        let result = grid.query_sector(origin, 150.0, 40.0, Vec3::X, 360.0, &params);
        assert_eq!(result.len(), 3);

        let result = grid.query_sector(origin, 150.0, 100.0, Vec3::X, 360.0, &params);
        assert_eq!(result.len(), 4);
    }

    #[test]
    fn test_sector_coincident_entity_passes() {
        let mut grid = scenario_grid();
        grid.insert(Layer::Agents, agent(1, 500.0, 500.0, 5.0));
        let result = grid.query_sector(Vec3::new(500.0, 500.0, 50.0), 10.0, 10.0, Vec3::X, 10.0, &QueryParams::default());
        assert!(result.hit());
    }

    #[test]
    fn test_occlusion_by_sphere_obstacle() {
        let mut grid = scenario_grid();
        grid.insert(Layer::Agents, agent(1, 800.0, 500.0, 5.0));
        grid.insert(Layer::Agents, agent(2, 500.0, 800.0, 5.0));
        grid.insert(Layer::StaticObstacles, agent(100, 650.0, 500.0, 30.0));

        let origin = Vec3::new(500.0, 500.0, 50.0);
        let params = QueryParams::new().with_occlusion(Occlusion::new(0.0));
        let result = grid.query_sphere(origin, 400.0, &params);
        assert_eq!(result.entities(), vec![EntityRef(2)]);

        assert!(!grid.line_of_sight(origin, Vec3::new(800.0, 500.0, 50.0), 0.0, None));
        assert!(grid.line_of_sight(origin, Vec3::new(500.0, 800.0, 50.0), 0.0, None));
    }

    #[test]
    fn test_occlusion_by_edge() {
        let mut grid = scenario_grid();
        let mut arena = ObstacleArena::new();
        let wall = arena
            .add_polygon(
                &[Vec2::new(650.0, 300.0), Vec2::new(650.0, 700.0)],
                0.0,
                100.0,
                true,
                EntityRef(50),
            )
            .unwrap();
        grid.writer()
            .insert_polygon(Layer::StaticObstacles, &arena, &wall, TagMask::NONE);
        grid.insert(Layer::Agents, agent(1, 800.0, 500.0, 5.0));

        let origin = Vec3::new(500.0, 500.0, 50.0);
        let target = Vec3::new(800.0, 500.0, 50.0);
        assert!(!grid.line_of_sight(origin, target, 0.0, Some(&arena)));
        assert!(grid.line_of_sight(origin, Vec3::new(500.0, 900.0, 50.0), 0.0, Some(&arena)));

        let params = QueryParams::new().with_occlusion(Occlusion::new(0.0).with_arena(&arena));
        assert!(!grid.query_sphere(origin, 400.0, &params).hit());
        assert!(grid.query_sphere(origin, 400.0, &QueryParams::default()).hit());
    }

    #[test]
    fn test_degenerate_inputs_return_empty() {
        let mut grid = scenario_grid();
        grid.insert(Layer::Agents, agent(1, 50.0, 50.0, 20.0));
        let params = QueryParams::default();
        let origin = Vec3::new(50.0, 50.0, 50.0);

        assert!(!grid.query_sphere(origin, -1.0, &params).hit());
        assert!(!grid.query_sphere(origin, f32::NAN, &params).hit());
        assert!(!grid.query_sweep(origin, Vec3::splat(f32::INFINITY), 1.0, &params).hit());
        assert!(!grid.query_sector(origin, 10.0, -1.0, Vec3::X, 90.0, &params).hit());

        // Zero radius still overlaps an entity containing the origin
        assert!(grid.query_sphere(origin, 0.0, &params).hit());
    }

    #[test]
    fn test_query_layers() {
        let mut grid = scenario_grid();
        grid.insert(Layer::Agents, agent(1, 500.0, 500.0, 5.0));
        grid.insert(Layer::Obstacles, agent(2, 510.0, 500.0, 5.0));
        grid.insert(Layer::StaticObstacles, agent(3, 520.0, 500.0, 5.0));

        let origin = Vec3::new(500.0, 500.0, 50.0);
        let obstacles = QueryParams::new().with_layers(LayerMask::ALL_OBSTACLES);
        let mut found = grid.query_sphere(origin, 50.0, &obstacles).entities();
        found.sort();
        assert_eq!(found, vec![EntityRef(2), EntityRef(3)]);

        let all = QueryParams::new().with_layers(LayerMask::ALL);
        assert_eq!(grid.query_sphere(origin, 50.0, &all).len(), 3);
    }
}
