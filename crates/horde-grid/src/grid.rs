//! Uniform 3D bucket grid
//!
//! The grid covers a bounded box split into equally sized (possibly
//! anisotropic) cells. Each of the three [`Layer`]s owns a flat array of
//! buckets indexed by `x + X * (y + Y * z)`.
//!
//! Out-of-range positions are clamped to the nearest edge cell, both when an
//! entry is inserted and when a query resolves its search box. A query
//! centred far outside the grid therefore still searches the edge cells,
//! where any out-of-range entries were clamped to.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use glam::{IVec3, Vec3};
use horde_common::{sqr, Result};

use crate::bucket::Bucket;
use crate::{EdgeId, EntryShape, GridConfig, GridEntry, ObstacleArena, TagMask};

/// Cells of slack added around a swept segment so the Bresenham
/// approximation never misses a cell the capsule touches
const SWEEP_SLACK: i32 = 2;

/// The independent bucket sets owned by a grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum Layer {
    /// Moving entities, rebuilt every tick
    Agents,
    /// Moving obstacles, rebuilt every tick
    Obstacles,
    /// Obstacles registered once
    StaticObstacles,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Agents, Layer::Obstacles, Layer::StaticObstacles];

    fn index(self) -> usize {
        match self {
            Layer::Agents => 0,
            Layer::Obstacles => 1,
            Layer::StaticObstacles => 2,
        }
    }

    /// Whether the layer survives [`SpatialGrid::clear_dynamic`]
    pub fn is_static(self) -> bool {
        matches!(self, Layer::StaticObstacles)
    }
}

/// Set of layers a query searches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct LayerMask(u8);

impl LayerMask {
    pub const NONE: LayerMask = LayerMask(0);
    pub const AGENTS: LayerMask = LayerMask(0x01);
    pub const OBSTACLES: LayerMask = LayerMask(0x02);
    pub const STATIC_OBSTACLES: LayerMask = LayerMask(0x04);
    pub const ALL_OBSTACLES: LayerMask = LayerMask(0x06);
    pub const ALL: LayerMask = LayerMask(0x07);

    pub fn contains(&self, layer: Layer) -> bool {
        self.0 & (1 << layer.index()) != 0
    }

    pub fn insert(&mut self, layer: Layer) {
        self.0 |= 1 << layer.index();
    }

    /// Layers in the mask, in declaration order
    pub fn layers(self) -> impl Iterator<Item = Layer> {
        Layer::ALL.into_iter().filter(move |l| self.contains(*l))
    }
}

impl From<Layer> for LayerMask {
    fn from(layer: Layer) -> Self {
        LayerMask(1 << layer.index())
    }
}

/// Integer cell coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl GridCoord {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    fn from_ivec(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }

    fn as_ivec(&self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }
}

/// Buckets of one layer plus bookkeeping used to size query boxes
struct LayerStore {
    buckets: Vec<Bucket>,
    /// Bits of the largest radius inserted into a single bucket this cycle.
    /// Non-negative floats order the same as their bit patterns.
    max_radius_bits: AtomicU32,
    entity_count: AtomicUsize,
}

impl LayerStore {
    fn new(bucket_count: usize, capacity: usize) -> Self {
        Self {
            buckets: (0..bucket_count)
                .map(|_| Bucket::with_capacity(capacity))
                .collect(),
            max_radius_bits: AtomicU32::new(0),
            entity_count: AtomicUsize::new(0),
        }
    }

    fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        *self.max_radius_bits.get_mut() = 0;
        *self.entity_count.get_mut() = 0;
    }

    fn max_radius(&self) -> f32 {
        f32::from_bits(self.max_radius_bits.load(Ordering::Relaxed))
    }

    fn raise_max_radius(&self, radius: f32) {
        if radius > 0.0 && radius.is_finite() {
            self.max_radius_bits
                .fetch_max(radius.to_bits(), Ordering::Relaxed);
        }
    }
}

/// Occupancy statistics for one grid
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridStats {
    /// Buckets per layer
    pub bucket_count: usize,
    /// Distinct entities inserted, per layer
    pub entities: [usize; 3],
    /// Non-empty buckets, per layer
    pub occupied_buckets: [usize; 3],
    /// Longest bucket over all layers
    pub largest_bucket: usize,
}

/// Uniform 3D spatial hash grid with three layers of buckets
pub struct SpatialGrid {
    config: GridConfig,
    min: Vec3,
    max: Vec3,
    cell_size: Vec3,
    inv_cell_size: Vec3,
    dims: IVec3,
    layers: [LayerStore; 3],
}

impl std::fmt::Debug for SpatialGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialGrid")
            .field("min", &self.min)
            .field("max", &self.max)
            .field("cell_size", &self.cell_size)
            .field("dims", &self.dims)
            .finish_non_exhaustive()
    }
}

impl SpatialGrid {
    /// Creates a new grid
    pub fn new(config: GridConfig) -> Result<Self> {
        config.validate()?;

        let count = config.bucket_count();
        let min = config.min_corner();
        let max = min + config.extent();
        let cell_size = config.cell_size;
        let capacity = config.bucket_capacity;

        log::debug!(
            "Creating spatial grid {} cells of {} over [{}, {}]",
            config.grid_size,
            cell_size,
            min,
            max
        );

        Ok(Self {
            min,
            max,
            cell_size,
            inv_cell_size: cell_size.recip(),
            dims: config.grid_size.as_ivec3(),
            layers: [
                LayerStore::new(count, capacity),
                LayerStore::new(count, capacity),
                LayerStore::new(count, capacity),
            ],
            config,
        })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// World-space bounds as `(min, max)`
    pub fn bounds(&self) -> (Vec3, Vec3) {
        (self.min, self.max)
    }

    pub fn cell_size(&self) -> Vec3 {
        self.cell_size
    }

    /// Number of cells along each axis
    pub fn dims(&self) -> IVec3 {
        self.dims
    }

    pub fn bucket_count(&self) -> usize {
        self.layers[0].buckets.len()
    }

    /// Cell coordinate containing `pos`, not clamped
    pub fn coord_of(&self, pos: Vec3) -> GridCoord {
        GridCoord::from_ivec(((pos - self.min) * self.inv_cell_size).floor().as_ivec3())
    }

    /// Clamps a coordinate into the grid
    pub fn clamp_coord(&self, coord: GridCoord) -> GridCoord {
        GridCoord::from_ivec(coord.as_ivec().clamp(IVec3::ZERO, self.dims - IVec3::ONE))
    }

    /// Returns true if the coordinate addresses a real cell
    pub fn contains_coord(&self, coord: GridCoord) -> bool {
        let c = coord.as_ivec();
        c.cmpge(IVec3::ZERO).all() && c.cmplt(self.dims).all()
    }

    /// Returns true if the position lies inside the grid volume
    pub fn contains_point(&self, pos: Vec3) -> bool {
        pos.cmpge(self.min).all() && pos.cmplt(self.max).all()
    }

    /// Flat bucket index of a coordinate, clamped into range
    pub fn index_of(&self, coord: GridCoord) -> usize {
        let c = self.clamp_coord(coord);
        (c.x + self.dims.x * (c.y + self.dims.y * c.z)) as usize
    }

    /// World position of a cell centre
    pub fn cell_center(&self, coord: GridCoord) -> Vec3 {
        coord.as_ivec().as_vec3() * self.cell_size + self.min + self.cell_size * 0.5
    }

    /// Empties every bucket of every layer, keeping the allocations
    pub fn clear(&mut self) {
        for layer in &mut self.layers {
            layer.clear();
        }
    }

    /// Empties the per-tick layers, keeping [`Layer::StaticObstacles`]
    pub fn clear_dynamic(&mut self) {
        self.clear_layer(Layer::Agents);
        self.clear_layer(Layer::Obstacles);
    }

    pub fn clear_layer(&mut self, layer: Layer) {
        self.layers[layer.index()].clear();
    }

    /// Opens the insertion phase.
    ///
    /// The writer is `Sync` and can be shared by any number of worker
    /// threads. Queries need `&self`, so none can run until the writer is
    /// dropped.
    pub fn writer(&mut self) -> GridWriter<'_> {
        GridWriter { grid: self }
    }

    /// Inserts a single entry; see [`GridWriter::insert`]
    pub fn insert(&mut self, layer: Layer, entry: GridEntry) -> bool {
        self.writer().insert(layer, entry)
    }

    /// Entries of one bucket
    pub fn bucket_entries(&self, layer: Layer, coord: GridCoord) -> &[GridEntry] {
        let bucket = &self.layers[layer.index()].buckets[self.index_of(coord)];
        // SAFETY: `&self` cannot coexist with a `GridWriter`, which holds the
        // exclusive borrow for the whole insertion phase.
        unsafe { bucket.entries() }
    }

    /// Largest radius inserted into a single bucket of `layer` since it was
    /// last cleared. Query boxes grow by this much.
    pub fn layer_max_radius(&self, layer: Layer) -> f32 {
        self.layers[layer.index()].max_radius()
    }

    /// Distinct entities inserted into `layer` since it was last cleared
    pub fn layer_len(&self, layer: Layer) -> usize {
        self.layers[layer.index()]
            .entity_count
            .load(Ordering::Relaxed)
    }

    /// All in-range coordinates whose cells intersect the axis-aligned box.
    /// The box is clamped to the grid first.
    pub fn buckets_in_box(&self, center: Vec3, half_extents: Vec3) -> Vec<GridCoord> {
        if !center.is_finite() || !half_extents.is_finite() {
            return Vec::new();
        }

        let half = half_extents.abs();
        let lo = self.clamp_coord(self.coord_of(center - half));
        let hi = self.clamp_coord(self.coord_of(center + half));

        let count = ((hi.x - lo.x + 1) * (hi.y - lo.y + 1) * (hi.z - lo.z + 1)) as usize;
        let mut coords = Vec::with_capacity(count);
        for z in lo.z..=hi.z {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    coords.push(GridCoord::new(x, y, z));
                }
            }
        }
        coords
    }

    /// Cells touched by a sphere of `radius` swept from `start` to `end`.
    ///
    /// Walks a 3D Bresenham line between the end cells and unions, at every
    /// step, the cells inside a per-axis ellipsoid of `radius`. The result is
    /// de-duplicated and sorted by cell-centre distance from `start`.
    pub fn buckets_along_segment(&self, start: Vec3, end: Vec3, radius: f32) -> Vec<GridCoord> {
        if !start.is_finite() || !end.is_finite() || !radius.is_finite() {
            return Vec::new();
        }
        let radius = radius.max(0.0);

        // Clamped in f32 first: a huge radius must not overflow the cast
        let axis_reach = |inv_cell: f32, dim: i32| {
            ((radius * inv_cell).ceil().min(dim as f32) as i32).saturating_add(SWEEP_SLACK)
        };
        let reach = IVec3::new(
            axis_reach(self.inv_cell_size.x, self.dims.x),
            axis_reach(self.inv_cell_size.y, self.dims.y),
            axis_reach(self.inv_cell_size.z, self.dims.z),
        )
        .min(self.dims);

        // Walking the segment clamped into the grid keeps the walk bounded
        // and finds entries that were clamped into edge cells on insertion.
        let path = clamped_polyline(start, end, self.min, self.max);

        let mut offsets = Vec::new();
        for dz in -reach.z..=reach.z {
            for dy in -reach.y..=reach.y {
                for dx in -reach.x..=reach.x {
                    let gap = |d: i32, cell: f32| ((d.abs() - SWEEP_SLACK).max(0) as f32) * cell;
                    let dist_sq = sqr(gap(dx, self.cell_size.x))
                        + sqr(gap(dy, self.cell_size.y))
                        + sqr(gap(dz, self.cell_size.z));
                    if dist_sq <= radius * radius {
                        offsets.push(IVec3::new(dx, dy, dz));
                    }
                }
            }
        }

        let mut seen: HashSet<GridCoord> = HashSet::new();
        for pair in path.windows(2) {
            walk_line(
                self.coord_of(pair[0]).as_ivec(),
                self.coord_of(pair[1]).as_ivec(),
                |cell| {
                    for offset in &offsets {
                        let coord = GridCoord::from_ivec(cell + *offset);
                        seen.insert(self.clamp_coord(coord));
                    }
                },
            );
        }

        let mut coords: Vec<GridCoord> = seen.into_iter().collect();
        coords.sort_by(|l, r| {
            let dl = self.cell_center(*l).distance_squared(start);
            let dr = self.cell_center(*r).distance_squared(start);
            dl.total_cmp(&dr).then_with(|| l.cmp(r))
        });
        coords
    }

    /// Occupancy statistics
    pub fn stats(&self) -> GridStats {
        let mut stats = GridStats {
            bucket_count: self.bucket_count(),
            ..Default::default()
        };
        for layer in Layer::ALL {
            let store = &self.layers[layer.index()];
            stats.entities[layer.index()] = store.entity_count.load(Ordering::Relaxed);
            for bucket in &store.buckets {
                // SAFETY: see `bucket_entries`.
                let len = unsafe { bucket.entries() }.len();
                if len > 0 {
                    stats.occupied_buckets[layer.index()] += 1;
                    stats.largest_bucket = stats.largest_bucket.max(len);
                }
            }
        }
        stats
    }

    fn bucket(&self, layer: Layer, coord: GridCoord) -> &Bucket {
        &self.layers[layer.index()].buckets[self.index_of(coord)]
    }
}

/// Concurrent insertion handle returned by [`SpatialGrid::writer`]
#[derive(Clone, Copy)]
pub struct GridWriter<'a> {
    grid: &'a SpatialGrid,
}

impl GridWriter<'_> {
    /// Inserts the entry into the bucket containing its position (clamped
    /// into the grid). Returns false if the bucket already holds the hash.
    pub fn insert(&self, layer: Layer, entry: GridEntry) -> bool {
        let grid = self.grid;
        let coord = grid.coord_of(entry.position);
        let added = grid.bucket(layer, coord).push(entry);
        if added {
            let store = &grid.layers[layer.index()];
            store.raise_max_radius(entry.radius);
            store.entity_count.fetch_add(1, Ordering::Relaxed);
        }
        added
    }

    /// Inserts the entry into every bucket its radius box touches.
    /// Returns the number of buckets written.
    pub fn insert_footprint(&self, layer: Layer, entry: GridEntry) -> usize {
        let grid = self.grid;
        let coords = grid.buckets_in_box(entry.position, Vec3::splat(entry.radius.max(0.0)));
        let written = coords
            .iter()
            .filter(|c| grid.bucket(layer, **c).push(entry))
            .count();
        if written > 0 {
            grid.layers[layer.index()]
                .entity_count
                .fetch_add(1, Ordering::Relaxed);
        }
        written
    }

    /// Inserts a polygon edge into every bucket along it, across the cell
    /// layers spanned by its height. Returns the number of buckets written.
    pub fn insert_edge(&self, layer: Layer, arena: &ObstacleArena, id: EdgeId, tags: TagMask) -> usize {
        let grid = self.grid;
        let Some(edge) = arena.get(id) else {
            return 0;
        };
        let (a, b) = arena.segment_3d(id);
        let half_len = (b - a).length() * 0.5;
        let bounding_radius = (sqr(half_len) + sqr(edge.height * 0.5)).sqrt();

        let entry = GridEntry::new(edge.owner, (a + b) * 0.5, bounding_radius)
            .with_hash(crate::mix_hash(edge.owner.0, id.0 as u64 + 1))
            .with_tags(tags)
            .with_shape(EntryShape::Edge(id));

        let z_lo = grid.clamp_coord(grid.coord_of(Vec3::new(a.x, a.y, edge.z))).z;
        let z_hi = grid
            .clamp_coord(grid.coord_of(Vec3::new(a.x, a.y, edge.z + edge.height)))
            .z;

        let mut columns: HashSet<(i32, i32)> = HashSet::new();
        for coord in grid.buckets_along_segment(a, b, 0.0) {
            columns.insert((coord.x, coord.y));
        }

        let mut written = 0;
        for (x, y) in columns {
            for z in z_lo..=z_hi {
                if grid.bucket(layer, GridCoord::new(x, y, z)).push(entry) {
                    written += 1;
                }
            }
        }
        if written > 0 {
            grid.layers[layer.index()]
                .entity_count
                .fetch_add(1, Ordering::Relaxed);
        }
        written
    }

    /// Inserts every edge of a polygon
    pub fn insert_polygon(&self, layer: Layer, arena: &ObstacleArena, edges: &[EdgeId], tags: TagMask) -> usize {
        edges
            .iter()
            .map(|id| self.insert_edge(layer, arena, *id, tags))
            .sum()
    }
}

/// Image of segment `[start, end]` under clamping into the box `[lo, hi]`.
///
/// Clamping is affine between the points where the segment crosses a box
/// plane, so the image is a polyline through the clamped crossing points.
fn clamped_polyline(start: Vec3, end: Vec3, lo: Vec3, hi: Vec3) -> Vec<Vec3> {
    let d = end - start;
    let mut ts = vec![0.0f32, 1.0];
    for axis in 0..3 {
        if d[axis].abs() < f32::EPSILON {
            continue;
        }
        for plane in [lo[axis], hi[axis]] {
            let t = (plane - start[axis]) / d[axis];
            if t > 0.0 && t < 1.0 {
                ts.push(t);
            }
        }
    }
    ts.sort_by(|a, b| a.total_cmp(b));
    ts.dedup();
    ts.into_iter()
        .map(|t| (start + d * t).clamp(lo, hi))
        .collect()
}

/// Visits every cell of a 3D Bresenham line, both ends included
fn walk_line(from: IVec3, to: IVec3, mut visit: impl FnMut(IVec3)) {
    let delta = (to - from).abs().to_array();
    let step = (to - from).signum().to_array();
    let target = to.to_array();

    let major = if delta[0] >= delta[1] && delta[0] >= delta[2] {
        0
    } else if delta[1] >= delta[2] {
        1
    } else {
        2
    };
    let (a, b) = ((major + 1) % 3, (major + 2) % 3);

    let mut p = from.to_array();
    let mut err_a = 2 * delta[a] - delta[major];
    let mut err_b = 2 * delta[b] - delta[major];

    visit(IVec3::from_array(p));
    while p[major] != target[major] {
        p[major] += step[major];
        if err_a >= 0 {
            p[a] += step[a];
            err_a -= 2 * delta[major];
        }
        if err_b >= 0 {
            p[b] += step[b];
            err_b -= 2 * delta[major];
        }
        err_a += 2 * delta[a];
        err_b += 2 * delta[b];
        visit(IVec3::from_array(p));
    }
}
