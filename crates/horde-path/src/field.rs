//! Flow-field grid: per-cell cost, height and a precomputed downhill direction
//!
//! Cells are laid out row-major (`index = y * size.x + x`). A cost of
//! [`IMPASSABLE`] marks a cell that movement never enters. After
//! [`FlowField::integrate`], every reachable cell points towards the
//! neighbour it drains through and records the goal it ends up in.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use glam::{IVec2, UVec2, Vec2, Vec3};
use horde_common::{normalize_2d_or_zero, slope_degrees, to_2d, Error, OrderedF32, Result};

use crate::{Connectivity, CornerRule, FlowFieldConfig};

/// Cost value of a cell that can not be entered
pub const IMPASSABLE: u8 = 255;

/// Cost of a freshly created cell
pub const DEFAULT_COST: u8 = 1;

/// Neighbour offsets, diagonals first
const NEIGHBOR_OFFSETS: [IVec2; 8] = [
    IVec2::new(1, -1),
    IVec2::new(1, 1),
    IVec2::new(-1, 1),
    IVec2::new(-1, -1),
    IVec2::new(0, -1),
    IVec2::new(1, 0),
    IVec2::new(0, 1),
    IVec2::new(-1, 0),
];

/// One flow-field cell
#[derive(Debug, Clone, PartialEq)]
pub struct FlowCell {
    /// World location of the cell centre, z is the ground height
    pub world_location: Vec3,
    /// Traversal cost, [`IMPASSABLE`] blocks the cell
    pub cost: u8,
    /// Integrated cost to the nearest goal, infinite when unreached
    pub dist: f32,
    /// Planar unit direction towards the next cell, zero at goals
    pub direction: Vec3,
    /// Goal cell this cell drains to
    pub goal: Option<UVec2>,
}

impl FlowCell {
    #[inline]
    pub fn is_passable(&self) -> bool {
        self.cost != IMPASSABLE
    }

    #[inline]
    pub fn is_reached(&self) -> bool {
        self.dist.is_finite()
    }
}

/// A move from one cell to a neighbour
#[derive(Debug, Clone, Copy)]
pub(crate) struct Step {
    pub coord: UVec2,
    pub index: usize,
    pub diagonal: bool,
}

/// Grid of flow cells shared by the path search and flow steering
#[derive(Debug, Clone)]
pub struct FlowField {
    config: FlowFieldConfig,
    cells: Vec<FlowCell>,
}

impl FlowField {
    /// Creates a flat field with every cell at [`DEFAULT_COST`]
    pub fn new(config: FlowFieldConfig) -> Result<Self> {
        config.validate()?;

        let half = config.cell_size * 0.5;
        let mut cells = Vec::with_capacity(config.cell_count());
        for y in 0..config.size.y {
            for x in 0..config.size.x {
                cells.push(FlowCell {
                    world_location: config.origin
                        + Vec3::new(
                            x as f32 * config.cell_size + half,
                            y as f32 * config.cell_size + half,
                            0.0,
                        ),
                    cost: DEFAULT_COST,
                    dist: f32::INFINITY,
                    direction: Vec3::ZERO,
                    goal: None,
                });
            }
        }

        log::debug!(
            "Created {}x{} flow field with {} unit cells",
            config.size.x,
            config.size.y,
            config.cell_size
        );

        Ok(Self { config, cells })
    }

    /// Creates a field and fills it with row-major costs
    pub fn from_costs(config: FlowFieldConfig, costs: &[u8]) -> Result<Self> {
        let mut field = Self::new(config)?;
        if costs.len() != field.cells.len() {
            return Err(Error::Pathfinding(format!(
                "expected {} cell costs, got {}",
                field.cells.len(),
                costs.len()
            )));
        }
        for (cell, &cost) in field.cells.iter_mut().zip(costs) {
            cell.cost = cost;
        }
        Ok(field)
    }

    pub fn config(&self) -> &FlowFieldConfig {
        &self.config
    }

    pub fn size(&self) -> UVec2 {
        self.config.size
    }

    pub fn cells(&self) -> &[FlowCell] {
        &self.cells
    }

    /// Flat index of an in-range coordinate
    #[inline]
    pub fn index_of(&self, coord: UVec2) -> Option<usize> {
        let size = self.config.size;
        (coord.x < size.x && coord.y < size.y)
            .then(|| coord.y as usize * size.x as usize + coord.x as usize)
    }

    /// Coordinate of a flat index
    #[inline]
    pub fn coord_of(&self, index: usize) -> UVec2 {
        let width = self.config.size.x as usize;
        UVec2::new((index % width) as u32, (index / width) as u32)
    }

    pub fn cell(&self, coord: UVec2) -> Option<&FlowCell> {
        self.index_of(coord).map(|i| &self.cells[i])
    }

    #[inline]
    pub(crate) fn cell_by_index(&self, index: usize) -> &FlowCell {
        &self.cells[index]
    }

    /// Sets the traversal cost of a cell, returns false when out of range
    pub fn set_cost(&mut self, coord: UVec2, cost: u8) -> bool {
        match self.index_of(coord) {
            Some(i) => {
                self.cells[i].cost = cost;
                true
            }
            None => false,
        }
    }

    /// Sets the ground height of a cell, returns false when out of range
    pub fn set_height(&mut self, coord: UVec2, z: f32) -> bool {
        match self.index_of(coord) {
            Some(i) => {
                self.cells[i].world_location.z = z;
                true
            }
            None => false,
        }
    }

    /// Samples the ground height of every cell from `height(x, y)`
    pub fn set_heights(&mut self, height: impl Fn(Vec2) -> f32) {
        for cell in &mut self.cells {
            cell.world_location.z = height(to_2d(cell.world_location));
        }
    }

    /// Maps a world location to the cell containing it
    pub fn world_to_grid(&self, location: Vec3) -> Option<UVec2> {
        if !location.is_finite() {
            return None;
        }
        let half = self.config.cell_size * 0.5;
        let relative = to_2d(location - self.config.origin) - Vec2::splat(half);
        // Round half up
        let coord = (relative / self.config.cell_size + Vec2::splat(0.5))
            .floor()
            .as_ivec2();
        let size = self.config.size.as_ivec2();
        (coord.x >= 0 && coord.y >= 0 && coord.x < size.x && coord.y < size.y)
            .then(|| coord.as_uvec2())
    }

    /// World location of a cell centre
    pub fn grid_to_world(&self, coord: UVec2) -> Option<Vec3> {
        self.cell(coord).map(|c| c.world_location)
    }

    /// Cell under a world location
    pub fn cell_at(&self, location: Vec3) -> Option<&FlowCell> {
        self.world_to_grid(location).and_then(|c| self.cell(c))
    }

    /// Flow direction under a world location, if integrated and not a goal
    pub fn direction_at(&self, location: Vec3) -> Option<Vec3> {
        self.cell_at(location)
            .map(|c| c.direction)
            .filter(|d| *d != Vec3::ZERO)
    }

    /// Ground height under a world location
    pub fn height_at(&self, location: Vec3) -> Option<f32> {
        self.cell_at(location).map(|c| c.world_location.z)
    }

    /// Average flow direction of the cells touched by a circle
    pub fn average_direction(&self, location: Vec3, radius: f32) -> Option<Vec3> {
        if !location.is_finite() || radius.is_nan() || radius < 0.0 {
            return None;
        }

        let cell_size = self.config.cell_size;
        let center = to_2d(location - self.config.origin);
        let size = self.config.size.as_ivec2();
        let lo = ((center - Vec2::splat(radius)) / cell_size)
            .floor()
            .as_ivec2()
            .max(IVec2::ZERO);
        let hi = ((center + Vec2::splat(radius)) / cell_size)
            .floor()
            .as_ivec2()
            .min(size - IVec2::ONE);

        let mut sum = Vec3::ZERO;
        let mut count = 0usize;
        for y in lo.y..=hi.y {
            for x in lo.x..=hi.x {
                let min = Vec2::new(x as f32, y as f32) * cell_size;
                let nearest = center.clamp(min, min + Vec2::splat(cell_size));
                if nearest.distance_squared(center) > radius * radius {
                    continue;
                }
                let cell = &self.cells[y as usize * size.x as usize + x as usize];
                if cell.direction != Vec3::ZERO {
                    sum += cell.direction;
                    count += 1;
                }
            }
        }

        if count == 0 {
            return None;
        }
        let direction = normalize_2d_or_zero(sum);
        (direction != Vec3::ZERO).then_some(direction)
    }

    /// Calls `visit` with every neighbour reachable from `coord` under the
    /// connectivity and corner rules. Cost and slope are not checked here.
    pub(crate) fn for_each_step(&self, coord: UVec2, mut visit: impl FnMut(Step)) {
        let offsets = match self.config.connectivity {
            Connectivity::Eight => &NEIGHBOR_OFFSETS[..],
            Connectivity::Four => &NEIGHBOR_OFFSETS[4..],
        };
        let origin = coord.as_ivec2();

        for offset in offsets {
            let Some((next, index)) = self.neighbor(origin + *offset) else {
                continue;
            };
            let diagonal = offset.x != 0 && offset.y != 0;
            if diagonal && self.corner_blocked(origin, *offset) {
                continue;
            }
            visit(Step {
                coord: next,
                index,
                diagonal,
            });
        }
    }

    fn neighbor(&self, coord: IVec2) -> Option<(UVec2, usize)> {
        if coord.x < 0 || coord.y < 0 {
            return None;
        }
        let coord = coord.as_uvec2();
        self.index_of(coord).map(|i| (coord, i))
    }

    fn corner_blocked(&self, origin: IVec2, offset: IVec2) -> bool {
        // Flanking cells outside the field never block
        let blocked = |c: IVec2| {
            self.neighbor(c)
                .is_some_and(|(_, i)| !self.cells[i].is_passable())
        };
        let a = blocked(origin + IVec2::new(offset.x, 0));
        let b = blocked(origin + IVec2::new(0, offset.y));
        match self.config.corner_rule {
            CornerRule::BlockIfBoth => a && b,
            CornerRule::BlockIfAny => a || b,
        }
    }

    /// Returns true if the slope between two cells may be walked from `from`
    pub(crate) fn slope_allows(&self, from: usize, to: usize) -> bool {
        let a = &self.cells[from];
        let b = &self.cells[to];
        if !a.is_passable() {
            return true;
        }
        let horizontal = to_2d(a.world_location).distance(to_2d(b.world_location));
        if horizontal <= f32::EPSILON {
            return true;
        }
        let dz = b.world_location.z - a.world_location.z;
        slope_degrees(dz, horizontal) <= self.config.max_walkable_angle
    }

    /// Cost of stepping into `to`, the same for orthogonal and diagonal moves
    #[inline]
    pub(crate) fn step_cost(&self, to: usize) -> f32 {
        self.cells[to].cost.max(1) as f32
    }

    /// Cheapest cost of any passable cell, used to scale the A* heuristic
    pub(crate) fn min_passable_cost(&self) -> f32 {
        self.cells
            .iter()
            .filter(|c| c.is_passable())
            .map(|c| c.cost.max(1))
            .min()
            .unwrap_or(1) as f32
    }

    /// Integrates costs outwards from `goals` and derives the flow
    /// directions. Impassable cells next to reachable ones get a direction
    /// out but are never flowed through. Returns the number of reached cells.
    pub fn integrate(&mut self, goals: &[UVec2]) -> usize {
        for cell in &mut self.cells {
            cell.dist = f32::INFINITY;
            cell.direction = Vec3::ZERO;
            cell.goal = None;
        }

        let mut parent = vec![usize::MAX; self.cells.len()];
        let mut open = BinaryHeap::new();
        for &goal in goals {
            let Some(index) = self.index_of(goal) else {
                log::warn!("Ignoring flow field goal {goal} outside the field");
                continue;
            };
            if !self.cells[index].is_passable() || self.cells[index].dist == 0.0 {
                continue;
            }
            self.cells[index].dist = 0.0;
            self.cells[index].goal = Some(goal);
            open.push(Reverse((OrderedF32(0.0), index)));
        }

        let mut steps = Vec::with_capacity(8);
        while let Some(Reverse((OrderedF32(dist), current))) = open.pop() {
            if dist > self.cells[current].dist {
                continue;
            }

            steps.clear();
            self.for_each_step(self.coord_of(current), |step| steps.push(step));

            let goal = self.cells[current].goal;
            // Agents move from the neighbour into `current`
            for step in &steps {
                if !self.slope_allows(step.index, current) {
                    continue;
                }
                let candidate = dist + self.step_cost(current);
                let next = &mut self.cells[step.index];
                if candidate >= next.dist {
                    continue;
                }
                next.dist = candidate;
                next.goal = goal;
                parent[step.index] = current;
                if self.cells[step.index].is_passable() {
                    open.push(Reverse((OrderedF32(candidate), step.index)));
                }
            }
        }

        let mut reached = 0;
        for index in 0..self.cells.len() {
            if !self.cells[index].is_reached() {
                continue;
            }
            reached += 1;
            let towards = parent[index];
            if towards != usize::MAX {
                let delta = self.cells[towards].world_location - self.cells[index].world_location;
                self.cells[index].direction = normalize_2d_or_zero(delta);
            }
        }

        log::debug!(
            "Integrated flow field from {} goals, {} of {} cells reached",
            goals.len(),
            reached,
            self.cells.len()
        );
        reached
    }
}
