//! Slope-aware A* over the flow-field cells

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use glam::{UVec2, Vec3};
use horde_common::OrderedF32;

use crate::FlowField;

/// Node flags for search state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeFlags(u8);

impl NodeFlags {
    pub const OPEN: NodeFlags = NodeFlags(0x01);
    pub const CLOSED: NodeFlags = NodeFlags(0x02);

    pub fn contains(&self, flag: NodeFlags) -> bool {
        self.0 & flag.0 != 0
    }

    pub fn insert(&mut self, flag: NodeFlags) {
        self.0 |= flag.0;
    }

    pub fn remove(&mut self, flag: NodeFlags) {
        self.0 &= !flag.0;
    }
}

/// Null parent index
const NULL_IDX: u32 = u32::MAX;

/// Per-cell search state
#[derive(Debug, Clone, Copy)]
pub struct SearchNode {
    /// Cost from the start cell
    pub cost: f32,
    /// Index of the cell this node was reached from
    pub parent: u32,
    pub flags: NodeFlags,
}

impl Default for SearchNode {
    fn default() -> Self {
        Self {
            cost: f32::INFINITY,
            parent: NULL_IDX,
            flags: NodeFlags::default(),
        }
    }
}

/// Reusable A* state, sized to the last searched field
#[derive(Debug, Default)]
pub struct PathSearch {
    nodes: Vec<SearchNode>,
    open: BinaryHeap<Reverse<(OrderedF32, u32)>>,
    /// Cells expanded by the last search
    expanded: usize,
}

impl PathSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cells closed by the last search
    pub fn expanded(&self) -> usize {
        self.expanded
    }

    fn reset(&mut self, cell_count: usize) {
        self.nodes.clear();
        self.nodes.resize(cell_count, SearchNode::default());
        self.open.clear();
        self.expanded = 0;
    }

    /// Finds a path of cell centres from `start` to `goal`, ending with the
    /// exact goal location at the height of the last cell. Returns `None`
    /// when either point lies outside the field or the goal is unreachable.
    ///
    /// A start and goal inside the same cell do not fail: the path is that
    /// cell's centre followed by the goal, even when the cell is impassable.
    pub fn find_path(&mut self, field: &FlowField, start: Vec3, goal: Vec3) -> Option<Vec<Vec3>> {
        let (Some(start_coord), Some(goal_coord)) =
            (field.world_to_grid(start), field.world_to_grid(goal))
        else {
            log::warn!("Path request from {start} to {goal} leaves the flow field");
            return None;
        };
        let start_index = field.index_of(start_coord)?;
        let goal_index = field.index_of(goal_coord)?;

        if start_index == goal_index {
            let cell = field.cell_by_index(start_index).world_location;
            return Some(vec![cell, Vec3::new(goal.x, goal.y, cell.z)]);
        }

        self.reset(field.cells().len());
        let min_cost = field.min_passable_cost();
        let heuristic = |coord: UVec2| coord.as_vec2().distance(goal_coord.as_vec2()) * min_cost;

        self.nodes[start_index].cost = 0.0;
        self.nodes[start_index].flags.insert(NodeFlags::OPEN);
        self.open
            .push(Reverse((OrderedF32(heuristic(start_coord)), start_index as u32)));

        let mut steps = Vec::with_capacity(8);
        while let Some(Reverse((_, current))) = self.open.pop() {
            let current = current as usize;
            let node = &mut self.nodes[current];
            if node.flags.contains(NodeFlags::CLOSED) {
                continue;
            }
            node.flags.remove(NodeFlags::OPEN);
            node.flags.insert(NodeFlags::CLOSED);
            self.expanded += 1;

            if current == goal_index {
                return Some(self.build_path(field, start_index, goal_index, goal));
            }

            let cost = self.nodes[current].cost;
            steps.clear();
            field.for_each_step(field.coord_of(current), |step| steps.push(step));

            for step in &steps {
                if !field.cell_by_index(step.index).is_passable()
                    || !field.slope_allows(current, step.index)
                {
                    continue;
                }

                let next = &mut self.nodes[step.index];
                if next.flags.contains(NodeFlags::CLOSED) {
                    continue;
                }
                let tentative = cost + field.step_cost(step.index);
                if tentative >= next.cost {
                    continue;
                }
                next.cost = tentative;
                next.parent = current as u32;
                next.flags.insert(NodeFlags::OPEN);
                self.open.push(Reverse((
                    OrderedF32(tentative + heuristic(step.coord)),
                    step.index as u32,
                )));
            }
        }

        log::debug!(
            "No path from {start_coord} to {goal_coord} after expanding {} cells",
            self.expanded
        );
        None
    }

    fn build_path(&self, field: &FlowField, start: usize, goal: usize, target: Vec3) -> Vec<Vec3> {
        let mut chain = vec![goal];
        let mut current = goal;
        while current != start {
            current = self.nodes[current].parent as usize;
            chain.push(current);
        }
        chain.reverse();

        let mut path: Vec<Vec3> = chain
            .into_iter()
            .map(|i| field.cell_by_index(i).world_location)
            .collect();
        let z = path.last().map_or(target.z, |p| p.z);
        path.push(Vec3::new(target.x, target.y, z));
        path
    }
}

impl FlowField {
    /// Finds a path with a fresh [`PathSearch`]
    pub fn find_path(&self, start: Vec3, goal: Vec3) -> Option<Vec<Vec3>> {
        PathSearch::new().find_path(self, start, goal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Connectivity, CornerRule, FlowFieldConfig, IMPASSABLE};

    fn field(width: u32, height: u32) -> FlowField {
        FlowField::new(FlowFieldConfig::new(
            Vec3::ZERO,
            1.0,
            UVec2::new(width, height),
        ))
        .unwrap()
    }

    fn center(x: u32, y: u32) -> Vec3 {
        Vec3::new(x as f32 + 0.5, y as f32 + 0.5, 0.0)
    }

    fn cells(path: &[Vec3]) -> usize {
        path.len() - 1
    }

    #[test]
    fn test_diagonal_path_on_open_grid() {
        let field = field(5, 5);
        let path = field.find_path(center(0, 0), center(4, 4)).unwrap();

        assert_eq!(cells(&path), 5);
        for pair in path[..5].windows(2) {
            let step = pair[1] - pair[0];
            assert_eq!(step, Vec3::new(1.0, 1.0, 0.0));
        }
        assert_eq!(*path.last().unwrap(), center(4, 4));
    }

    #[test]
    fn test_path_lengths_match_grid_metrics() {
        let mut field = field(10, 10);
        let path = field.find_path(center(1, 2), center(8, 5)).unwrap();
        // Chebyshev distance 7
        assert_eq!(cells(&path) - 1, 7);

        field = FlowField::new(
            field
                .config()
                .clone()
                .with_connectivity(Connectivity::Four),
        )
        .unwrap();
        let path = field.find_path(center(1, 2), center(8, 5)).unwrap();
        // Manhattan distance 10
        assert_eq!(cells(&path) - 1, 10);
    }

    #[test]
    fn test_surrounded_goal_fails() {
        let mut field = field(9, 9);
        for y in 3..=5 {
            for x in 3..=5 {
                if (x, y) != (4, 4) {
                    field.set_cost(UVec2::new(x, y), IMPASSABLE);
                }
            }
        }
        let mut search = PathSearch::new();
        assert!(search.find_path(&field, center(0, 0), center(4, 4)).is_none());
        assert!(search.expanded() > 0);
    }

    #[test]
    fn test_out_of_field_fails() {
        let field = field(4, 4);
        assert!(field
            .find_path(center(0, 0), Vec3::new(10.0, 1.0, 0.0))
            .is_none());
        assert!(field
            .find_path(Vec3::new(-1.0, 0.0, 0.0), center(1, 1))
            .is_none());
    }

    #[test]
    fn test_same_cell_path() {
        let field = field(4, 4);
        let goal = Vec3::new(1.8, 1.2, 7.0);
        let path = field.find_path(Vec3::new(1.1, 1.1, 0.0), goal).unwrap();
        assert_eq!(path, vec![center(1, 1), Vec3::new(1.8, 1.2, 0.0)]);
    }

    #[test]
    fn test_goal_takes_height_of_last_cell() {
        let mut field = field(3, 1);
        field.set_heights(|p| p.x * 0.1);
        let path = field
            .find_path(center(0, 0), Vec3::new(2.5, 0.5, 99.0))
            .unwrap();
        assert_eq!(path.len(), 4);
        assert!((path[3].z - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_route_avoids_costly_cells() {
        let mut field = field(7, 5);
        for y in 0..5 {
            field.set_cost(UVec2::new(3, y), if y == 4 { 1 } else { 50 });
        }
        let path = field.find_path(center(0, 0), center(6, 0)).unwrap();
        assert!(path.contains(&center(3, 4)));
    }

    #[test]
    fn test_corner_rule_applies_to_search() {
        let mut field = field(3, 3);
        field.set_cost(UVec2::new(1, 0), IMPASSABLE);
        let path = field.find_path(center(0, 0), center(1, 1)).unwrap();
        assert_eq!(cells(&path), 2);

        let config = field.config().clone().with_corner_rule(CornerRule::BlockIfAny);
        let mut strict = FlowField::new(config).unwrap();
        strict.set_cost(UVec2::new(1, 0), IMPASSABLE);
        let path = strict.find_path(center(0, 0), center(1, 1)).unwrap();
        assert_eq!(cells(&path), 3);

        strict.set_cost(UVec2::new(0, 1), IMPASSABLE);
        assert!(strict.find_path(center(0, 0), center(1, 1)).is_none());
    }

    #[test]
    fn test_steep_ridge_blocks_unless_leaving_impassable() {
        let mut field = field(5, 3);
        for y in 0..3 {
            field.set_height(UVec2::new(2, y), 5.0);
        }
        assert!(field.find_path(center(0, 1), center(4, 1)).is_none());

        // Standing on the ridge itself: a steep step down is refused
        assert!(field.find_path(center(2, 1), center(4, 1)).is_none());

        // An impassable source cell may always be left
        field.set_cost(UVec2::new(2, 1), IMPASSABLE);
        let path = field.find_path(center(2, 1), center(4, 1)).unwrap();
        assert_eq!(cells(&path), 3);
    }

    #[test]
    fn test_impassable_goal_is_never_entered() {
        let mut field = field(4, 4);
        field.set_cost(UVec2::new(3, 3), IMPASSABLE);
        assert!(field.find_path(center(0, 0), center(3, 3)).is_none());
    }

    #[test]
    fn test_search_is_reusable() {
        let field = field(6, 6);
        let mut search = PathSearch::new();
        let first = search.find_path(&field, center(0, 0), center(5, 5)).unwrap();
        let second = search.find_path(&field, center(0, 0), center(5, 5)).unwrap();
        assert_eq!(first, second);
    }
}
