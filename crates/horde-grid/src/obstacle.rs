//! Polygon obstacle edges stored as an index-linked ring arena
//!
//! Every polygon obstacle is a closed ring of edges. An edge is identified by
//! the vertex it starts at; `next` and `prev` are arena indices, so the ring
//! can be shared across threads without any pointer aliasing. Polygons are
//! wound counter-clockwise when agents should stay outside of them.
//!
//! Removing a polygon frees its slots, and later polygons reuse them, so an
//! arena that sees obstacles come and go stays the size of its peak load.

use glam::{Vec2, Vec3};
use horde_common::{left_of, to_2d, Error, Result};

use crate::EntityRef;

/// Index of an edge inside an [`ObstacleArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct EdgeId(pub u32);

impl EdgeId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// One vertex of a polygon obstacle, together with the edge leaving it
#[derive(Debug, Clone)]
pub struct ObstacleEdge {
    /// Start point of the edge
    pub point: Vec2,
    /// Edge starting at the following vertex
    pub next: EdgeId,
    /// Edge ending at this vertex
    pub prev: EdgeId,
    /// Unit direction from `point` towards the next vertex
    pub unit_dir: Vec2,
    /// Base height of the obstacle
    pub z: f32,
    /// Vertical extent above `z`
    pub height: f32,
    /// Whether the polygon is convex at this vertex
    pub convex: bool,
    /// Static edges are registered once and never move
    pub is_static: bool,
    /// Entity that owns the polygon
    pub owner: EntityRef,
}

impl ObstacleEdge {
    /// Returns true if the vertical band `[z_min, z_max]` overlaps this edge
    pub fn overlaps_height(&self, z_min: f32, z_max: f32) -> bool {
        z_max >= self.z && z_min <= self.z + self.height
    }
}

/// Arena owning every polygon obstacle edge
#[derive(Debug, Clone, Default)]
pub struct ObstacleArena {
    slots: Vec<Option<ObstacleEdge>>,
    /// Vacant slots, reused before the arena grows
    free: Vec<u32>,
}

impl ObstacleArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live edges
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of allocated slots, live or vacant
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }

    /// Gets an edge by id; `None` for foreign or removed ids
    pub fn get(&self, id: EdgeId) -> Option<&ObstacleEdge> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    /// Gets an edge by id; panics on a foreign or removed id
    pub fn edge(&self, id: EdgeId) -> &ObstacleEdge {
        match self.get(id) {
            Some(edge) => edge,
            None => panic!("no obstacle edge {}", id.0),
        }
    }

    /// Iterates over all live edges with their ids
    pub fn iter(&self) -> impl Iterator<Item = (EdgeId, &ObstacleEdge)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (EdgeId(i as u32), e)))
    }

    /// End point of the edge, i.e. the start point of its successor
    pub fn end_point(&self, id: EdgeId) -> Vec2 {
        self.edge(self.edge(id).next).point
    }

    /// Edge as a 3D segment at mid height
    pub fn segment_3d(&self, id: EdgeId) -> (Vec3, Vec3) {
        let edge = self.edge(id);
        let z = edge.z + edge.height * 0.5;
        let end = self.end_point(id);
        (
            Vec3::new(edge.point.x, edge.point.y, z),
            Vec3::new(end.x, end.y, z),
        )
    }

    /// Adds a closed polygon. Vertices should be counter-clockwise for
    /// obstacles that agents walk around. A two-vertex polygon is a
    /// double-sided wall.
    pub fn add_polygon(
        &mut self,
        vertices: &[Vec2],
        z: f32,
        height: f32,
        is_static: bool,
        owner: EntityRef,
    ) -> Result<Vec<EdgeId>> {
        if vertices.len() < 2 {
            return Err(Error::InvalidConfig(format!(
                "polygon obstacle needs at least 2 vertices, got {}",
                vertices.len()
            )));
        }
        if vertices.iter().any(|v| !v.is_finite()) || !z.is_finite() || !height.is_finite() {
            return Err(Error::InvalidConfig(
                "polygon obstacle has non-finite coordinates".to_string(),
            ));
        }
        if height < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "obstacle height must not be negative, got {}",
                height
            )));
        }

        let count = vertices.len();
        let reused = count.min(self.free.len());
        let fresh = count - reused;
        if self.slots.len() + fresh > u32::MAX as usize {
            return Err(Error::InvalidConfig("obstacle arena is full".to_string()));
        }

        let first = self.slots.len();
        let mut ids: Vec<EdgeId> = self
            .free
            .drain(self.free.len() - reused..)
            .map(EdgeId)
            .collect();
        ids.extend((0..fresh).map(|i| EdgeId((first + i) as u32)));
        self.slots.resize(first + fresh, None);

        for i in 0..count {
            let prev = (i + count - 1) % count;
            let next = (i + 1) % count;

            let point = vertices[i];
            let convex = if count == 2 {
                true
            } else {
                left_of(vertices[prev], point, vertices[next]) >= 0.0
            };

            self.slots[ids[i].index()] = Some(ObstacleEdge {
                point,
                next: ids[next],
                prev: ids[prev],
                unit_dir: (vertices[next] - point).normalize_or_zero(),
                z,
                height,
                convex,
                is_static,
                owner,
            });
        }

        Ok(ids)
    }

    /// Adds an oriented box as a four-edge ring.
    ///
    /// `half_extents.z` gives half the height; the box base sits at
    /// `center.z - half_extents.z`. With `inside_out` the winding is reversed
    /// so agents are kept inside the box instead of outside.
    pub fn add_box(
        &mut self,
        center: Vec3,
        half_extents: Vec3,
        yaw_degrees: f32,
        inside_out: bool,
        is_static: bool,
        owner: EntityRef,
    ) -> Result<Vec<EdgeId>> {
        if half_extents.x <= 0.0 || half_extents.y <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "box obstacle needs positive planar extents, got {}",
                half_extents
            )));
        }

        let rot = Vec2::from_angle(yaw_degrees.to_radians());
        let c = to_2d(center);
        let (hx, hy) = (half_extents.x, half_extents.y);
        let mut corners = [
            c + rot.rotate(Vec2::new(-hx, -hy)),
            c + rot.rotate(Vec2::new(hx, -hy)),
            c + rot.rotate(Vec2::new(hx, hy)),
            c + rot.rotate(Vec2::new(-hx, hy)),
        ];
        if inside_out {
            corners.swap(1, 3);
        }

        let hz = half_extents.z.max(0.0);
        self.add_polygon(&corners, center.z - hz, hz * 2.0, is_static, owner)
    }

    /// Removes the edges of a polygon and frees their slots. Returns the
    /// number of edges that were live.
    pub fn remove_polygon(&mut self, edges: &[EdgeId]) -> usize {
        let mut removed = 0;
        for id in edges {
            if let Some(slot) = self.slots.get_mut(id.index()) {
                if slot.take().is_some() {
                    self.free.push(id.0);
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Moves every vertex of a dynamic polygon by `delta`
    pub fn translate(&mut self, edges: &[EdgeId], delta: Vec3) {
        for id in edges {
            if let Some(edge) = self.slots.get_mut(id.index()).and_then(Option::as_mut) {
                edge.point += to_2d(delta);
                edge.z += delta.z;
            }
        }
    }
}
