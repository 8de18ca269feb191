//! Shallow-hierarchy entities.
//!
//! The node graph is mirrored into a flat set of transforms and geometry
//! groups that map 1:1 onto engine acceleration primitives. One `ShTransform`
//! exists per instantiation path; its cached world matrix is the composition
//! of the whole child-is-transform chain below it, so only top-level
//! transforms ever enter the top acceleration group. These entities are
//! created and destroyed exclusively by node-graph edits.

use std::collections::HashMap;

use crate::arena::Handle;
use crate::backend::{AccelHandle, BufferHandle, GeometryHandle, InstanceHandle};
use crate::error::SlotIndex;
use crate::geometry::StaticTransform;

pub struct ShTransform {
    pub(crate) name: String,
    /// The owning node's local transform.
    pub(crate) local: StaticTransform,
    /// Fixed at creation: the wrapped child-path transform, if any.
    pub(crate) child_transform: Option<ShTransformHandle>,
    /// Only meaningful while `child_transform` is `None`.
    pub(crate) child_geometry: Option<ShGeometryGroupHandle>,
    pub(crate) instance: InstanceHandle,
    /// Cached composition of the full chain, pushed to the engine on edit.
    pub(crate) world: StaticTransform,
    /// "-"-joined chain of owning-node names, for diagnostics.
    pub(crate) path_name: String,
}

pub type ShTransformHandle = Handle<ShTransform>;

/// Aggregates the geometry instances of one node's direct surface children.
pub struct ShGeometryGroup {
    pub(crate) accel: AccelHandle,
    pub(crate) instances: Vec<ShGeometryInstanceHandle>,
}

pub type ShGeometryGroupHandle = Handle<ShGeometryGroup>;

/// One engine geometry per (surface node, material group).
pub struct ShGeometryInstance {
    pub(crate) geometry: GeometryHandle,
    pub(crate) index_buffer: BufferHandle,
    pub(crate) material_slot: SlotIndex,
    pub(crate) num_triangles: u32,
}

pub type ShGeometryInstanceHandle = Handle<ShGeometryInstance>;

impl ShGeometryInstance {
    pub fn geometry(&self) -> GeometryHandle {
        self.geometry
    }

    pub fn material_slot(&self) -> SlotIndex {
        self.material_slot
    }

    pub fn num_triangles(&self) -> u32 {
        self.num_triangles
    }
}

/// The root aggregate handed to the engine. Tracks for every registered
/// transform whether it currently has a geometry descendant; only those that
/// do are children of the engine accel group.
pub struct ShGroup {
    pub(crate) accel: AccelHandle,
    pub(crate) transforms: HashMap<ShTransformHandle, bool>,
    pub(crate) num_valid: u32,
}
