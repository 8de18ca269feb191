//! Host-side node hierarchy data.

use std::collections::HashMap;

use crate::arena::Handle;
use crate::backend::BufferHandle;
use crate::geometry::StaticTransform;

use super::sh::{ShGeometryGroupHandle, ShGeometryInstanceHandle, ShTransformHandle};

pub struct Node {
    pub(crate) data: NodeData,
}

pub type NodeHandle = Handle<Node>;

/// A parent edge target: an internal node, or the scene-owned root.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParentRef {
    Root,
    Node(NodeHandle),
}

pub enum NodeData {
    Internal(InternalData),
    Surface(SurfaceData),
}

impl NodeData {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            NodeData::Internal(_) => "internal",
            NodeData::Surface(_) => "surface",
        }
    }

    pub(crate) fn parents(&self) -> &[ParentRef] {
        match self {
            NodeData::Internal(d) => &d.parents,
            NodeData::Surface(d) => &d.parents,
        }
    }

    pub(crate) fn parents_mut(&mut self) -> &mut Vec<ParentRef> {
        match self {
            NodeData::Internal(d) => &mut d.parents,
            NodeData::Surface(d) => &mut d.parents,
        }
    }
}

/// Transform-bearing node. May have multiple parents (instancing): one
/// wrapping `ShTransform` exists per child path per parent path.
pub struct InternalData {
    pub(crate) name: String,
    pub(crate) transform: StaticTransform,
    pub(crate) children: Vec<NodeHandle>,
    pub(crate) parents: Vec<ParentRef>,
    /// This node's own path transform (the "self" entry).
    pub(crate) self_transform: ShTransformHandle,
    /// One wrapper per child-path transform, keyed by the wrapped transform.
    pub(crate) wrappers: HashMap<ShTransformHandle, ShTransformHandle>,
    pub(crate) geom_group: ShGeometryGroupHandle,
}

impl InternalData {
    /// Self transform plus every wrapper: the delta sent to a new parent.
    pub(crate) fn all_transforms(&self) -> Vec<ShTransformHandle> {
        let mut all = vec![self.self_transform];
        all.extend(self.wrappers.values().copied());
        all
    }
}

/// Leaf geometry holder: one shared vertex buffer, one geometry instance per
/// material group.
pub struct SurfaceData {
    pub(crate) name: String,
    pub(crate) parents: Vec<ParentRef>,
    pub(crate) vertex_buffer: Option<BufferHandle>,
    pub(crate) num_vertices: u32,
    pub(crate) groups: Vec<ShGeometryInstanceHandle>,
}
