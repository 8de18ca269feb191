//! Scene graph and its shallow-hierarchy synchronization protocol.
//!
//! Callers edit a DAG of internal nodes (transforms) and surface nodes
//! (geometry). Every edit propagates a structural event up all parent paths,
//! keeping the flat SH mirror and the engine acceleration hierarchy exactly
//! in sync. A transform enters the top acceleration group only while it has
//! a geometry descendant; purely structural chains are composed into their
//! top-level transform's cached matrix instead of becoming accel nodes.

mod camera;
mod node;
mod sh;

pub use camera::{Camera, CameraDescriptor};
pub use node::{NodeHandle, ParentRef};
pub use sh::ShGeometryInstance;

use std::collections::HashMap;

use tracing::debug;

use crate::arena::Arena;
use crate::backend::{AccelChild, AccelHandle, ExecutionEngine};
use crate::descriptors::Vertex;
use crate::error::{Error, Result, SlotIndex};
use crate::geometry::StaticTransform;
use crate::materials::{MaterialGraph, MaterialKind, SurfaceMaterialHandle};

use node::{InternalData, Node, NodeData, SurfaceData};
use sh::{
    ShGeometryGroup, ShGeometryGroupHandle, ShGeometryInstanceHandle, ShGroup, ShTransform,
    ShTransformHandle,
};

enum ChildDelta {
    Transforms(Vec<ShTransformHandle>),
    Geometry(Vec<ShGeometryInstanceHandle>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeEvent {
    TransformAdded,
    TransformRemoved,
    TransformUpdated,
    GeometryAdded,
    GeometryRemoved,
}

/// The root node's fields, owned by the scene directly.
struct RootNode {
    transform: StaticTransform,
    children: Vec<NodeHandle>,
    self_transform: ShTransformHandle,
    wrappers: HashMap<ShTransformHandle, ShTransformHandle>,
    geom_group: ShGeometryGroupHandle,
}

pub struct Scene {
    nodes: Arena<Node>,
    sh_transforms: Arena<ShTransform>,
    sh_geom_groups: Arena<ShGeometryGroup>,
    sh_geom_instances: Arena<ShGeometryInstance>,
    sh_group: ShGroup,
    root: RootNode,
    environment: Option<(SurfaceMaterialHandle, SlotIndex)>,
}

impl Scene {
    pub fn new(engine: &mut dyn ExecutionEngine, transform: StaticTransform) -> Self {
        let mut sh_transforms = Arena::new();
        let mut sh_geom_groups = Arena::new();

        let group_accel = engine.create_accel_group();
        let geom_group = sh_geom_groups.insert(ShGeometryGroup {
            accel: engine.create_accel_group(),
            instances: Vec::new(),
        });
        let instance = engine.create_instance();
        engine.set_instance_transform(
            instance,
            transform.forward().to_array(),
            transform.inverse().to_array(),
        );
        let self_transform = sh_transforms.insert(ShTransform {
            name: "Root".to_string(),
            local: transform,
            child_transform: None,
            child_geometry: None,
            instance,
            world: transform,
            path_name: "Root".to_string(),
        });

        let mut sh_group = ShGroup {
            accel: group_accel,
            transforms: HashMap::new(),
            num_valid: 0,
        };
        // no geometry beneath it yet, so it is registered but not included
        sh_group.transforms.insert(self_transform, false);

        debug!("create scene");
        Scene {
            nodes: Arena::new(),
            sh_transforms,
            sh_geom_groups,
            sh_geom_instances: Arena::new(),
            sh_group,
            root: RootNode {
                transform,
                children: Vec::new(),
                self_transform,
                wrappers: HashMap::new(),
                geom_group,
            },
            environment: None,
        }
    }

    // ---- node construction ----

    pub fn create_internal_node(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        name: &str,
        transform: StaticTransform,
    ) -> Result<NodeHandle> {
        let geom_group = self.sh_geom_groups.insert(ShGeometryGroup {
            accel: engine.create_accel_group(),
            instances: Vec::new(),
        });
        let self_transform =
            self.create_sh_transform(engine, name.to_string(), transform, None)?;
        debug!(name, "create internal node");
        Ok(self.nodes.insert(Node {
            data: NodeData::Internal(InternalData {
                name: name.to_string(),
                transform,
                children: Vec::new(),
                parents: Vec::new(),
                self_transform,
                wrappers: HashMap::new(),
                geom_group,
            }),
        }))
    }

    pub fn create_surface_node(&mut self, name: &str) -> NodeHandle {
        debug!(name, "create surface node");
        self.nodes.insert(Node {
            data: NodeData::Surface(SurfaceData {
                name: name.to_string(),
                parents: Vec::new(),
                vertex_buffer: None,
                num_vertices: 0,
                groups: Vec::new(),
            }),
        })
    }

    /// Destroys a node. Fails while any parent edge is still live; an
    /// internal node's own children are unlinked first.
    pub fn destroy_node(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        node: NodeHandle,
    ) -> Result<()> {
        let num_parents = self.nodes.get(node)?.data.parents().len();
        if num_parents > 0 {
            return Err(Error::DanglingReference {
                referrers: num_parents,
            });
        }
        if let NodeData::Internal(d) = &self.nodes.get(node)?.data {
            let children = d.children.clone();
            for child in children {
                self.remove_child(engine, ParentRef::Node(node), child)?;
            }
        }
        match self.nodes.remove(node)?.data {
            NodeData::Internal(d) => {
                self.destroy_sh_transform(engine, d.self_transform)?;
                let group = self.sh_geom_groups.remove(d.geom_group)?;
                engine.destroy_accel_group(group.accel);
            }
            NodeData::Surface(d) => {
                for group in d.groups {
                    let inst = self.sh_geom_instances.remove(group)?;
                    engine.destroy_geometry(inst.geometry);
                    engine.destroy_buffer(inst.index_buffer);
                }
                if let Some(vb) = d.vertex_buffer {
                    engine.destroy_buffer(vb);
                }
            }
        }
        Ok(())
    }

    // ---- hierarchy edits ----

    pub fn add_child(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        parent: ParentRef,
        child: NodeHandle,
    ) -> Result<()> {
        {
            let children = self.children_mut(parent)?;
            if children.contains(&child) {
                return Err(Error::AlreadyAChild);
            }
            children.push(child);
        }
        let delta = match &mut self.nodes.get_mut(child)?.data {
            NodeData::Internal(d) => {
                d.parents.push(parent);
                ChildDelta::Transforms(d.all_transforms())
            }
            NodeData::Surface(d) => {
                d.parents.push(parent);
                ChildDelta::Geometry(d.groups.clone())
            }
        };
        match delta {
            ChildDelta::Transforms(delta) => {
                self.propagate_transforms(engine, parent, NodeEvent::TransformAdded, &delta)
            }
            ChildDelta::Geometry(delta) => {
                self.propagate_geometry(engine, parent, NodeEvent::GeometryAdded, &delta)
            }
        }
    }

    pub fn remove_child(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        parent: ParentRef,
        child: NodeHandle,
    ) -> Result<()> {
        {
            let children = self.children_mut(parent)?;
            let position = children
                .iter()
                .position(|c| *c == child)
                .ok_or(Error::NotAChild)?;
            children.remove(position);
        }
        let delta = {
            let data = &mut self.nodes.get_mut(child)?.data;
            let position = data
                .parents()
                .iter()
                .position(|p| *p == parent)
                .ok_or(Error::NotAChild)?;
            data.parents_mut().remove(position);
            match data {
                NodeData::Internal(d) => ChildDelta::Transforms(d.all_transforms()),
                NodeData::Surface(d) => ChildDelta::Geometry(d.groups.clone()),
            }
        };
        match delta {
            ChildDelta::Transforms(delta) => {
                self.propagate_transforms(engine, parent, NodeEvent::TransformRemoved, &delta)
            }
            ChildDelta::Geometry(delta) => {
                self.propagate_geometry(engine, parent, NodeEvent::GeometryRemoved, &delta)
            }
        }
    }

    /// Replaces an internal node's local transform and re-resolves every
    /// path passing through it.
    pub fn set_transform(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        node: NodeHandle,
        transform: StaticTransform,
    ) -> Result<()> {
        let (owned, parents) = {
            let d = self.internal_mut(node)?;
            d.transform = transform;
            (d.all_transforms(), d.parents.clone())
        };
        for &sh in &owned {
            self.sh_transforms.get_mut(sh)?.local = transform;
            self.resolve_transform(engine, sh)?;
        }
        for parent in parents {
            self.propagate_transforms(engine, parent, NodeEvent::TransformUpdated, &owned)?;
        }
        Ok(())
    }

    // ---- surface-node geometry ----

    /// Uploads the shared vertex buffer of a surface node.
    pub fn set_vertices(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        node: NodeHandle,
        vertices: &[Vertex],
    ) -> Result<()> {
        let buffer = engine.create_buffer(std::mem::size_of::<Vertex>(), vertices.len() as u32);
        engine.write_buffer(buffer, 0, bytemuck::cast_slice(vertices));
        let d = self.surface_mut(node)?;
        if let Some(old) = d.vertex_buffer.replace(buffer) {
            engine.destroy_buffer(old);
        }
        d.num_vertices = vertices.len() as u32;
        Ok(())
    }

    /// Adds one material group: uploads its index buffer, creates the engine
    /// geometry and fans the new instance out to every current parent.
    pub fn add_material_group(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        materials: &MaterialGraph,
        node: NodeHandle,
        indices: &[u32],
        material: SurfaceMaterialHandle,
    ) -> Result<()> {
        let material_slot = materials.slot_index(material)?;
        let (vertex_buffer, parents) = {
            let d = self.surface_mut(node)?;
            let vb = d.vertex_buffer.ok_or(Error::NoVertexBuffer)?;
            (vb, d.parents.clone())
        };

        let index_buffer =
            engine.create_buffer(std::mem::size_of::<u32>(), indices.len() as u32);
        engine.write_buffer(index_buffer, 0, bytemuck::cast_slice(indices));
        let geometry = engine.create_geometry(vertex_buffer, index_buffer, material_slot);

        let instance = self.sh_geom_instances.insert(ShGeometryInstance {
            geometry,
            index_buffer,
            material_slot,
            num_triangles: indices.len() as u32 / 3,
        });
        self.surface_mut(node)?.groups.push(instance);

        for parent in parents {
            self.propagate_geometry(engine, parent, NodeEvent::GeometryAdded, &[instance])?;
        }
        Ok(())
    }

    // ---- environment light ----

    /// Attaches an environment-emitter material as the scene's distant
    /// light, or detaches it with `None`. Only `EnvironmentEmitter`
    /// materials are accepted.
    pub fn set_environment(
        &mut self,
        materials: &MaterialGraph,
        material: Option<SurfaceMaterialHandle>,
    ) -> Result<()> {
        self.environment = match material {
            Some(handle) => {
                let mat = materials.get(handle)?;
                if mat.data().kind() != MaterialKind::EnvironmentEmitter {
                    return Err(Error::WrongNodeKind {
                        actual: mat.data().kind().name(),
                    });
                }
                debug!(slot = mat.slot(), "set environment");
                Some((handle, mat.slot()))
            }
            None => None,
        };
        Ok(())
    }

    pub fn environment(&self) -> Option<SurfaceMaterialHandle> {
        self.environment.map(|(handle, _)| handle)
    }

    /// Material-descriptor index of the attached environment light, for the
    /// launch parameters.
    pub fn environment_slot(&self) -> Option<SlotIndex> {
        self.environment.map(|(_, slot)| slot)
    }

    // ---- queries ----

    /// The engine accel group handed to `launch`.
    pub fn top_group(&self) -> AccelHandle {
        self.sh_group.accel
    }

    /// Transforms currently included in the top accel group.
    pub fn num_included_transforms(&self) -> u32 {
        self.sh_group.num_valid
    }

    /// Resolved (path name, world transform) pairs of every live SH
    /// transform, for diagnostics and tests.
    pub fn resolved_paths(&self) -> Vec<(String, StaticTransform)> {
        self.sh_transforms
            .iter()
            .map(|(_, t)| (t.path_name.clone(), t.world))
            .collect()
    }

    /// Path names of the transforms currently in the top accel group.
    pub fn included_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .sh_group
            .transforms
            .iter()
            .filter(|(_, included)| **included)
            .filter_map(|(h, _)| self.sh_transforms.get(*h).ok())
            .map(|t| t.path_name.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Geometry instances of a surface node, in material-group order.
    pub fn material_groups(&self, node: NodeHandle) -> Result<Vec<&ShGeometryInstance>> {
        match &self.nodes.get(node)?.data {
            NodeData::Surface(d) => d
                .groups
                .iter()
                .map(|g| self.sh_geom_instances.get(*g))
                .collect(),
            data => Err(Error::WrongNodeKind {
                actual: data.kind_name(),
            }),
        }
    }

    // ---- internals ----

    fn internal_mut(&mut self, node: NodeHandle) -> Result<&mut InternalData> {
        match &mut self.nodes.get_mut(node)?.data {
            NodeData::Internal(d) => Ok(d),
            data => Err(Error::WrongNodeKind {
                actual: data.kind_name(),
            }),
        }
    }

    fn internal(&self, node: NodeHandle) -> Result<&InternalData> {
        match &self.nodes.get(node)?.data {
            NodeData::Internal(d) => Ok(d),
            data => Err(Error::WrongNodeKind {
                actual: data.kind_name(),
            }),
        }
    }

    fn surface_mut(&mut self, node: NodeHandle) -> Result<&mut SurfaceData> {
        match &mut self.nodes.get_mut(node)?.data {
            NodeData::Surface(d) => Ok(d),
            data => Err(Error::WrongNodeKind {
                actual: data.kind_name(),
            }),
        }
    }

    fn children_mut(&mut self, parent: ParentRef) -> Result<&mut Vec<NodeHandle>> {
        match parent {
            ParentRef::Root => Ok(&mut self.root.children),
            ParentRef::Node(h) => Ok(&mut self.internal_mut(h)?.children),
        }
    }

    fn create_sh_transform(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        name: String,
        local: StaticTransform,
        child: Option<ShTransformHandle>,
    ) -> Result<ShTransformHandle> {
        let instance = engine.create_instance();
        let handle = self.sh_transforms.insert(ShTransform {
            name,
            local,
            child_transform: child,
            child_geometry: None,
            instance,
            world: StaticTransform::identity(),
            path_name: String::new(),
        });
        self.resolve_transform(engine, handle)?;
        Ok(handle)
    }

    fn destroy_sh_transform(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        handle: ShTransformHandle,
    ) -> Result<()> {
        let t = self.sh_transforms.remove(handle)?;
        engine.destroy_instance(t.instance);
        Ok(())
    }

    /// Walks the child-is-transform chain, composes the world matrix
    /// root-to-leaf and pushes matrix plus inverse to the engine instance.
    fn resolve_transform(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        handle: ShTransformHandle,
    ) -> Result<()> {
        let mut chain = Vec::new();
        let mut next = self.sh_transforms.get(handle)?.child_transform;
        while let Some(t) = next {
            chain.push(t);
            next = self.sh_transforms.get(t)?.child_transform;
        }

        let head = self.sh_transforms.get(handle)?;
        let mut world = head.local;
        let mut path_name = head.name.clone();
        for t in &chain {
            let link = self.sh_transforms.get(*t)?;
            world = world.compose(&link.local);
            path_name.push('-');
            path_name.push_str(&link.name);
        }

        let t = self.sh_transforms.get_mut(handle)?;
        t.world = world;
        t.path_name = path_name;
        engine.set_instance_transform(
            t.instance,
            world.forward().to_array(),
            world.inverse().to_array(),
        );
        Ok(())
    }

    /// First geometry group found walking the chain downward, if any.
    fn geometry_descendant(
        &self,
        handle: ShTransformHandle,
    ) -> Result<Option<ShGeometryGroupHandle>> {
        let mut current = handle;
        loop {
            let t = self.sh_transforms.get(current)?;
            match (t.child_transform, t.child_geometry) {
                (Some(next), _) => current = next,
                (None, Some(group)) => return Ok(Some(group)),
                (None, None) => return Ok(None),
            }
        }
    }

    // ---- top group maintenance ----

    fn sh_group_add(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        transform: ShTransformHandle,
    ) -> Result<()> {
        let descendant = self.geometry_descendant(transform)?;
        self.sh_group.transforms.insert(transform, descendant.is_some());
        if let Some(group) = descendant {
            let accel = self.sh_geom_groups.get(group)?.accel;
            let instance = self.sh_transforms.get(transform)?.instance;
            engine.set_instance_child(instance, Some(accel));
            engine.accel_add_child(self.sh_group.accel, AccelChild::Instance(instance));
            engine.mark_dirty(self.sh_group.accel);
            self.sh_group.num_valid += 1;
        }
        Ok(())
    }

    fn sh_group_remove(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        transform: ShTransformHandle,
    ) -> Result<()> {
        let included = self
            .sh_group
            .transforms
            .remove(&transform)
            .ok_or(Error::NotAChild)?;
        if included {
            let instance = self.sh_transforms.get(transform)?.instance;
            engine.accel_remove_child(self.sh_group.accel, AccelChild::Instance(instance));
            engine.mark_dirty(self.sh_group.accel);
            self.sh_group.num_valid -= 1;
        }
        Ok(())
    }

    /// Flips accel inclusion when the geometry-descendant predicate changed;
    /// the accel is only dirtied on an actual flip.
    fn sh_group_update(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        transform: ShTransformHandle,
    ) -> Result<()> {
        let included = *self
            .sh_group
            .transforms
            .get(&transform)
            .ok_or(Error::NotAChild)?;
        let descendant = self.geometry_descendant(transform)?;
        let instance = self.sh_transforms.get(transform)?.instance;
        match (included, descendant) {
            (true, None) => {
                engine.set_instance_child(instance, None);
                engine.accel_remove_child(self.sh_group.accel, AccelChild::Instance(instance));
                engine.mark_dirty(self.sh_group.accel);
                self.sh_group.transforms.insert(transform, false);
                self.sh_group.num_valid -= 1;
            }
            (false, Some(group)) => {
                let accel = self.sh_geom_groups.get(group)?.accel;
                engine.set_instance_child(instance, Some(accel));
                engine.accel_add_child(self.sh_group.accel, AccelChild::Instance(instance));
                engine.mark_dirty(self.sh_group.accel);
                self.sh_group.transforms.insert(transform, true);
                self.sh_group.num_valid += 1;
            }
            _ => {}
        }
        Ok(())
    }

    // ---- geometry group maintenance ----

    fn geom_group_add(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        group: ShGeometryGroupHandle,
        instance: ShGeometryInstanceHandle,
    ) -> Result<()> {
        let geometry = self.sh_geom_instances.get(instance)?.geometry;
        let g = self.sh_geom_groups.get_mut(group)?;
        g.instances.push(instance);
        engine.accel_add_child(g.accel, AccelChild::Geometry(geometry));
        engine.mark_dirty(g.accel);
        Ok(())
    }

    fn geom_group_remove(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        group: ShGeometryGroupHandle,
        instance: ShGeometryInstanceHandle,
    ) -> Result<()> {
        let geometry = self.sh_geom_instances.get(instance)?.geometry;
        let g = self.sh_geom_groups.get_mut(group)?;
        let position = g
            .instances
            .iter()
            .position(|i| *i == instance)
            .ok_or(Error::NotAChild)?;
        g.instances.remove(position);
        engine.accel_remove_child(g.accel, AccelChild::Geometry(geometry));
        engine.mark_dirty(g.accel);
        Ok(())
    }

    // ---- event propagation ----

    fn propagate_transforms(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        target: ParentRef,
        event: NodeEvent,
        delta: &[ShTransformHandle],
    ) -> Result<()> {
        match target {
            ParentRef::Root => self.root_transform_event(engine, event, delta),
            ParentRef::Node(node) => self.internal_transform_event(engine, node, event, delta),
        }
    }

    fn internal_transform_event(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        node: NodeHandle,
        event: NodeEvent,
        delta: &[ShTransformHandle],
    ) -> Result<()> {
        match event {
            NodeEvent::TransformAdded => {
                // wrap each new child path with this node's own transform
                let (name, local) = {
                    let d = self.internal(node)?;
                    (d.name.clone(), d.transform)
                };
                let mut own_delta = Vec::with_capacity(delta.len());
                for &child in delta {
                    let wrapper =
                        self.create_sh_transform(engine, name.clone(), local, Some(child))?;
                    self.internal_mut(node)?.wrappers.insert(child, wrapper);
                    own_delta.push(wrapper);
                }
                let parents = self.internal(node)?.parents.clone();
                for parent in parents {
                    self.propagate_transforms(engine, parent, event, &own_delta)?;
                }
            }
            NodeEvent::TransformRemoved => {
                let mut own_delta = Vec::with_capacity(delta.len());
                for &child in delta {
                    let wrapper = self
                        .internal_mut(node)?
                        .wrappers
                        .remove(&child)
                        .ok_or(Error::NotAChild)?;
                    own_delta.push(wrapper);
                }
                let parents = self.internal(node)?.parents.clone();
                for parent in parents {
                    self.propagate_transforms(engine, parent, event, &own_delta)?;
                }
                // ancestors have already dropped their references
                for wrapper in own_delta {
                    self.destroy_sh_transform(engine, wrapper)?;
                }
            }
            NodeEvent::TransformUpdated => {
                let mut own_delta = Vec::with_capacity(delta.len());
                for &child in delta {
                    let wrapper = *self
                        .internal(node)?
                        .wrappers
                        .get(&child)
                        .ok_or(Error::NotAChild)?;
                    self.resolve_transform(engine, wrapper)?;
                    own_delta.push(wrapper);
                }
                let parents = self.internal(node)?.parents.clone();
                for parent in parents {
                    self.propagate_transforms(engine, parent, event, &own_delta)?;
                }
            }
            NodeEvent::GeometryAdded | NodeEvent::GeometryRemoved => {
                // pure relay: map child transforms to own wrappers
                let mut own_delta = Vec::with_capacity(delta.len());
                for &child in delta {
                    let wrapper = *self
                        .internal(node)?
                        .wrappers
                        .get(&child)
                        .ok_or(Error::NotAChild)?;
                    own_delta.push(wrapper);
                }
                let parents = self.internal(node)?.parents.clone();
                for parent in parents {
                    self.propagate_transforms(engine, parent, event, &own_delta)?;
                }
            }
        }
        Ok(())
    }

    fn root_transform_event(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        event: NodeEvent,
        delta: &[ShTransformHandle],
    ) -> Result<()> {
        match event {
            NodeEvent::TransformAdded => {
                let local = self.root.transform;
                for &child in delta {
                    let wrapper =
                        self.create_sh_transform(engine, "Root".to_string(), local, Some(child))?;
                    self.root.wrappers.insert(child, wrapper);
                    self.sh_group_add(engine, wrapper)?;
                }
            }
            NodeEvent::TransformRemoved => {
                for &child in delta {
                    let wrapper = self
                        .root
                        .wrappers
                        .remove(&child)
                        .ok_or(Error::NotAChild)?;
                    self.sh_group_remove(engine, wrapper)?;
                    self.destroy_sh_transform(engine, wrapper)?;
                }
            }
            NodeEvent::TransformUpdated => {
                for &child in delta {
                    let wrapper = *self.root.wrappers.get(&child).ok_or(Error::NotAChild)?;
                    self.resolve_transform(engine, wrapper)?;
                }
            }
            NodeEvent::GeometryAdded | NodeEvent::GeometryRemoved => {
                for &child in delta {
                    let wrapper = *self.root.wrappers.get(&child).ok_or(Error::NotAChild)?;
                    self.sh_group_update(engine, wrapper)?;
                }
            }
        }
        Ok(())
    }

    fn propagate_geometry(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        target: ParentRef,
        event: NodeEvent,
        delta: &[ShGeometryInstanceHandle],
    ) -> Result<()> {
        match target {
            ParentRef::Node(node) => {
                let group = self.internal(node)?.geom_group;
                match event {
                    NodeEvent::GeometryAdded => {
                        for &instance in delta {
                            self.geom_group_add(engine, group, instance)?;
                        }
                        if !self.sh_geom_groups.get(group)?.instances.is_empty() {
                            let (self_transform, parents) = {
                                let d = self.internal(node)?;
                                (d.self_transform, d.parents.clone())
                            };
                            self.sh_transforms.get_mut(self_transform)?.child_geometry =
                                Some(group);
                            for parent in parents {
                                self.propagate_transforms(
                                    engine,
                                    parent,
                                    event,
                                    &[self_transform],
                                )?;
                            }
                        }
                    }
                    NodeEvent::GeometryRemoved => {
                        for &instance in delta {
                            self.geom_group_remove(engine, group, instance)?;
                        }
                        if self.sh_geom_groups.get(group)?.instances.is_empty() {
                            let (self_transform, parents) = {
                                let d = self.internal(node)?;
                                (d.self_transform, d.parents.clone())
                            };
                            self.sh_transforms.get_mut(self_transform)?.child_geometry = None;
                            for parent in parents {
                                self.propagate_transforms(
                                    engine,
                                    parent,
                                    event,
                                    &[self_transform],
                                )?;
                            }
                        }
                    }
                    _ => unreachable!("geometry deltas carry geometry events only"),
                }
            }
            ParentRef::Root => {
                let group = self.root.geom_group;
                match event {
                    NodeEvent::GeometryAdded => {
                        for &instance in delta {
                            self.geom_group_add(engine, group, instance)?;
                        }
                        if !self.sh_geom_groups.get(group)?.instances.is_empty() {
                            let self_transform = self.root.self_transform;
                            self.sh_transforms.get_mut(self_transform)?.child_geometry =
                                Some(group);
                            self.sh_group_update(engine, self_transform)?;
                        }
                    }
                    NodeEvent::GeometryRemoved => {
                        for &instance in delta {
                            self.geom_group_remove(engine, group, instance)?;
                        }
                        if self.sh_geom_groups.get(group)?.instances.is_empty() {
                            let self_transform = self.root.self_transform;
                            self.sh_transforms.get_mut(self_transform)?.child_geometry = None;
                            self.sh_group_update(engine, self_transform)?;
                        }
                    }
                    _ => unreachable!("geometry deltas carry geometry events only"),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostEngine;
    use crate::geometry::Vec3;

    fn translation(x: f32) -> StaticTransform {
        StaticTransform::translate(Vec3(x, 0.0, 0.0))
    }

    #[test]
    fn wrapping_composes_root_to_leaf() {
        let mut engine = HostEngine::new();
        let mut scene = Scene::new(&mut engine, StaticTransform::identity());
        let a = scene
            .create_internal_node(&mut engine, "A", translation(1.0))
            .unwrap();
        let b = scene
            .create_internal_node(&mut engine, "B", translation(2.0))
            .unwrap();
        scene.add_child(&mut engine, ParentRef::Node(a), b).unwrap();
        scene.add_child(&mut engine, ParentRef::Root, a).unwrap();

        let paths = scene.resolved_paths();
        let world = |name: &str| {
            paths
                .iter()
                .find(|(p, _)| p == name)
                .map(|(_, w)| *w)
                .unwrap()
        };
        assert_eq!(
            world("Root-A-B").apply_point(Vec3(0.0, 0.0, 0.0)),
            Vec3(3.0, 0.0, 0.0)
        );
        assert_eq!(
            world("Root-A").apply_point(Vec3(0.0, 0.0, 0.0)),
            Vec3(1.0, 0.0, 0.0)
        );
    }

    #[test]
    fn remove_child_tears_down_wrappers() {
        let mut engine = HostEngine::new();
        let mut scene = Scene::new(&mut engine, StaticTransform::identity());
        let a = scene
            .create_internal_node(&mut engine, "A", translation(1.0))
            .unwrap();
        scene.add_child(&mut engine, ParentRef::Root, a).unwrap();
        assert_eq!(scene.sh_transforms.len(), 3); // root self, A self, Root-A

        scene.remove_child(&mut engine, ParentRef::Root, a).unwrap();
        assert_eq!(scene.sh_transforms.len(), 2);
        assert_eq!(
            scene.remove_child(&mut engine, ParentRef::Root, a),
            Err(Error::NotAChild)
        );
    }

    #[test]
    fn destroy_node_with_live_parent_fails() {
        let mut engine = HostEngine::new();
        let mut scene = Scene::new(&mut engine, StaticTransform::identity());
        let a = scene
            .create_internal_node(&mut engine, "A", translation(1.0))
            .unwrap();
        scene.add_child(&mut engine, ParentRef::Root, a).unwrap();

        assert_eq!(
            scene.destroy_node(&mut engine, a),
            Err(Error::DanglingReference { referrers: 1 })
        );
        scene.remove_child(&mut engine, ParentRef::Root, a).unwrap();
        scene.destroy_node(&mut engine, a).unwrap();
    }
}
