//! Host-memory reference engine.
//!
//! Implements the full `ExecutionEngine` surface with plain vectors and hash
//! maps and records the structure it is handed (accel child sets, instance
//! transforms and links, launch log). It exists so the scene layer can be
//! exercised and inspected without a GPU; the integration tests assert accel
//! topology directly against it.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::{
    AccelChild, AccelHandle, BufferHandle, DescriptorTable, ExecutionEngine, GeometryHandle,
    InstanceHandle, LaunchParams, ProcedureId,
};

#[derive(Default)]
struct HostBuffer {
    element_size: usize,
    data: Vec<u8>,
}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct HostInstance {
    pub forward: [f32; 16],
    pub inverse: [f32; 16],
    pub child: Option<AccelHandle>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostGeometry {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub material_index: u32,
}

#[derive(Default)]
pub struct HostEngine {
    next_id: u32,
    buffers: HashMap<BufferHandle, HostBuffer>,
    groups: HashMap<AccelHandle, HashSet<AccelChild>>,
    instances: HashMap<InstanceHandle, HostInstance>,
    geometries: HashMap<GeometryHandle, HostGeometry>,
    dirty: HashSet<AccelHandle>,
    tables: HashMap<DescriptorTable, BufferHandle>,
    procedures: Vec<(String, String)>,
    launches: Vec<LaunchParams>,
}

impl HostEngine {
    pub fn new() -> Self {
        HostEngine::default()
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn group_children(&self, group: AccelHandle) -> &HashSet<AccelChild> {
        &self.groups[&group]
    }

    pub fn instance(&self, instance: InstanceHandle) -> HostInstance {
        self.instances[&instance]
    }

    pub fn geometry(&self, geometry: GeometryHandle) -> HostGeometry {
        self.geometries[&geometry]
    }

    pub fn table_binding(&self, table: DescriptorTable) -> Option<BufferHandle> {
        self.tables.get(&table).copied()
    }

    pub fn is_dirty(&self, group: AccelHandle) -> bool {
        self.dirty.contains(&group)
    }

    pub fn clear_dirty(&mut self, group: AccelHandle) {
        self.dirty.remove(&group);
    }

    pub fn num_launches(&self) -> usize {
        self.launches.len()
    }

    pub fn last_launch(&self) -> Option<&LaunchParams> {
        self.launches.last()
    }
}

impl ExecutionEngine for HostEngine {
    fn create_buffer(&mut self, element_size: usize, capacity: u32) -> BufferHandle {
        let handle = BufferHandle(self.next_id());
        self.buffers.insert(
            handle,
            HostBuffer {
                element_size,
                data: vec![0; element_size * capacity as usize],
            },
        );
        handle
    }

    fn write_buffer(&mut self, buffer: BufferHandle, byte_offset: usize, bytes: &[u8]) {
        let buf = self.buffers.get_mut(&buffer).expect("unknown buffer");
        debug_assert_eq!(byte_offset % buf.element_size, 0);
        buf.data[byte_offset..byte_offset + bytes.len()].copy_from_slice(bytes);
    }

    fn read_buffer(&self, buffer: BufferHandle) -> Vec<u8> {
        self.buffers[&buffer].data.clone()
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
    }

    fn bind_table(&mut self, table: DescriptorTable, buffer: BufferHandle) {
        debug!(?table, ?buffer, "bind descriptor table");
        self.tables.insert(table, buffer);
    }

    fn create_accel_group(&mut self) -> AccelHandle {
        let handle = AccelHandle(self.next_id());
        self.groups.insert(handle, HashSet::new());
        handle
    }

    fn accel_add_child(&mut self, group: AccelHandle, child: AccelChild) {
        self.groups.get_mut(&group).expect("unknown group").insert(child);
    }

    fn accel_remove_child(&mut self, group: AccelHandle, child: AccelChild) {
        let removed = self
            .groups
            .get_mut(&group)
            .expect("unknown group")
            .remove(&child);
        assert!(removed, "child {:?} was not in group {:?}", child, group);
    }

    fn mark_dirty(&mut self, group: AccelHandle) {
        self.dirty.insert(group);
    }

    fn destroy_accel_group(&mut self, group: AccelHandle) {
        self.groups.remove(&group);
        self.dirty.remove(&group);
    }

    fn create_instance(&mut self) -> InstanceHandle {
        let handle = InstanceHandle(self.next_id());
        self.instances.insert(handle, HostInstance::default());
        handle
    }

    fn set_instance_transform(
        &mut self,
        instance: InstanceHandle,
        forward: [f32; 16],
        inverse: [f32; 16],
    ) {
        let inst = self.instances.get_mut(&instance).expect("unknown instance");
        inst.forward = forward;
        inst.inverse = inverse;
    }

    fn set_instance_child(&mut self, instance: InstanceHandle, child: Option<AccelHandle>) {
        self.instances.get_mut(&instance).expect("unknown instance").child = child;
    }

    fn destroy_instance(&mut self, instance: InstanceHandle) {
        self.instances.remove(&instance);
    }

    fn create_geometry(
        &mut self,
        vertex_buffer: BufferHandle,
        index_buffer: BufferHandle,
        material_index: u32,
    ) -> GeometryHandle {
        let handle = GeometryHandle(self.next_id());
        self.geometries.insert(
            handle,
            HostGeometry {
                vertex_buffer,
                index_buffer,
                material_index,
            },
        );
        handle
    }

    fn destroy_geometry(&mut self, geometry: GeometryHandle) {
        self.geometries.remove(&geometry);
    }

    fn load_procedure(&mut self, module: &str, entry_point: &str) -> ProcedureId {
        self.procedures.push((module.to_string(), entry_point.to_string()));
        self.procedures.len() as ProcedureId
    }

    fn launch(&mut self, params: &LaunchParams) {
        debug!(
            width = params.width,
            height = params.height,
            accum_frame = params.accum_frame,
            "host engine launch"
        );
        // no kernels here; the reference engine only records the invocation
        self.dirty.remove(&params.top_group);
        self.launches.push(*params);
    }
}
