//! GPU-visible record types and the stores that hold them.
//!
//! Every record here is `Pod`: fixed layout, no pointers, indices only. The
//! host keeps a shadow copy of each table so mutation is read-modify-write
//! without a device round trip.

use bytemuck::{Pod, Zeroable};

use crate::backend::{BufferHandle, ExecutionEngine, ProcedureId};
use crate::geometry::{Vec2, Vec3};

/// Sentinel for "socket not connected" in descriptor records.
pub const INVALID_NODE_INDEX: u32 = 0xFFFF_FFFF;

/// Shader-node record: a procedure-set index plus an opaque per-kind payload
/// of node indices and f32 bit patterns.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct NodeDescriptor {
    pub proc_set_index: u32,
    pub data: [u32; 15],
}

impl NodeDescriptor {
    pub fn new(proc_set_index: u32) -> Self {
        NodeDescriptor {
            proc_set_index,
            data: [0; 15],
        }
    }
}

/// Surface-material record. The first four words are the procedure head
/// (BSDF setup id, BSDF proc-set index, EDF setup id, EDF proc-set index);
/// the rest is the variant body, with sub-material records inlined for
/// multi-materials.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct SurfaceMaterialDescriptor {
    pub data: [u32; 32],
}

impl SurfaceMaterialDescriptor {
    pub const NUM_WORDS: usize = 32;

    pub fn zeroed() -> Self {
        SurfaceMaterialDescriptor { data: [0; 32] }
    }
}

/// Per-node-kind kernel entry points, one per producible socket value type.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct NodeProcedureSet {
    pub prog_float: ProcedureId,
    pub prog_float2: ProcedureId,
    pub prog_float3: ProcedureId,
    pub prog_float4: ProcedureId,
    pub prog_spectrum: ProcedureId,
    pub prog_tex_coord: ProcedureId,
}

/// Kernel entry points for one BSDF implementation.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BsdfProcedureSet {
    pub prog_get_base_color: ProcedureId,
    pub prog_matches: ProcedureId,
    pub prog_sample: ProcedureId,
    pub prog_evaluate: ProcedureId,
    pub prog_evaluate_pdf: ProcedureId,
    pub prog_weight: ProcedureId,
}

/// Kernel entry points for one EDF implementation.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct EdfProcedureSet {
    pub prog_evaluate_emittance: ProcedureId,
    pub prog_evaluate: ProcedureId,
}

/// Triangle-mesh vertex, uploaded verbatim to the engine vertex buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tangent: Vec3,
    pub tex_coord: Vec2,
}

/// One descriptor table: host shadow vector paired with an engine buffer.
///
/// Index allocation lives in the matching `SlotTable`; the store itself does
/// not police whether an index is allocated.
pub struct DescriptorStore<T: Pod> {
    shadow: Vec<T>,
    buffer: BufferHandle,
}

impl<T: Pod> DescriptorStore<T> {
    pub fn new(engine: &mut dyn ExecutionEngine, capacity: u32) -> Self {
        DescriptorStore {
            shadow: vec![T::zeroed(); capacity as usize],
            buffer: engine.create_buffer(std::mem::size_of::<T>(), capacity),
        }
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    /// Overwrites both the host shadow and the engine copy.
    pub fn write(&mut self, engine: &mut dyn ExecutionEngine, index: u32, record: &T) {
        self.shadow[index as usize] = *record;
        engine.write_buffer(
            self.buffer,
            index as usize * std::mem::size_of::<T>(),
            bytemuck::bytes_of(record),
        );
    }

    pub fn read(&self, index: u32) -> T {
        self.shadow[index as usize]
    }

    pub fn destroy(self, engine: &mut dyn ExecutionEngine) {
        engine.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostEngine;
    use crate::scene::CameraDescriptor;

    #[test]
    fn write_reaches_shadow_and_engine() {
        let mut engine = HostEngine::new();
        let mut store: DescriptorStore<NodeDescriptor> = DescriptorStore::new(&mut engine, 4);

        let mut desc = NodeDescriptor::new(7);
        desc.data[0] = INVALID_NODE_INDEX;
        desc.data[1] = 0.5f32.to_bits();
        store.write(&mut engine, 2, &desc);

        assert_eq!(store.read(2), desc);
        let bytes = engine.read_buffer(store.buffer());
        let records: &[NodeDescriptor] = bytemuck::cast_slice(&bytes);
        assert_eq!(records[2], desc);
        assert_eq!(records[1], NodeDescriptor::zeroed());
    }

    #[test]
    fn material_and_camera_records_reach_engine_bytes() {
        let mut engine = HostEngine::new();

        let mut mat_store: DescriptorStore<SurfaceMaterialDescriptor> =
            DescriptorStore::new(&mut engine, 4);
        let mut mat = SurfaceMaterialDescriptor::zeroed();
        mat.data[0] = 3;
        mat.data[4] = INVALID_NODE_INDEX;
        mat.data[5] = 0.7f32.to_bits();
        mat_store.write(&mut engine, 1, &mat);

        let bytes = engine.read_buffer(mat_store.buffer());
        let records: &[SurfaceMaterialDescriptor] = bytemuck::cast_slice(&bytes);
        assert_eq!(records[1], mat);
        assert_eq!(records[0], SurfaceMaterialDescriptor::zeroed());

        let mut cam_store: DescriptorStore<CameraDescriptor> = DescriptorStore::new(&mut engine, 1);
        let cam = CameraDescriptor {
            position: Vec3(0.0, 1.5, 6.0),
            orientation: [1.0, 0.0, 0.0, 0.0],
            aspect: 16.0 / 9.0,
            fov_y: 0.7,
            lens_radius: 0.0,
            image_plane_distance: 1.0,
            object_plane_distance: 1.0,
            prog_sample_lens_position: 1,
            prog_sample_idf: 2,
        };
        cam_store.write(&mut engine, 0, &cam);

        let bytes = engine.read_buffer(cam_store.buffer());
        let records: &[CameraDescriptor] = bytemuck::cast_slice(&bytes);
        assert_eq!(records[0].position, cam.position);
        assert_eq!(records[0].aspect, cam.aspect);
        assert_eq!(records[0].prog_sample_idf, cam.prog_sample_idf);
    }

    #[test]
    fn record_sizes_match_kernel_layout() {
        assert_eq!(std::mem::size_of::<NodeDescriptor>(), 16 * 4);
        assert_eq!(std::mem::size_of::<SurfaceMaterialDescriptor>(), 32 * 4);
        assert_eq!(std::mem::size_of::<Vertex>(), 11 * 4);
    }
}
