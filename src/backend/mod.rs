//! Interface to the execution engine, the opaque compute backend that owns
//! acceleration structures and runs the path-tracing kernels.
//!
//! The scene layer only ever talks to the engine through this trait: flat
//! buffers for descriptor tables and geometry data, an instance/group object
//! model for the acceleration hierarchy, procedure loading for the dispatch
//! ids baked into descriptor records, and a blocking 2D launch.

mod host;

pub use host::{HostEngine, HostGeometry, HostInstance};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccelHandle(pub u32);

/// Engine-side transform node: composes a matrix over a single child group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeometryHandle(pub u32);

/// Integer id usable inside descriptor records as a dispatch key.
pub type ProcedureId = i32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccelChild {
    Instance(InstanceHandle),
    Geometry(GeometryHandle),
}

/// The descriptor tables the engine kernels dispatch on. Each is bound to
/// its backing buffer once, when the owning table pair is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorTable {
    NodeDescriptors,
    NodeProcedureSets,
    MaterialDescriptors,
    BsdfProcedureSets,
    EdfProcedureSets,
    Camera,
}

/// Per-launch parameters the engine kernels read.
#[derive(Clone, Copy, Debug)]
pub struct LaunchParams {
    pub top_group: AccelHandle,
    pub output_buffer: BufferHandle,
    pub rng_buffer: BufferHandle,
    /// Material-descriptor index of the environment light, if one is set.
    pub environment_slot: Option<u32>,
    pub width: u32,
    pub height: u32,
    /// 0-based accumulation frame; 0 means "overwrite, don't blend".
    pub accum_frame: u32,
}

pub trait ExecutionEngine {
    fn create_buffer(&mut self, element_size: usize, capacity: u32) -> BufferHandle;
    fn write_buffer(&mut self, buffer: BufferHandle, byte_offset: usize, bytes: &[u8]);
    fn read_buffer(&self, buffer: BufferHandle) -> Vec<u8>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Tells the engine which buffer backs a dispatch table.
    fn bind_table(&mut self, table: DescriptorTable, buffer: BufferHandle);

    fn create_accel_group(&mut self) -> AccelHandle;
    fn accel_add_child(&mut self, group: AccelHandle, child: AccelChild);
    fn accel_remove_child(&mut self, group: AccelHandle, child: AccelChild);
    fn mark_dirty(&mut self, group: AccelHandle);
    fn destroy_accel_group(&mut self, group: AccelHandle);

    fn create_instance(&mut self) -> InstanceHandle;
    fn set_instance_transform(&mut self, instance: InstanceHandle, forward: [f32; 16], inverse: [f32; 16]);
    fn set_instance_child(&mut self, instance: InstanceHandle, child: Option<AccelHandle>);
    fn destroy_instance(&mut self, instance: InstanceHandle);

    fn create_geometry(
        &mut self,
        vertex_buffer: BufferHandle,
        index_buffer: BufferHandle,
        material_index: u32,
    ) -> GeometryHandle;
    fn destroy_geometry(&mut self, geometry: GeometryHandle);

    fn load_procedure(&mut self, module: &str, entry_point: &str) -> ProcedureId;

    /// Synchronous render invocation over a width x height grid.
    fn launch(&mut self, params: &LaunchParams);
}
