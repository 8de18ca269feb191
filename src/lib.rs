//! Host-side scene management for a GPU path tracer.
//!
//! Callers build a scene graph out of ordinary objects (transform nodes,
//! meshes, materials, shader-node graphs) and this crate keeps a compact
//! engine-resident mirror of it current: index-addressed descriptor tables,
//! an acceleration hierarchy, procedure tables. Every graph edit is pushed
//! synchronously; render time is pure lookup.

mod arena;
mod backend;
mod context;
mod descriptors;
mod error;
mod geometry;
mod image;
mod materials;
mod scene;
mod shader_nodes;
mod slot;
mod spectrum;

pub use arena::{Arena, Handle};
pub use backend::{
    AccelChild, AccelHandle, BufferHandle, DescriptorTable, ExecutionEngine, GeometryHandle,
    HostEngine, HostGeometry, HostInstance, InstanceHandle, LaunchParams, ProcedureId,
};
pub use context::{Capacities, Context};
pub use descriptors::{
    BsdfProcedureSet, DescriptorStore, EdfProcedureSet, NodeDescriptor, NodeProcedureSet,
    SurfaceMaterialDescriptor, Vertex, INVALID_NODE_INDEX,
};
pub use error::{Error, Result, SlotIndex};
pub use geometry::{Matrix4x4, Quaternion, StaticTransform, Vec2, Vec3, Vec4};
pub use image::{ImageFormat, LinearImage2D};
pub use materials::{
    FloatInput, MaterialGraph, MaterialKind, SpectrumInput, SurfaceMaterialData,
    SurfaceMaterialHandle, MAX_SUB_MATERIALS,
};
pub use scene::{Camera, CameraDescriptor, NodeHandle, ParentRef, Scene, ShGeometryInstance};
pub use shader_nodes::{
    ImageRef, ShaderNodeData, ShaderNodeGraph, ShaderNodeHandle, ShaderNodeKind, SocketValueType,
};
pub use slot::SlotTable;
pub use spectrum::RgbSpectrum;
