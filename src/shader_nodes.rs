//! Shader-node DAG.
//!
//! Nodes are small typed value producers (constants, texture fetches, UV
//! remaps) wired into materials through sockets. Every node owns one slot in
//! the node-descriptor table and rewrites its record synchronously on every
//! edit, so the GPU table is always current.

use std::collections::HashMap;

use tracing::debug;

use crate::arena::{Arena, Handle};
use crate::backend::{BufferHandle, DescriptorTable, ExecutionEngine};
use crate::descriptors::{DescriptorStore, NodeDescriptor, NodeProcedureSet, INVALID_NODE_INDEX};
use crate::error::{Error, Result, SlotIndex};
use crate::image::LinearImage2D;
use crate::slot::SlotTable;
use crate::spectrum::RgbSpectrum;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketValueType {
    Float,
    Float2,
    Float3,
    Float4,
    Spectrum,
    TexCoord,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderNodeKind {
    Float,
    Float2,
    Float3,
    Float4,
    ConstantSpectrum,
    Image2DTexture,
    OffsetScaleUv,
    EnvironmentTexture,
}

impl ShaderNodeKind {
    const ALL: [ShaderNodeKind; 8] = [
        ShaderNodeKind::Float,
        ShaderNodeKind::Float2,
        ShaderNodeKind::Float3,
        ShaderNodeKind::Float4,
        ShaderNodeKind::ConstantSpectrum,
        ShaderNodeKind::Image2DTexture,
        ShaderNodeKind::OffsetScaleUv,
        ShaderNodeKind::EnvironmentTexture,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ShaderNodeKind::Float => "Float",
            ShaderNodeKind::Float2 => "Float2",
            ShaderNodeKind::Float3 => "Float3",
            ShaderNodeKind::Float4 => "Float4",
            ShaderNodeKind::ConstantSpectrum => "ConstantSpectrum",
            ShaderNodeKind::Image2DTexture => "Image2DTexture",
            ShaderNodeKind::OffsetScaleUv => "OffsetScaleUv",
            ShaderNodeKind::EnvironmentTexture => "EnvironmentTexture",
        }
    }

    pub fn output_type(self) -> SocketValueType {
        match self {
            ShaderNodeKind::Float => SocketValueType::Float,
            ShaderNodeKind::Float2 => SocketValueType::Float2,
            ShaderNodeKind::Float3 => SocketValueType::Float3,
            ShaderNodeKind::Float4 => SocketValueType::Float4,
            ShaderNodeKind::ConstantSpectrum => SocketValueType::Spectrum,
            ShaderNodeKind::Image2DTexture => SocketValueType::Spectrum,
            ShaderNodeKind::OffsetScaleUv => SocketValueType::TexCoord,
            ShaderNodeKind::EnvironmentTexture => SocketValueType::Spectrum,
        }
    }

    fn entry_point(self) -> &'static str {
        match self {
            ShaderNodeKind::Float => "shader_node_float",
            ShaderNodeKind::Float2 => "shader_node_float2",
            ShaderNodeKind::Float3 => "shader_node_float3",
            ShaderNodeKind::Float4 => "shader_node_float4",
            ShaderNodeKind::ConstantSpectrum => "shader_node_constant_spectrum",
            ShaderNodeKind::Image2DTexture => "shader_node_image2d_texture",
            ShaderNodeKind::OffsetScaleUv => "shader_node_offset_scale_uv",
            ShaderNodeKind::EnvironmentTexture => "shader_node_environment_texture",
        }
    }
}

/// Image payload captured at node creation. The caller keeps the
/// `LinearImage2D` itself alive.
#[derive(Clone, Copy, Debug)]
pub struct ImageRef {
    pub buffer: BufferHandle,
    pub width: u32,
    pub height: u32,
}

impl ImageRef {
    pub fn of(image: &LinearImage2D) -> Self {
        ImageRef {
            buffer: image.buffer(),
            width: image.width(),
            height: image.height(),
        }
    }
}

/// Per-kind node state. Float combinators carry one optional upstream link
/// and one immediate fallback per component.
pub enum ShaderNodeData {
    Float {
        inputs: [Option<ShaderNodeHandle>; 1],
        immediates: [f32; 1],
    },
    Float2 {
        inputs: [Option<ShaderNodeHandle>; 2],
        immediates: [f32; 2],
    },
    Float3 {
        inputs: [Option<ShaderNodeHandle>; 3],
        immediates: [f32; 3],
    },
    Float4 {
        inputs: [Option<ShaderNodeHandle>; 4],
        immediates: [f32; 4],
    },
    ConstantSpectrum {
        value: RgbSpectrum,
    },
    Image2DTexture {
        image: ImageRef,
        texcoord: Option<ShaderNodeHandle>,
    },
    OffsetScaleUv {
        offset: [f32; 2],
        scale: [f32; 2],
    },
    EnvironmentTexture {
        image: ImageRef,
    },
}

impl ShaderNodeData {
    pub fn kind(&self) -> ShaderNodeKind {
        match self {
            ShaderNodeData::Float { .. } => ShaderNodeKind::Float,
            ShaderNodeData::Float2 { .. } => ShaderNodeKind::Float2,
            ShaderNodeData::Float3 { .. } => ShaderNodeKind::Float3,
            ShaderNodeData::Float4 { .. } => ShaderNodeKind::Float4,
            ShaderNodeData::ConstantSpectrum { .. } => ShaderNodeKind::ConstantSpectrum,
            ShaderNodeData::Image2DTexture { .. } => ShaderNodeKind::Image2DTexture,
            ShaderNodeData::OffsetScaleUv { .. } => ShaderNodeKind::OffsetScaleUv,
            ShaderNodeData::EnvironmentTexture { .. } => ShaderNodeKind::EnvironmentTexture,
        }
    }

    fn references(&self, target: ShaderNodeHandle) -> bool {
        let contains = |inputs: &[Option<ShaderNodeHandle>]| {
            inputs.iter().any(|i| *i == Some(target))
        };
        match self {
            ShaderNodeData::Float { inputs, .. } => contains(inputs),
            ShaderNodeData::Float2 { inputs, .. } => contains(inputs),
            ShaderNodeData::Float3 { inputs, .. } => contains(inputs),
            ShaderNodeData::Float4 { inputs, .. } => contains(inputs),
            ShaderNodeData::Image2DTexture { texcoord, .. } => *texcoord == Some(target),
            _ => false,
        }
    }

    /// Expected value type of the named socket, or `None` if the kind has no
    /// such socket.
    fn socket(&self, name: &str) -> Option<(usize, SocketValueType)> {
        let component = |max: usize| {
            let idx = match name {
                "x" => 0,
                "y" => 1,
                "z" => 2,
                "w" => 3,
                _ => return None,
            };
            (idx < max).then_some((idx, SocketValueType::Float))
        };
        match self {
            ShaderNodeData::Float { .. } => component(1),
            ShaderNodeData::Float2 { .. } => component(2),
            ShaderNodeData::Float3 { .. } => component(3),
            ShaderNodeData::Float4 { .. } => component(4),
            ShaderNodeData::Image2DTexture { .. } if name == "texcoord" => {
                Some((0, SocketValueType::TexCoord))
            }
            _ => None,
        }
    }

    fn set_link(&mut self, socket_index: usize, link: Option<ShaderNodeHandle>) {
        match self {
            ShaderNodeData::Float { inputs, .. } => inputs[socket_index] = link,
            ShaderNodeData::Float2 { inputs, .. } => inputs[socket_index] = link,
            ShaderNodeData::Float3 { inputs, .. } => inputs[socket_index] = link,
            ShaderNodeData::Float4 { inputs, .. } => inputs[socket_index] = link,
            ShaderNodeData::Image2DTexture { texcoord, .. } => *texcoord = link,
            _ => unreachable!("socket lookup precedes link update"),
        }
    }
}

pub struct ShaderNode {
    data: ShaderNodeData,
    slot: SlotIndex,
}

impl ShaderNode {
    pub fn data(&self) -> &ShaderNodeData {
        &self.data
    }

    pub fn slot(&self) -> SlotIndex {
        self.slot
    }
}

pub type ShaderNodeHandle = Handle<ShaderNode>;

/// All shader-node state of one context: the arena of live nodes, the
/// descriptor table pair, and the per-kind procedure-set registry.
pub struct ShaderNodeGraph {
    nodes: Arena<ShaderNode>,
    slots: SlotTable,
    store: DescriptorStore<NodeDescriptor>,
    proc_slots: SlotTable,
    proc_store: DescriptorStore<NodeProcedureSet>,
    proc_set_indices: HashMap<ShaderNodeKind, u32>,
}

impl ShaderNodeGraph {
    pub fn new(engine: &mut dyn ExecutionEngine, capacity: u32) -> Result<Self> {
        let mut graph = ShaderNodeGraph {
            nodes: Arena::new(),
            slots: SlotTable::new("node descriptors", capacity),
            store: DescriptorStore::new(engine, capacity),
            proc_slots: SlotTable::new("node procedure sets", 64),
            proc_store: DescriptorStore::new(engine, 64),
            proc_set_indices: HashMap::new(),
        };
        engine.bind_table(DescriptorTable::NodeDescriptors, graph.store.buffer());
        engine.bind_table(DescriptorTable::NodeProcedureSets, graph.proc_store.buffer());
        for kind in ShaderNodeKind::ALL {
            graph.register_procedure_set(engine, kind)?;
        }
        Ok(graph)
    }

    pub fn descriptor_buffer(&self) -> BufferHandle {
        self.store.buffer()
    }

    pub fn procedure_buffer(&self) -> BufferHandle {
        self.proc_store.buffer()
    }

    fn register_procedure_set(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        kind: ShaderNodeKind,
    ) -> Result<()> {
        let prog = engine.load_procedure("shader_nodes", kind.entry_point());
        let mut set = NodeProcedureSet::default();
        match kind.output_type() {
            SocketValueType::Float => set.prog_float = prog,
            SocketValueType::Float2 => set.prog_float2 = prog,
            SocketValueType::Float3 => set.prog_float3 = prog,
            SocketValueType::Float4 => set.prog_float4 = prog,
            SocketValueType::Spectrum => set.prog_spectrum = prog,
            SocketValueType::TexCoord => set.prog_tex_coord = prog,
        }
        let index = self.proc_slots.allocate()?;
        self.proc_store.write(engine, index, &set);
        self.proc_set_indices.insert(kind, index);
        Ok(())
    }

    pub fn create(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        data: ShaderNodeData,
    ) -> Result<ShaderNodeHandle> {
        let slot = self.slots.allocate()?;
        debug!(kind = data.kind().name(), slot, "create shader node");
        let handle = self.nodes.insert(ShaderNode { data, slot });
        self.update_descriptor(engine, handle)?;
        Ok(handle)
    }

    pub fn get(&self, handle: ShaderNodeHandle) -> Result<&ShaderNode> {
        self.nodes.get(handle)
    }

    /// Descriptor-table index of a live node, for embedding in other records.
    pub fn slot_index(&self, handle: ShaderNodeHandle) -> Result<SlotIndex> {
        Ok(self.nodes.get(handle)?.slot)
    }

    pub fn output_type(&self, handle: ShaderNodeHandle) -> Result<SocketValueType> {
        Ok(self.nodes.get(handle)?.data.kind().output_type())
    }

    /// Wires `upstream`'s output into the named socket of `node`.
    pub fn set_input(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        node: ShaderNodeHandle,
        socket: &'static str,
        upstream: ShaderNodeHandle,
    ) -> Result<()> {
        let actual = self.output_type(upstream)?;
        let target = self.nodes.get_mut(node)?;
        let (index, expected) = target
            .data
            .socket(socket)
            .ok_or(Error::NoSuchSocket {
                kind: target.data.kind().name(),
                socket,
            })?;
        if expected != actual {
            return Err(Error::TypeMismatch { expected, actual });
        }
        target.data.set_link(index, Some(upstream));
        self.update_descriptor(engine, node)
    }

    /// Disconnects the named socket; evaluation falls back to the immediate.
    pub fn clear_input(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        node: ShaderNodeHandle,
        socket: &'static str,
    ) -> Result<()> {
        let target = self.nodes.get_mut(node)?;
        let (index, _) = target.data.socket(socket).ok_or(Error::NoSuchSocket {
            kind: target.data.kind().name(),
            socket,
        })?;
        target.data.set_link(index, None);
        self.update_descriptor(engine, node)
    }

    /// Immediate fallback of a float-combinator component socket.
    pub fn set_immediate(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        node: ShaderNodeHandle,
        socket: &'static str,
        value: f32,
    ) -> Result<()> {
        let target = self.nodes.get_mut(node)?;
        let (index, expected) = target.data.socket(socket).ok_or(Error::NoSuchSocket {
            kind: target.data.kind().name(),
            socket,
        })?;
        if expected != SocketValueType::Float {
            return Err(Error::TypeMismatch {
                expected,
                actual: SocketValueType::Float,
            });
        }
        match &mut target.data {
            ShaderNodeData::Float { immediates, .. } => immediates[index] = value,
            ShaderNodeData::Float2 { immediates, .. } => immediates[index] = value,
            ShaderNodeData::Float3 { immediates, .. } => immediates[index] = value,
            ShaderNodeData::Float4 { immediates, .. } => immediates[index] = value,
            _ => unreachable!("only float combinators have Float sockets"),
        }
        self.update_descriptor(engine, node)
    }

    pub fn set_spectrum(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        node: ShaderNodeHandle,
        value: RgbSpectrum,
    ) -> Result<()> {
        match &mut self.nodes.get_mut(node)?.data {
            ShaderNodeData::ConstantSpectrum { value: v } => *v = value,
            data => {
                return Err(Error::WrongNodeKind {
                    actual: data.kind().name(),
                })
            }
        }
        self.update_descriptor(engine, node)
    }

    pub fn set_uv_offset_scale(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        node: ShaderNodeHandle,
        offset: [f32; 2],
        scale: [f32; 2],
    ) -> Result<()> {
        match &mut self.nodes.get_mut(node)?.data {
            ShaderNodeData::OffsetScaleUv {
                offset: o,
                scale: s,
            } => {
                *o = offset;
                *s = scale;
            }
            data => {
                return Err(Error::WrongNodeKind {
                    actual: data.kind().name(),
                })
            }
        }
        self.update_descriptor(engine, node)
    }

    /// Number of live nodes wired to `handle`. The context refuses to destroy
    /// a node while this (plus material references) is nonzero.
    pub fn referrers(&self, handle: ShaderNodeHandle) -> usize {
        self.nodes
            .iter()
            .filter(|(h, node)| *h != handle && node.data.references(handle))
            .count()
    }

    /// Removes the node and frees its slot. Reference checks are the
    /// caller's responsibility.
    pub(crate) fn destroy_unchecked(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        handle: ShaderNodeHandle,
    ) -> Result<()> {
        let node = self.nodes.remove(handle)?;
        debug!(slot = node.slot, "destroy shader node");
        self.store.write(engine, node.slot, &NodeDescriptor::new(0));
        self.slots.release(node.slot)
    }

    pub fn descriptor(&self, handle: ShaderNodeHandle) -> Result<NodeDescriptor> {
        Ok(self.store.read(self.nodes.get(handle)?.slot))
    }

    fn node_index_word(&self, link: Option<ShaderNodeHandle>) -> Result<u32> {
        match link {
            Some(h) => self.slot_index(h),
            None => Ok(INVALID_NODE_INDEX),
        }
    }

    fn update_descriptor(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        handle: ShaderNodeHandle,
    ) -> Result<()> {
        let node = self.nodes.get(handle)?;
        let kind = node.data.kind();
        let mut desc = NodeDescriptor::new(self.proc_set_indices[&kind]);

        let encode_floats = |desc: &mut NodeDescriptor,
                             inputs: &[Option<ShaderNodeHandle>],
                             immediates: &[f32]|
         -> Result<()> {
            for (i, link) in inputs.iter().enumerate() {
                desc.data[i] = self.node_index_word(*link)?;
            }
            for (i, imm) in immediates.iter().enumerate() {
                desc.data[inputs.len() + i] = imm.to_bits();
            }
            Ok(())
        };

        match &node.data {
            ShaderNodeData::Float { inputs, immediates } => {
                encode_floats(&mut desc, inputs, immediates)?
            }
            ShaderNodeData::Float2 { inputs, immediates } => {
                encode_floats(&mut desc, inputs, immediates)?
            }
            ShaderNodeData::Float3 { inputs, immediates } => {
                encode_floats(&mut desc, inputs, immediates)?
            }
            ShaderNodeData::Float4 { inputs, immediates } => {
                encode_floats(&mut desc, inputs, immediates)?
            }
            ShaderNodeData::ConstantSpectrum { value } => {
                desc.data[..3].copy_from_slice(&value.to_words());
            }
            ShaderNodeData::Image2DTexture { image, texcoord } => {
                desc.data[0] = image.buffer.0;
                desc.data[1] = image.width;
                desc.data[2] = image.height;
                desc.data[3] = self.node_index_word(*texcoord)?;
            }
            ShaderNodeData::OffsetScaleUv { offset, scale } => {
                desc.data[0] = offset[0].to_bits();
                desc.data[1] = offset[1].to_bits();
                desc.data[2] = scale[0].to_bits();
                desc.data[3] = scale[1].to_bits();
            }
            ShaderNodeData::EnvironmentTexture { image } => {
                desc.data[0] = image.buffer.0;
                desc.data[1] = image.width;
                desc.data[2] = image.height;
            }
        }

        let slot = node.slot;
        self.store.write(engine, slot, &desc);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostEngine;

    fn graph() -> (HostEngine, ShaderNodeGraph) {
        let mut engine = HostEngine::new();
        let graph = ShaderNodeGraph::new(&mut engine, 64).unwrap();
        (engine, graph)
    }

    fn float_node(value: f32) -> ShaderNodeData {
        ShaderNodeData::Float {
            inputs: [None],
            immediates: [value],
        }
    }

    #[test]
    fn descriptor_tables_are_bound_at_creation() {
        let (engine, graph) = graph();
        assert_eq!(
            engine.table_binding(DescriptorTable::NodeDescriptors),
            Some(graph.descriptor_buffer())
        );
        assert_eq!(
            engine.table_binding(DescriptorTable::NodeProcedureSets),
            Some(graph.procedure_buffer())
        );
    }

    #[test]
    fn descriptor_encodes_links_and_immediates() {
        let (mut engine, mut graph) = graph();
        let up = graph.create(&mut engine, float_node(0.25)).unwrap();
        let node = graph
            .create(
                &mut engine,
                ShaderNodeData::Float3 {
                    inputs: [None, None, None],
                    immediates: [0.1, 0.2, 0.3],
                },
            )
            .unwrap();

        graph.set_input(&mut engine, node, "y", up).unwrap();

        let desc = graph.descriptor(node).unwrap();
        assert_eq!(desc.data[0], INVALID_NODE_INDEX);
        assert_eq!(desc.data[1], graph.slot_index(up).unwrap());
        assert_eq!(desc.data[2], INVALID_NODE_INDEX);
        assert_eq!(desc.data[4], 0.2f32.to_bits());

        graph.clear_input(&mut engine, node, "y").unwrap();
        assert_eq!(graph.descriptor(node).unwrap().data[1], INVALID_NODE_INDEX);
    }

    #[test]
    fn set_input_rejects_wrong_value_type() {
        let (mut engine, mut graph) = graph();
        let spectrum = graph
            .create(
                &mut engine,
                ShaderNodeData::ConstantSpectrum {
                    value: RgbSpectrum::gray(0.5),
                },
            )
            .unwrap();
        let node = graph.create(&mut engine, float_node(0.0)).unwrap();

        assert_eq!(
            graph.set_input(&mut engine, node, "x", spectrum),
            Err(Error::TypeMismatch {
                expected: SocketValueType::Float,
                actual: SocketValueType::Spectrum,
            })
        );
        assert!(matches!(
            graph.set_input(&mut engine, node, "y", spectrum),
            Err(Error::NoSuchSocket { .. })
        ));
    }

    #[test]
    fn referrers_counts_incoming_edges() {
        let (mut engine, mut graph) = graph();
        let up = graph.create(&mut engine, float_node(1.0)).unwrap();
        let a = graph.create(&mut engine, float_node(0.0)).unwrap();
        let b = graph.create(&mut engine, float_node(0.0)).unwrap();
        graph.set_input(&mut engine, a, "x", up).unwrap();
        graph.set_input(&mut engine, b, "x", up).unwrap();

        assert_eq!(graph.referrers(up), 2);
        graph.clear_input(&mut engine, a, "x").unwrap();
        assert_eq!(graph.referrers(up), 1);
    }

    #[test]
    fn destroyed_node_slot_is_reused() {
        let (mut engine, mut graph) = graph();
        let a = graph.create(&mut engine, float_node(1.0)).unwrap();
        let slot = graph.slot_index(a).unwrap();
        graph.destroy_unchecked(&mut engine, a).unwrap();
        assert_eq!(graph.slot_index(a), Err(Error::StaleHandle));

        let b = graph.create(&mut engine, float_node(2.0)).unwrap();
        assert_eq!(graph.slot_index(b).unwrap(), slot);
    }
}
