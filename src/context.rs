//! The context: single owner of the engine connection, every descriptor
//! table, the default shader nodes and the output buffers.
//!
//! All mutation is single-threaded by design; callers needing concurrent
//! scene editing must wrap the context in their own lock.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::backend::{BufferHandle, DescriptorTable, ExecutionEngine, LaunchParams, ProcedureId};
use crate::descriptors::DescriptorStore;
use crate::error::{Error, Result};
use crate::image::{ImageFormat, LinearImage2D};
use crate::materials::{MaterialGraph, SurfaceMaterialData, SurfaceMaterialHandle};
use crate::scene::{Camera, CameraDescriptor, Scene};
use crate::shader_nodes::{ShaderNodeData, ShaderNodeGraph, ShaderNodeHandle};
use crate::spectrum::RgbSpectrum;

const RNG_SEED: u64 = 591842031321323413;

/// Descriptor-table sizes, fixed at context creation.
#[derive(Clone, Copy, Debug)]
pub struct Capacities {
    pub shader_nodes: u32,
    pub surface_materials: u32,
}

impl Default for Capacities {
    fn default() -> Self {
        Capacities {
            shader_nodes: 65536,
            surface_materials: 8192,
        }
    }
}

struct OutputBuffer {
    buffer: BufferHandle,
    /// False when the caller supplied the buffer; borrowed buffers are never
    /// destroyed on rebind.
    owned: bool,
    rng_buffer: BufferHandle,
    width: u32,
    height: u32,
}

pub struct Context {
    engine: Box<dyn ExecutionEngine>,
    shader_nodes: ShaderNodeGraph,
    materials: MaterialGraph,
    camera_store: DescriptorStore<CameraDescriptor>,
    prog_sample_lens_position: ProcedureId,
    prog_sample_idf: ProcedureId,
    gray18: ShaderNodeHandle,
    identity_uv: ShaderNodeHandle,
    output: Option<OutputBuffer>,
    accumulated_samples: u32,
}

impl Context {
    pub fn new(mut engine: Box<dyn ExecutionEngine>, capacities: Capacities) -> Result<Self> {
        info!(?capacities, "initialize context");
        let mut shader_nodes = ShaderNodeGraph::new(engine.as_mut(), capacities.shader_nodes)?;
        let materials = MaterialGraph::new(engine.as_mut(), capacities.surface_materials)?;
        let camera_store = DescriptorStore::new(engine.as_mut(), 1);
        engine.bind_table(DescriptorTable::Camera, camera_store.buffer());

        let prog_sample_lens_position =
            engine.load_procedure("camera", "perspective_sample_lens_position");
        let prog_sample_idf = engine.load_procedure("camera", "perspective_sample_idf");

        // fallback singletons, alive for the context's lifetime
        let gray18 = shader_nodes.create(
            engine.as_mut(),
            ShaderNodeData::ConstantSpectrum {
                value: RgbSpectrum::gray(0.18),
            },
        )?;
        let identity_uv = shader_nodes.create(
            engine.as_mut(),
            ShaderNodeData::OffsetScaleUv {
                offset: [0.0, 0.0],
                scale: [1.0, 1.0],
            },
        )?;

        Ok(Context {
            engine,
            shader_nodes,
            materials,
            camera_store,
            prog_sample_lens_position,
            prog_sample_idf,
            gray18,
            identity_uv,
            output: None,
            accumulated_samples: 0,
        })
    }

    pub fn engine_mut(&mut self) -> &mut dyn ExecutionEngine {
        self.engine.as_mut()
    }

    // ---- shader nodes ----

    pub fn shader_nodes(&self) -> &ShaderNodeGraph {
        &self.shader_nodes
    }

    pub fn create_shader_node(&mut self, data: ShaderNodeData) -> Result<ShaderNodeHandle> {
        self.shader_nodes.create(self.engine.as_mut(), data)
    }

    pub fn set_node_input(
        &mut self,
        node: ShaderNodeHandle,
        socket: &'static str,
        upstream: ShaderNodeHandle,
    ) -> Result<()> {
        self.shader_nodes
            .set_input(self.engine.as_mut(), node, socket, upstream)
    }

    pub fn clear_node_input(&mut self, node: ShaderNodeHandle, socket: &'static str) -> Result<()> {
        self.shader_nodes
            .clear_input(self.engine.as_mut(), node, socket)
    }

    pub fn set_node_immediate(
        &mut self,
        node: ShaderNodeHandle,
        socket: &'static str,
        value: f32,
    ) -> Result<()> {
        self.shader_nodes
            .set_immediate(self.engine.as_mut(), node, socket, value)
    }

    pub fn set_node_spectrum(&mut self, node: ShaderNodeHandle, value: RgbSpectrum) -> Result<()> {
        self.shader_nodes
            .set_spectrum(self.engine.as_mut(), node, value)
    }

    pub fn set_node_uv_offset_scale(
        &mut self,
        node: ShaderNodeHandle,
        offset: [f32; 2],
        scale: [f32; 2],
    ) -> Result<()> {
        self.shader_nodes
            .set_uv_offset_scale(self.engine.as_mut(), node, offset, scale)
    }

    /// Destroys a node unless it is still wired into another node or
    /// referenced by a material.
    pub fn destroy_shader_node(&mut self, node: ShaderNodeHandle) -> Result<()> {
        let referrers =
            self.shader_nodes.referrers(node) + self.materials.node_referrers(node);
        if referrers > 0 {
            return Err(Error::DanglingReference { referrers });
        }
        self.shader_nodes
            .destroy_unchecked(self.engine.as_mut(), node)
    }

    /// 18%-gray constant spectrum, the fallback for unset spectrum sockets.
    pub fn default_gray_spectrum(&self) -> ShaderNodeHandle {
        self.gray18
    }

    /// Identity UV remap, the fallback for unset texcoord sockets.
    pub fn default_uv(&self) -> ShaderNodeHandle {
        self.identity_uv
    }

    // ---- materials ----

    pub fn materials(&self) -> &MaterialGraph {
        &self.materials
    }

    pub fn create_surface_material(
        &mut self,
        data: SurfaceMaterialData,
    ) -> Result<SurfaceMaterialHandle> {
        self.materials
            .create(self.engine.as_mut(), &self.shader_nodes, data)
    }

    pub fn modify_surface_material(
        &mut self,
        material: SurfaceMaterialHandle,
        data: SurfaceMaterialData,
    ) -> Result<()> {
        self.materials
            .modify(self.engine.as_mut(), &self.shader_nodes, material, data)
    }

    pub fn set_sub_material(
        &mut self,
        multi: SurfaceMaterialHandle,
        index: u32,
        sub: Option<SurfaceMaterialHandle>,
    ) -> Result<()> {
        self.materials
            .set_sub_material(self.engine.as_mut(), &self.shader_nodes, multi, index, sub)
    }

    pub fn destroy_surface_material(&mut self, material: SurfaceMaterialHandle) -> Result<()> {
        self.materials.destroy(self.engine.as_mut(), material)
    }

    // ---- images ----

    pub fn create_image(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
        format: ImageFormat,
        apply_degamma: bool,
    ) -> LinearImage2D {
        LinearImage2D::new(self.engine.as_mut(), data, width, height, format, apply_degamma)
    }

    // ---- output ----

    /// Binds the RGB f32 output buffer, either caller-supplied (e.g. shared
    /// with a display surface) or freshly allocated, and allocates the
    /// per-pixel RNG state buffer, deterministically seeded.
    pub fn bind_output_buffer(
        &mut self,
        width: u32,
        height: u32,
        external: Option<BufferHandle>,
    ) -> Result<()> {
        if let Some(old) = self.output.take() {
            if old.owned {
                self.engine.destroy_buffer(old.buffer);
            }
            self.engine.destroy_buffer(old.rng_buffer);
        }
        let num_pixels = width * height;
        let (buffer, owned) = match external {
            Some(buffer) => (buffer, false),
            None => (
                self.engine
                    .create_buffer(3 * std::mem::size_of::<f32>(), num_pixels),
                true,
            ),
        };
        let rng_buffer = self
            .engine
            .create_buffer(std::mem::size_of::<u64>(), num_pixels);

        let mut rng = StdRng::seed_from_u64(RNG_SEED);
        let states: Vec<u64> = (0..num_pixels).map(|_| rng.gen()).collect();
        self.engine
            .write_buffer(rng_buffer, 0, bytemuck::cast_slice(&states));

        debug!(width, height, owned, "bind output buffer");
        self.output = Some(OutputBuffer {
            buffer,
            owned,
            rng_buffer,
            width,
            height,
        });
        self.accumulated_samples = 0;
        Ok(())
    }

    /// Host-side copy of the output buffer, 3 floats per pixel.
    pub fn map_output_buffer(&self) -> Result<Vec<f32>> {
        let output = self.output.as_ref().ok_or(Error::NoOutputBuffer)?;
        let bytes = self.engine.read_buffer(output.buffer);
        Ok(bytemuck::cast_slice(&bytes).to_vec())
    }

    pub fn accumulated_samples(&self) -> u32 {
        self.accumulated_samples
    }

    /// Launches one accumulation pass and returns the accumulated sample
    /// count. `shrink` divides the launch dimensions for preview renders.
    pub fn render(
        &mut self,
        scene: &Scene,
        camera: &Camera,
        shrink: u32,
        reset_accumulation: bool,
    ) -> Result<u32> {
        let output = self.output.as_ref().ok_or(Error::NoOutputBuffer)?;
        if reset_accumulation {
            self.accumulated_samples = 0;
        }

        let mut desc = camera.to_descriptor();
        desc.prog_sample_lens_position = self.prog_sample_lens_position;
        desc.prog_sample_idf = self.prog_sample_idf;
        self.camera_store.write(self.engine.as_mut(), 0, &desc);

        let shrink = shrink.max(1);
        let params = LaunchParams {
            top_group: scene.top_group(),
            output_buffer: output.buffer,
            rng_buffer: output.rng_buffer,
            environment_slot: scene.environment_slot(),
            width: output.width / shrink,
            height: output.height / shrink,
            accum_frame: self.accumulated_samples,
        };
        debug!(
            width = params.width,
            height = params.height,
            accum_frame = params.accum_frame,
            "render"
        );
        self.engine.launch(&params);
        self.accumulated_samples += 1;
        Ok(self.accumulated_samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostEngine;
    use crate::geometry::{Quaternion, StaticTransform, Vec3};

    fn context() -> Context {
        Context::new(Box::new(HostEngine::new()), Capacities::default()).unwrap()
    }

    fn camera() -> Camera {
        Camera::Perspective {
            position: Vec3(0.0, 0.0, 5.0),
            orientation: Quaternion::identity(),
            aspect: 1.0,
            fov_y: 0.8,
            lens_radius: 0.0,
            image_plane_distance: 1.0,
            object_plane_distance: 5.0,
        }
    }

    #[test]
    fn render_requires_bound_output() {
        let mut ctx = context();
        let scene = {
            let engine = ctx.engine_mut();
            Scene::new(engine, StaticTransform::identity())
        };
        assert_eq!(
            ctx.render(&scene, &camera(), 1, false),
            Err(Error::NoOutputBuffer)
        );
    }

    #[test]
    fn accumulation_counter_resets_and_counts() {
        let mut ctx = context();
        let scene = {
            let engine = ctx.engine_mut();
            Scene::new(engine, StaticTransform::identity())
        };
        ctx.bind_output_buffer(16, 16, None).unwrap();

        assert_eq!(ctx.render(&scene, &camera(), 1, false), Ok(1));
        assert_eq!(ctx.render(&scene, &camera(), 1, false), Ok(2));
        assert_eq!(ctx.render(&scene, &camera(), 2, true), Ok(1));
    }

    #[test]
    fn output_buffer_is_pixel_sized() {
        let mut ctx = context();
        ctx.bind_output_buffer(4, 2, None).unwrap();
        assert_eq!(ctx.map_output_buffer().unwrap().len(), 4 * 2 * 3);
    }

    #[test]
    fn external_output_buffer_survives_rebind() {
        let mut ctx = context();
        let external = ctx
            .engine_mut()
            .create_buffer(3 * std::mem::size_of::<f32>(), 4);
        ctx.bind_output_buffer(2, 2, Some(external)).unwrap();
        assert_eq!(ctx.map_output_buffer().unwrap().len(), 2 * 2 * 3);

        // rebinding drops only buffers the context allocated itself
        ctx.bind_output_buffer(2, 2, None).unwrap();
        assert_eq!(ctx.engine_mut().read_buffer(external).len(), 48);
    }

    #[test]
    fn default_nodes_exist() {
        let ctx = context();
        let gray = ctx.shader_nodes().descriptor(ctx.default_gray_spectrum()).unwrap();
        assert_eq!(gray.data[0], 0.18f32.to_bits());
        assert!(ctx.shader_nodes().descriptor(ctx.default_uv()).is_ok());
    }
}
