//! Surface materials and their GPU descriptor serialization.
//!
//! A material is a closed variant over the supported BSDF/EDF combinations.
//! Each one owns a 32-word descriptor slot. The first four words are the
//! procedure head (BSDF setup id, BSDF procedure-set index, EDF setup id,
//! EDF procedure-set index); aspects a variant lacks point at the shared
//! null procedure entries, which occupy index 0 of their tables by
//! construction. Multi-materials inline their sub-materials' full records
//! into their own descriptor.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::arena::{Arena, Handle};
use crate::backend::{BufferHandle, DescriptorTable, ExecutionEngine, ProcedureId};
use crate::descriptors::{
    BsdfProcedureSet, DescriptorStore, EdfProcedureSet, SurfaceMaterialDescriptor,
    INVALID_NODE_INDEX,
};
use crate::error::{Error, Result, SlotIndex};
use crate::shader_nodes::{ShaderNodeGraph, ShaderNodeHandle};
use crate::slot::SlotTable;
use crate::spectrum::RgbSpectrum;

pub const MAX_SUB_MATERIALS: usize = 4;

/// Spectrum-valued material parameter: a shader-node link or an immediate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SpectrumInput {
    Node(ShaderNodeHandle),
    Immediate(RgbSpectrum),
}

/// Float-valued material parameter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FloatInput {
    Node(ShaderNodeHandle),
    Immediate(f32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MaterialKind {
    Matte,
    SpecularReflection,
    SpecularScattering,
    MicrofacetReflection,
    MicrofacetScattering,
    LambertianScattering,
    Ue4,
    DiffuseEmitter,
    Multi,
    EnvironmentEmitter,
}

impl MaterialKind {
    pub fn name(self) -> &'static str {
        match self {
            MaterialKind::Matte => "Matte",
            MaterialKind::SpecularReflection => "SpecularReflection",
            MaterialKind::SpecularScattering => "SpecularScattering",
            MaterialKind::MicrofacetReflection => "MicrofacetReflection",
            MaterialKind::MicrofacetScattering => "MicrofacetScattering",
            MaterialKind::LambertianScattering => "LambertianScattering",
            MaterialKind::Ue4 => "Ue4",
            MaterialKind::DiffuseEmitter => "DiffuseEmitter",
            MaterialKind::Multi => "Multi",
            MaterialKind::EnvironmentEmitter => "EnvironmentEmitter",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            MaterialKind::Matte => "matte",
            MaterialKind::SpecularReflection => "specular_reflection",
            MaterialKind::SpecularScattering => "specular_scattering",
            MaterialKind::MicrofacetReflection => "microfacet_reflection",
            MaterialKind::MicrofacetScattering => "microfacet_scattering",
            MaterialKind::LambertianScattering => "lambertian_scattering",
            MaterialKind::Ue4 => "ue4",
            MaterialKind::DiffuseEmitter => "diffuse_emitter",
            MaterialKind::Multi => "multi",
            MaterialKind::EnvironmentEmitter => "environment_emitter",
        }
    }

    fn has_bsdf(self) -> bool {
        !matches!(
            self,
            MaterialKind::DiffuseEmitter | MaterialKind::EnvironmentEmitter
        )
    }

    fn has_edf(self) -> bool {
        matches!(
            self,
            MaterialKind::DiffuseEmitter | MaterialKind::EnvironmentEmitter | MaterialKind::Multi
        )
    }
}

pub enum SurfaceMaterialData {
    Matte {
        albedo: SpectrumInput,
    },
    SpecularReflection {
        coeff: SpectrumInput,
        eta: SpectrumInput,
        k: SpectrumInput,
    },
    SpecularScattering {
        coeff: SpectrumInput,
        eta_ext: FloatInput,
        eta_int: FloatInput,
    },
    MicrofacetReflection {
        eta: SpectrumInput,
        k: SpectrumInput,
        roughness: FloatInput,
        anisotropy: FloatInput,
        rotation: FloatInput,
    },
    MicrofacetScattering {
        coeff: SpectrumInput,
        eta_ext: FloatInput,
        eta_int: FloatInput,
        roughness: FloatInput,
        anisotropy: FloatInput,
        rotation: FloatInput,
    },
    LambertianScattering {
        coeff: SpectrumInput,
        f0: FloatInput,
    },
    Ue4 {
        base_color: SpectrumInput,
        occlusion: FloatInput,
        roughness: FloatInput,
        metallic: FloatInput,
    },
    DiffuseEmitter {
        emittance: SpectrumInput,
        scale: f32,
    },
    Multi {
        subs: [Option<SurfaceMaterialHandle>; MAX_SUB_MATERIALS],
    },
    EnvironmentEmitter {
        emittance: SpectrumInput,
        scale: f32,
    },
}

impl SurfaceMaterialData {
    pub fn kind(&self) -> MaterialKind {
        match self {
            SurfaceMaterialData::Matte { .. } => MaterialKind::Matte,
            SurfaceMaterialData::SpecularReflection { .. } => MaterialKind::SpecularReflection,
            SurfaceMaterialData::SpecularScattering { .. } => MaterialKind::SpecularScattering,
            SurfaceMaterialData::MicrofacetReflection { .. } => MaterialKind::MicrofacetReflection,
            SurfaceMaterialData::MicrofacetScattering { .. } => MaterialKind::MicrofacetScattering,
            SurfaceMaterialData::LambertianScattering { .. } => MaterialKind::LambertianScattering,
            SurfaceMaterialData::Ue4 { .. } => MaterialKind::Ue4,
            SurfaceMaterialData::DiffuseEmitter { .. } => MaterialKind::DiffuseEmitter,
            SurfaceMaterialData::Multi { .. } => MaterialKind::Multi,
            SurfaceMaterialData::EnvironmentEmitter { .. } => MaterialKind::EnvironmentEmitter,
        }
    }

    fn shader_node_links(&self) -> Vec<ShaderNodeHandle> {
        let mut links = Vec::new();
        let mut spectrum = |input: &SpectrumInput| {
            if let SpectrumInput::Node(h) = input {
                links.push(*h);
            }
        };
        let mut float_links = Vec::new();
        let mut float = |input: &FloatInput| {
            if let FloatInput::Node(h) = input {
                float_links.push(*h);
            }
        };
        match self {
            SurfaceMaterialData::Matte { albedo } => spectrum(albedo),
            SurfaceMaterialData::SpecularReflection { coeff, eta, k } => {
                spectrum(coeff);
                spectrum(eta);
                spectrum(k);
            }
            SurfaceMaterialData::SpecularScattering {
                coeff,
                eta_ext,
                eta_int,
            } => {
                spectrum(coeff);
                float(eta_ext);
                float(eta_int);
            }
            SurfaceMaterialData::MicrofacetReflection {
                eta,
                k,
                roughness,
                anisotropy,
                rotation,
            } => {
                spectrum(eta);
                spectrum(k);
                float(roughness);
                float(anisotropy);
                float(rotation);
            }
            SurfaceMaterialData::MicrofacetScattering {
                coeff,
                eta_ext,
                eta_int,
                roughness,
                anisotropy,
                rotation,
            } => {
                spectrum(coeff);
                float(eta_ext);
                float(eta_int);
                float(roughness);
                float(anisotropy);
                float(rotation);
            }
            SurfaceMaterialData::LambertianScattering { coeff, f0 } => {
                spectrum(coeff);
                float(f0);
            }
            SurfaceMaterialData::Ue4 {
                base_color,
                occlusion,
                roughness,
                metallic,
            } => {
                spectrum(base_color);
                float(occlusion);
                float(roughness);
                float(metallic);
            }
            SurfaceMaterialData::DiffuseEmitter { emittance, .. }
            | SurfaceMaterialData::EnvironmentEmitter { emittance, .. } => spectrum(emittance),
            SurfaceMaterialData::Multi { .. } => {}
        }
        links.extend(float_links);
        links
    }
}

pub struct SurfaceMaterial {
    data: SurfaceMaterialData,
    slot: SlotIndex,
}

impl SurfaceMaterial {
    pub fn data(&self) -> &SurfaceMaterialData {
        &self.data
    }

    pub fn slot(&self) -> SlotIndex {
        self.slot
    }
}

pub type SurfaceMaterialHandle = Handle<SurfaceMaterial>;

/// All surface-material state of one context: the arena, the material
/// descriptor table pair, the BSDF/EDF procedure-set tables, and the
/// per-variant registration caches.
pub struct MaterialGraph {
    materials: Arena<SurfaceMaterial>,
    slots: SlotTable,
    store: DescriptorStore<SurfaceMaterialDescriptor>,
    bsdf_slots: SlotTable,
    bsdf_store: DescriptorStore<BsdfProcedureSet>,
    edf_slots: SlotTable,
    edf_store: DescriptorStore<EdfProcedureSet>,
    // (setup procedure id, procedure-set index) per registered variant
    bsdf_cache: HashMap<MaterialKind, (ProcedureId, u32)>,
    edf_cache: HashMap<MaterialKind, (ProcedureId, u32)>,
    null_bsdf: (ProcedureId, u32),
    null_edf: (ProcedureId, u32),
}

impl MaterialGraph {
    pub fn new(engine: &mut dyn ExecutionEngine, capacity: u32) -> Result<Self> {
        let mut bsdf_slots = SlotTable::new("bsdf procedure sets", 64);
        let mut bsdf_store = DescriptorStore::new(engine, 64);
        let mut edf_slots = SlotTable::new("edf procedure sets", 64);
        let mut edf_store = DescriptorStore::new(engine, 64);

        // Null aspect entries claim index 0 of each table.
        let null_bsdf_index = bsdf_slots.allocate()?;
        bsdf_store.write(engine, null_bsdf_index, &BsdfProcedureSet::default());
        let null_edf_index = edf_slots.allocate()?;
        edf_store.write(engine, null_edf_index, &EdfProcedureSet::default());

        let null_bsdf_setup = engine.load_procedure("materials", "setup_null_bsdf");
        let null_edf_setup = engine.load_procedure("materials", "setup_null_edf");

        let store = DescriptorStore::new(engine, capacity);
        engine.bind_table(DescriptorTable::MaterialDescriptors, store.buffer());
        engine.bind_table(DescriptorTable::BsdfProcedureSets, bsdf_store.buffer());
        engine.bind_table(DescriptorTable::EdfProcedureSets, edf_store.buffer());

        Ok(MaterialGraph {
            materials: Arena::new(),
            slots: SlotTable::new("surface material descriptors", capacity),
            store,
            bsdf_slots,
            bsdf_store,
            edf_slots,
            edf_store,
            bsdf_cache: HashMap::new(),
            edf_cache: HashMap::new(),
            null_bsdf: (null_bsdf_setup, null_bsdf_index),
            null_edf: (null_edf_setup, null_edf_index),
        })
    }

    /// One-time per-variant procedure registration, cached by kind.
    fn ensure_procedures(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        kind: MaterialKind,
    ) -> Result<()> {
        let prefix = kind.prefix();
        if kind.has_bsdf() && !self.bsdf_cache.contains_key(&kind) {
            let load = |engine: &mut dyn ExecutionEngine, f: &str| {
                engine.load_procedure("materials", &format!("{prefix}_bsdf_{f}"))
            };
            let set = BsdfProcedureSet {
                prog_get_base_color: load(engine, "get_base_color"),
                prog_matches: load(engine, "matches"),
                prog_sample: load(engine, "sample"),
                prog_evaluate: load(engine, "evaluate"),
                prog_evaluate_pdf: load(engine, "evaluate_pdf"),
                prog_weight: load(engine, "weight"),
            };
            let index = self.bsdf_slots.allocate()?;
            self.bsdf_store.write(engine, index, &set);
            let setup = engine.load_procedure("materials", &format!("{prefix}_setup_bsdf"));
            self.bsdf_cache.insert(kind, (setup, index));
        }
        if kind.has_edf() && !self.edf_cache.contains_key(&kind) {
            let set = EdfProcedureSet {
                prog_evaluate_emittance: engine
                    .load_procedure("materials", &format!("{prefix}_edf_evaluate_emittance")),
                prog_evaluate: engine
                    .load_procedure("materials", &format!("{prefix}_edf_evaluate")),
            };
            let index = self.edf_slots.allocate()?;
            self.edf_store.write(engine, index, &set);
            let setup = engine.load_procedure("materials", &format!("{prefix}_setup_edf"));
            self.edf_cache.insert(kind, (setup, index));
        }
        Ok(())
    }

    pub fn create(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        nodes: &ShaderNodeGraph,
        data: SurfaceMaterialData,
    ) -> Result<SurfaceMaterialHandle> {
        let kind = data.kind();
        self.ensure_procedures(engine, kind)?;
        let slot = self.slots.allocate()?;
        debug!(kind = kind.name(), slot, "create surface material");
        let handle = self.materials.insert(SurfaceMaterial { data, slot });
        if let Err(err) = self.write_descriptor(engine, nodes, handle) {
            if let Ok(mat) = self.materials.remove(handle) {
                let _ = self.slots.release(mat.slot);
            }
            return Err(err);
        }
        Ok(handle)
    }

    pub fn get(&self, handle: SurfaceMaterialHandle) -> Result<&SurfaceMaterial> {
        self.materials.get(handle)
    }

    pub fn slot_index(&self, handle: SurfaceMaterialHandle) -> Result<SlotIndex> {
        Ok(self.materials.get(handle)?.slot)
    }

    pub fn descriptor_buffer(&self) -> BufferHandle {
        self.store.buffer()
    }

    pub fn bsdf_procedure_buffer(&self) -> BufferHandle {
        self.bsdf_store.buffer()
    }

    pub fn edf_procedure_buffer(&self) -> BufferHandle {
        self.edf_store.buffer()
    }

    pub fn descriptor(&self, handle: SurfaceMaterialHandle) -> Result<SurfaceMaterialDescriptor> {
        Ok(self.store.read(self.materials.get(handle)?.slot))
    }

    /// Rewrites the variant payload in place. The variant kind must stay the
    /// same; swapping kinds is a destroy-and-recreate operation.
    pub fn modify(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        nodes: &ShaderNodeGraph,
        handle: SurfaceMaterialHandle,
        data: SurfaceMaterialData,
    ) -> Result<()> {
        let kind = self.materials.get(handle)?.data.kind();
        if data.kind() != kind {
            return Err(Error::WrongNodeKind { actual: kind.name() });
        }
        if let SurfaceMaterialData::Multi { subs } = &data {
            for sub in subs.iter().flatten() {
                if self.embeds(*sub, handle)? {
                    return Err(Error::MaterialCycle);
                }
            }
        }
        self.materials.get_mut(handle)?.data = data;
        self.reserialize_with_dependents(engine, nodes, handle)
    }

    /// Installs or clears one sub-material of a multi-material.
    pub fn set_sub_material(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        nodes: &ShaderNodeGraph,
        multi: SurfaceMaterialHandle,
        index: u32,
        sub: Option<SurfaceMaterialHandle>,
    ) -> Result<()> {
        if index as usize >= MAX_SUB_MATERIALS {
            return Err(Error::SubMaterialIndex {
                index,
                max: MAX_SUB_MATERIALS as u32 - 1,
            });
        }
        if let Some(sub) = sub {
            // validate early so the record never embeds a stale handle, and
            // refuse assignments that would close a serialization loop
            self.materials.get(sub)?;
            if self.embeds(sub, multi)? {
                return Err(Error::MaterialCycle);
            }
        }
        match &mut self.materials.get_mut(multi)?.data {
            SurfaceMaterialData::Multi { subs } => subs[index as usize] = sub,
            data => {
                return Err(Error::WrongNodeKind {
                    actual: data.kind().name(),
                })
            }
        }
        self.reserialize_with_dependents(engine, nodes, multi)
    }

    /// True if `target` is `root` or reachable from `root` through
    /// sub-material edges. Cycle checks run before any edge is installed, so
    /// the walk always terminates.
    fn embeds(
        &self,
        root: SurfaceMaterialHandle,
        target: SurfaceMaterialHandle,
    ) -> Result<bool> {
        if root == target {
            return Ok(true);
        }
        match &self.materials.get(root)?.data {
            SurfaceMaterialData::Multi { subs } => {
                for sub in subs.iter().flatten() {
                    if self.embeds(*sub, target)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// True if the material emits light, looking through multi-materials.
    pub fn is_emitting(&self, handle: SurfaceMaterialHandle) -> Result<bool> {
        match &self.materials.get(handle)?.data {
            SurfaceMaterialData::DiffuseEmitter { .. }
            | SurfaceMaterialData::EnvironmentEmitter { .. } => Ok(true),
            SurfaceMaterialData::Multi { subs } => {
                for sub in subs.iter().flatten() {
                    if self.is_emitting(*sub)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// Multi-materials currently embedding `handle`.
    pub fn referrers(&self, handle: SurfaceMaterialHandle) -> usize {
        self.materials
            .iter()
            .filter(|(_, mat)| match &mat.data {
                SurfaceMaterialData::Multi { subs } => subs.iter().any(|s| *s == Some(handle)),
                _ => false,
            })
            .count()
    }

    /// Materials referencing the given shader node through any input.
    pub fn node_referrers(&self, node: ShaderNodeHandle) -> usize {
        self.materials
            .iter()
            .filter(|(_, mat)| mat.data.shader_node_links().contains(&node))
            .count()
    }

    pub fn destroy(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        handle: SurfaceMaterialHandle,
    ) -> Result<()> {
        let referrers = self.referrers(handle);
        if referrers > 0 {
            return Err(Error::DanglingReference { referrers });
        }
        let mat = self.materials.remove(handle)?;
        debug!(slot = mat.slot, "destroy surface material");
        self.store
            .write(engine, mat.slot, &SurfaceMaterialDescriptor::zeroed());
        self.slots.release(mat.slot)
    }

    /// Re-serializes `handle` and, transitively, every multi-material whose
    /// record inlines it.
    fn reserialize_with_dependents(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        nodes: &ShaderNodeGraph,
        handle: SurfaceMaterialHandle,
    ) -> Result<()> {
        let mut pending = vec![handle];
        let mut done: HashSet<SurfaceMaterialHandle> = HashSet::new();
        while let Some(current) = pending.pop() {
            if !done.insert(current) {
                continue;
            }
            self.write_descriptor(engine, nodes, current)?;
            let embedding: Vec<SurfaceMaterialHandle> = self
                .materials
                .iter()
                .filter(|(_, mat)| match &mat.data {
                    SurfaceMaterialData::Multi { subs } => {
                        subs.iter().any(|s| *s == Some(current))
                    }
                    _ => false,
                })
                .map(|(h, _)| h)
                .collect();
            pending.extend(embedding);
        }
        Ok(())
    }

    fn write_descriptor(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        nodes: &ShaderNodeGraph,
        handle: SurfaceMaterialHandle,
    ) -> Result<()> {
        let words = self.serialize(nodes, handle)?;
        if words.len() > SurfaceMaterialDescriptor::NUM_WORDS {
            return Err(Error::DescriptorOverflow {
                words: words.len(),
                capacity: SurfaceMaterialDescriptor::NUM_WORDS,
            });
        }
        let mut desc = SurfaceMaterialDescriptor::zeroed();
        desc.data[..words.len()].copy_from_slice(&words);
        let slot = self.materials.get(handle)?.slot;
        self.store.write(engine, slot, &desc);
        Ok(())
    }

    /// Head plus body as a flat word vector; multi-materials recurse and
    /// inline their subs after their own body.
    fn serialize(
        &self,
        nodes: &ShaderNodeGraph,
        handle: SurfaceMaterialHandle,
    ) -> Result<Vec<u32>> {
        let mat = self.materials.get(handle)?;
        let kind = mat.data.kind();

        let mut words = Vec::new();
        let (bsdf_setup, bsdf_index) = if kind.has_bsdf() {
            self.bsdf_cache[&kind]
        } else {
            self.null_bsdf
        };
        let (edf_setup, edf_index) = if kind.has_edf() {
            self.edf_cache[&kind]
        } else {
            self.null_edf
        };
        words.push(bsdf_setup as u32);
        words.push(bsdf_index);
        words.push(edf_setup as u32);
        words.push(edf_index);

        let spectrum = |words: &mut Vec<u32>, input: &SpectrumInput| -> Result<()> {
            match input {
                SpectrumInput::Node(h) => {
                    words.push(nodes.slot_index(*h)?);
                    words.extend([0, 0, 0]);
                }
                SpectrumInput::Immediate(value) => {
                    words.push(INVALID_NODE_INDEX);
                    words.extend(value.to_words());
                }
            }
            Ok(())
        };
        let float = |words: &mut Vec<u32>, input: &FloatInput| -> Result<()> {
            match input {
                FloatInput::Node(h) => {
                    words.push(nodes.slot_index(*h)?);
                    words.push(0);
                }
                FloatInput::Immediate(value) => {
                    words.push(INVALID_NODE_INDEX);
                    words.push(value.to_bits());
                }
            }
            Ok(())
        };

        match &mat.data {
            SurfaceMaterialData::Matte { albedo } => spectrum(&mut words, albedo)?,
            SurfaceMaterialData::SpecularReflection { coeff, eta, k } => {
                spectrum(&mut words, coeff)?;
                spectrum(&mut words, eta)?;
                spectrum(&mut words, k)?;
            }
            SurfaceMaterialData::SpecularScattering {
                coeff,
                eta_ext,
                eta_int,
            } => {
                spectrum(&mut words, coeff)?;
                float(&mut words, eta_ext)?;
                float(&mut words, eta_int)?;
            }
            SurfaceMaterialData::MicrofacetReflection {
                eta,
                k,
                roughness,
                anisotropy,
                rotation,
            } => {
                spectrum(&mut words, eta)?;
                spectrum(&mut words, k)?;
                float(&mut words, roughness)?;
                float(&mut words, anisotropy)?;
                float(&mut words, rotation)?;
            }
            SurfaceMaterialData::MicrofacetScattering {
                coeff,
                eta_ext,
                eta_int,
                roughness,
                anisotropy,
                rotation,
            } => {
                spectrum(&mut words, coeff)?;
                float(&mut words, eta_ext)?;
                float(&mut words, eta_int)?;
                float(&mut words, roughness)?;
                float(&mut words, anisotropy)?;
                float(&mut words, rotation)?;
            }
            SurfaceMaterialData::LambertianScattering { coeff, f0 } => {
                spectrum(&mut words, coeff)?;
                float(&mut words, f0)?;
            }
            SurfaceMaterialData::Ue4 {
                base_color,
                occlusion,
                roughness,
                metallic,
            } => {
                spectrum(&mut words, base_color)?;
                float(&mut words, occlusion)?;
                float(&mut words, roughness)?;
                float(&mut words, metallic)?;
            }
            SurfaceMaterialData::DiffuseEmitter { emittance, scale }
            | SurfaceMaterialData::EnvironmentEmitter { emittance, scale } => {
                spectrum(&mut words, emittance)?;
                words.push(scale.to_bits());
            }
            SurfaceMaterialData::Multi { subs } => {
                words.push(subs.iter().flatten().count() as u32);
                let offsets_at = words.len();
                words.extend([INVALID_NODE_INDEX; MAX_SUB_MATERIALS]);
                for (i, sub) in subs.iter().enumerate() {
                    if let Some(sub) = sub {
                        words[offsets_at + i] = words.len() as u32;
                        let sub_words = self.serialize(nodes, *sub)?;
                        words.extend(sub_words);
                    }
                }
            }
        }
        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostEngine;

    fn setup() -> (HostEngine, ShaderNodeGraph, MaterialGraph) {
        let mut engine = HostEngine::new();
        let nodes = ShaderNodeGraph::new(&mut engine, 64).unwrap();
        let materials = MaterialGraph::new(&mut engine, 64).unwrap();
        (engine, nodes, materials)
    }

    fn matte(albedo: RgbSpectrum) -> SurfaceMaterialData {
        SurfaceMaterialData::Matte {
            albedo: SpectrumInput::Immediate(albedo),
        }
    }

    #[test]
    fn matte_descriptor_layout() {
        let (mut engine, nodes, mut materials) = setup();
        let albedo = RgbSpectrum::new(0.7, 0.2, 0.1);
        let handle = materials.create(&mut engine, &nodes, matte(albedo)).unwrap();

        let desc = materials.descriptor(handle).unwrap();
        // head: non-null BSDF, null EDF
        assert_ne!(desc.data[0], 0);
        assert_ne!(desc.data[1], 0);
        assert_eq!(desc.data[3], 0);
        // body: immediate albedo behind an unconnected socket
        assert_eq!(desc.data[4], INVALID_NODE_INDEX);
        assert_eq!(desc.data[5..8], albedo.to_words());
    }

    #[test]
    fn variant_registration_is_shared() {
        let (mut engine, nodes, mut materials) = setup();
        let a = materials
            .create(&mut engine, &nodes, matte(RgbSpectrum::gray(0.1)))
            .unwrap();
        let b = materials
            .create(&mut engine, &nodes, matte(RgbSpectrum::gray(0.9)))
            .unwrap();

        let da = materials.descriptor(a).unwrap();
        let db = materials.descriptor(b).unwrap();
        assert_eq!(da.data[..4], db.data[..4]);
    }

    #[test]
    fn multi_inlines_subs_with_offsets() {
        let (mut engine, nodes, mut materials) = setup();
        let base = materials
            .create(&mut engine, &nodes, matte(RgbSpectrum::gray(0.5)))
            .unwrap();
        let emitter = materials
            .create(
                &mut engine,
                &nodes,
                SurfaceMaterialData::DiffuseEmitter {
                    emittance: SpectrumInput::Immediate(RgbSpectrum::gray(30.0)),
                    scale: 1.0,
                },
            )
            .unwrap();
        let multi = materials
            .create(
                &mut engine,
                &nodes,
                SurfaceMaterialData::Multi {
                    subs: [Some(base), Some(emitter), None, None],
                },
            )
            .unwrap();

        let desc = materials.descriptor(multi).unwrap();
        assert_eq!(desc.data[4], 2); // sub count
        let off0 = desc.data[5] as usize;
        let off1 = desc.data[6] as usize;
        assert_eq!(off0, 9); // 4 head + 5 body
        assert_eq!(desc.data[7], INVALID_NODE_INDEX);

        // each sub record starts with its own head
        let base_desc = materials.descriptor(base).unwrap();
        assert_eq!(desc.data[off0..off0 + 8], base_desc.data[..8]);
        let emitter_desc = materials.descriptor(emitter).unwrap();
        assert_eq!(desc.data[off1..off1 + 9], emitter_desc.data[..9]);
    }

    #[test]
    fn sub_mutation_reserializes_embedding_multi() {
        let (mut engine, nodes, mut materials) = setup();
        let base = materials
            .create(&mut engine, &nodes, matte(RgbSpectrum::gray(0.5)))
            .unwrap();
        let multi = materials
            .create(
                &mut engine,
                &nodes,
                SurfaceMaterialData::Multi {
                    subs: [Some(base), None, None, None],
                },
            )
            .unwrap();

        materials
            .modify(&mut engine, &nodes, base, matte(RgbSpectrum::gray(0.9)))
            .unwrap();

        let desc = materials.descriptor(multi).unwrap();
        let off = desc.data[5] as usize;
        assert_eq!(desc.data[off + 5], 0.9f32.to_bits());
    }

    #[test]
    fn is_emitting_propagates_through_multi() {
        let (mut engine, nodes, mut materials) = setup();
        let base = materials
            .create(&mut engine, &nodes, matte(RgbSpectrum::gray(0.5)))
            .unwrap();
        let multi = materials
            .create(
                &mut engine,
                &nodes,
                SurfaceMaterialData::Multi {
                    subs: [Some(base), None, None, None],
                },
            )
            .unwrap();
        assert!(!materials.is_emitting(multi).unwrap());

        let emitter = materials
            .create(
                &mut engine,
                &nodes,
                SurfaceMaterialData::DiffuseEmitter {
                    emittance: SpectrumInput::Immediate(RgbSpectrum::gray(10.0)),
                    scale: 1.0,
                },
            )
            .unwrap();
        materials
            .set_sub_material(&mut engine, &nodes, multi, 1, Some(emitter))
            .unwrap();
        assert!(materials.is_emitting(multi).unwrap());
    }

    #[test]
    fn destroy_embedded_sub_is_refused() {
        let (mut engine, nodes, mut materials) = setup();
        let base = materials
            .create(&mut engine, &nodes, matte(RgbSpectrum::gray(0.5)))
            .unwrap();
        let multi = materials
            .create(
                &mut engine,
                &nodes,
                SurfaceMaterialData::Multi {
                    subs: [Some(base), None, None, None],
                },
            )
            .unwrap();

        assert_eq!(
            materials.destroy(&mut engine, base),
            Err(Error::DanglingReference { referrers: 1 })
        );
        materials
            .set_sub_material(&mut engine, &nodes, multi, 0, None)
            .unwrap();
        materials.destroy(&mut engine, base).unwrap();
    }

    #[test]
    fn multi_rejects_embedding_itself() {
        let (mut engine, nodes, mut materials) = setup();
        let base = materials
            .create(&mut engine, &nodes, matte(RgbSpectrum::gray(0.5)))
            .unwrap();
        let inner = materials
            .create(
                &mut engine,
                &nodes,
                SurfaceMaterialData::Multi {
                    subs: [Some(base), None, None, None],
                },
            )
            .unwrap();
        let outer = materials
            .create(
                &mut engine,
                &nodes,
                SurfaceMaterialData::Multi {
                    subs: [Some(inner), None, None, None],
                },
            )
            .unwrap();

        // direct self-reference
        assert_eq!(
            materials.set_sub_material(&mut engine, &nodes, inner, 1, Some(inner)),
            Err(Error::MaterialCycle)
        );
        // inner already embeds into outer, so closing the loop is refused
        assert_eq!(
            materials.set_sub_material(&mut engine, &nodes, inner, 1, Some(outer)),
            Err(Error::MaterialCycle)
        );
        assert_eq!(
            materials.modify(
                &mut engine,
                &nodes,
                inner,
                SurfaceMaterialData::Multi {
                    subs: [Some(base), Some(outer), None, None],
                },
            ),
            Err(Error::MaterialCycle)
        );

        // the failed edits left the record untouched
        let desc = materials.descriptor(inner).unwrap();
        assert_eq!(desc.data[4], 1);
    }

    #[test]
    fn descriptor_tables_are_bound_at_creation() {
        let (engine, _nodes, materials) = setup();
        assert_eq!(
            engine.table_binding(DescriptorTable::MaterialDescriptors),
            Some(materials.descriptor_buffer())
        );
        assert_eq!(
            engine.table_binding(DescriptorTable::BsdfProcedureSets),
            Some(materials.bsdf_procedure_buffer())
        );
        assert_eq!(
            engine.table_binding(DescriptorTable::EdfProcedureSets),
            Some(materials.edf_procedure_buffer())
        );
    }

    #[test]
    fn oversized_multi_overflows() {
        let (mut engine, nodes, mut materials) = setup();
        // four specular-reflection subs cannot fit in one record
        let subs: Vec<_> = (0..4)
            .map(|_| {
                materials
                    .create(
                        &mut engine,
                        &nodes,
                        SurfaceMaterialData::SpecularReflection {
                            coeff: SpectrumInput::Immediate(RgbSpectrum::gray(1.0)),
                            eta: SpectrumInput::Immediate(RgbSpectrum::gray(1.5)),
                            k: SpectrumInput::Immediate(RgbSpectrum::zero()),
                        },
                    )
                    .unwrap()
            })
            .collect();

        let result = materials.create(
            &mut engine,
            &nodes,
            SurfaceMaterialData::Multi {
                subs: [Some(subs[0]), Some(subs[1]), Some(subs[2]), Some(subs[3])],
            },
        );
        assert!(matches!(
            result,
            Err(Error::DescriptorOverflow { .. })
        ));
    }
}
