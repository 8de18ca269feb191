use bytemuck::{Pod, Zeroable};

/// RGB radiance/reflectance triplet, the spectrum representation every
/// descriptor record embeds.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Pod, Zeroable)]
pub struct RgbSpectrum {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl RgbSpectrum {
    pub fn new(r: f32, g: f32, b: f32) -> Self {
        RgbSpectrum { r, g, b }
    }

    pub fn zero() -> Self {
        RgbSpectrum::default()
    }

    pub fn gray(v: f32) -> Self {
        RgbSpectrum { r: v, g: v, b: v }
    }

    /// Descriptor records store spectra as raw u32 words.
    pub fn to_words(&self) -> [u32; 3] {
        [self.r.to_bits(), self.g.to_bits(), self.b.to_bits()]
    }
}
