//! Host-side 2D images uploaded as linear pixel buffers.

use crate::backend::{BufferHandle, ExecutionEngine};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Rgba8,
    Rgba32F,
    Gray8,
}

impl ImageFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ImageFormat::Rgba8 => 4,
            ImageFormat::Rgba32F => 16,
            ImageFormat::Gray8 => 1,
        }
    }
}

fn degamma_srgb(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

/// A tightly packed 2D pixel array mirrored into an engine buffer.
///
/// 8-bit sRGB content can be linearized at construction; the stored format is
/// unchanged, only the sample values are remapped.
pub struct LinearImage2D {
    width: u32,
    height: u32,
    format: ImageFormat,
    buffer: BufferHandle,
}

impl LinearImage2D {
    pub fn new(
        engine: &mut dyn ExecutionEngine,
        data: &[u8],
        width: u32,
        height: u32,
        format: ImageFormat,
        apply_degamma: bool,
    ) -> Self {
        let bpp = format.bytes_per_pixel();
        assert_eq!(data.len(), width as usize * height as usize * bpp);

        let buffer = engine.create_buffer(bpp, width * height);
        if apply_degamma && matches!(format, ImageFormat::Rgba8 | ImageFormat::Gray8) {
            let mut linear = Vec::with_capacity(data.len());
            for (i, &byte) in data.iter().enumerate() {
                // alpha stays linear
                let is_alpha = format == ImageFormat::Rgba8 && i % 4 == 3;
                if is_alpha {
                    linear.push(byte);
                } else {
                    let v = degamma_srgb(byte as f32 / 255.0);
                    linear.push((v * 255.0 + 0.5) as u8);
                }
            }
            engine.write_buffer(buffer, 0, &linear);
        } else {
            engine.write_buffer(buffer, 0, data);
        }

        LinearImage2D {
            width,
            height,
            format,
            buffer,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn destroy(self, engine: &mut dyn ExecutionEngine) {
        engine.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostEngine;

    #[test]
    fn upload_without_degamma_is_verbatim() {
        let mut engine = HostEngine::new();
        let pixels = [10u8, 20, 30, 255, 40, 50, 60, 128];
        let img = LinearImage2D::new(&mut engine, &pixels, 2, 1, ImageFormat::Rgba8, false);
        assert_eq!(engine.read_buffer(img.buffer()), pixels.to_vec());
    }

    #[test]
    fn degamma_linearizes_color_but_not_alpha() {
        let mut engine = HostEngine::new();
        let pixels = [128u8, 128, 128, 128];
        let img = LinearImage2D::new(&mut engine, &pixels, 1, 1, ImageFormat::Rgba8, true);
        let out = engine.read_buffer(img.buffer());
        // sRGB 128 linearizes to about 0.2158
        assert_eq!(out[0], 55);
        assert_eq!(out[1], 55);
        assert_eq!(out[2], 55);
        assert_eq!(out[3], 128);
    }
}
