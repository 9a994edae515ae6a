/// Panoptic id map decoder
///
/// Panoptic masks are stored as RGB PNGs where each pixel encodes its segment
/// id as `R + 256 * G + 256^2 * B`. The decoded map is kept in row-major order.
use std::path::Path;
use image::{Rgb, RgbImage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanopticMask {
    pub width: u32,
    pub height: u32,
    pub ids: Vec<u32>,
}

pub fn rgb_to_id(pixel: &Rgb<u8>) -> u32 {
    let [r, g, b] = pixel.0;
    r as u32 + 256 * g as u32 + 256 * 256 * b as u32
}

pub fn id_to_rgb(id: u32) -> Rgb<u8> {
    Rgb([(id % 256) as u8, ((id / 256) % 256) as u8, ((id / 65536) % 256) as u8])
}

impl PanopticMask {
    pub fn open(path: &Path) -> Result<Self, image::ImageError> {
        let rgb = image::open(path)?.to_rgb8();
        Ok(Self::from_rgb(&rgb))
    }

    pub fn from_rgb(rgb: &RgbImage) -> Self {
        Self {
            width: rgb.width(),
            height: rgb.height(),
            ids: rgb.pixels().map(rgb_to_id).collect(),
        }
    }

    pub fn id_at(&self, x: u32, y: u32) -> u32 {
        self.ids[(y * self.width + x) as usize]
    }

    /// Percentage of pixels whose id differs from `background_id`
    pub fn coverage(&self, background_id: u32) -> f64 {
        if self.ids.is_empty() {
            return 0.0;
        }
        let labeled = self.ids.iter().filter(|&&id| id != background_id).count();
        labeled as f64 / self.ids.len() as f64 * 100.0
    }
}
