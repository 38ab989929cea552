use image::{imageops::FilterType, RgbaImage};
use serde::{Deserialize, Serialize};
use zbus::zvariant::{OwnedValue, Type, Value};

/// Square sizes published for every icon, covering the common tray and tooltip sizes.
pub const PIXMAP_SIZES: [u32; 7] = [16, 22, 24, 32, 48, 64, 128];

/// One entry of the SNI [Icon format]: `(iiay)`, pixels in ARGB32 big-endian order.
///
/// [Icon format]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/Icons/
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Type, Value, OwnedValue,
)]
pub struct Pixmap {
    pub width: i32,
    pub height: i32,
    pub bytes: Vec<u8>,
}

/// SNI `ToolTip` struct: `(icon name, icon pixmaps, title, description)`.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Type, Value, OwnedValue,
)]
pub struct ToolTip {
    pub icon_name: String,
    pub icon_pixmap: Vec<Pixmap>,
    pub title: String,
    pub description: String,
}

impl ToolTip {
    pub fn new(title: &str, icon_pixmap: Vec<Pixmap>) -> Self {
        Self {
            icon_name: String::new(),
            icon_pixmap,
            title: title.to_string(),
            description: String::new(),
        }
    }
}

/// Decode `data` and produce one pixmap per entry of [`PIXMAP_SIZES`].
///
/// Returns an empty list if `data` is empty or can't be decoded.
pub fn build_pixmaps(data: &[u8]) -> Vec<Pixmap> {
    if data.is_empty() {
        return Vec::new();
    }
    let source = match image::load_from_memory(data) {
        Ok(img) => img.into_rgba8(),
        Err(err) => {
            log::warn!("failed to decode icon ({} bytes): {}", data.len(), err);
            return Vec::new();
        }
    };
    PIXMAP_SIZES
        .iter()
        .map(|&size| pixmap_from_rgba(&source, size))
        .collect()
}

fn pixmap_from_rgba(source: &RgbaImage, size: u32) -> Pixmap {
    let resized = if source.width() == size && source.height() == size {
        source.clone()
    } else {
        image::imageops::resize(source, size, size, FilterType::CatmullRom)
    };
    Pixmap {
        width: size as i32,
        height: size as i32,
        bytes: rgba_to_argb(resized.into_raw()),
    }
}

/// Reorder RGBA samples to ARGB in place.
fn rgba_to_argb(mut data: Vec<u8>) -> Vec<u8> {
    for pixel in data.chunks_exact_mut(4) {
        pixel.rotate_right(1);
    }
    data
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgba};
    use pretty_assertions::assert_eq;

    use super::*;

    fn encode_png(img: &RgbaImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn opaque_red_png_produces_full_ladder() {
        let png = encode_png(&RgbaImage::from_pixel(64, 64, Rgba([255, 0, 0, 255])));
        let pixmaps = build_pixmaps(&png);

        let sizes: Vec<(i32, i32)> = pixmaps.iter().map(|p| (p.width, p.height)).collect();
        assert_eq!(
            sizes,
            vec![
                (16, 16),
                (22, 22),
                (24, 24),
                (32, 32),
                (48, 48),
                (64, 64),
                (128, 128)
            ]
        );
        for p in &pixmaps {
            assert_eq!(p.bytes.len(), (p.width * p.height * 4) as usize);
        }
        let px32 = &pixmaps[3];
        assert_eq!(&px32.bytes[0..4], &[0xFF, 0xFF, 0x00, 0x00]);
    }

    #[test]
    fn channels_are_reordered_alpha_first() {
        let png = encode_png(&RgbaImage::from_pixel(16, 16, Rgba([10, 20, 30, 40])));
        let pixmaps = build_pixmaps(&png);
        // 16x16 is copied without resampling
        assert_eq!(&pixmaps[0].bytes[0..8], &[40, 10, 20, 30, 40, 10, 20, 30]);
    }

    #[test]
    fn transparent_pixels_keep_zero_alpha() {
        let png = encode_png(&RgbaImage::from_pixel(32, 32, Rgba([0, 0, 0, 0])));
        for p in build_pixmaps(&png) {
            assert!(p.bytes.chunks_exact(4).all(|px| px[0] == 0));
        }
    }

    #[test]
    fn empty_or_garbage_input_yields_nothing() {
        assert!(build_pixmaps(&[]).is_empty());
        assert!(build_pixmaps(b"definitely not an image").is_empty());
    }

    #[test]
    fn tooltip_carries_title_and_icon() {
        let tip = ToolTip::new("hello", vec![Pixmap::default()]);
        assert_eq!(tip.icon_name, "");
        assert_eq!(tip.title, "hello");
        assert_eq!(tip.description, "");
        assert_eq!(tip.icon_pixmap.len(), 1);
    }
}
