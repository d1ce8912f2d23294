//! Conversion of normalized images into RGBA bitmaps for display.

use crate::imaging::{NormalizedImage, WindowLevel};

/// Convert the image into `width * height` RGBA pixels.
///
/// The width of grayscale samples is taken from the buffer size,
/// not from the requested bit depth.
/// Returns `None` for invalid images, unsupported sample layouts,
/// or buffers too short for the declared geometry.
pub fn to_rgba(image: &NormalizedImage) -> Option<Vec<u8>> {
    if !image.is_valid() {
        return None;
    }
    let pixels = image.width() as usize * image.height() as usize;
    let buffer = image.buffer();

    match (image.samples_per_pixel(), buffer.len() / pixels) {
        (3, _) => {
            let samples = buffer.get(..pixels * 3)?;
            Some(
                samples
                    .chunks_exact(3)
                    .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 0xFF])
                    .collect(),
            )
        }
        (1, 1) => {
            let samples = buffer.get(..pixels)?;
            Some(samples.iter().flat_map(|&v| [v, v, v, 0xFF]).collect())
        }
        (1, 2) => {
            let samples = buffer.get(..pixels * 2)?;
            Some(gray16_to_rgba(samples, image.pixel_representation() == 1))
        }
        _ => None,
    }
}

fn gray16_to_rgba(samples: &[u8], signed: bool) -> Vec<u8> {
    let values: Vec<f64> = samples
        .chunks_exact(2)
        .map(|b| {
            let raw = u16::from_le_bytes([b[0], b[1]]);
            if signed {
                f64::from(raw as i16)
            } else {
                f64::from(raw)
            }
        })
        .collect();

    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &v| (min.min(v), max.max(v)));
    let window = WindowLevel::from_min_max(min, max);

    values
        .into_iter()
        .map(|v| window.apply(v))
        .flat_map(|v| [v, v, v, 0xFF])
        .collect()
}
