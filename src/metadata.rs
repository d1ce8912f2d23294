//! Human readable metadata report of a normalized image.

use std::fmt::Write;

use crate::imaging::NormalizedImage;

/// Placeholder for attributes missing from the data set.
pub const NOT_AVAILABLE: &str = "N/A";

/// Render the patient, image, pixel and windowing attributes of `image`
/// as a fixed-structure text report.
pub fn format_report(image: &NormalizedImage) -> String {
    let mut text = String::new();
    // writing into a String cannot fail
    let _ = write_report(&mut text, image);
    text
}

fn write_report(out: &mut String, image: &NormalizedImage) -> std::fmt::Result {
    writeln!(out, "Paciente")?;
    writeln!(out, "  Nome: {}", or_not_available(image.patient_name()))?;
    writeln!(out, "  Data do Estudo: {}", or_not_available(image.study_date()))?;
    writeln!(out)?;

    writeln!(out, "Imagem")?;
    writeln!(out, "  Dimensões: {} x {} pixels", image.width(), image.height())?;
    writeln!(out, "  Profundidade de Bits: {} bits", image.bit_depth().bits())?;
    writeln!(out, "  Espaçamento X: {:.6}", image.spacing_x())?;
    writeln!(out, "  Espaçamento Y: {:.6}", image.spacing_y())?;
    writeln!(
        out,
        "  Photometric Interpretation: {}",
        or_not_available(Some(image.photometric_interpretation()))
    )?;
    writeln!(out)?;

    writeln!(out, "Informações de Pixel")?;
    writeln!(out, "  Samples per Pixel: {}", image.samples_per_pixel())?;
    writeln!(out, "  Bits Allocated: {}", image.bits_allocated())?;
    writeln!(out, "  Bits Stored: {}", image.bits_stored())?;
    writeln!(out, "  High Bit: {}", image.high_bit())?;
    let signedness = if image.pixel_representation() == 0 {
        "Unsigned"
    } else {
        "Signed"
    };
    writeln!(
        out,
        "  Pixel Representation: {} ({})",
        image.pixel_representation(),
        signedness
    )?;
    writeln!(out)?;

    writeln!(out, "Janelamento")?;
    writeln!(out, "  Window Center: {:.6}", image.window_center())?;
    writeln!(out, "  Window Width: {:.6}", image.window_width())?;
    writeln!(out)?;

    writeln!(out, "Modalidade: {}", or_not_available(image.modality()))
}

fn or_not_available(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => NOT_AVAILABLE,
    }
}
