//! Helper module for working with DICOM and imaging data.
//!
//! [`normalize`] turns a DICOM Part-10 file into a [`NormalizedImage`]:
//! one frame of pixel samples in row-major order, plus the attributes needed
//! to display and describe it. The pipeline is tolerant: when the decoded
//! image abstraction of DICOM-rs cannot be built, the pixel data is taken
//! straight from the data set. Failures never escape; they are logged and
//! yield an invalid record (see [`NormalizedImage::is_valid`]).

use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use dicom::core::value::Value;
use dicom::core::{PrimitiveValue, Tag};
use dicom::dictionary_std::tags;
use dicom::object::{file::ReadPreamble, open_file, DefaultDicomObject, OpenFileOptions};
use dicom::pixeldata::{
    ConvertOptions, DecodedPixelData, ModalityLutOption, PixelDecoder, Transcode,
};
use dicom::transfer_syntax::entries::{EXPLICIT_VR_LITTLE_ENDIAN, IMPLICIT_VR_LITTLE_ENDIAN};
use log::{debug, error, warn};
use snafu::prelude::*;

use crate::codec::CodecScope;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Image dimensions are invalid ({}x{}) using {}", width, height, path))]
    InvalidDimensions {
        path: &'static str,
        width: u32,
        height: u32,
    },
    #[snafu(display(
        "Calculated output data size is 0 (width={}, height={}, samples_per_pixel={}, bits_allocated={})",
        width,
        height,
        samples_per_pixel,
        bits_allocated
    ))]
    EmptyOutputSize {
        width: u32,
        height: u32,
        samples_per_pixel: u16,
        bits_allocated: u16,
    },
    #[snafu(display("Failed to extract any pixel data"))]
    NothingWritten,
    #[snafu(whatever, display("{}", message))]
    Other {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A set of visualization window level parameters
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct WindowLevel {
    pub width: f64,
    pub center: f64,
}

impl WindowLevel {
    /// The linear window mapping `min` to black and `max` to white.
    pub fn from_min_max(min: f64, max: f64) -> Self {
        let width = (max - min).max(0.) + 1.;
        WindowLevel {
            width,
            center: (min + max + 1.) / 2.,
        }
    }

    /// Map a value to the 8-bit output range.
    pub fn apply(&self, x: f64) -> u8 {
        window_level_linear(x, self.width, self.center) as u8
    }
}

pub(crate) fn window_level_linear(x: f64, ww: f64, wc: f64) -> f64 {
    debug_assert!(ww >= 1.);

    // C.11.2.1.2.1
    let min = wc - (ww - 1.) / 2.;
    let max = wc - 0.5 + (ww - 1.) / 2.;

    if x <= min {
        // if (x <= c - (w-1) / 2), then y = ymin
        0.
    } else if x > max {
        // else if (x > c - 0.5 + (w-1) /2), then y = ymax
        255.
    } else {
        // else y = ((x - (c - 0.5)) / (w-1) + 0.5) * (ymax- ymin) + ymin
        ((x - (wc - 0.5)) / (ww - 1.) + 0.5) * 255.
    }
}

/// Bit depth requested for the rendered samples.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq)]
pub enum BitDepth {
    #[default]
    Eight,
    Sixteen,
}

impl BitDepth {
    pub fn bits(self) -> u16 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Sixteen => 16,
        }
    }

    pub fn bytes(self) -> usize {
        usize::from(self.bits() / 8)
    }
}

impl From<bool> for BitDepth {
    /// `true` requests 16 bits per sample.
    fn from(want_16bit: bool) -> Self {
        if want_16bit {
            BitDepth::Sixteen
        } else {
            BitDepth::Eight
        }
    }
}

/// A single DICOM frame in memory, ready for display.
///
/// Built once by [`normalize`] and never modified afterwards.
#[derive(Clone, PartialEq)]
pub struct NormalizedImage {
    width: u32,
    height: u32,
    bit_depth: BitDepth,
    spacing_x: f64,
    spacing_y: f64,
    samples_per_pixel: u16,
    bits_allocated: u16,
    bits_stored: u16,
    high_bit: u16,
    pixel_representation: u16,
    planar_configuration: u16,
    window_center: f64,
    window_width: f64,
    patient_name: Option<String>,
    study_date: Option<String>,
    modality: Option<String>,
    photometric_interpretation: String,
    buffer: Vec<u8>,
    bytes_written: usize,
}

impl Default for NormalizedImage {
    fn default() -> Self {
        NormalizedImage {
            width: 0,
            height: 0,
            bit_depth: BitDepth::Eight,
            spacing_x: 1.,
            spacing_y: 1.,
            samples_per_pixel: 1,
            bits_allocated: 8,
            bits_stored: 8,
            high_bit: 7,
            pixel_representation: 0,
            planar_configuration: 0,
            window_center: 0.,
            window_width: 0.,
            patient_name: None,
            study_date: None,
            modality: None,
            photometric_interpretation: "MONOCHROME2".to_string(),
            buffer: Vec::new(),
            bytes_written: 0,
        }
    }
}

impl fmt::Debug for NormalizedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NormalizedImage({}x{}x{}, {} bits, {} bytes)",
            self.width,
            self.height,
            self.samples_per_pixel,
            self.bit_depth.bits(),
            self.buffer.len()
        )
    }
}

impl NormalizedImage {
    /// Whether the record holds pixel data with usable dimensions.
    pub fn is_valid(&self) -> bool {
        !self.buffer.is_empty() && self.width > 0 && self.height > 0
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    /// Horizontal pixel spacing. Not read from the data set, always 1.0.
    pub fn spacing_x(&self) -> f64 {
        self.spacing_x
    }

    /// Vertical pixel spacing. Not read from the data set, always 1.0.
    pub fn spacing_y(&self) -> f64 {
        self.spacing_y
    }

    pub fn samples_per_pixel(&self) -> u16 {
        self.samples_per_pixel
    }

    pub fn bits_allocated(&self) -> u16 {
        self.bits_allocated
    }

    pub fn bits_stored(&self) -> u16 {
        self.bits_stored
    }

    pub fn high_bit(&self) -> u16 {
        self.high_bit
    }

    /// 0 for unsigned samples, 1 for two's complement.
    pub fn pixel_representation(&self) -> u16 {
        self.pixel_representation
    }

    pub fn planar_configuration(&self) -> u16 {
        self.planar_configuration
    }

    pub fn window_center(&self) -> f64 {
        self.window_center
    }

    pub fn window_width(&self) -> f64 {
        self.window_width
    }

    pub fn patient_name(&self) -> Option<&str> {
        self.patient_name.as_deref()
    }

    pub fn study_date(&self) -> Option<&str> {
        self.study_date.as_deref()
    }

    pub fn modality(&self) -> Option<&str> {
        self.modality.as_deref()
    }

    pub fn photometric_interpretation(&self) -> &str {
        &self.photometric_interpretation
    }

    /// The pixel samples of the frame, row by row.
    /// 16-bit samples are little endian.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// How many bytes of [`buffer`](Self::buffer) were filled from the source.
    /// The rest, if any, is zero padding.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

/// Load the DICOM file at `path` and normalize its first frame.
///
/// `want_16bit` selects the bit depth of monochrome output.
/// Color images are always rendered with 8 bits per channel.
/// Never fails: check [`NormalizedImage::is_valid`] on the outcome.
pub fn normalize(path: impl AsRef<Path>, want_16bit: bool) -> NormalizedImage {
    let path = path.as_ref();
    let scope = CodecScope::acquire();
    let outcome = open_file(path)
        .whatever_context("Cannot read DICOM file")
        .and_then(|obj| normalize_object(obj, BitDepth::from(want_16bit), &scope));
    finish(outcome, &path.display().to_string())
}

/// Same as [`normalize`], for a DICOM Part-10 stream already in memory
/// (preamble included).
pub fn normalize_bytes(byte_data: &[u8], want_16bit: bool) -> NormalizedImage {
    let scope = CodecScope::acquire();
    let outcome = byte_data_to_dicom_obj(byte_data)
        .and_then(|obj| normalize_object(obj, BitDepth::from(want_16bit), &scope));
    finish(outcome, "<memory>")
}

#[inline]
pub fn byte_data_to_dicom_obj(byte_data: &[u8]) -> Result<DefaultDicomObject> {
    OpenFileOptions::new()
        .read_preamble(ReadPreamble::Always)
        .from_reader(byte_data)
        .whatever_context("Cannot read DICOM data")
}

fn finish(outcome: Result<NormalizedImage>, origin: &str) -> NormalizedImage {
    match outcome {
        Ok(image) => {
            debug!("{}: normalized into {:?}", origin, image);
            image
        }
        Err(e) => {
            error!("{}: {}", origin, report(&e));
            NormalizedImage::default()
        }
    }
}

/// The error message followed by all of its causes.
fn report(e: &Error) -> String {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}

/// How the pixel data is obtained, decided once geometry is resolved.
enum DecodePath<'a> {
    /// DICOM-rs could decode the pixel data, it does the rendering.
    Abstraction(DecodedPixelData<'a>),
    /// Samples are copied out of the PixelData element as they are.
    RawDataset,
}

impl DecodePath<'_> {
    fn name(&self) -> &'static str {
        match self {
            DecodePath::Abstraction(_) => "decoded image",
            DecodePath::RawDataset => "data set attributes",
        }
    }
}

/// Image attributes as found in the data set, before any defaults.
#[derive(Debug, Default, Clone, PartialEq)]
struct DatasetAttributes {
    planar_configuration: Option<u16>,
    photometric_interpretation: Option<String>,
    rows: Option<u16>,
    columns: Option<u16>,
    samples_per_pixel: Option<u16>,
    bits_allocated: Option<u16>,
    bits_stored: Option<u16>,
    high_bit: Option<u16>,
    pixel_representation: Option<u16>,
    window_center: Option<f64>,
    window_width: Option<f64>,
    patient_name: Option<String>,
    study_date: Option<String>,
    modality: Option<String>,
}

impl DatasetAttributes {
    fn probe(obj: &DefaultDicomObject) -> Self {
        DatasetAttributes {
            planar_configuration: int_attr(obj, tags::PLANAR_CONFIGURATION),
            photometric_interpretation: str_attr(obj, tags::PHOTOMETRIC_INTERPRETATION),
            rows: int_attr(obj, tags::ROWS),
            columns: int_attr(obj, tags::COLUMNS),
            samples_per_pixel: int_attr(obj, tags::SAMPLES_PER_PIXEL),
            bits_allocated: int_attr(obj, tags::BITS_ALLOCATED),
            bits_stored: int_attr(obj, tags::BITS_STORED),
            high_bit: int_attr(obj, tags::HIGH_BIT),
            pixel_representation: int_attr(obj, tags::PIXEL_REPRESENTATION),
            window_center: float_attr(obj, tags::WINDOW_CENTER),
            window_width: float_attr(obj, tags::WINDOW_WIDTH),
            patient_name: str_attr(obj, tags::PATIENT_NAME),
            study_date: str_attr(obj, tags::STUDY_DATE),
            modality: str_attr(obj, tags::MODALITY),
        }
    }

    /// Copy every attribute found into `output`, leaving its defaults otherwise.
    fn apply_to(&self, output: &mut NormalizedImage) {
        output.photometric_interpretation = match &self.photometric_interpretation {
            Some(pi) => pi.clone(),
            None => {
                warn!("PhotometricInterpretation missing, assuming RGB");
                "RGB".to_string()
            }
        };
        if let Some(v) = self.planar_configuration {
            output.planar_configuration = v;
        }
        if let Some(v) = self.samples_per_pixel {
            output.samples_per_pixel = v;
        }
        if let Some(v) = self.bits_allocated {
            output.bits_allocated = v;
        }
        if let Some(v) = self.bits_stored {
            output.bits_stored = v;
        }
        if let Some(v) = self.high_bit {
            output.high_bit = v;
        }
        if let Some(v) = self.pixel_representation {
            output.pixel_representation = v;
        }
        if let Some(v) = self.window_center {
            output.window_center = v;
        }
        if let Some(v) = self.window_width {
            output.window_width = v;
        }
        output.patient_name = self.patient_name.clone();
        output.study_date = self.study_date.clone();
        output.modality = self.modality.clone();
    }
}

fn int_attr(obj: &DefaultDicomObject, tag: Tag) -> Option<u16> {
    obj.element(tag).ok()?.to_int::<u16>().ok()
}

fn float_attr(obj: &DefaultDicomObject, tag: Tag) -> Option<f64> {
    obj.element(tag).ok()?.to_float64().ok()
}

fn str_attr(obj: &DefaultDicomObject, tag: Tag) -> Option<String> {
    let value = obj.element(tag).ok()?.to_str().ok()?;
    let value = value.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn normalize_object(
    mut obj: DefaultDicomObject,
    requested: BitDepth,
    scope: &CodecScope,
) -> Result<NormalizedImage> {
    negotiate_transfer_syntax(&mut obj, scope);

    let attributes = DatasetAttributes::probe(&obj);
    let mut output = NormalizedImage::default();
    attributes.apply_to(&mut output);

    let path = match obj.decode_pixel_data() {
        Ok(decoded) if decoded.rows() > 0 && decoded.columns() > 0 => {
            DecodePath::Abstraction(decoded)
        }
        Ok(_) => {
            warn!("Decoded image has no dimensions, using data set dimensions instead");
            DecodePath::RawDataset
        }
        Err(e) => {
            warn!("Cannot decode DICOM image ({}), using data set dimensions instead", e);
            DecodePath::RawDataset
        }
    };

    let (width, height) = match &path {
        DecodePath::Abstraction(decoded) => (decoded.columns(), decoded.rows()),
        DecodePath::RawDataset => (
            u32::from(attributes.columns.unwrap_or(0)),
            u32::from(attributes.rows.unwrap_or(0)),
        ),
    };
    ensure!(
        width > 0 && height > 0,
        InvalidDimensionsSnafu {
            path: path.name(),
            width,
            height,
        }
    );
    output.width = width;
    output.height = height;
    output.bit_depth = requested;

    // color is always 8 bits per channel, interleaved
    if attributes.samples_per_pixel == Some(3) {
        output.bit_depth = BitDepth::Eight;
    }

    let depth = output.bit_depth;
    let extracted = extract_pixels(&path, &obj, &attributes, width, height, depth);
    let (buffer, bytes_written) = match extracted {
        // the decoded frame may be shorter than its geometry or laid out in planes
        Err(e) if matches!(path, DecodePath::Abstraction(_)) => {
            warn!(
                "Cannot render the {} ({}), copying PixelData from the data set instead",
                path.name(),
                report(&e)
            );
            extract_pixels(&DecodePath::RawDataset, &obj, &attributes, width, height, depth)?
        }
        outcome => outcome?,
    };

    output.buffer = buffer;
    output.bytes_written = bytes_written;
    Ok(output)
}

/// Size a zeroed buffer for the frame and fill it through `path`.
/// Returns the buffer and how many bytes of it were filled.
fn extract_pixels(
    path: &DecodePath<'_>,
    obj: &DefaultDicomObject,
    attributes: &DatasetAttributes,
    width: u32,
    height: u32,
    depth: BitDepth,
) -> Result<(Vec<u8>, usize)> {
    let pixels = width as usize * height as usize;
    let samples_per_pixel = attributes.samples_per_pixel.unwrap_or(0);
    let bits_allocated = attributes.bits_allocated.unwrap_or(0);

    let size = if samples_per_pixel == 3 {
        pixels * 3
    } else {
        match path {
            DecodePath::Abstraction(decoded) => {
                pixels * usize::from(decoded.samples_per_pixel()) * depth.bytes()
            }
            DecodePath::RawDataset => {
                pixels * bytes_per_sample(bits_allocated) * usize::from(samples_per_pixel)
            }
        }
    };
    ensure!(
        size > 0,
        EmptyOutputSizeSnafu {
            width,
            height,
            samples_per_pixel,
            bits_allocated,
        }
    );

    let mut buffer = vec![0; size];
    let bytes_written = match path {
        DecodePath::Abstraction(decoded) => render_decoded(decoded, depth, &mut buffer)?,
        DecodePath::RawDataset => {
            let written = copy_raw_pixel_data(obj, &mut buffer)?;
            if samples_per_pixel == 3 && attributes.planar_configuration == Some(1) {
                buffer = interleave_planes(&buffer, pixels);
            }
            written
        }
    };
    ensure!(bytes_written > 0, NothingWrittenSnafu);

    Ok((buffer, bytes_written))
}

/// Bring the pixel data into an uncompressed little endian form.
/// Failing to do so is not an error: the data may already be native.
fn negotiate_transfer_syntax(obj: &mut DefaultDicomObject, scope: &CodecScope) {
    let source_ts = obj.meta().transfer_syntax().to_string();
    if !scope.supports_decoding(&source_ts) {
        warn!("Transfer syntax {} is not fully supported", source_ts.trim_end_matches('\0'));
    }

    if let Err(e) = obj.transcode(&EXPLICIT_VR_LITTLE_ENDIAN.erased()) {
        warn!("Transcoding to Explicit VR Little Endian failed ({})", e);
        if let Err(e) = obj.transcode(&IMPLICIT_VR_LITTLE_ENDIAN.erased()) {
            warn!("Transcoding to Implicit VR Little Endian also failed ({})", e);
        }
    }
}

/// ceil(bits / 8)
fn bytes_per_sample(bits_allocated: u16) -> usize {
    (usize::from(bits_allocated) + 7) / 8
}

fn render_decoded(
    decoded: &DecodedPixelData<'_>,
    depth: BitDepth,
    buffer: &mut [u8],
) -> Result<usize> {
    let raw_values = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);

    let samples: Vec<u8> = if decoded.samples_per_pixel() == 1 {
        match depth {
            BitDepth::Eight => {
                let values: Vec<f32> = decoded
                    .to_vec_frame(0)
                    .whatever_context("Could not convert decoded pixel data")?;
                apply_min_max_window(&values)
            }
            BitDepth::Sixteen => {
                let values: Vec<i32> = decoded
                    .to_vec_frame_with_options(0, &raw_values)
                    .whatever_context("Could not convert decoded pixel data")?;
                // keep the stored bit pattern, signed or not
                values
                    .into_iter()
                    .flat_map(|v| (v as u16).to_le_bytes())
                    .collect()
            }
        }
    } else if decoded.bits_allocated() <= 8 {
        decoded
            .to_vec_frame(0)
            .whatever_context("Could not convert decoded color pixel data")?
    } else {
        let shift = decoded.bits_stored().saturating_sub(8);
        let values: Vec<u16> = decoded
            .to_vec_frame_with_options(0, &raw_values)
            .whatever_context("Could not convert decoded color pixel data")?;
        values.into_iter().map(|v| (v >> shift) as u8).collect()
    };

    Ok(copy_truncated(&samples, buffer, "rendered pixel data"))
}

/// Window the values linearly from their minimum to their maximum.
fn apply_min_max_window(values: &[f32]) -> Vec<u8> {
    let (min, max) = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| {
            (min.min(f64::from(v)), max.max(f64::from(v)))
        });
    if min > max {
        return Vec::new();
    }
    let window = WindowLevel::from_min_max(min, max);
    values.iter().map(|&v| window.apply(f64::from(v))).collect()
}

/// Copy the PixelData element into `buffer` without interpreting it.
fn copy_raw_pixel_data(obj: &DefaultDicomObject, buffer: &mut [u8]) -> Result<usize> {
    let element = obj
        .element(tags::PIXEL_DATA)
        .whatever_context("Could not fetch PixelData")?;

    let bytes: Cow<[u8]> = match element.value() {
        Value::Primitive(PrimitiveValue::U8(bytes)) => Cow::Borrowed(&bytes[..]),
        Value::Primitive(PrimitiveValue::U16(words)) => {
            debug!("PixelData is not a byte array, reading it as a word array");
            Cow::Owned(words.iter().flat_map(|w| w.to_le_bytes()).collect())
        }
        Value::PixelSequence { .. } => {
            whatever!("PixelData is still encapsulated, cannot copy compressed fragments")
        }
        _ => whatever!("Could not extract PixelData as a byte array nor as a word array"),
    };

    Ok(copy_truncated(&bytes, buffer, "PixelData"))
}

/// Copy as much of `source` as fits, returning the number of bytes copied.
fn copy_truncated(source: &[u8], buffer: &mut [u8], what: &str) -> usize {
    let len = source.len().min(buffer.len());
    if source.len() > buffer.len() {
        warn!(
            "{} ({} bytes) larger than allocated buffer ({} bytes), truncating",
            what,
            source.len(),
            buffer.len()
        );
    } else if source.len() < buffer.len() {
        debug!("{} ({} bytes) shorter than buffer ({} bytes)", what, source.len(), buffer.len());
    }
    buffer[..len].copy_from_slice(&source[..len]);
    len
}

/// Reorder `RRR…GGG…BBB…` into `RGBRGB…`.
fn interleave_planes(planar: &[u8], pixels: usize) -> Vec<u8> {
    if planar.len() != pixels * 3 {
        return planar.to_vec();
    }
    let (red, rest) = planar.split_at(pixels);
    let (green, blue) = rest.split_at(pixels);
    red.iter()
        .zip(green)
        .zip(blue)
        .flat_map(|((&r, &g), &b)| [r, g, b])
        .collect()
}
