use std::io::Cursor;

use brandkit_core::{Color, CoreError, EncodeFormat, FormatPolicy};
use brandkit_image::{flatten_onto, is_opaque};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_LADDER: [u8; 14] = [95, 90, 85, 80, 75, 70, 65, 60, 55, 50, 45, 40, 38, 36];
pub const DEFAULT_FLOOR: u8 = brandkit_core::DEFAULT_QUALITY_FLOOR;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatCapability {
    pub format: EncodeFormat,
    pub lossless: bool,
    pub supports_alpha: bool,
    /// Inclusive quality bounds for lossy formats.
    pub quality_range: Option<(u8, u8)>,
}

/// The set of formats encoders may use. Passed explicitly to every encode step.
#[derive(Debug, Clone)]
pub struct FormatTable {
    entries: Vec<FormatCapability>,
}

impl FormatTable {
    pub fn new(entries: Vec<FormatCapability>) -> Self {
        Self { entries }
    }

    pub fn standard() -> Self {
        Self::new(vec![
            FormatCapability {
                format: EncodeFormat::Png,
                lossless: true,
                supports_alpha: true,
                quality_range: None,
            },
            FormatCapability {
                format: EncodeFormat::Jpeg,
                lossless: false,
                supports_alpha: false,
                quality_range: Some((1, 100)),
            },
        ])
    }

    pub fn get(&self, format: EncodeFormat) -> Option<&FormatCapability> {
        self.entries.iter().find(|entry| entry.format == format)
    }

    pub fn lossless(&self) -> Result<&FormatCapability, CoreError> {
        self.entries
            .iter()
            .find(|entry| entry.lossless)
            .ok_or_else(|| CoreError::UnsupportedFormat("no lossless format registered".to_string()))
    }

    pub fn lossy(&self) -> Result<&FormatCapability, CoreError> {
        self.entries
            .iter()
            .find(|entry| !entry.lossless)
            .ok_or_else(|| CoreError::UnsupportedFormat("no lossy format registered".to_string()))
    }

    pub fn formats(&self) -> impl Iterator<Item = EncodeFormat> + '_ {
        self.entries.iter().map(|entry| entry.format)
    }
}

impl Default for FormatTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Raster<'a> {
    Rgba(&'a RgbaImage),
    Rgb(&'a RgbImage),
}

impl Raster<'_> {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Rgba(image) => image.dimensions(),
            Self::Rgb(image) => image.dimensions(),
        }
    }
}

pub trait RasterCodec: Send + Sync {
    fn encode(&self, raster: Raster<'_>, capability: &FormatCapability, quality: Option<u8>) -> Result<Vec<u8>, CoreError>;
}

/// `image`-crate codecs: PNG at best compression, baseline JPEG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec;

impl RasterCodec for ImageCodec {
    fn encode(&self, raster: Raster<'_>, capability: &FormatCapability, quality: Option<u8>) -> Result<Vec<u8>, CoreError> {
        let mut out = Vec::new();
        match capability.format {
            EncodeFormat::Png => {
                let encoder = PngEncoder::new_with_quality(Cursor::new(&mut out), CompressionType::Best, FilterType::Adaptive);
                match raster {
                    Raster::Rgba(image) if !is_opaque(image) => {
                        let (width, height) = image.dimensions();
                        encoder.write_image(image.as_raw(), width, height, ExtendedColorType::Rgba8)
                    }
                    Raster::Rgba(image) => {
                        let rgb = DynamicImage::ImageRgba8(image.clone()).into_rgb8();
                        let (width, height) = rgb.dimensions();
                        encoder.write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
                    }
                    Raster::Rgb(image) => {
                        let (width, height) = image.dimensions();
                        encoder.write_image(image.as_raw(), width, height, ExtendedColorType::Rgb8)
                    }
                }
                .map_err(|e| CoreError::EncodeFailure(format!("png: {}", e)))?;
            }
            EncodeFormat::Jpeg => {
                let Raster::Rgb(image) = raster else {
                    return Err(CoreError::EncodeFailure(
                        "jpg cannot carry alpha; flatten the raster first".to_string(),
                    ));
                };
                let (lo, hi) = capability.quality_range.unwrap_or((1, 100));
                let quality = quality.unwrap_or(hi).clamp(lo, hi);
                let (width, height) = image.dimensions();
                JpegEncoder::new_with_quality(Cursor::new(&mut out), quality)
                    .write_image(image.as_raw(), width, height, ExtendedColorType::Rgb8)
                    .map_err(|e| CoreError::EncodeFailure(format!("jpg: {}", e)))?;
            }
        }
        if out.is_empty() {
            return Err(CoreError::EncodeFailure(format!("{} codec produced no output", capability.format)));
        }
        Ok(out)
    }
}

/// Descending lossy qualities tried in order, then one last attempt at `floor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityLadder {
    levels: Vec<u8>,
    floor: u8,
}

impl QualityLadder {
    pub fn new(levels: Vec<u8>, floor: u8) -> Result<Self, CoreError> {
        if !(1..=100).contains(&floor) {
            return Err(CoreError::InvalidQualityLadder(format!("floor {} outside 1..=100", floor)));
        }
        if let Some(bad) = levels.iter().find(|q| !(1..=100).contains(*q)) {
            return Err(CoreError::InvalidQualityLadder(format!("level {} outside 1..=100", bad)));
        }
        if levels.windows(2).any(|pair| pair[0] <= pair[1]) {
            return Err(CoreError::InvalidQualityLadder(format!(
                "levels must be strictly descending: {:?}",
                levels
            )));
        }
        if levels.last().is_some_and(|last| *last <= floor) {
            return Err(CoreError::InvalidQualityLadder(format!(
                "floor {} must sit below every level",
                floor
            )));
        }
        Ok(Self { levels, floor })
    }

    /// Default rungs above `floor`.
    pub fn with_floor(floor: u8) -> Result<Self, CoreError> {
        Self::new(DEFAULT_LADDER.iter().copied().filter(|q| *q > floor).collect(), floor)
    }

    pub fn levels(&self) -> &[u8] {
        &self.levels
    }

    pub fn floor(&self) -> u8 {
        self.floor
    }
}

impl Default for QualityLadder {
    fn default() -> Self {
        Self {
            levels: DEFAULT_LADDER.to_vec(),
            floor: DEFAULT_FLOOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeResult {
    pub format: EncodeFormat,
    pub quality: Option<u8>,
    pub bytes: Vec<u8>,
}

impl EncodeResult {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedEncode {
    pub result: EncodeResult,
    pub within_cap: bool,
}

/// Walks the ladder and keeps the first encoding at or under `cap_bytes`. If none
/// fits, returns the floor-quality encoding flagged as best effort.
pub fn encode_within_cap(
    codec: &dyn RasterCodec,
    formats: &FormatTable,
    image: &RgbImage,
    cap_bytes: u64,
    ladder: &QualityLadder,
) -> Result<SizedEncode, CoreError> {
    let lossy = formats.lossy()?;
    for &quality in ladder.levels() {
        let bytes = codec.encode(Raster::Rgb(image), lossy, Some(quality))?;
        debug!(format = %lossy.format, quality, bytes = bytes.len(), cap_bytes, "lossy attempt");
        if bytes.len() as u64 <= cap_bytes {
            return Ok(SizedEncode {
                result: EncodeResult {
                    format: lossy.format,
                    quality: Some(quality),
                    bytes,
                },
                within_cap: true,
            });
        }
    }

    let quality = ladder.floor();
    let bytes = codec.encode(Raster::Rgb(image), lossy, Some(quality))?;
    let within_cap = bytes.len() as u64 <= cap_bytes;
    debug!(format = %lossy.format, quality, bytes = bytes.len(), cap_bytes, within_cap, "floor attempt");
    Ok(SizedEncode {
        result: EncodeResult {
            format: lossy.format,
            quality: Some(quality),
            bytes,
        },
        within_cap,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionOutcome {
    LosslessAccepted,
    LossyAccepted,
    BestEffortKept,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub kept: EncodeResult,
    pub outcome: SelectionOutcome,
    pub within_cap: bool,
    /// Candidate produced and then dropped, if any.
    pub discarded: Option<EncodeFormat>,
}

/// Lossless first; on overflow flatten onto `fallback` and search the lossy ladder.
/// When neither fits, the smaller artifact wins (lossless on a tie).
pub fn select_format(
    codec: &dyn RasterCodec,
    formats: &FormatTable,
    image: &RgbaImage,
    cap_bytes: u64,
    fallback: Color,
    ladder: &QualityLadder,
) -> Result<Selection, CoreError> {
    let lossless = formats.lossless()?;
    let lossless_bytes = codec.encode(Raster::Rgba(image), lossless, None)?;
    debug!(format = %lossless.format, bytes = lossless_bytes.len(), cap_bytes, "lossless attempt");
    let lossless_result = EncodeResult {
        format: lossless.format,
        quality: None,
        bytes: lossless_bytes,
    };
    if lossless_result.len() <= cap_bytes {
        return Ok(Selection {
            kept: lossless_result,
            outcome: SelectionOutcome::LosslessAccepted,
            within_cap: true,
            discarded: None,
        });
    }

    let flat = flatten_onto(image, fallback);
    let lossy = encode_within_cap(codec, formats, &flat, cap_bytes, ladder)?;
    if lossy.within_cap {
        return Ok(Selection {
            kept: lossy.result,
            outcome: SelectionOutcome::LossyAccepted,
            within_cap: true,
            discarded: Some(lossless_result.format),
        });
    }

    let (kept, dropped) = if lossy.result.len() < lossless_result.len() {
        (lossy.result, lossless_result.format)
    } else {
        (lossless_result, lossy.result.format)
    };
    warn!(
        format = %kept.format,
        bytes = kept.len(),
        cap_bytes,
        "no candidate met the size cap; keeping the smaller one"
    );
    Ok(Selection {
        kept,
        outcome: SelectionOutcome::BestEffortKept,
        within_cap: false,
        discarded: Some(dropped),
    })
}

/// Lossy-only assets: flatten, then ladder search.
pub fn encode_lossy_only(
    codec: &dyn RasterCodec,
    formats: &FormatTable,
    image: &RgbaImage,
    cap_bytes: u64,
    fill: Color,
    ladder: &QualityLadder,
) -> Result<Selection, CoreError> {
    let flat = flatten_onto(image, fill);
    let sized = encode_within_cap(codec, formats, &flat, cap_bytes, ladder)?;
    if !sized.within_cap {
        warn!(format = %sized.result.format, bytes = sized.result.len(), cap_bytes, "floor quality still over the size cap");
    }
    Ok(Selection {
        outcome: if sized.within_cap {
            SelectionOutcome::LossyAccepted
        } else {
            SelectionOutcome::BestEffortKept
        },
        within_cap: sized.within_cap,
        kept: sized.result,
        discarded: None,
    })
}

pub fn encode_asset(
    codec: &dyn RasterCodec,
    formats: &FormatTable,
    image: &RgbaImage,
    policy: FormatPolicy,
    cap_bytes: u64,
    fill: Color,
    ladder: &QualityLadder,
) -> Result<Selection, CoreError> {
    match policy {
        FormatPolicy::LosslessFirst => select_format(codec, formats, image, cap_bytes, fill, ladder),
        FormatPolicy::LossyOnly => encode_lossy_only(codec, formats, image, cap_bytes, fill, ladder),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};
    use std::sync::Mutex;

    /// Fixed lossless size; lossy size is `lossy_per_quality * quality`.
    struct StubCodec {
        lossless_len: usize,
        lossy_per_quality: usize,
        calls: Mutex<Vec<(EncodeFormat, Option<u8>)>>,
    }

    impl StubCodec {
        fn new(lossless_len: usize, lossy_per_quality: usize) -> Self {
            Self {
                lossless_len,
                lossy_per_quality,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(EncodeFormat, Option<u8>)> {
            self.calls.lock().expect("stub lock").clone()
        }
    }

    impl RasterCodec for StubCodec {
        fn encode(&self, _raster: Raster<'_>, capability: &FormatCapability, quality: Option<u8>) -> Result<Vec<u8>, CoreError> {
            self.calls.lock().expect("stub lock").push((capability.format, quality));
            let len = if capability.lossless {
                self.lossless_len
            } else {
                self.lossy_per_quality * quality.unwrap_or(100) as usize
            };
            Ok(vec![0; len])
        }
    }

    fn logo() -> RgbaImage {
        RgbaImage::from_fn(32, 16, |x, y| {
            if (8..24).contains(&x) && (4..12).contains(&y) {
                Rgba([200, 30, 30, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        })
    }

    fn textured(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let wave = ((x * 7 + y * 13) % 64) as u8;
            let noise = ((x.wrapping_mul(2_654_435_761) ^ y.wrapping_mul(40_503)) >> 7) as u8 & 0x3f;
            Rgb([wave * 3 + noise, (x * 255 / width.max(1)) as u8, noise.wrapping_mul(3) ^ (y as u8)])
        })
    }

    #[test]
    fn standard_table_exposes_one_lossless_and_one_lossy_format() {
        let table = FormatTable::standard();
        assert_eq!(table.lossless().expect("png").format, EncodeFormat::Png);
        assert_eq!(table.lossy().expect("jpg").format, EncodeFormat::Jpeg);
        assert_eq!(table.formats().collect::<Vec<_>>(), vec![EncodeFormat::Png, EncodeFormat::Jpeg]);
    }

    #[test]
    fn missing_lossy_capability_is_reported() {
        let table = FormatTable::new(vec![*FormatTable::standard().get(EncodeFormat::Png).expect("png entry")]);
        let err = encode_within_cap(&ImageCodec, &table, &textured(8, 8), 1_000, &QualityLadder::default())
            .expect_err("no lossy format");
        assert!(matches!(err, CoreError::UnsupportedFormat(_)));
    }

    #[test]
    fn ladder_validation() {
        assert!(QualityLadder::new(vec![90, 80, 70], 60).is_ok());
        assert!(QualityLadder::new(vec![], 50).is_ok());
        assert!(QualityLadder::new(vec![80, 90], 30).is_err());
        assert!(QualityLadder::new(vec![80, 80], 30).is_err());
        assert!(QualityLadder::new(vec![101, 80], 30).is_err());
        assert!(QualityLadder::new(vec![90, 40], 40).is_err());
        assert!(QualityLadder::new(vec![90], 0).is_err());
        let trimmed = QualityLadder::with_floor(50).expect("valid floor");
        assert_eq!(trimmed.levels(), &[95, 90, 85, 80, 75, 70, 65, 60, 55]);
        assert_eq!(trimmed.floor(), 50);
    }

    #[test]
    fn ladder_stops_at_first_level_under_cap() {
        let codec = StubCodec::new(0, 10);
        let sized = encode_within_cap(&codec, &FormatTable::standard(), &textured(4, 4), 700, &QualityLadder::default())
            .expect("encode");
        assert!(sized.within_cap);
        assert_eq!(sized.result.quality, Some(70));
        assert_eq!(sized.result.len(), 700);
        let qualities: Vec<_> = codec.calls().into_iter().map(|(_, q)| q).collect();
        assert_eq!(qualities, vec![Some(95), Some(90), Some(85), Some(80), Some(75), Some(70)]);
    }

    #[test]
    fn ladder_falls_back_to_floor_when_nothing_fits() {
        let codec = StubCodec::new(0, 10);
        let sized = encode_within_cap(&codec, &FormatTable::standard(), &textured(4, 4), 100, &QualityLadder::default())
            .expect("encode");
        assert!(!sized.within_cap);
        assert_eq!(sized.result.quality, Some(DEFAULT_FLOOR));
        assert_eq!(codec.calls().len(), DEFAULT_LADDER.len() + 1);
    }

    #[test]
    fn lossless_under_cap_never_produces_lossy() {
        let codec = StubCodec::new(500, 10);
        let selection = select_format(&codec, &FormatTable::standard(), &logo(), 500, Color::WHITE, &QualityLadder::default())
            .expect("select");
        assert_eq!(selection.outcome, SelectionOutcome::LosslessAccepted);
        assert_eq!(selection.kept.format, EncodeFormat::Png);
        assert_eq!(selection.discarded, None);
        assert!(codec.calls().iter().all(|(format, _)| *format == EncodeFormat::Png));
    }

    #[test]
    fn lossy_accepted_when_lossless_overflows() {
        let codec = StubCodec::new(5_000, 10);
        let selection = select_format(&codec, &FormatTable::standard(), &logo(), 800, Color::WHITE, &QualityLadder::default())
            .expect("select");
        assert_eq!(selection.outcome, SelectionOutcome::LossyAccepted);
        assert_eq!(selection.kept.format, EncodeFormat::Jpeg);
        assert_eq!(selection.kept.quality, Some(80));
        assert_eq!(selection.discarded, Some(EncodeFormat::Png));
    }

    #[test]
    fn best_effort_keeps_the_smaller_candidate() {
        // Lossy floor = 300 bytes < lossless 5000.
        let lossy_wins = select_format(
            &StubCodec::new(5_000, 10),
            &FormatTable::standard(),
            &logo(),
            100,
            Color::WHITE,
            &QualityLadder::default(),
        )
        .expect("select");
        assert_eq!(lossy_wins.outcome, SelectionOutcome::BestEffortKept);
        assert!(!lossy_wins.within_cap);
        assert_eq!(lossy_wins.kept.format, EncodeFormat::Jpeg);
        assert_eq!(lossy_wins.kept.len(), 300);
        assert_eq!(lossy_wins.discarded, Some(EncodeFormat::Png));

        // Lossless 200 bytes < lossy floor 3000.
        let lossless_wins = select_format(
            &StubCodec::new(200, 100),
            &FormatTable::standard(),
            &logo(),
            100,
            Color::WHITE,
            &QualityLadder::default(),
        )
        .expect("select");
        assert_eq!(lossless_wins.outcome, SelectionOutcome::BestEffortKept);
        assert_eq!(lossless_wins.kept.format, EncodeFormat::Png);
        assert_eq!(lossless_wins.discarded, Some(EncodeFormat::Jpeg));
    }

    #[test]
    fn lossy_only_policy_skips_lossless() {
        let codec = StubCodec::new(1, 10);
        let selection = encode_asset(
            &codec,
            &FormatTable::standard(),
            &logo(),
            FormatPolicy::LossyOnly,
            10_000,
            Color::WHITE,
            &QualityLadder::default(),
        )
        .expect("encode");
        assert_eq!(selection.outcome, SelectionOutcome::LossyAccepted);
        assert_eq!(selection.kept.quality, Some(95));
        assert!(codec.calls().iter().all(|(format, _)| *format == EncodeFormat::Jpeg));
    }

    #[test]
    fn png_preserves_transparency_and_jpeg_decodes() {
        let table = FormatTable::standard();
        let png = ImageCodec
            .encode(Raster::Rgba(&logo()), table.lossless().expect("png"), None)
            .expect("png encode");
        let decoded = image::load_from_memory(&png).expect("png decodes");
        assert!(decoded.color().has_alpha());
        assert_eq!(decoded.to_rgba8().get_pixel(0, 0)[3], 0);

        let jpg = ImageCodec
            .encode(Raster::Rgb(&textured(40, 30)), table.lossy().expect("jpg"), Some(80))
            .expect("jpg encode");
        let decoded = image::load_from_memory(&jpg).expect("jpg decodes");
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn opaque_png_is_written_without_alpha() {
        let opaque = RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255]));
        let png = ImageCodec
            .encode(Raster::Rgba(&opaque), FormatTable::standard().lossless().expect("png"), None)
            .expect("png encode");
        let decoded = image::load_from_memory(&png).expect("png decodes");
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn jpeg_refuses_alpha_rasters() {
        let err = ImageCodec
            .encode(Raster::Rgba(&logo()), FormatTable::standard().lossy().expect("jpg"), Some(90))
            .expect_err("alpha into jpg");
        assert!(matches!(err, CoreError::EncodeFailure(_)));
    }

    #[test]
    fn jpeg_sizes_shrink_down_the_ladder() {
        let image = textured(96, 96);
        let lossy = *FormatTable::standard().lossy().expect("jpg");
        let sizes: Vec<usize> = DEFAULT_LADDER
            .iter()
            .map(|q| ImageCodec.encode(Raster::Rgb(&image), &lossy, Some(*q)).expect("encode").len())
            .collect();
        for pair in sizes.windows(2) {
            assert!(pair[1] <= pair[0], "sizes not monotonic: {:?}", sizes);
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        let image = textured(64, 48);
        let ladder = QualityLadder::default();
        let first = encode_within_cap(&ImageCodec, &FormatTable::standard(), &image, 2_000, &ladder).expect("first");
        let second = encode_within_cap(&ImageCodec, &FormatTable::standard(), &image, 2_000, &ladder).expect("second");
        assert_eq!(first, second);
    }
}
