use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use brandkit_core::{
    resolve_brand_config, AssetKind, AssetSpec, BrandColors, BrandConfig, BrandSettings, Color, CoreError, EncodeFormat,
    GeometryStrategy, LogoFit, SizeCapWarning, SizeCaps, TelemetryEvent, TelemetryEventType, TelemetrySink,
};
use brandkit_encode::{encode_asset, FormatTable, ImageCodec, QualityLadder, RasterCodec, Selection, SelectionOutcome};
use brandkit_image::{center_square_crop, compose, Backdrop, ImageSize};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::Builder;
use tracing::{info, info_span, warn};

mod extras;

pub use extras::{write_brand_extras, COLORS_FILE_NAME, STYLESHEET_FILE_NAME};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub output_dir: PathBuf,
    pub colors: BrandColors,
    pub caps: SizeCaps,
    pub logo_fit: LogoFit,
    pub ladder: QualityLadder,
}

impl PipelineOptions {
    pub fn from_settings(settings: &BrandSettings) -> Result<Self, CoreError> {
        Ok(Self {
            output_dir: settings.output_dir.clone(),
            colors: settings.colors,
            caps: settings.caps,
            logo_fit: settings.logo_fit,
            ladder: QualityLadder::with_floor(settings.quality_floor)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetStatus {
    Met,
    BestEffort,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetReport {
    pub kind: AssetKind,
    pub path: PathBuf,
    pub format: EncodeFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
    pub cap_bytes: u64,
    pub status: AssetStatus,
    pub outcome: SelectionOutcome,
    pub quality: Option<u8>,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub output_dir: PathBuf,
    pub assets: Vec<AssetReport>,
    pub warnings: Vec<SizeCapWarning>,
    pub extras: Vec<PathBuf>,
}

impl PipelineReport {
    pub fn asset(&self, kind: AssetKind) -> Option<&AssetReport> {
        self.assets.iter().find(|asset| asset.kind == kind)
    }

    pub fn all_within_cap(&self) -> bool {
        self.warnings.is_empty()
    }
}

pub fn load_source(path: &Path) -> Result<RgbaImage, CoreError> {
    let bytes = fs::read(path).map_err(|e| CoreError::SourceImageUnreadable(format!("{}: {}", path.display(), e)))?;
    decode_source(&bytes).map_err(|err| match err {
        CoreError::SourceImageUnreadable(msg) => CoreError::SourceImageUnreadable(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

pub fn decode_source(bytes: &[u8]) -> Result<RgbaImage, CoreError> {
    let image = image::load_from_memory(bytes).map_err(|e| CoreError::SourceImageUnreadable(e.to_string()))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(CoreError::SourceImageUnreadable("image has no pixels".to_string()));
    }
    Ok(image.to_rgba8())
}

/// Resolves and validates `config`, then derives the full asset set. Colors and
/// caps are checked and the source decoded before anything touches the output
/// directory.
pub fn generate_brand_kit(config: &BrandConfig, telemetry: Option<&dyn TelemetrySink>) -> Result<PipelineReport, CoreError> {
    let settings = BrandSettings::try_from(&resolve_brand_config(config.clone()))?;
    let options = PipelineOptions::from_settings(&settings)?;
    let source = load_source(&settings.source)?;
    let mut report = run_pipeline_with_telemetry(&ImageCodec, &FormatTable::standard(), &source, &options, telemetry)?;
    drop(source);
    report.extras = write_brand_extras(&options.output_dir, &options.colors, &report.assets)?;
    Ok(report)
}

pub fn run_pipeline(source: &RgbaImage, options: &PipelineOptions) -> Result<PipelineReport, CoreError> {
    run_pipeline_with_telemetry(&ImageCodec, &FormatTable::standard(), source, options, None)
}

pub fn run_pipeline_with_telemetry(
    codec: &dyn RasterCodec,
    formats: &FormatTable,
    source: &RgbaImage,
    options: &PipelineOptions,
    telemetry: Option<&dyn TelemetrySink>,
) -> Result<PipelineReport, CoreError> {
    let start = Instant::now();
    emit(telemetry, TelemetryEventType::PipelineStart, None, None, Some(format!("{}x{}", source.width(), source.height())));
    match derive_assets(codec, formats, source, options, telemetry) {
        Ok(report) => {
            emit(
                telemetry,
                TelemetryEventType::PipelineSuccess,
                None,
                Some(start),
                Some(format!("assets={},warnings={}", report.assets.len(), report.warnings.len())),
            );
            Ok(report)
        }
        Err(err) => {
            emit(telemetry, TelemetryEventType::PipelineError, None, Some(start), Some(err.to_string()));
            Err(err)
        }
    }
}

fn derive_assets(
    codec: &dyn RasterCodec,
    formats: &FormatTable,
    source: &RgbaImage,
    options: &PipelineOptions,
    telemetry: Option<&dyn TelemetrySink>,
) -> Result<PipelineReport, CoreError> {
    fs::create_dir_all(&options.output_dir)
        .map_err(|e| CoreError::OutputWrite(format!("{}: {}", options.output_dir.display(), e)))?;

    // Both theme variants frame exactly this crop.
    let square = center_square_crop(source);

    let mut assets = Vec::with_capacity(AssetKind::all().len());
    let mut warnings = Vec::new();
    for spec in AssetSpec::standard_set(&options.caps, options.logo_fit) {
        let _span = info_span!("asset", kind = %spec.kind).entered();
        let started = Instant::now();
        emit(telemetry, TelemetryEventType::AssetStart, Some(spec.kind), None, None);

        let input = if spec.strategy == GeometryStrategy::PreCroppedSquare {
            &square
        } else {
            source
        };
        let (backdrop, fill) = backdrop_for(spec.kind, &options.colors);
        let composed = compose(input, spec.strategy, ImageSize::new(spec.width, spec.height), backdrop);

        let persisted = encode_asset(codec, formats, &composed, spec.policy, spec.cap_bytes, fill, &options.ladder)
            .and_then(|selection| {
                let path = persist_selection(&options.output_dir, spec.kind, &selection, formats)?;
                Ok((selection, path))
            });
        let (selection, path) = match persisted {
            Ok(done) => done,
            Err(err) => {
                emit(telemetry, TelemetryEventType::AssetError, Some(spec.kind), Some(started), Some(err.to_string()));
                return Err(err);
            }
        };

        let report = asset_report(&spec, &selection, path);
        if selection.within_cap {
            info!(format = %report.format, bytes = report.bytes, cap = report.cap_bytes, "asset written");
            emit(telemetry, TelemetryEventType::AssetEncoded, Some(spec.kind), Some(started), Some(detail_for(&report)));
        } else {
            let warning = SizeCapWarning::new(spec.kind, spec.cap_bytes, report.bytes, report.format);
            warn!("{}", warning);
            emit(telemetry, TelemetryEventType::AssetBestEffort, Some(spec.kind), Some(started), Some(warning.to_string()));
            warnings.push(warning);
        }
        assets.push(report);
    }

    Ok(PipelineReport {
        output_dir: options.output_dir.clone(),
        assets,
        warnings,
        extras: Vec::new(),
    })
}

/// Canvas backdrop and the opaque fill used when alpha has to be dropped.
fn backdrop_for(kind: AssetKind, colors: &BrandColors) -> (Backdrop, Color) {
    match kind {
        AssetKind::Background => (Backdrop::Solid(colors.page), colors.page),
        AssetKind::HeaderLogo | AssetKind::BannerLogo => (Backdrop::Transparent, colors.page),
        AssetKind::SquareLogoLight => (Backdrop::Solid(colors.light), colors.light),
        AssetKind::SquareLogoDark => (Backdrop::Solid(colors.dark), colors.dark),
    }
}

fn asset_report(spec: &AssetSpec, selection: &Selection, path: PathBuf) -> AssetReport {
    AssetReport {
        kind: spec.kind,
        path,
        format: selection.kept.format,
        width: spec.width,
        height: spec.height,
        bytes: selection.kept.len(),
        cap_bytes: spec.cap_bytes,
        status: if selection.within_cap {
            AssetStatus::Met
        } else {
            AssetStatus::BestEffort
        },
        outcome: selection.outcome,
        quality: selection.kept.quality,
        sha256: hex::encode(Sha256::digest(&selection.kept.bytes)),
    }
}

fn detail_for(report: &AssetReport) -> String {
    format!(
        "format={},bytes={},cap={},quality={}",
        report.format,
        report.bytes,
        report.cap_bytes,
        report
            .quality
            .map(|q| q.to_string())
            .unwrap_or_else(|| "lossless".to_string())
    )
}

pub fn asset_path(output_dir: &Path, kind: AssetKind, format: EncodeFormat) -> PathBuf {
    output_dir.join(format!("{}.{}", kind.file_stem(), format.extension()))
}

/// Writes the kept artifact and removes same-stem siblings in every other
/// registered format, leaving one file per asset.
fn persist_selection(
    output_dir: &Path,
    kind: AssetKind,
    selection: &Selection,
    formats: &FormatTable,
) -> Result<PathBuf, CoreError> {
    let path = asset_path(output_dir, kind, selection.kept.format);
    write_atomic(&path, &selection.kept.bytes)?;
    for other in formats.formats().filter(|format| *format != selection.kept.format) {
        remove_if_present(&asset_path(output_dir, kind, other))?;
    }
    Ok(path)
}

fn remove_if_present(path: &Path) -> Result<(), CoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(CoreError::OutputWrite(format!("{}: {}", path.display(), err))),
    }
}

/// Stages `bytes` in a temp file next to `path` and renames it into place. The
/// temp file is deleted on every failure path, so `path` is either the previous
/// content or the complete new content.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    let io_err = |e: std::io::Error| CoreError::OutputWrite(format!("{}: {}", path.display(), e));
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut staged = Builder::new()
        .prefix(".brandkit-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(io_err)?;
    staged.write_all(bytes).map_err(io_err)?;
    staged.as_file().sync_all().map_err(io_err)?;
    staged.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

fn emit(
    telemetry: Option<&dyn TelemetrySink>,
    event_type: TelemetryEventType,
    asset: Option<AssetKind>,
    started: Option<Instant>,
    detail: Option<String>,
) {
    if let Some(sink) = telemetry {
        sink.emit(TelemetryEvent {
            event_type,
            asset,
            duration_ms: started.map(|s| s.elapsed().as_millis() as u64),
            detail,
        });
    }
}
