use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const KIB: u64 = 1024;
pub const DEFAULT_QUALITY_FLOOR: u8 = 30;

/// Opaque RGB color. Serialized as `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color::new(255, 255, 255);
    pub const BLACK: Color = Color::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn channels(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Color {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_color(s)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

impl TryFrom<String> for Color {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_hex_color(&value)
    }
}

/// Parses `RRGGBB` or `#RRGGBB` (any case). Anything else is rejected; there is no
/// fallback color.
pub fn parse_hex_color(input: &str) -> Result<Color, CoreError> {
    let digits = input.strip_prefix('#').unwrap_or(input);
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CoreError::InvalidColorFormat(input.to_string()));
    }
    let channel = |start: usize| {
        u8::from_str_radix(&digits[start..start + 2], 16).map_err(|_| CoreError::InvalidColorFormat(input.to_string()))
    };
    Ok(Color::new(channel(0)?, channel(2)?, channel(4)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetKind {
    Background,
    HeaderLogo,
    BannerLogo,
    SquareLogoLight,
    SquareLogoDark,
}

impl AssetKind {
    pub fn all() -> [AssetKind; 5] {
        [
            AssetKind::Background,
            AssetKind::HeaderLogo,
            AssetKind::BannerLogo,
            AssetKind::SquareLogoLight,
            AssetKind::SquareLogoDark,
        ]
    }

    pub fn file_stem(self) -> &'static str {
        match self {
            Self::Background => "background_1920x1080",
            Self::HeaderLogo => "header_logo_245x36",
            Self::BannerLogo => "banner_logo_245x36",
            Self::SquareLogoLight => "square_logo_light_240x240",
            Self::SquareLogoDark => "square_logo_dark_240x240",
        }
    }

    pub fn target_size(self) -> (u32, u32) {
        match self {
            Self::Background => (1920, 1080),
            Self::HeaderLogo | Self::BannerLogo => (245, 36),
            Self::SquareLogoLight | Self::SquareLogoDark => (240, 240),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::HeaderLogo => "header-logo",
            Self::BannerLogo => "banner-logo",
            Self::SquareLogoLight => "square-logo-light",
            Self::SquareLogoDark => "square-logo-dark",
        }
    }
}

impl Display for AssetKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatPolicy {
    LosslessFirst,
    LossyOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeometryStrategy {
    /// Contain within the canvas, centered, margins filled with the backdrop.
    PadFit,
    /// Contain by whichever axis limits the scale.
    FitExactByLongerAxis,
    /// Fit by height when the source is wider than the target frame, else by width.
    /// The overflowing axis is clipped symmetrically.
    FitExactHeightPreferred,
    /// Input has already been center-square-cropped; scale onto the square canvas.
    PreCroppedSquare,
}

/// Which fit-exact rule drives the header and banner logos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogoFit {
    Limiting,
    Aspect,
}

impl LogoFit {
    pub fn strategy(self) -> GeometryStrategy {
        match self {
            Self::Limiting => GeometryStrategy::FitExactByLongerAxis,
            Self::Aspect => GeometryStrategy::FitExactHeightPreferred,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Limiting => "limiting",
            Self::Aspect => "aspect",
        }
    }
}

impl FromStr for LogoFit {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "limiting" | "contain" => Ok(Self::Limiting),
            "aspect" | "height-preferred" => Ok(Self::Aspect),
            other => Err(CoreError::InvalidConfig(format!(
                "unknown logo fit '{}'; expected one of: limiting, aspect",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodeFormat {
    Png,
    Jpeg,
}

impl EncodeFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }
}

impl Display for EncodeFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandColors {
    pub page: Color,
    pub light: Color,
    pub dark: Color,
}

/// Byte caps per asset family. Both square variants share `square`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeCaps {
    pub background: u64,
    pub header: u64,
    pub banner: u64,
    pub square: u64,
}

impl Default for SizeCaps {
    fn default() -> Self {
        Self {
            background: 300 * KIB,
            header: 10 * KIB,
            banner: 50 * KIB,
            square: 50 * KIB,
        }
    }
}

impl SizeCaps {
    pub fn for_kind(&self, kind: AssetKind) -> u64 {
        match kind {
            AssetKind::Background => self.background,
            AssetKind::HeaderLogo => self.header,
            AssetKind::BannerLogo => self.banner,
            AssetKind::SquareLogoLight | AssetKind::SquareLogoDark => self.square,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSpec {
    pub kind: AssetKind,
    pub width: u32,
    pub height: u32,
    pub cap_bytes: u64,
    pub policy: FormatPolicy,
    pub strategy: GeometryStrategy,
}

impl AssetSpec {
    pub fn for_kind(kind: AssetKind, caps: &SizeCaps, logo_fit: LogoFit) -> Self {
        let (width, height) = kind.target_size();
        let (policy, strategy) = match kind {
            AssetKind::Background => (FormatPolicy::LossyOnly, GeometryStrategy::PadFit),
            AssetKind::HeaderLogo | AssetKind::BannerLogo => (FormatPolicy::LosslessFirst, logo_fit.strategy()),
            AssetKind::SquareLogoLight | AssetKind::SquareLogoDark => {
                (FormatPolicy::LosslessFirst, GeometryStrategy::PreCroppedSquare)
            }
        };
        Self {
            kind,
            width,
            height,
            cap_bytes: caps.for_kind(kind),
            policy,
            strategy,
        }
    }

    /// The five derivations in pipeline order.
    pub fn standard_set(caps: &SizeCaps, logo_fit: LogoFit) -> [AssetSpec; 5] {
        AssetKind::all().map(|kind| Self::for_kind(kind, caps, logo_fit))
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid color '{0}': expected 6 hex digits with optional '#'")]
    InvalidColorFormat(String),
    #[error("source image unreadable: {0}")]
    SourceImageUnreadable(String),
    #[error("encode failure: {0}")]
    EncodeFailure(String),
    #[error("format not in capability table: {0}")]
    UnsupportedFormat(String),
    #[error("invalid quality ladder: {0}")]
    InvalidQualityLadder(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to write output: {0}")]
    OutputWrite(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    InvalidColorFormat,
    SourceImageUnreadable,
    SizeCapUnmet,
    EncodeFailure,
    UnsupportedFormat,
    InvalidQualityLadder,
    InvalidConfig,
    OutputWrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidColorFormat(_) => ErrorCode::InvalidColorFormat,
            Self::SourceImageUnreadable(_) => ErrorCode::SourceImageUnreadable,
            Self::EncodeFailure(_) => ErrorCode::EncodeFailure,
            Self::UnsupportedFormat(_) => ErrorCode::UnsupportedFormat,
            Self::InvalidQualityLadder(_) => ErrorCode::InvalidQualityLadder,
            Self::InvalidConfig(_) => ErrorCode::InvalidConfig,
            Self::OutputWrite(_) => ErrorCode::OutputWrite,
        }
    }

    pub fn as_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Non-fatal: the asset was still written at best effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeCapWarning {
    pub code: ErrorCode,
    pub asset: AssetKind,
    pub cap_bytes: u64,
    pub actual_bytes: u64,
    pub format: EncodeFormat,
}

impl SizeCapWarning {
    pub fn new(asset: AssetKind, cap_bytes: u64, actual_bytes: u64, format: EncodeFormat) -> Self {
        Self {
            code: ErrorCode::SizeCapUnmet,
            asset,
            cap_bytes,
            actual_bytes,
            format,
        }
    }
}

impl Display for SizeCapWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} exceeds its size cap: {} bytes > {} bytes (kept best-effort {})",
            self.asset, self.actual_bytes, self.cap_bytes, self.format
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryEventType {
    PipelineStart,
    AssetStart,
    AssetEncoded,
    AssetBestEffort,
    AssetError,
    PipelineSuccess,
    PipelineError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_type: TelemetryEventType,
    pub asset: Option<AssetKind>,
    pub duration_ms: Option<u64>,
    pub detail: Option<String>,
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Override layer for a run. Empty strings mean "use the default".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrandConfig {
    pub source: Option<String>,
    pub output_dir: Option<String>,
    pub page_color: String,
    pub light_color: String,
    pub dark_color: String,
    pub background_cap: String,
    pub header_cap: String,
    pub banner_cap: String,
    pub square_cap: String,
    pub logo_fit: String,
    pub quality_floor: Option<u8>,
}

impl Default for BrandConfig {
    fn default() -> Self {
        Self {
            source: None,
            output_dir: None,
            page_color: "#FFFFFF".to_string(),
            light_color: "#FFFFFF".to_string(),
            dark_color: "#111111".to_string(),
            background_cap: "300KB".to_string(),
            header_cap: "10KB".to_string(),
            banner_cap: "50KB".to_string(),
            square_cap: "50KB".to_string(),
            logo_fit: "limiting".to_string(),
            quality_floor: Some(DEFAULT_QUALITY_FLOOR),
        }
    }
}

pub fn resolve_brand_config(overrides: BrandConfig) -> BrandConfig {
    let mut cfg = BrandConfig::default();
    let pick = |slot: &mut String, value: String| {
        if !value.trim().is_empty() {
            *slot = value;
        }
    };
    pick(&mut cfg.page_color, overrides.page_color);
    pick(&mut cfg.light_color, overrides.light_color);
    pick(&mut cfg.dark_color, overrides.dark_color);
    pick(&mut cfg.background_cap, overrides.background_cap);
    pick(&mut cfg.header_cap, overrides.header_cap);
    pick(&mut cfg.banner_cap, overrides.banner_cap);
    pick(&mut cfg.square_cap, overrides.square_cap);
    pick(&mut cfg.logo_fit, overrides.logo_fit);
    if overrides.quality_floor.is_some() {
        cfg.quality_floor = overrides.quality_floor;
    }
    cfg.source = overrides.source;
    cfg.output_dir = overrides.output_dir;
    cfg
}

/// Accepts raw byte counts or `B`/`KB`/`MB` suffixes (1 KB = 1024 bytes).
pub fn parse_byte_size(value: &str) -> Result<u64, CoreError> {
    let normalized = value.trim().to_ascii_lowercase();
    let split = normalized
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(normalized.len());
    let (number, unit) = normalized.split_at(split);
    let multiplier = match unit.trim() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KIB,
        "m" | "mb" | "mib" => KIB * KIB,
        other => {
            return Err(CoreError::InvalidConfig(format!(
                "unknown size unit '{}' in '{}'",
                other, value
            )))
        }
    };
    let number: u64 = number
        .parse()
        .map_err(|_| CoreError::InvalidConfig(format!("invalid byte size '{}'", value)))?;
    let bytes = number
        .checked_mul(multiplier)
        .ok_or_else(|| CoreError::InvalidConfig(format!("byte size '{}' overflows", value)))?;
    if bytes == 0 {
        return Err(CoreError::InvalidConfig(format!("byte size '{}' must be positive", value)));
    }
    Ok(bytes)
}

/// Validated form of [`BrandConfig`]. Building one touches no files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandSettings {
    pub source: PathBuf,
    pub output_dir: PathBuf,
    pub colors: BrandColors,
    pub caps: SizeCaps,
    pub logo_fit: LogoFit,
    pub quality_floor: u8,
}

impl TryFrom<&BrandConfig> for BrandSettings {
    type Error = CoreError;

    fn try_from(cfg: &BrandConfig) -> Result<Self, Self::Error> {
        let colors = BrandColors {
            page: parse_hex_color(&cfg.page_color)?,
            light: parse_hex_color(&cfg.light_color)?,
            dark: parse_hex_color(&cfg.dark_color)?,
        };
        let caps = SizeCaps {
            background: parse_byte_size(&cfg.background_cap)?,
            header: parse_byte_size(&cfg.header_cap)?,
            banner: parse_byte_size(&cfg.banner_cap)?,
            square: parse_byte_size(&cfg.square_cap)?,
        };
        let logo_fit: LogoFit = cfg.logo_fit.parse()?;
        let quality_floor = cfg.quality_floor.unwrap_or(DEFAULT_QUALITY_FLOOR);
        if !(1..=100).contains(&quality_floor) {
            return Err(CoreError::InvalidConfig(format!(
                "quality floor must be within 1..=100, got {}",
                quality_floor
            )));
        }
        let source = cfg
            .source
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| CoreError::InvalidConfig("missing source image path".to_string()))?;
        let output_dir = cfg
            .output_dir
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| CoreError::InvalidConfig("missing output directory".to_string()))?;
        Ok(Self {
            source: PathBuf::from(source),
            output_dir: PathBuf::from(output_dir),
            colors,
            caps,
            logo_fit,
            quality_floor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config_with_paths() -> BrandConfig {
        resolve_brand_config(BrandConfig {
            source: Some("logo.png".to_string()),
            output_dir: Some("out".to_string()),
            ..BrandConfig::default()
        })
    }

    #[test]
    fn parses_hex_with_and_without_hash() {
        assert_eq!(parse_hex_color("#FF8000").expect("hash form"), Color::new(255, 128, 0));
        assert_eq!(parse_hex_color("ff8000").expect("bare form"), Color::new(255, 128, 0));
        assert_eq!(parse_hex_color("#aBcDeF").expect("mixed case"), Color::new(0xab, 0xcd, 0xef));
    }

    #[test]
    fn rejects_malformed_colors() {
        for bad in ["", "#", "not-a-color", "#FFF", "#FFFFFFF", "##FFFFFF", "#GG0000", " #FFFFFF", "#ÿÿÿ"] {
            let err = parse_hex_color(bad).expect_err("malformed color must fail");
            assert_eq!(err.code(), ErrorCode::InvalidColorFormat, "input {:?}", bad);
        }
    }

    #[test]
    fn color_serializes_as_hex_string() {
        let json = serde_json::to_string(&Color::new(17, 17, 17)).expect("serialize");
        assert_eq!(json, "\"#111111\"");
        let back: Color = serde_json::from_str("\"#0a0B0c\"").expect("deserialize");
        assert_eq!(back, Color::new(10, 11, 12));
        assert!(serde_json::from_str::<Color>("\"teal\"").is_err());
    }

    proptest! {
        #[test]
        fn hex_round_trips(r in any::<u8>(), g in any::<u8>(), b in any::<u8>(), hash in any::<bool>(), lower in any::<bool>()) {
            let mut text = format!("{:02X}{:02X}{:02X}", r, g, b);
            if lower {
                text = text.to_ascii_lowercase();
            }
            if hash {
                text.insert(0, '#');
            }
            prop_assert_eq!(parse_hex_color(&text).expect("valid hex"), Color::new(r, g, b));
        }

        #[test]
        fn wrong_length_is_rejected(s in "#?[0-9a-fA-F]{0,5}|#?[0-9a-fA-F]{7,10}") {
            prop_assert!(matches!(parse_hex_color(&s), Err(CoreError::InvalidColorFormat(_))));
        }

        #[test]
        fn non_hex_is_rejected(prefix in "[0-9a-f]{0,5}", bad in "[g-zG-Z_ .-]") {
            let mut s = prefix.clone();
            s.push_str(&bad);
            while s.len() < 6 {
                s.push('0');
            }
            prop_assert!(matches!(parse_hex_color(&s), Err(CoreError::InvalidColorFormat(_))));
        }
    }

    #[test]
    fn byte_sizes_accept_units() {
        assert_eq!(parse_byte_size("300KB").expect("kb"), 300 * 1024);
        assert_eq!(parse_byte_size("50 kb").expect("spaced"), 50 * 1024);
        assert_eq!(parse_byte_size("1MB").expect("mb"), 1024 * 1024);
        assert_eq!(parse_byte_size("4096").expect("raw"), 4096);
        assert!(parse_byte_size("0").is_err());
        assert!(parse_byte_size("ten KB").is_err());
        assert!(parse_byte_size("10GB").is_err());
    }

    #[test]
    fn resolve_keeps_defaults_for_blank_overrides() {
        let cfg = resolve_brand_config(BrandConfig {
            page_color: "  ".to_string(),
            dark_color: "#222222".to_string(),
            ..BrandConfig::default()
        });
        assert_eq!(cfg.page_color, "#FFFFFF");
        assert_eq!(cfg.dark_color, "#222222");
        assert_eq!(cfg.header_cap, "10KB");
    }

    #[test]
    fn settings_validate_colors_before_paths() {
        let mut cfg = config_with_paths();
        cfg.page_color = "not-a-color".to_string();
        cfg.source = None;
        let err = BrandSettings::try_from(&cfg).expect_err("invalid color");
        assert_eq!(err.code(), ErrorCode::InvalidColorFormat);
    }

    #[test]
    fn settings_resolve_defaults() {
        let settings = BrandSettings::try_from(&config_with_paths()).expect("defaults are valid");
        assert_eq!(settings.caps, SizeCaps::default());
        assert_eq!(settings.colors.dark, Color::new(0x11, 0x11, 0x11));
        assert_eq!(settings.logo_fit, LogoFit::Limiting);
        assert_eq!(settings.quality_floor, DEFAULT_QUALITY_FLOOR);
    }

    #[test]
    fn settings_reject_out_of_range_floor() {
        let mut cfg = config_with_paths();
        cfg.quality_floor = Some(0);
        assert_eq!(
            BrandSettings::try_from(&cfg).expect_err("floor 0").code(),
            ErrorCode::InvalidConfig
        );
    }

    #[test]
    fn standard_set_follows_pipeline_order() {
        let specs = AssetSpec::standard_set(&SizeCaps::default(), LogoFit::Aspect);
        let kinds: Vec<_> = specs.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, AssetKind::all().to_vec());
        assert_eq!(specs[0].policy, FormatPolicy::LossyOnly);
        assert_eq!(specs[0].strategy, GeometryStrategy::PadFit);
        assert_eq!((specs[1].width, specs[1].height), (245, 36));
        assert_eq!(specs[2].strategy, GeometryStrategy::FitExactHeightPreferred);
        assert_eq!(specs[3].cap_bytes, specs[4].cap_bytes);
        assert!(specs[1..].iter().all(|s| s.policy == FormatPolicy::LosslessFirst));
    }

    #[test]
    fn size_cap_warning_carries_code() {
        let warning = SizeCapWarning::new(AssetKind::HeaderLogo, 10, 20, EncodeFormat::Jpeg);
        assert_eq!(warning.code, ErrorCode::SizeCapUnmet);
        assert!(warning.to_string().contains("header-logo"));
    }
}
