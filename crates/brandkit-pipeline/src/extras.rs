use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use brandkit_core::{AssetKind, BrandColors, CoreError};

use crate::{write_atomic, AssetReport};

pub const COLORS_FILE_NAME: &str = "brand_colors.txt";
pub const STYLESHEET_FILE_NAME: &str = "brand.css";

/// Writes the one-line color reference and the stylesheet snippet next to the
/// assets. Returns the written paths.
pub fn write_brand_extras(output_dir: &Path, colors: &BrandColors, assets: &[AssetReport]) -> Result<Vec<PathBuf>, CoreError> {
    let colors_path = output_dir.join(COLORS_FILE_NAME);
    write_atomic(&colors_path, color_reference_line(colors).as_bytes())?;

    let css_path = output_dir.join(STYLESHEET_FILE_NAME);
    write_atomic(&css_path, stylesheet(colors, assets).as_bytes())?;

    Ok(vec![colors_path, css_path])
}

pub(crate) fn color_reference_line(colors: &BrandColors) -> String {
    format!("page={} light={} dark={}\n", colors.page, colors.light, colors.dark)
}

pub(crate) fn stylesheet(colors: &BrandColors, assets: &[AssetReport]) -> String {
    let file_name = |kind: AssetKind| {
        assets
            .iter()
            .find(|asset| asset.kind == kind)
            .and_then(|asset| asset.path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
    };

    let mut css = String::new();
    let _ = writeln!(css, ":root {{");
    let _ = writeln!(css, "  --brand-page-bg: {};", colors.page);
    let _ = writeln!(css, "  --brand-light-bg: {};", colors.light);
    let _ = writeln!(css, "  --brand-dark-bg: {};", colors.dark);
    let _ = writeln!(css, "  --brand-square-bg: var(--brand-light-bg);");
    for (var, kind) in [
        ("--brand-background", AssetKind::Background),
        ("--brand-header-logo", AssetKind::HeaderLogo),
        ("--brand-banner-logo", AssetKind::BannerLogo),
        ("--brand-square-logo", AssetKind::SquareLogoLight),
    ] {
        if let Some(name) = file_name(kind) {
            let _ = writeln!(css, "  {}: url(\"{}\");", var, name);
        }
    }
    let _ = writeln!(css, "}}");

    if let Some(dark) = file_name(AssetKind::SquareLogoDark) {
        let _ = writeln!(css);
        let _ = writeln!(css, "@media (prefers-color-scheme: dark) {{");
        let _ = writeln!(css, "  :root {{");
        let _ = writeln!(css, "    --brand-square-bg: var(--brand-dark-bg);");
        let _ = writeln!(css, "    --brand-square-logo: url(\"{}\");", dark);
        let _ = writeln!(css, "  }}");
        let _ = writeln!(css, "}}");
    }

    let _ = writeln!(css);
    let _ = writeln!(css, "body {{");
    let _ = writeln!(css, "  background-color: var(--brand-page-bg);");
    let _ = writeln!(css, "  background-image: var(--brand-background);");
    let _ = writeln!(css, "  background-position: center;");
    let _ = writeln!(css, "  background-size: cover;");
    let _ = writeln!(css, "}}");
    css
}
