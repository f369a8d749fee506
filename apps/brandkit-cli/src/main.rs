use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use brandkit_core::{parse_byte_size, resolve_brand_config, AssetSpec, BrandConfig, BrandSettings, CoreError, LogoFit, SizeCaps};
use brandkit_pipeline::generate_brand_kit;
use brandkit_telemetry::sink_from_env;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "brandkit", version, about = "Derive web brand assets from one source image")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short = 'v', global = true, default_value_t = false, action = clap::ArgAction::SetTrue)]
    verbose: bool,
    #[command(subcommand)]
    command: TopLevelCommand,
}

#[derive(Subcommand, Debug)]
enum TopLevelCommand {
    /// Write the five brand assets plus brand_colors.txt and brand.css.
    Generate(GenerateArgs),
    /// Print the asset specs that `generate` would use.
    Assets(AssetsArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[arg(long, short = 'i')]
    source: Option<PathBuf>,
    #[arg(long, short = 'o')]
    output_dir: Option<PathBuf>,
    /// JSON file with BrandConfig fields. Flags override its values.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
    #[arg(long)]
    page_color: Option<String>,
    #[arg(long)]
    light_color: Option<String>,
    #[arg(long)]
    dark_color: Option<String>,
    #[arg(long)]
    background_cap: Option<String>,
    #[arg(long)]
    header_cap: Option<String>,
    #[arg(long)]
    banner_cap: Option<String>,
    #[arg(long)]
    square_cap: Option<String>,
    /// `limiting` (never clips) or `aspect` (height-preferred, may clip).
    #[arg(long)]
    logo_fit: Option<String>,
    #[arg(long)]
    quality_floor: Option<u8>,
    /// Exit non-zero when any asset misses its cap.
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    strict: bool,
}

#[derive(Args, Debug)]
struct AssetsArgs {
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
    /// Overrides the config file's `logoFit` when given.
    #[arg(long)]
    logo_fit: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            match err.downcast_ref::<CoreError>() {
                Some(core) => {
                    let info = core.as_error_info();
                    eprintln!("{}", serde_json::to_string_pretty(&info).unwrap_or_else(|_| info.message.clone()));
                }
                None => eprintln!("error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(command: TopLevelCommand) -> Result<ExitCode> {
    match command {
        TopLevelCommand::Generate(args) => {
            let config = build_config(&args)?;
            debug!(?config, "resolved configuration");
            let telemetry = sink_from_env();
            let telemetry_ref = telemetry.as_ref().map(|sink| sink.as_ref());

            let report = generate_brand_kit(&config, telemetry_ref)?;
            for warning in &report.warnings {
                warn!(%warning, "asset written above its size cap");
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            if args.strict && !report.all_within_cap() {
                return Ok(ExitCode::from(2));
            }
        }
        TopLevelCommand::Assets(args) => {
            println!("{}", serde_json::to_string_pretty(&asset_specs(&args)?)?);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // stdout carries the JSON report.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_config(args: &GenerateArgs) -> Result<BrandConfig> {
    let mut config = match &args.config {
        Some(path) => read_config_file(path)?,
        None => BrandConfig::default(),
    };

    if let Some(source) = &args.source {
        config.source = Some(source.display().to_string());
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = Some(dir.display().to_string());
    }
    let overrides = [
        (&mut config.page_color, &args.page_color),
        (&mut config.light_color, &args.light_color),
        (&mut config.dark_color, &args.dark_color),
        (&mut config.background_cap, &args.background_cap),
        (&mut config.header_cap, &args.header_cap),
        (&mut config.banner_cap, &args.banner_cap),
        (&mut config.square_cap, &args.square_cap),
        (&mut config.logo_fit, &args.logo_fit),
    ];
    for (slot, value) in overrides {
        if let Some(value) = value {
            *slot = value.clone();
        }
    }
    if args.quality_floor.is_some() {
        config.quality_floor = args.quality_floor;
    }

    if config.source.is_none() {
        return Err(anyhow!("no source image given (use --source or the config file's `source`)"));
    }
    if config.output_dir.is_none() {
        return Err(anyhow!("no output directory given (use --output-dir or the config file's `outputDir`)"));
    }
    // Fail on bad colors or caps here so nothing else runs.
    BrandSettings::try_from(&resolve_brand_config(config.clone()))?;
    Ok(config)
}

fn asset_specs(args: &AssetsArgs) -> Result<[AssetSpec; 5]> {
    let mut config = match &args.config {
        Some(path) => read_config_file(path)?,
        None => BrandConfig::default(),
    };
    if let Some(logo_fit) = &args.logo_fit {
        config.logo_fit = logo_fit.clone();
    }
    let config = resolve_brand_config(config);
    let caps = SizeCaps {
        background: parse_byte_size(&config.background_cap)?,
        header: parse_byte_size(&config.header_cap)?,
        banner: parse_byte_size(&config.banner_cap)?,
        square: parse_byte_size(&config.square_cap)?,
    };
    let logo_fit: LogoFit = config.logo_fit.parse()?;
    Ok(AssetSpec::standard_set(&caps, logo_fit))
}

fn read_config_file(path: &Path) -> Result<BrandConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}
