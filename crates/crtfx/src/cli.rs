use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use effectconfig::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(
    name = "crtfx",
    author,
    version,
    about = "CRT post-processing compositor",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Options shared by every command that composites frames.
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Image to composite; the animated test pattern is used when omitted.
    #[arg(long, value_name = "PATH", env = "CRTFX_SOURCE")]
    pub source: Option<PathBuf>,

    /// Effect config as a file path or `http(s)://` URL.
    #[arg(long, value_name = "PATH|URL", env = "CRTFX_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Input and output resolution (e.g. `1024x1024`).
    #[arg(
        long,
        value_name = "WIDTHxHEIGHT",
        value_parser = parse_surface_size,
        default_value = "1024x1024"
    )]
    pub size: (u32, u32),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Re-fetch the config every N seconds while the preview runs.
    #[arg(long, value_name = "SECONDS", value_parser = parse_interval)]
    pub reload_interval: Option<f64>,

    /// Directory that receives PNG sequences when recording is toggled with `R`.
    #[arg(long, value_name = "DIR", default_value = "recordings")]
    pub record_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render a single composited frame to a PNG file.
    Still(StillArgs),
    /// Inspect effect configuration documents.
    Config(ConfigCommand),
}

#[derive(Args, Debug)]
pub struct StillArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Where to write the PNG.
    #[arg(long, short, value_name = "PATH")]
    pub output: PathBuf,

    /// Timestamp the frame is rendered at, in milliseconds.
    #[arg(long, value_name = "MILLISECONDS", default_value_t = 0.0)]
    pub time_ms: f64,

    /// Use the CPU rasterizer instead of the GPU.
    #[arg(long)]
    pub software: bool,
}

#[derive(Args, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the built-in default config as JSON.
    Defaults,
    /// Fetch and parse a config, printing the resolved values.
    Check {
        /// File path or `http(s)://` URL.
        #[arg(value_name = "PATH|URL")]
        source: String,
    },
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_surface_size(spec: &str) -> Result<(u32, u32), String> {
    let trimmed = spec.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| "expected WxH format, e.g. 1024x1024".to_string())?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width in size '{trimmed}'"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height in size '{trimmed}'"))?;

    if width == 0 || height == 0 {
        return Err("surface dimensions must be greater than zero".to_string());
    }
    Ok((width, height))
}

fn parse_interval(value: &str) -> Result<f64, String> {
    let seconds: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid reload interval '{value}'"))?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err("reload interval must be a positive number of seconds".to_string());
    }
    Ok(seconds)
}
