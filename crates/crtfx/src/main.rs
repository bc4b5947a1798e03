//! Entry point that wires the CLI to the preview window, still export and the
//! config utilities.
//!
//! - `crtfx` (no subcommand) opens the preview window, see `run.rs`.
//! - `crtfx still` renders one composited frame to a PNG, see `still.rs`.
//! - `crtfx config defaults|check` prints or verifies effect configs.

mod cli;
mod record;
mod run;
mod source;
mod still;

use anyhow::{Context, Result};
use cli::{Command, ConfigAction};
use effectconfig::{ConfigSource, EffectConfig};

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Some(Command::Still(args)) => still::run(args),
        Some(Command::Config(config_cmd)) => handle_config_command(config_cmd.action),
        None => run::run(cli.run),
    }
}

fn handle_config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Defaults => {
            println!("{}", EffectConfig::default().to_json_pretty()?);
            Ok(())
        }
        ConfigAction::Check { source } => {
            let source = ConfigSource::parse(&source)?;
            let config = source
                .fetch()
                .with_context(|| format!("config at {source} is not usable"))?;
            println!("{}", config.to_json_pretty()?);
            Ok(())
        }
    }
}
