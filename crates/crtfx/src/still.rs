use anyhow::{Context, Result};
use effectconfig::{ConfigSlot, ConfigSource, EffectConfig};
use image::RgbaImage;
use renderer::{
    render_software, CompositorOptions, ContextHandle, CrtEffect, EffectUniforms, GpuContext,
    RenderOutcome, ShaderSources,
};
use tracing::{info, warn};

use crate::cli::{InputArgs, StillArgs};
use crate::source::{load_image, TestPattern};

pub fn run(args: StillArgs) -> Result<()> {
    let config = load_config(&args.input);
    let source = load_source(&args.input, args.time_ms)?;

    let frame = if args.software {
        let uniforms = EffectUniforms::from_config(&config, args.time_ms);
        render_software(&source, args.input.size, &uniforms)
    } else {
        render_gpu(source, config, &args)?
    };

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    frame
        .save(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!(path = %args.output.display(), "still frame written");
    Ok(())
}

/// Fetches the config once; any failure keeps the built-in defaults.
fn load_config(input: &InputArgs) -> EffectConfig {
    match ConfigSource::parse(&input.config).and_then(|source| source.fetch()) {
        Ok(config) => config,
        Err(err) => {
            warn!(source = %input.config, error = %err, "using default effect config");
            EffectConfig::default()
        }
    }
}

fn load_source(input: &InputArgs, time_ms: f64) -> Result<RgbaImage> {
    match &input.source {
        Some(path) => load_image(path, input.size),
        None => {
            let mut pattern = TestPattern::new(input.size);
            pattern.draw(time_ms);
            Ok(pattern.into_image())
        }
    }
}

fn render_gpu(source: RgbaImage, config: EffectConfig, args: &StillArgs) -> Result<RgbaImage> {
    let mut contexts = ContextHandle::new();
    let options = CompositorOptions {
        input_size: args.input.size,
        output_size: args.input.size,
    };
    let mut effect = CrtEffect::create(
        || contexts.get_or_create(GpuContext::headless),
        options,
        &ShaderSources::crt(),
        ConfigSlot::with_config(config),
    );

    match effect.render(&source, args.time_ms) {
        RenderOutcome::Drawn(_) => {}
        RenderOutcome::Disabled => {
            warn!("effect unavailable; writing the source frame unmodified");
            return Ok(source);
        }
        outcome => anyhow::bail!("GPU render failed: {outcome:?}"),
    }

    effect
        .compositor()
        .context("compositor disappeared after rendering")?
        .capture()
}
