use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use effectconfig::{ConfigSlot, ConfigSource};
use renderer::{
    CompositorOptions, CrtEffect, GpuContext, PresentOutcome, RenderOutcome, ShaderSources,
    SurfaceLayout, WindowPresenter,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use crate::cli::RunArgs;
use crate::record::Recorder;
use crate::source::HostSource;

const DEFAULT_FILTER: &str = "warn,crtfx=info,renderer=info,effectconfig=info,naga=error,wgpu=error,wgpu_core=error,wgpu_hal=error,winit=error";

pub fn initialise_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Frame clock that stops while the window is unfocused, so animation resumes
/// where it left off.
struct FrameClock {
    start: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl FrameClock {
    fn new(now: Instant) -> Self {
        Self {
            start: now,
            paused_at: None,
            paused_total: Duration::ZERO,
        }
    }

    fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    fn pause(&mut self, now: Instant) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    fn resume(&mut self, now: Instant) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += now.saturating_duration_since(paused_at);
        }
    }

    fn timestamp_ms(&self, now: Instant) -> f64 {
        let reference = self.paused_at.unwrap_or(now);
        let elapsed = reference
            .saturating_duration_since(self.start)
            .saturating_sub(self.paused_total);
        elapsed.as_secs_f64() * 1000.0
    }
}

/// Re-fetch schedule for `--reload-interval`.
struct ReloadSchedule {
    source: ConfigSource,
    interval: Option<Duration>,
    last_request: Instant,
}

impl ReloadSchedule {
    fn due(&mut self, now: Instant) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };
        if now.saturating_duration_since(self.last_request) < interval {
            return false;
        }
        self.last_request = now;
        true
    }
}

struct App {
    presenter: WindowPresenter,
    effect: CrtEffect,
    source: HostSource,
    recorder: Recorder,
    clock: FrameClock,
    reload: ReloadSchedule,
    virtual_size: (u32, u32),
    layout: SurfaceLayout,
    // Dropped last: the surface inside `presenter` points at this window.
    window: Arc<Window>,
}

impl App {
    fn resize(&mut self, size: PhysicalSize<u32>) {
        self.presenter.resize(size);
        self.layout = SurfaceLayout::letterbox((size.width, size.height), self.virtual_size);
        self.effect.sync_layout(self.layout);
        debug!(
            width = self.layout.width,
            height = self.layout.height,
            left = self.layout.left,
            top = self.layout.top,
            "layout synced"
        );
    }

    fn set_focused(&mut self, focused: bool) {
        let now = Instant::now();
        if focused {
            self.clock.resume(now);
            self.window.request_redraw();
        } else {
            self.clock.pause(now);
        }
        debug!(focused, "focus changed");
    }

    fn toggle_recording(&mut self) {
        if !self.effect.is_active() {
            warn!("recording needs the CRT effect; it is unavailable");
            return;
        }
        match self.recorder.toggle() {
            Ok(active) => info!(active, "recording toggled"),
            Err(err) => error!(error = %format!("{err:#}"), "failed to toggle recording"),
        }
    }

    fn frame(&mut self) -> Result<()> {
        let now = Instant::now();
        let timestamp_ms = self.clock.timestamp_ms(now);

        if self.reload.due(now) {
            if let Some(compositor) = self.effect.compositor_mut() {
                compositor
                    .config_slot_mut()
                    .spawn_reload(self.reload.source.clone());
            }
        }

        self.source.update(timestamp_ms);
        let frame = self.source.as_frame();

        let presented = match self.effect.render(frame, timestamp_ms) {
            RenderOutcome::Drawn(_) | RenderOutcome::Dropped => match self.effect.compositor() {
                Some(compositor) => {
                    let outcome = self.presenter.present_output(compositor)?;
                    // The readback blocks until the GPU copy lands; skip it while
                    // the writer is behind.
                    if self.recorder.wants_frame() {
                        match compositor.capture() {
                            Ok(image) => self.recorder.submit(image),
                            Err(err) => debug!(error = %err, "failed to capture frame for recording"),
                        }
                    }
                    outcome
                }
                None => self.presenter.present_source(frame, self.layout)?,
            },
            RenderOutcome::Disabled => self.presenter.present_source(frame, self.layout)?,
            RenderOutcome::ContextLost => return Err(anyhow!("GPU device lost")),
        };

        if presented == PresentOutcome::Skipped {
            debug!("frame skipped while the surface was reconfigured");
        }
        Ok(())
    }
}

pub fn run(args: RunArgs) -> Result<()> {
    let size = args.input.size;
    let event_loop = EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let window = WindowBuilder::new()
        .with_title("crtfx")
        .with_inner_size(PhysicalSize::new(size.0, size.1))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create preview window: {err}"))?;
    let window = Arc::new(window);

    let (context, surface) = GpuContext::for_window(window.as_ref(), window.inner_size())
        .context("failed to initialise GPU for the preview window")?;
    let context = Arc::new(context);
    let presenter = WindowPresenter::new(Arc::clone(&context), surface)
        .context("failed to build the presentation pipeline")?;

    let config_source = ConfigSource::parse(&args.input.config)?;
    let mut config = ConfigSlot::new();
    // Fail-open: the defaults render until (and unless) the fetch succeeds.
    config.spawn_reload(config_source.clone());

    let options = CompositorOptions {
        input_size: size,
        output_size: size,
    };
    let effect = CrtEffect::create(
        move || Ok(context),
        options,
        &ShaderSources::crt(),
        config,
    );

    let now = Instant::now();
    let mut app = App {
        presenter,
        effect,
        source: HostSource::from_args(args.input.source, size),
        recorder: Recorder::new(args.record_dir),
        clock: FrameClock::new(now),
        reload: ReloadSchedule {
            source: config_source,
            interval: args.reload_interval.map(Duration::from_secs_f64),
            last_request: now,
        },
        virtual_size: size,
        layout: SurfaceLayout::default(),
        window,
    };
    app.resize(app.window.inner_size());
    info!(width = size.0, height = size.1, "preview running; R toggles recording, Esc quits");

    let mut result = Ok(());
    let run_result = event_loop.run(|event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == app.window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
            WindowEvent::Resized(new_size) => app.resize(new_size),
            WindowEvent::Focused(focused) => app.set_focused(focused),
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed && !event.repeat {
                    match event.logical_key {
                        Key::Named(NamedKey::Escape) => elwt.exit(),
                        Key::Character(ref value) if value.eq_ignore_ascii_case("r") => {
                            app.toggle_recording()
                        }
                        _ => {}
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = app.frame() {
                    error!(error = %format!("{err:#}"), "preview stopped");
                    result = Err(err);
                    elwt.exit();
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            if app.clock.is_paused() {
                elwt.set_control_flow(ControlFlow::Wait);
            } else {
                app.window.request_redraw();
                elwt.set_control_flow(ControlFlow::Poll);
            }
        }
        _ => {}
    });

    if let Err(err) = run_result {
        return Err(anyhow!("window event loop error: {err}"));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_stops_while_paused() {
        let start = Instant::now();
        let mut clock = FrameClock::new(start);

        let t1 = start + Duration::from_millis(100);
        assert!((clock.timestamp_ms(t1) - 100.0).abs() < 1e-6);

        clock.pause(t1);
        assert!(clock.is_paused());
        assert!((clock.timestamp_ms(t1 + Duration::from_secs(5)) - 100.0).abs() < 1e-6);

        let resumed = t1 + Duration::from_secs(5);
        clock.resume(resumed);
        let after = clock.timestamp_ms(resumed + Duration::from_millis(50));
        assert!((after - 150.0).abs() < 1e-6, "{after}");
    }

    #[test]
    fn reload_schedule_respects_interval() {
        let start = Instant::now();
        let mut schedule = ReloadSchedule {
            source: ConfigSource::default(),
            interval: Some(Duration::from_secs(2)),
            last_request: start,
        };
        assert!(!schedule.due(start + Duration::from_secs(1)));
        assert!(schedule.due(start + Duration::from_secs(2)));
        assert!(!schedule.due(start + Duration::from_secs(3)));

        let mut disabled = ReloadSchedule {
            interval: None,
            ..schedule
        };
        assert!(!disabled.due(start + Duration::from_secs(60)));
    }
}
