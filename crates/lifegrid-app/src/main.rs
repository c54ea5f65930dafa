// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use lifegrid_core::seed::{build_seed_grid, resolve_positions};
use lifegrid_core::{
    init_tracing, CellGrid, ConfigError, Position, SeedSource, Settings, TickClock, TickRate,
};
use lifegrid_math::{Camera2D, Vec2};
use lifegrid_platform::{map_key, Control, InputState};
use lifegrid_render::{RenderSettings, RenderSize, Renderer};
use lifegrid_render_vk::{Simulation, VkRenderer};
use tracing::{error, info, warn};

use lifegrid_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Fullscreen, Window, WindowId},
};

mod config;

/// Status for configuration and seed errors; shared with clap's usage errors.
const EXIT_USAGE: u8 = 2;

use config::{load_cfg, resolve, Args, Resolved};

struct App {
    settings: Settings,
    render: RenderSettings,
    seed: CellGrid,
    window: Option<Window>,
    renderer: Option<VkRenderer>,

    clock: TickClock,
    camera: Camera2D,
    input: InputState,

    fatal: Option<anyhow::Error>,
    exiting: bool,
    frames: u32,
    dropped: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(settings: Settings, render: RenderSettings, seed: CellGrid) -> Self {
        let now = Instant::now();
        App {
            clock: TickClock::new(TickRate::new(settings.ticks_per_second), now),
            camera: Camera2D::new((settings.window.width, settings.window.height)),
            settings,
            render,
            seed,
            window: None,
            renderer: None,
            input: InputState::default(),
            fatal: None,
            exiting: false,
            frames: 0,
            dropped: 0,
            last_fps_instant: now,
        }
    }

    /// Renderer goes before the window it draws into.
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.fatal = Some(err);
        self.shutdown(event_loop);
    }

    fn create_renderer(&self, window: &Window, size: RenderSize) -> Result<VkRenderer> {
        let wh = window.window_handle().context("window_handle")?;
        let dh = window.display_handle().context("display_handle")?;
        VkRenderer::new(&wh, &dh, size, &self.render, &self.seed)
    }

    fn apply(&mut self, control: Control, event_loop: &ActiveEventLoop) {
        match control {
            Control::Close => {
                info!("escape pressed");
                self.shutdown(event_loop);
            }
            Control::TogglePause => {
                let paused = self.clock.toggle_pause(Instant::now());
                info!("paused = {paused}");
            }
            Control::Faster | Control::Slower => {
                let delta = if control == Control::Faster { 1 } else { -1 };
                if self.clock.adjust_rate(delta) {
                    info!("tick rate = {}/s", self.clock.rate().effective());
                }
            }
            Control::Reseed => self.reseed(),
            Control::Zoom(steps) => self.camera.zoom_by(steps),
            Control::Pan { from, to } => self.camera.drag(Vec2::from(from), Vec2::from(to)),
        }
    }

    /// Rebuilds the seed from its source; a random source without a fixed RNG
    /// seed draws a new pattern.
    fn reseed(&mut self) {
        let grid = self.settings.grid;
        let positions = match resolve_positions(&self.settings.seed, grid) {
            Ok(p) => p,
            Err(e) => {
                warn!("reseed skipped: {e}");
                return;
            }
        };
        let cells = build_seed_grid(&positions, grid);
        if let Some(r) = &mut self.renderer {
            match r.reseed(&cells) {
                Ok(()) => self.seed = cells,
                Err(e) => warn!("reseed failed: {e:#}"),
            }
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = &mut self.renderer else {
            return;
        };
        let tick = self.clock.poll(Instant::now());
        let view = self.camera.view_matrix().to_cols_array_2d();
        match renderer.render(tick, view) {
            Ok(report) => {
                if tick && !report.ticked {
                    self.clock.cancel_tick();
                }
                if report.dropped {
                    self.dropped = self.dropped.saturating_add(1);
                } else {
                    self.frames = self.frames.saturating_add(1);
                }
            }
            Err(e) => self.fail(event_loop, e.context("render")),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.exiting {
            return;
        }

        let w = &self.settings.window;
        let mut attrs = Window::default_attributes()
            .with_title("lifegrid")
            .with_inner_size(PhysicalSize::new(w.width, w.height))
            .with_resizable(false);
        if w.fullscreen {
            attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        let window = match event_loop.create_window(attrs) {
            Ok(window) => window,
            Err(e) => {
                self.fail(event_loop, anyhow!(e).context("create_window"));
                return;
            }
        };

        let size = window.inner_size();
        let render_size = RenderSize {
            width: size.width.max(1),
            height: size.height.max(1),
        };
        let renderer = match self.create_renderer(&window, render_size) {
            Ok(r) => r,
            Err(e) => {
                drop(window);
                self.fail(event_loop, e.context("vulkan setup"));
                return;
            }
        };

        info!(
            "window {}x{}, grid {}x{}, {} ticks/s, device {}",
            render_size.width,
            render_size.height,
            self.settings.grid.width,
            self.settings.grid.height,
            self.clock.rate().effective(),
            renderer.device_name()
        );

        self.camera.set_viewport((render_size.width, render_size.height));
        self.clock = TickClock::new(self.clock.rate(), Instant::now());
        self.window = Some(window);
        self.renderer = Some(renderer);
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::KeyboardInput { event, .. } => {
                let control = map_key(
                    &event.logical_key,
                    event.physical_key,
                    event.state.is_pressed(),
                    event.repeat,
                );
                if let Some(c) = control {
                    self.apply(c, event_loop);
                }
            }

            WindowEvent::MouseInput { state, button, .. } => self.input.on_button(button, state),

            WindowEvent::CursorMoved { position, .. } => {
                if let Some(c) = self.input.on_cursor(position.x, position.y) {
                    self.apply(c, event_loop);
                }
            }

            WindowEvent::CursorLeft { .. } => self.input.on_cursor_left(),

            WindowEvent::MouseWheel { delta, .. } => {
                if let Some(c) = self.input.on_scroll(delta) {
                    self.apply(c, event_loop);
                }
            }

            WindowEvent::RedrawRequested => {
                if !self.exiting {
                    self.redraw(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!(
                "fps ~ {} (dropped {}), generation {}",
                self.frames,
                self.dropped,
                self.clock.ticks()
            );
            self.frames = 0;
            self.dropped = 0;
            self.last_fps_instant = now;
        }
    }
}

/// Headless run of `ticks` generations checked against the CPU rule.
fn verify(resolved: &Resolved, seed: &CellGrid, ticks: u32) -> Result<ExitCode> {
    let mut sim = Simulation::new(seed, resolved.render.shader_dir.as_deref())?;
    info!(
        "verifying {ticks} tick(s) of a {}x{} grid on {}",
        resolved.settings.grid.width,
        resolved.settings.grid.height,
        sim.device_name()
    );

    let mut expected = seed.clone();
    for _ in 0..ticks {
        expected = expected.step();
    }
    sim.step(ticks)?;
    let got = sim.read()?;

    if got == expected {
        info!("verify ok: {} live cell(s)", got.live_count());
        return Ok(ExitCode::SUCCESS);
    }
    let size = got.size();
    let mismatched = (0..size.height)
        .flat_map(|y| (0..size.width).map(move |x| (x, y)))
        .filter(|&(x, y)| got.get(x, y) != expected.get(x, y))
        .count();
    error!(
        "verify FAILED: {mismatched} cell(s) differ (gpu {} live, cpu {} live)",
        got.live_count(),
        expected.live_count()
    );
    Ok(ExitCode::FAILURE)
}

/// Config file, flags and seed source, all resolved before any GPU object exists.
fn prepare(args: &Args) -> Result<(Resolved, Vec<Position>), ConfigError> {
    let cfg = load_cfg(args.config.as_deref())?;
    let resolved = resolve(args, &cfg)?;
    let positions = resolve_positions(&resolved.settings.seed, resolved.settings.grid)?;
    Ok((resolved, positions))
}

/// Exit status: 0 on a normal close or a passing `--verify-ticks`, 1 on a GPU
/// setup failure or a verification mismatch, [`EXIT_USAGE`] when the config file,
/// flags or seed file are rejected. The last matches the status clap uses for
/// its own usage errors, so every invocation problem reports the same code.
fn run() -> Result<ExitCode> {
    let args = Args::parse();
    let (resolved, positions) = match prepare(&args) {
        Ok(p) => p,
        Err(e) => {
            error!("{e}");
            return Ok(ExitCode::from(EXIT_USAGE));
        }
    };
    let seed = build_seed_grid(&positions, resolved.settings.grid);
    if matches!(resolved.settings.seed, SeedSource::Empty) {
        info!("no seed given; starting from an empty grid");
    }

    if let Some(ticks) = resolved.verify_ticks {
        return verify(&resolved, &seed, ticks);
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(resolved.settings, resolved.render, seed);
    event_loop.run_app(&mut app)?;

    match app.fatal {
        Some(_) => Ok(ExitCode::FAILURE),
        None => Ok(ExitCode::SUCCESS),
    }
}

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("lifegrid").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn seed_file_errors_are_caught_before_the_gpu() {
        let err = prepare(&args(&["-u", "/definitely/not/seed.txt"])).unwrap_err();
        assert!(matches!(err, ConfigError::SeedFile { .. }));
    }

    #[test]
    fn config_errors_use_the_usage_status() {
        let err = prepare(&args(&["--config", "/definitely/not/lifegrid.toml"])).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigFile { .. }));
        let usage = Args::try_parse_from(["lifegrid", "--no-such-flag"]).unwrap_err();
        assert_eq!(i32::from(EXIT_USAGE), usage.exit_code());
    }

    #[test]
    fn pixels_become_positions() {
        let (resolved, positions) = prepare(&args(&["-i", "8", "-j", "8", "-p", "1,1"])).unwrap();
        assert_eq!(resolved.settings.grid.width, 8);
        assert_eq!(positions, vec![Position::new(1, 1)]);
    }
}
