// SPDX-License-Identifier: CEPL-1.0
//! Command line and `lifegrid.toml`. Flags win over the file, the file wins
//! over built-in defaults.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use lifegrid_core::settings::{DEFAULT_HEIGHT, DEFAULT_TICK_RATE, DEFAULT_WIDTH};
use lifegrid_core::{ConfigError, GridSize, Position, SeedSource, Settings, WindowSettings};
use lifegrid_render::{PresentStrategy, RenderSettings};
use serde::Deserialize;
use tracing::{debug, info};

pub const DEFAULT_CONFIG: &str = "lifegrid.toml";

#[derive(Parser, Debug)]
#[command(author, version, about = "Conway's Game of Life, stepped on the GPU", long_about = None)]
pub struct Args {
    /// Window width in pixels
    #[arg(short = 'w', long)]
    pub width: Option<u32>,
    /// Window height in pixels
    #[arg(short = 'H', long)]
    pub height: Option<u32>,
    /// Borderless fullscreen
    #[arg(short = 'f', long)]
    pub fullscreen: bool,
    /// Grid width in cells (defaults to the window width)
    #[arg(short = 'i', long)]
    pub grid_width: Option<u32>,
    /// Grid height in cells (defaults to the window height)
    #[arg(short = 'j', long)]
    pub grid_height: Option<u32>,
    /// Seed file with one `x,y` pair per line
    #[arg(short = 'u', long)]
    pub file: Option<PathBuf>,
    /// Seed this many uniformly random cells
    #[arg(short = 'r', long)]
    pub random: Option<u32>,
    /// Fixed RNG seed for --random
    #[arg(long)]
    pub random_seed: Option<u64>,
    /// Live cells as `x,y` pairs
    #[arg(short = 'p', long, num_args = 1.., value_name = "X,Y")]
    pub pixels: Vec<Position>,
    /// Ticks per second
    #[arg(long)]
    pub fps: Option<u32>,
    /// How the grid reaches the window
    #[arg(long, value_enum)]
    pub present: Option<PresentMode>,
    /// Load compiled `*.spv` shaders from this directory
    #[arg(long)]
    pub shader_dir: Option<PathBuf>,
    /// Run N ticks headless, compare with the CPU rule, then exit
    #[arg(long, value_name = "N")]
    pub verify_ticks: Option<u32>,
    /// Config file (default: ./lifegrid.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentMode {
    #[default]
    Sampled,
    Blit,
}

impl From<PresentMode> for PresentStrategy {
    fn from(m: PresentMode) -> Self {
        match m {
            PresentMode::Sampled => PresentStrategy::Sampled,
            PresentMode::Blit => PresentStrategy::Blit,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub grid: GridCfg,
    #[serde(default)]
    pub sim: SimCfg,
    #[serde(default)]
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct WindowCfg {
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(default)]
    pub fullscreen: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GridCfg {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SimCfg {
    pub ticks_per_second: Option<u32>,
    pub seed_file: Option<PathBuf>,
    pub random: Option<u32>,
    pub random_seed: Option<u64>,
    /// `"x,y"` strings, same syntax as `--pixels`.
    #[serde(default)]
    pub pixels: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub present: PresentMode,
    pub shader_dir: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            present: PresentMode::Sampled,
            shader_dir: None,
        }
    }
}

fn default_clear() -> [f32; 4] {
    RenderSettings::default().clear_color
}

/// A missing default file means defaults; a missing `--config` file is an error.
pub fn load_cfg(path: Option<&Path>) -> Result<AppCfg, ConfigError> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG), false),
    };
    let text = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if !explicit && e.kind() == ErrorKind::NotFound => {
            debug!("no {}; using defaults", path.display());
            return Ok(AppCfg::default());
        }
        Err(e) => {
            return Err(ConfigError::ConfigFile {
                path,
                message: e.to_string(),
            })
        }
    };
    let cfg = toml::from_str::<AppCfg>(&text).map_err(|e| ConfigError::ConfigFile {
        path: path.clone(),
        message: e.to_string(),
    })?;
    info!("config loaded from {}", path.display());
    Ok(cfg)
}

/// Everything the binary needs to start, already validated.
#[derive(Debug)]
pub struct Resolved {
    pub settings: Settings,
    pub render: RenderSettings,
    pub verify_ticks: Option<u32>,
}

pub fn resolve(args: &Args, cfg: &AppCfg) -> Result<Resolved, ConfigError> {
    let window = WindowSettings {
        width: args.width.or(cfg.window.width).unwrap_or(DEFAULT_WIDTH),
        height: args.height.or(cfg.window.height).unwrap_or(DEFAULT_HEIGHT),
        fullscreen: args.fullscreen || cfg.window.fullscreen,
    };
    let grid = GridSize::new(
        args.grid_width.or(cfg.grid.width).unwrap_or(window.width),
        args.grid_height.or(cfg.grid.height).unwrap_or(window.height),
    );

    let from_args = seed_from_args(args)?;
    let seed = match from_args {
        Some(s) => s,
        None => seed_from_cfg(&cfg.sim)?.unwrap_or_default(),
    };

    let settings = Settings {
        window,
        grid,
        ticks_per_second: args
            .fps
            .or(cfg.sim.ticks_per_second)
            .unwrap_or(DEFAULT_TICK_RATE),
        seed,
    };
    settings.validate()?;

    let render = RenderSettings {
        grid: (grid.width, grid.height),
        clear_color: cfg.render.clear_color,
        present: args.present.unwrap_or(cfg.render.present).into(),
        shader_dir: args.shader_dir.clone().or_else(|| cfg.render.shader_dir.clone()),
    };

    Ok(Resolved {
        settings,
        render,
        verify_ticks: args.verify_ticks,
    })
}

fn pick_seed(mut found: Vec<(&'static str, SeedSource)>) -> Result<Option<SeedSource>, ConfigError> {
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop().map(|(_, s)| s)),
        _ => {
            let names: Vec<&str> = found.iter().map(|(n, _)| *n).collect();
            Err(ConfigError::ConflictingSeeds(names.join(", ")))
        }
    }
}

fn seed_from_args(args: &Args) -> Result<Option<SeedSource>, ConfigError> {
    let mut found = Vec::new();
    if let Some(path) = &args.file {
        found.push(("--file", SeedSource::File(path.clone())));
    }
    if let Some(count) = args.random {
        found.push((
            "--random",
            SeedSource::Random {
                count,
                seed: args.random_seed,
            },
        ));
    }
    if !args.pixels.is_empty() {
        found.push(("--pixels", SeedSource::Positions(args.pixels.clone())));
    }
    pick_seed(found)
}

fn seed_from_cfg(sim: &SimCfg) -> Result<Option<SeedSource>, ConfigError> {
    let mut found = Vec::new();
    if let Some(path) = &sim.seed_file {
        found.push(("sim.seed_file", SeedSource::File(path.clone())));
    }
    if let Some(count) = sim.random {
        found.push((
            "sim.random",
            SeedSource::Random {
                count,
                seed: sim.random_seed,
            },
        ));
    }
    if !sim.pixels.is_empty() {
        let positions = sim
            .pixels
            .iter()
            .map(|s| s.parse::<Position>())
            .collect::<Result<Vec<_>, _>>()?;
        found.push(("sim.pixels", SeedSource::Positions(positions)));
    }
    pick_seed(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("lifegrid").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_follow_the_window() {
        let r = resolve(&args(&[]), &AppCfg::default()).unwrap();
        assert_eq!(r.settings.window.width, DEFAULT_WIDTH);
        assert_eq!(r.settings.grid, GridSize::new(DEFAULT_WIDTH, DEFAULT_HEIGHT));
        assert_eq!(r.settings.ticks_per_second, DEFAULT_TICK_RATE);
        assert_eq!(r.settings.seed, SeedSource::Empty);
        assert_eq!(r.render.present, PresentStrategy::Sampled);
        assert!(r.verify_ticks.is_none());

        let r = resolve(&args(&["-w", "640", "-H", "480"]), &AppCfg::default()).unwrap();
        assert_eq!(r.settings.grid, GridSize::new(640, 480));
        assert_eq!(r.render.grid, (640, 480));
    }

    #[test]
    fn flags_override_file() {
        let cfg: AppCfg = toml::from_str(
            r#"
            [window]
            width = 800
            height = 600
            [grid]
            width = 100
            [sim]
            ticks_per_second = 30
            [render]
            present = "blit"
            clear_color = [0.0, 0.0, 0.0, 1.0]
            "#,
        )
        .unwrap();
        let r = resolve(&args(&["-i", "50", "--fps", "5"]), &cfg).unwrap();
        assert_eq!(r.settings.window.width, 800);
        assert_eq!(r.settings.grid, GridSize::new(50, 600));
        assert_eq!(r.settings.ticks_per_second, 5);
        assert_eq!(r.render.present, PresentStrategy::Blit);
        assert_eq!(r.render.clear_color, [0.0, 0.0, 0.0, 1.0]);

        let r = resolve(&args(&["--present", "sampled"]), &cfg).unwrap();
        assert_eq!(r.render.present, PresentStrategy::Sampled);
    }

    #[test]
    fn pixels_parse_from_flags_and_file() {
        let r = resolve(&args(&["-p", "1,2", "3, 4"]), &AppCfg::default()).unwrap();
        assert_eq!(
            r.settings.seed,
            SeedSource::Positions(vec![Position::new(1, 2), Position::new(3, 4)])
        );

        let cfg: AppCfg = toml::from_str("[sim]\npixels = [\"5,6\"]\n").unwrap();
        let r = resolve(&args(&[]), &cfg).unwrap();
        assert_eq!(r.settings.seed, SeedSource::Positions(vec![Position::new(5, 6)]));

        assert!(Args::try_parse_from(["lifegrid", "-p", "nope"]).is_err());
    }

    #[test]
    fn one_seed_source_at_a_time() {
        let err = resolve(&args(&["-r", "10", "-u", "seed.txt"]), &AppCfg::default()).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingSeeds(ref s) if s.contains("--file")));

        // flags replace the file's seed instead of conflicting with it
        let cfg: AppCfg = toml::from_str("[sim]\nrandom = 5\n").unwrap();
        let r = resolve(&args(&["-r", "7", "--random-seed", "42"]), &cfg).unwrap();
        assert_eq!(
            r.settings.seed,
            SeedSource::Random {
                count: 7,
                seed: Some(42)
            }
        );
    }

    #[test]
    fn invalid_values_are_config_errors() {
        assert!(matches!(
            resolve(&args(&["--fps", "0"]), &AppCfg::default()),
            Err(ConfigError::ZeroTickRate)
        ));
        assert!(matches!(
            resolve(&args(&["-i", "0"]), &AppCfg::default()),
            Err(ConfigError::ZeroSize { .. })
        ));
        assert!(toml::from_str::<AppCfg>("[render]\nvsync = true\n").is_err());
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let err = load_cfg(Some(Path::new("/definitely/not/lifegrid.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigFile { .. }));
    }
}
