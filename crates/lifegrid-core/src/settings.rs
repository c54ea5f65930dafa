// SPDX-License-Identifier: CEPL-1.0
//! Startup settings. Built once by the binary, read-only afterwards.

use std::path::PathBuf;
use std::str::FromStr;

use crate::clock::MAX_TICK_RATE;
use crate::ConfigError;

pub const DEFAULT_WIDTH: u32 = 1920;
pub const DEFAULT_HEIGHT: u32 = 1080;
pub const DEFAULT_TICK_RATE: u32 = 15;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: u32,
    pub y: u32,
}

impl Position {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl FromStr for Position {
    type Err = ConfigError;

    /// Parses `"x,y"`; whitespace anywhere in the input is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let bad = || ConfigError::BadPosition(s.to_string());
        let (x, y) = compact.split_once(',').ok_or_else(bad)?;
        if x.is_empty() || y.is_empty() || !x.bytes().chain(y.bytes()).all(|b| b.is_ascii_digit())
        {
            return Err(bad());
        }
        Ok(Position {
            x: x.parse().map_err(|_| bad())?,
            y: y.parse().map_err(|_| bad())?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridSize {
    pub width: u32,
    pub height: u32,
}

impl GridSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn contains(&self, p: Position) -> bool {
        p.x < self.width && p.y < self.height
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowSettings {
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

/// Where the first generation comes from.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum SeedSource {
    #[default]
    Empty,
    Positions(Vec<Position>),
    Random { count: u32, seed: Option<u64> },
    File(PathBuf),
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub window: WindowSettings,
    pub grid: GridSize,
    pub ticks_per_second: u32,
    pub seed: SeedSource,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            window: WindowSettings {
                width: DEFAULT_WIDTH,
                height: DEFAULT_HEIGHT,
                fullscreen: false,
            },
            grid: GridSize::new(DEFAULT_WIDTH, DEFAULT_HEIGHT),
            ticks_per_second: DEFAULT_TICK_RATE,
            seed: SeedSource::Empty,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::ZeroSize {
                what: "window size",
                width: self.window.width,
                height: self.window.height,
            });
        }
        if self.grid.width == 0 || self.grid.height == 0 {
            return Err(ConfigError::ZeroSize {
                what: "grid size",
                width: self.grid.width,
                height: self.grid.height,
            });
        }
        if self.ticks_per_second == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.ticks_per_second > MAX_TICK_RATE {
            return Err(ConfigError::TickRateTooHigh(self.ticks_per_second));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_parses_with_whitespace() {
        assert_eq!(" 3 , 14 ".parse::<Position>().unwrap(), Position::new(3, 14));
        assert_eq!("0,0".parse::<Position>().unwrap(), Position::new(0, 0));
    }

    #[test]
    fn position_rejects_garbage() {
        for s in ["", "3", "3,", ",4", "a,b", "-1,2", "1,2,3", "1.5,2"] {
            assert!(s.parse::<Position>().is_err(), "{s:?} should not parse");
        }
    }

    #[test]
    fn validate_rejects_zero_sizes_and_rates() {
        let mut s = Settings::default();
        assert!(s.validate().is_ok());

        s.grid = GridSize::new(0, 10);
        assert!(matches!(s.validate(), Err(ConfigError::ZeroSize { .. })));

        s = Settings::default();
        s.ticks_per_second = 0;
        assert!(matches!(s.validate(), Err(ConfigError::ZeroTickRate)));

        s.ticks_per_second = MAX_TICK_RATE + 1;
        assert!(matches!(s.validate(), Err(ConfigError::TickRateTooHigh(_))));
    }

    #[test]
    fn grid_contains_is_exclusive() {
        let g = GridSize::new(4, 3);
        assert!(g.contains(Position::new(3, 2)));
        assert!(!g.contains(Position::new(4, 0)));
        assert!(!g.contains(Position::new(0, 3)));
        assert_eq!(g.cell_count(), 12);
    }
}
