// SPDX-License-Identifier: CEPL-1.0
//! Turning a [`SeedSource`] into the first generation.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::{CellGrid, ConfigError, GridSize, Position, SeedSource};

/// Parses seed text: one `x,y` pair per line. Lines that do not match are skipped.
pub fn parse_positions(text: &str) -> Vec<Position> {
    let mut skipped = 0usize;
    let positions: Vec<Position> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| match l.parse::<Position>() {
            Ok(p) => Some(p),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .collect();
    if skipped > 0 {
        debug!("seed: ignored {skipped} non-matching line(s)");
    }
    positions
}

pub fn read_seed_file(path: &Path) -> Result<Vec<Position>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::SeedFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_positions(&text))
}

/// `count` uniformly distributed positions. Duplicates are possible.
pub fn random_positions(grid: GridSize, count: u32, seed: u64) -> Vec<Position> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..count)
        .map(|_| Position {
            x: rng.u32(0..grid.width),
            y: rng.u32(0..grid.height),
        })
        .collect()
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Resolves the seed source into the positions it names (file I/O happens here).
pub fn resolve_positions(source: &SeedSource, grid: GridSize) -> Result<Vec<Position>, ConfigError> {
    Ok(match source {
        SeedSource::Empty => Vec::new(),
        SeedSource::Positions(p) => p.clone(),
        SeedSource::Random { count, seed } => {
            let seed = seed.unwrap_or_else(clock_seed);
            debug!("seed: random count={count} rng_seed={seed}");
            random_positions(grid, *count, seed)
        }
        SeedSource::File(path) => read_seed_file(path)?,
    })
}

/// Builds the initial grid. Out-of-range positions are dropped with a warning.
pub fn build_seed_grid(positions: &[Position], grid: GridSize) -> CellGrid {
    let mut cells = CellGrid::new(grid);
    let mut dropped = 0usize;
    for &p in positions {
        if grid.contains(p) {
            cells.set(p.x, p.y, true);
        } else {
            dropped += 1;
        }
    }
    if dropped > 0 {
        warn!(
            "seed: dropped {dropped} position(s) outside the {}x{} grid",
            grid.width, grid.height
        );
    }
    info!("seed: {} live cell(s)", cells.live_count());
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lines_and_ignores_noise() {
        let text = "1,2\n  3 , 4  \n# comment\n\nfoo\n5,6,7\n10,20\r\n";
        assert_eq!(
            parse_positions(text),
            vec![Position::new(1, 2), Position::new(3, 4), Position::new(10, 20)]
        );
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = read_seed_file(Path::new("/definitely/not/here.txt")).unwrap_err();
        assert!(matches!(err, ConfigError::SeedFile { .. }));
    }

    #[test]
    fn reads_seed_file_from_disk() {
        let path = std::env::temp_dir().join(format!("lifegrid-seed-{}.txt", std::process::id()));
        std::fs::write(&path, "0,0\n2,1\n").unwrap();
        let got = read_seed_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(got, vec![Position::new(0, 0), Position::new(2, 1)]);
    }

    #[test]
    fn random_positions_stay_in_bounds_and_are_reproducible() {
        let grid = GridSize::new(7, 3);
        let a = random_positions(grid, 500, 42);
        let b = random_positions(grid, 500, 42);
        assert_eq!(a.len(), 500);
        assert_eq!(a, b);
        assert!(a.iter().all(|&p| grid.contains(p)));
    }

    #[test]
    fn seed_grid_drops_out_of_range() {
        let grid = GridSize::new(4, 4);
        let cells = build_seed_grid(
            &[Position::new(1, 1), Position::new(2, 2), Position::new(4, 0)],
            grid,
        );
        assert_eq!(cells.live_count(), 2);
        assert!(cells.get(1, 1));
        assert!(cells.get(2, 2));
    }
}
