// SPDX-License-Identifier: CEPL-1.0
//! Host-side cell grid: seed staging, readback decoding, and the reference rule
//! the GPU step is checked against.

use crate::{GridSize, Position};

/// RGBA8 texel of a live cell, as uploaded to and read back from the GPU.
pub const ALIVE_TEXEL: u32 = 0xFFFF_FFFF;
pub const DEAD_TEXEL: u32 = 0x0000_0000;

#[derive(Clone, PartialEq, Eq)]
pub struct CellGrid {
    size: GridSize,
    cells: Vec<bool>,
}

impl std::fmt::Debug for CellGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "CellGrid {}x{}", self.size.width, self.size.height)?;
        for row in self.cells.chunks(self.size.width as usize) {
            let line: String = row.iter().map(|&a| if a { '#' } else { '.' }).collect();
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

impl CellGrid {
    pub fn new(size: GridSize) -> Self {
        Self {
            size,
            cells: vec![false; size.cell_count()],
        }
    }

    pub fn from_positions(size: GridSize, positions: &[Position]) -> Self {
        let mut g = Self::new(size);
        for p in positions.iter().filter(|p| size.contains(**p)) {
            g.set(p.x, p.y, true);
        }
        g
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.size.width as usize + x as usize
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.cells[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, alive: bool) {
        let i = self.index(x, y);
        self.cells[i] = alive;
    }

    pub fn live_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    pub fn live_positions(&self) -> Vec<Position> {
        let w = self.size.width as usize;
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, &c)| c)
            .map(|(i, _)| Position::new((i % w) as u32, (i / w) as u32))
            .collect()
    }

    /// Row-major RGBA8 texels, one `u32` per cell.
    pub fn to_texels(&self) -> Vec<u32> {
        self.cells
            .iter()
            .map(|&c| if c { ALIVE_TEXEL } else { DEAD_TEXEL })
            .collect()
    }

    /// Decodes row-major RGBA8 texels (little-endian `u32`). A cell is alive when
    /// its red channel is above half intensity.
    pub fn from_texels(size: GridSize, texels: &[u32]) -> Self {
        assert_eq!(texels.len(), size.cell_count(), "texel count mismatch");
        Self {
            size,
            cells: texels.iter().map(|&t| (t & 0xFF) > 0x7F).collect(),
        }
    }

    fn live_neighbours(&self, x: u32, y: u32) -> u8 {
        let (w, h) = (self.size.width as i64, self.size.height as i64);
        let mut n = 0;
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                if nx >= 0 && ny >= 0 && nx < w && ny < h && self.get(nx as u32, ny as u32) {
                    n += 1;
                }
            }
        }
        n
    }

    /// One generation of B3/S23 with dead cells beyond the border; matches the
    /// built-in step shader.
    pub fn step(&self) -> CellGrid {
        let mut next = CellGrid::new(self.size);
        for y in 0..self.size.height {
            for x in 0..self.size.width {
                let n = self.live_neighbours(x, y);
                let alive = self.get(x, y);
                next.set(x, y, n == 3 || (alive && n == 2));
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(w: u32, h: u32, live: &[(u32, u32)]) -> CellGrid {
        let ps: Vec<Position> = live.iter().map(|&(x, y)| Position::new(x, y)).collect();
        CellGrid::from_positions(GridSize::new(w, h), &ps)
    }

    #[test]
    fn lone_cell_dies() {
        let g = grid(8, 8, &[(4, 4)]);
        assert_eq!(g.step().live_count(), 0);
    }

    #[test]
    fn blinker_oscillates() {
        let horizontal = grid(5, 5, &[(1, 2), (2, 2), (3, 2)]);
        let vertical = grid(5, 5, &[(2, 1), (2, 2), (2, 3)]);
        assert_eq!(horizontal.step(), vertical);
        assert_eq!(horizontal.step().step(), horizontal);
    }

    #[test]
    fn block_in_corner_survives_dead_border() {
        let block = grid(4, 4, &[(0, 0), (1, 0), (0, 1), (1, 1)]);
        assert_eq!(block.step(), block);
    }

    #[test]
    fn blinker_on_edge_does_not_wrap() {
        let g = grid(6, 6, &[(5, 1), (5, 2), (5, 3)]);
        let next = g.step();
        assert_eq!(
            next.live_positions(),
            vec![Position::new(4, 2), Position::new(5, 2)]
        );
    }

    #[test]
    fn texels_decode_red_channel() {
        let g = grid(4, 4, &[(1, 1), (2, 2)]);
        let texels = g.to_texels();
        assert_eq!(texels[5], ALIVE_TEXEL);
        assert_eq!(texels[0], DEAD_TEXEL);
        let back = CellGrid::from_texels(g.size(), &texels);
        assert_eq!(back.live_positions(), vec![Position::new(1, 1), Position::new(2, 2)]);

        let mut dim = vec![DEAD_TEXEL; 16];
        dim[3] = 0xFF00_0040; // opaque but dark red
        assert_eq!(CellGrid::from_texels(g.size(), &dim).live_count(), 0);
    }
}
