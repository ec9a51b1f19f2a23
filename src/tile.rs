//! Local tile storage.
//!
//! During a fill the tile is written by two agents in the same process: the
//! compute loop stores elements it produced that land in its own tile, and
//! the server task stores elements produced remotely. The geometry partition
//! guarantees every cell has exactly one writer, and readers only look after
//! the fill's closing barrier, so the cells need no lock. That single-writer
//! invariant is what makes the `Sync` impl below sound.

use std::cell::UnsafeCell;

use crate::error::ConfigError;

pub struct Tile {
    cells: Box<[UnsafeCell<f64>]>,
}

// Safety: each cell is written by at most one thread for the lifetime of a
// fill (disjoint ownership by construction) and read only after the fill has
// been joined and barriered.
unsafe impl Send for Tile {}
unsafe impl Sync for Tile {}

impl Tile {
    /// A zero-filled tile of `len` cells.
    pub fn new(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| UnsafeCell::new(0.0)).collect(),
        }
    }

    /// Adopts caller-provided storage. The buffer is handed back by
    /// [`Tile::into_vec`] whichever way the tile was built.
    pub fn adopt(buf: Vec<f64>, len: usize) -> Result<Self, ConfigError> {
        if buf.len() != len {
            return Err(ConfigError::TileBufferSize {
                got: buf.len(),
                need: len,
            });
        }
        Ok(Self {
            cells: buf.into_iter().map(UnsafeCell::new).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn store(&self, offset: usize, value: f64) {
        unsafe { *self.cells[offset].get() = value }
    }

    pub fn load(&self, offset: usize) -> f64 {
        unsafe { *self.cells[offset].get() }
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.cells
            .into_vec()
            .into_iter()
            .map(UnsafeCell::into_inner)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_zeroed() {
        let tile = Tile::new(6);
        assert_eq!(tile.len(), 6);
        assert!((0..6).all(|off| tile.load(off) == 0.0));
    }

    #[test]
    fn stores_and_loads() {
        let tile = Tile::new(4);
        tile.store(3, 2.5);
        tile.store(0, -1.0);
        assert_eq!(tile.load(3), 2.5);
        assert_eq!(tile.load(0), -1.0);
        assert_eq!(tile.into_vec(), vec![-1.0, 0.0, 0.0, 2.5]);
    }

    #[test]
    fn adopted_buffer_round_trips() {
        let tile = Tile::adopt(vec![1.0, 2.0, 3.0], 3).unwrap();
        assert_eq!(tile.load(1), 2.0);
        assert_eq!(tile.into_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn adopt_checks_length() {
        assert_eq!(
            Tile::adopt(vec![0.0; 5], 6).unwrap_err(),
            ConfigError::TileBufferSize { got: 5, need: 6 }
        );
    }

    #[test]
    fn disjoint_writers_do_not_interfere() {
        // The fill's shape in miniature: two threads own disjoint cells of
        // the same tile and write without locking.
        let tile = Tile::new(64);
        std::thread::scope(|s| {
            s.spawn(|| {
                for off in 0..32 {
                    tile.store(off, off as f64);
                }
            });
            s.spawn(|| {
                for off in 32..64 {
                    tile.store(off, -(off as f64));
                }
            });
        });
        for off in 0..32 {
            assert_eq!(tile.load(off), off as f64);
        }
        for off in 32..64 {
            assert_eq!(tile.load(off), -(off as f64));
        }
    }
}
