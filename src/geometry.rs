//! Tile geometry: how the global matrix is cut into per-rank tiles and how
//! global indices map to ranks, local indices, and storage offsets.

use std::fmt;
use std::ops::Range;

use crate::error::ConfigError;
use crate::wire::IndexPair;

/// Whether ranks walk the block grid row by row (and store their tile
/// row-major) or column by column (column-major storage).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    RowMajor,
    ColumnMajor,
}

impl Layout {
    pub fn is_row_major(self) -> bool {
        matches!(self, Layout::RowMajor)
    }
}

/// Immutable per-rank partitioning data. Cloning is cheap; the work pool
/// keeps its own copy so it never reaches back into shared mutable state.
#[derive(Debug, Clone)]
pub struct TileGeometry {
    dim_global: (i64, i64),
    dim_blocks: (i64, i64),
    dim_per_rank: (i64, i64),
    layout: Layout,
    rank: i32,
    size: i32,
    root_rank: i32,
    row_range: Range<i64>,
    col_range: Range<i64>,
}

impl TileGeometry {
    /// Validates the partitioning parameters and computes this rank's tile.
    /// `blocks = None` asks for auto-grid factoring.
    pub fn new(
        rank: i32,
        size: i32,
        root_rank: i32,
        dims: (i64, i64),
        blocks: Option<(i64, i64)>,
        layout: Layout,
    ) -> Result<Self, ConfigError> {
        if size < 1 {
            return Err(ConfigError::WorldSize(size));
        }
        if root_rank < 0 || root_rank >= size {
            return Err(ConfigError::RootRank {
                root: root_rank,
                size,
            });
        }
        let (rows, cols) = dims;
        if rows < 1 || cols < 1 {
            return Err(ConfigError::Dims { rows, cols });
        }

        let (block_rows, block_cols) = match blocks {
            Some((br, bc)) => {
                if br < 1 || bc < 1 || br * bc != size as i64 {
                    return Err(ConfigError::GridRankMismatch {
                        block_rows: br,
                        block_cols: bc,
                        size,
                    });
                }
                if rows % br != 0 || cols % bc != 0 {
                    return Err(ConfigError::IndivisibleGrid {
                        block_rows: br,
                        block_cols: bc,
                        rows,
                        cols,
                    });
                }
                (br, bc)
            }
            None => auto_grid(size, dims)?,
        };

        let tile_rows = rows / block_rows;
        let tile_cols = cols / block_cols;

        // Rank k sits at grid cell (k / Bc, k mod Bc) when row-major, and at
        // (k mod Br, k / Br) when column-major.
        let k = rank as i64;
        let (block_row, block_col) = match layout {
            Layout::RowMajor => (k / block_cols, k % block_cols),
            Layout::ColumnMajor => (k % block_rows, k / block_rows),
        };
        let row_start = block_row * tile_rows;
        let col_start = block_col * tile_cols;

        Ok(Self {
            dim_global: dims,
            dim_blocks: (block_rows, block_cols),
            dim_per_rank: (tile_rows, tile_cols),
            layout,
            rank,
            size,
            root_rank,
            row_range: row_start..row_start + tile_rows,
            col_range: col_start..col_start + tile_cols,
        })
    }

    pub fn rank(&self) -> i32 {
        self.rank
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn root_rank(&self) -> i32 {
        self.root_rank
    }

    pub fn is_root(&self) -> bool {
        self.rank == self.root_rank
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn dim_global(&self) -> (i64, i64) {
        self.dim_global
    }

    pub fn dim_blocks(&self) -> (i64, i64) {
        self.dim_blocks
    }

    pub fn tile_rows(&self) -> i64 {
        self.dim_per_rank.0
    }

    pub fn tile_cols(&self) -> i64 {
        self.dim_per_rank.1
    }

    /// Cells in this rank's tile.
    pub fn tile_len(&self) -> usize {
        (self.dim_per_rank.0 * self.dim_per_rank.1) as usize
    }

    pub fn row_range(&self) -> Range<i64> {
        self.row_range.clone()
    }

    pub fn col_range(&self) -> Range<i64> {
        self.col_range.clone()
    }

    /// Work slots: one per block row (row-major) or block column.
    pub fn n_slots(&self) -> usize {
        match self.layout {
            Layout::RowMajor => self.dim_blocks.0 as usize,
            Layout::ColumnMajor => self.dim_blocks.1 as usize,
        }
    }

    /// Primary-axis indices per slot.
    pub fn primary_len(&self) -> i64 {
        match self.layout {
            Layout::RowMajor => self.dim_per_rank.0,
            Layout::ColumnMajor => self.dim_per_rank.1,
        }
    }

    /// Total extent of the primary axis (all rows, or all columns).
    pub fn primary_extent(&self) -> i64 {
        match self.layout {
            Layout::RowMajor => self.dim_global.0,
            Layout::ColumnMajor => self.dim_global.1,
        }
    }

    /// The slot whose indices overlap the requesting rank's own tile. Serving
    /// a requester from here first keeps most of its element writes local.
    pub fn primary_slot_for(&self, rank: i32) -> usize {
        let k = rank as i64;
        let slot = match self.layout {
            Layout::RowMajor => k / self.dim_blocks.1,
            Layout::ColumnMajor => k / self.dim_blocks.0,
        };
        slot as usize
    }

    /// Local coordinates of a global index, when it falls in this tile.
    pub fn global_to_local(&self, p: IndexPair) -> Option<IndexPair> {
        if self.row_range.contains(&p.i) && self.col_range.contains(&p.j) {
            Some(IndexPair {
                i: p.i - self.row_range.start,
                j: p.j - self.col_range.start,
            })
        } else {
            None
        }
    }

    /// Global coordinates of a local index, when it is in bounds.
    pub fn local_to_global(&self, p: IndexPair) -> Option<IndexPair> {
        if (0..self.dim_per_rank.0).contains(&p.i) && (0..self.dim_per_rank.1).contains(&p.j) {
            Some(IndexPair {
                i: p.i + self.row_range.start,
                j: p.j + self.col_range.start,
            })
        } else {
            None
        }
    }

    /// Storage offset in this rank's tile for a global index it owns.
    pub fn global_to_local_offset(&self, p: IndexPair) -> Option<usize> {
        let local = self.global_to_local(p)?;
        Some(self.local_offset(local.i, local.j))
    }

    /// Storage offset for in-bounds local coordinates.
    pub fn local_offset(&self, i: i64, j: i64) -> usize {
        debug_assert!((0..self.dim_per_rank.0).contains(&i));
        debug_assert!((0..self.dim_per_rank.1).contains(&j));
        let off = match self.layout {
            Layout::RowMajor => i * self.dim_per_rank.1 + j,
            Layout::ColumnMajor => j * self.dim_per_rank.0 + i,
        };
        off as usize
    }

    /// The rank whose tile holds the given in-bounds global index.
    pub fn index_to_rank(&self, p: IndexPair) -> i32 {
        debug_assert!((0..self.dim_global.0).contains(&p.i));
        debug_assert!((0..self.dim_global.1).contains(&p.j));
        let (tile_rows, tile_cols) = self.dim_per_rank;
        let owner = match self.layout {
            Layout::RowMajor => (p.i / tile_rows) * self.dim_blocks.1 + p.j / tile_cols,
            Layout::ColumnMajor => (p.j / tile_cols) * self.dim_blocks.0 + p.i / tile_rows,
        };
        owner as i32
    }
}

impl fmt::Display for TileGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "geometry(rank {}/{}, root {}, global {}x{}, blocks {}x{}, tile {}x{}, {}, rows [{}, {}), cols [{}, {}))",
            self.rank,
            self.size,
            self.root_rank,
            self.dim_global.0,
            self.dim_global.1,
            self.dim_blocks.0,
            self.dim_blocks.1,
            self.dim_per_rank.0,
            self.dim_per_rank.1,
            if self.layout.is_row_major() {
                "row-major"
            } else {
                "column-major"
            },
            self.row_range.start,
            self.row_range.end,
            self.col_range.start,
            self.col_range.end,
        )
    }
}

/// Finds `(block_rows, block_cols)` with `block_rows * block_cols == size`
/// that divides the matrix exactly, preferring the squarest tiles. Errors
/// when no factor pair fits; an inexact grid is never chosen silently.
pub fn auto_grid(size: i32, dims: (i64, i64)) -> Result<(i64, i64), ConfigError> {
    let n = size as i64;
    let (rows, cols) = dims;
    let mut best: Option<((i64, i64), i64)> = None;
    for block_rows in 1..=n {
        if n % block_rows != 0 {
            continue;
        }
        let block_cols = n / block_rows;
        if rows % block_rows != 0 || cols % block_cols != 0 {
            continue;
        }
        let gap = (rows / block_rows - cols / block_cols).abs();
        if best.map_or(true, |(_, g)| gap < g) {
            best = Some(((block_rows, block_cols), gap));
        }
    }
    best.map(|(b, _)| b).ok_or(ConfigError::NoGridFit {
        size,
        rows,
        cols,
    })
}
