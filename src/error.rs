//! Error taxonomy: configuration problems surface before any work starts,
//! resource problems surface from init, and the caller aborts on either.

use thiserror::Error;

/// Rejected geometry or partitioning parameters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("world size {0} must be at least 1")]
    WorldSize(i32),

    #[error("root rank {root} is outside [0, {size})")]
    RootRank { root: i32, size: i32 },

    #[error("matrix dimensions {rows}x{cols} must be positive")]
    Dims { rows: i64, cols: i64 },

    #[error("block grid {block_rows}x{block_cols} does not multiply out to {size} ranks")]
    GridRankMismatch {
        block_rows: i64,
        block_cols: i64,
        size: i32,
    },

    #[error("block grid {block_rows}x{block_cols} does not divide matrix {rows}x{cols}")]
    IndivisibleGrid {
        block_rows: i64,
        block_cols: i64,
        rows: i64,
        cols: i64,
    },

    #[error("no exact {size}-rank block grid fits a {rows}x{cols} matrix")]
    NoGridFit { size: i32, rows: i64, cols: i64 },

    #[error("tile buffer holds {got} cells but the tile needs {need}")]
    TileBufferSize { got: usize, need: usize },
}

/// Failure to bring a rank up. Nothing has been spawned when these are
/// returned, so the caller can simply abort.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("messaging fabric failed to initialize (already initialized in this process?)")]
    FabricInit,

    #[error("messaging fabric does not provide full multithreading support")]
    ThreadingLevel,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn server task")]
    ServerSpawn(#[source] std::io::Error),
}
