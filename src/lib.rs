//! Fill a dense matrix `A[i, j] = f(i, j)` across MPI ranks.
//!
//! Each rank owns one tile of the result and runs a server task next to its
//! compute loop. A single root rank owns the work pool; everyone else asks it
//! for rows (or columns) over the wire, computes them, and sends elements
//! that land outside its own tile to the owning rank's server. The work pool
//! prefers handing a requester indices overlapping its own tile and lets it
//! steal from the fullest slot otherwise, so writes mostly stay local and
//! nobody idles at the tail of the run.
//!
//! [`node::Node`] composes the pieces for one rank; the modules underneath
//! are usable on their own and are where the interesting invariants live.

pub mod error;
pub mod geometry;
pub mod index_set;
pub mod node;
pub mod server;
pub mod tile;
pub mod wire;
pub mod work;

pub use error::{ConfigError, InitError};
pub use geometry::{auto_grid, Layout, TileGeometry};
pub use index_set::IndexSet;
pub use node::{Node, NodeConfig};
pub use server::{Phase, Roles, Server};
pub use tile::Tile;
pub use wire::{IndexPair, Message, WorkUnit, CLIENT_TAG, SERVER_TAG};
pub use work::WorkPool;
