//! Per-rank composition: join the fabric, build the geometry and tile, start
//! the server task, then drive the compute loop until the whole matrix has
//! been filled and every server has been shut down.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mpi::environment::Universe;
use mpi::topology::SystemCommunicator;
use mpi::traits::*;
use mpi::Threading;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::InitError;
use crate::geometry::{Layout, TileGeometry};
use crate::server::{Phase, Roles, Server, ServerShared};
use crate::tile::Tile;
use crate::wire::{self, IndexPair, Message, WorkUnit, CLIENT_TAG, SERVER_TAG};
use crate::work::WorkPool;

/// How often the root re-checks the termination predicate while stragglers
/// finish their last units.
const COMPLETION_POLL: Duration = Duration::from_millis(1);

/// Tag for the token passed around when printing tiles in rank order.
const TOKEN_TAG: i32 = 0;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Global matrix dimensions (rows, cols).
    pub dims: (i64, i64),
    /// Block grid, or None to factor one automatically.
    pub blocks: Option<(i64, i64)>,
    pub layout: Layout,
    /// The rank that owns the work pool and initiates shutdown.
    pub root_rank: i32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            dims: (10_000, 10_000),
            blocks: None,
            layout: Layout::RowMajor,
            root_rank: 0,
        }
    }
}

/// One rank of the distributed fill.
pub struct Node {
    // This has a custom drop impl which calls MPI_FINALIZE so it needs to
    // outlive everything that talks to the fabric.
    #[allow(unused)]
    universe: Universe,
    world: SystemCommunicator,
    shared: Arc<ServerShared>,
    server: Server,
}

impl Node {
    /// Brings this rank up: fabric, geometry, tile, roles, server task, and
    /// the init barrier. Errors abort before the server task exists.
    pub fn init(config: NodeConfig) -> Result<Self, InitError> {
        Self::init_inner(config, None)
    }

    /// Like [`Node::init`] but filling caller-provided tile storage, handed
    /// back by [`Node::into_tile_buffer`].
    pub fn init_with_buffer(config: NodeConfig, buf: Vec<f64>) -> Result<Self, InitError> {
        Self::init_inner(config, Some(buf))
    }

    fn init_inner(config: NodeConfig, buf: Option<Vec<f64>>) -> Result<Self, InitError> {
        let (universe, threading) = mpi::initialize_with_threading(Threading::Multiple)
            .ok_or(InitError::FabricInit)?;
        if threading != Threading::Multiple {
            return Err(InitError::ThreadingLevel);
        }
        let world = universe.world();

        // The wire datatypes are process-wide; registering them now keeps
        // the server task from racing the first sender over it.
        wire::register_datatypes();

        let geometry = TileGeometry::new(
            world.rank(),
            world.size(),
            config.root_rank,
            config.dims,
            config.blocks,
            config.layout,
        )?;
        let rank = geometry.rank();
        if geometry.is_root() {
            info!(rank, %geometry, "partitioned");
        }

        let tile = match buf {
            Some(buf) => Tile::adopt(buf, geometry.tile_len())?,
            None => Tile::new(geometry.tile_len()),
        };

        let (roles, pool) = if geometry.is_root() {
            (Roles::WORK | Roles::MEMORY, Some(WorkPool::new(&geometry)))
        } else {
            (Roles::MEMORY, None)
        };

        let shared = Arc::new(ServerShared::new(geometry, tile, roles, pool));
        let server = Server::start(Arc::clone(&shared), universe.world())
            .map_err(InitError::ServerSpawn)?;
        world.barrier();

        Ok(Self {
            universe,
            world,
            shared,
            server,
        })
    }

    pub fn rank(&self) -> i32 {
        self.shared.geometry.rank()
    }

    pub fn size(&self) -> i32 {
        self.shared.geometry.size()
    }

    pub fn is_root(&self) -> bool {
        self.shared.geometry.is_root()
    }

    pub fn geometry(&self) -> &TileGeometry {
        &self.shared.geometry
    }

    /// Where this rank's server task currently is in its lifecycle. After
    /// [`Node::run`] returns it is `Stopped` on every rank.
    pub fn server_phase(&self) -> Phase {
        self.server.phase()
    }

    /// The settled value at a global index, when this rank owns it. Only
    /// meaningful after [`Node::run`] has returned.
    pub fn local_value(&self, p: IndexPair) -> Option<f64> {
        let offset = self.shared.geometry.global_to_local_offset(p)?;
        Some(self.shared.tile.load(offset))
    }

    /// Runs the fill to completion: obtains work units until there are none
    /// left, produces their elements with `kernel`, routes every element to
    /// its owning tile, then takes part in the orderly shutdown.
    pub fn run<F>(&mut self, kernel: F)
    where
        F: Fn(i64, i64) -> f64 + Sync,
    {
        let shared = Arc::clone(&self.shared);
        let rank = shared.geometry.rank();
        let root = shared.geometry.root_rank();

        if let Some(pool) = &shared.pool {
            // Root: allocate in-process, skipping the wire.
            info!(rank, "element loop running");
            while let Some(unit) = pool.next_unit(root, 0) {
                self.compute_unit(&unit, &kernel);
                pool.complete(&unit);
            }
            debug!(rank, "element loop drained, waiting for outstanding units");
            while !pool.all_completed() {
                thread::sleep(COMPLETION_POLL);
            }
            info!(rank, "all work completed, shutting down servers");
            let shutdown = Message::shutdown();
            for peer in 0..shared.geometry.size() {
                if peer != rank {
                    self.world
                        .process_at_rank(peer)
                        .send_with_tag(&shutdown, SERVER_TAG);
                }
            }
            self.server.cancel();
        } else {
            // Worker: keep exactly one outstanding request against the root.
            info!(rank, "element loop running");
            self.world
                .process_at_rank(root)
                .send_with_tag(&Message::work_request(), SERVER_TAG);
            loop {
                let (reply, _status) = self
                    .world
                    .process_at_rank(root)
                    .receive_with_tag::<Message>(CLIENT_TAG);
                let Some(unit) = reply.allocated_unit() else {
                    break;
                };
                self.compute_unit(&unit, &kernel);
                self.world
                    .process_at_rank(root)
                    .send_with_tag(&Message::work_complete_and_allocate(&unit), SERVER_TAG);
            }
            info!(rank, "element loop finished");
        }

        self.server.join();
        self.world.barrier();
    }

    /// Produces every element of one unit and routes each to its owner. The
    /// kernel is pure, so the values are computed in parallel; the stores and
    /// sends stay on this thread.
    fn compute_unit<F>(&self, unit: &WorkUnit, kernel: &F)
    where
        F: Fn(i64, i64) -> f64 + Sync,
    {
        let cells: Vec<IndexPair> = unit.cells().collect();
        let values: Vec<f64> = cells.par_iter().map(|p| kernel(p.i, p.j)).collect();
        for (p, value) in cells.into_iter().zip(values) {
            self.shared.write_element(&self.world, p, value);
        }
    }

    /// Geometry and, on the root, work pool state. Mostly useful in logs.
    pub fn summary(&self) -> String {
        let mut out = format!("{}, roles {:?}", self.shared.geometry, self.shared.roles);
        if let Some(pool) = &self.shared.pool {
            out.push('\n');
            out.push_str(&pool.to_string());
        }
        out
    }

    /// Prints the upper-left corner (at most 10x10) of every rank's tile in
    /// rank order, passing a token around so the output does not interleave.
    /// Call after [`Node::run`].
    pub fn print_tile_corners(&self) {
        let g = &self.shared.geometry;
        let rank = g.rank();
        if rank > 0 {
            let (_token, _status) = self
                .world
                .process_at_rank(rank - 1)
                .receive_with_tag::<i32>(TOKEN_TAG);
        } else {
            println!("Sub-matrices in sequence by rank:");
        }
        println!("Rank {rank}:");
        for i in 0..g.tile_rows().min(10) {
            let mut line = String::from("   ");
            for j in 0..g.tile_cols().min(10) {
                if j > 0 {
                    line.push(',');
                }
                line.push_str(&format!(" {:8.3}", self.shared.tile.load(g.local_offset(i, j))));
            }
            println!("{line}");
        }
        if rank + 1 < g.size() {
            self.world
                .process_at_rank(rank + 1)
                .send_with_tag(&1i32, TOKEN_TAG);
        }
    }

    /// Tears the node down and hands back the tile storage.
    pub fn into_tile_buffer(self) -> Vec<f64> {
        let Node {
            universe,
            shared,
            mut server,
            ..
        } = self;
        server.cancel();
        server.join();
        drop(server);
        let shared = Arc::try_unwrap(shared)
            .unwrap_or_else(|_| panic!("server task still holds the tile"));
        drop(universe);
        shared.into_tile().into_vec()
    }
}
