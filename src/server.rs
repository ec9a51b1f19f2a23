//! The per-rank server task.
//!
//! Each rank runs one long-lived server thread next to its compute loop. The
//! thread posts a non-blocking receive for the next server-tagged message and
//! polls the in-flight handle; that keeps the receive cancellable, so the
//! root's compute loop can stop its own server without a loopback message.
//! When the phase leaves `Running` while a receive is pending, the handle is
//! cancelled and waited on before the thread exits, so nothing is leaked and
//! a message that already arrived is never silently discarded.

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bitflags::bitflags;
use mpi::request::CancelGuard;
use mpi::topology::SystemCommunicator;
use mpi::traits::*;
use tracing::{debug, info, warn};

use crate::geometry::TileGeometry;
use crate::tile::Tile;
use crate::wire::{IndexPair, Message, Request, CLIENT_TAG, SERVER_TAG};
use crate::work::WorkPool;

/// How often a pending receive checks for cancellation.
const RECV_POLL: Duration = Duration::from_micros(50);

bitflags! {
    /// What a rank's server is willing to do. Only the root holds WORK.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Roles: u32 {
        /// Allocates work units and resolves completions.
        const WORK = 1 << 0;
        /// Accepts element writes into the local tile.
        const MEMORY = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Running = 0,
    Stopping = 1,
    Stopped = 2,
}

/// State shared between a rank's compute loop and its server thread.
pub(crate) struct ServerShared {
    pub geometry: TileGeometry,
    pub tile: Tile,
    pub roles: Roles,
    /// Present on the root rank only.
    pub pool: Option<WorkPool>,
    phase: AtomicU8,
}

impl ServerShared {
    pub fn new(geometry: TileGeometry, tile: Tile, roles: Roles, pool: Option<WorkPool>) -> Self {
        Self {
            geometry,
            tile,
            roles,
            pool,
            phase: AtomicU8::new(Phase::Running as u8),
        }
    }

    pub fn phase(&self) -> Phase {
        match self.phase.load(Ordering::Acquire) {
            0 => Phase::Running,
            1 => Phase::Stopping,
            _ => Phase::Stopped,
        }
    }

    /// Running -> Stopping. A server already past Running is left alone.
    fn request_stop(&self) {
        let _ = self.phase.compare_exchange(
            Phase::Running as u8,
            Phase::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn mark_stopped(&self) {
        self.phase.store(Phase::Stopped as u8, Ordering::Release);
    }

    /// Routes one produced element: stores it when this rank owns the cell,
    /// otherwise sends a memory write to the owning rank's server.
    pub fn write_element(&self, world: &SystemCommunicator, p: IndexPair, value: f64) {
        if let Some(offset) = self.geometry.global_to_local_offset(p) {
            self.tile.store(offset, value);
        } else {
            let owner = self.geometry.index_to_rank(p);
            world
                .process_at_rank(owner)
                .send_with_tag(&Message::memory_write(p, value), SERVER_TAG);
        }
    }

    /// Reclaims the tile once the server thread is gone.
    pub fn into_tile(self) -> Tile {
        self.tile
    }

    /// Stores a remotely produced element. False when the cell is not ours,
    /// which means the sender's routing is broken; the value is dropped.
    fn store_remote(&self, p: IndexPair, value: f64) -> bool {
        match self.geometry.global_to_local_offset(p) {
            Some(offset) => {
                self.tile.store(offset, value);
                true
            }
            None => false,
        }
    }
}

/// Handle to a rank's running server thread.
pub struct Server {
    shared: Arc<ServerShared>,
    handle: Option<JoinHandle<()>>,
}

impl Server {
    pub(crate) fn start(
        shared: Arc<ServerShared>,
        world: SystemCommunicator,
    ) -> io::Result<Self> {
        let state = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("matserve-server".into())
            .spawn(move || serve(&state, world))?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    pub fn phase(&self) -> Phase {
        self.shared.phase()
    }

    /// Asks the server to stop; any in-flight receive is cancelled. Used by
    /// the root once shutdown messages have gone out to everyone else.
    pub fn cancel(&self) {
        self.shared.request_stop();
    }

    /// Waits for the server thread to exit.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(
                    rank = self.shared.geometry.rank(),
                    "server thread panicked"
                );
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}

fn serve(shared: &ServerShared, world: SystemCommunicator) {
    let rank = shared.geometry.rank();
    info!(
        rank,
        work = shared.roles.contains(Roles::WORK),
        memory = shared.roles.contains(Roles::MEMORY),
        "server task running"
    );

    while shared.phase() == Phase::Running {
        let mut msg = Message::default();
        let received = mpi::request::scope(|scope| {
            let mut request =
                world
                    .any_process()
                    .immediate_receive_into_with_tag(scope, &mut msg, SERVER_TAG);
            loop {
                match request.test() {
                    Ok(status) => return Some(status),
                    Err(pending) => request = pending,
                }
                if shared.phase() != Phase::Running {
                    // Cancel-then-wait; the guard does not return until the
                    // fabric has released the handle.
                    drop(CancelGuard::from(request));
                    return None;
                }
                thread::sleep(RECV_POLL);
            }
        });
        let Some(status) = received else { break };
        dispatch(shared, &world, &msg, status.source_rank());
    }

    shared.mark_stopped();
    debug!(rank, "server task exiting");
}

fn dispatch(shared: &ServerShared, world: &SystemCommunicator, msg: &Message, src: i32) {
    let rank = shared.geometry.rank();
    match msg.decode() {
        Request::Shutdown => {
            debug!(rank, src, "shutdown received");
            shared.request_stop();
        }
        Request::WorkRequest => reply_with_unit(shared, world, src, None),
        Request::WorkCompleteAndAllocate(unit) => reply_with_unit(shared, world, src, Some(unit)),
        Request::WorkCompleted(unit) => {
            if let Some(pool) = work_pool(shared, src) {
                pool.complete(&unit);
            }
        }
        Request::MemoryWrite { at, value } => {
            if !shared.store_remote(at, value) {
                // Misaddressed write: the sender's index-to-rank routing is
                // wrong. Not recoverable here, so drop it loudly.
                warn!(rank, src, i = at.i, j = at.j, "dropping misaddressed memory write");
            }
        }
        Request::Unknown { msg_type, msg_id } => {
            warn!(rank, src, msg_type, msg_id, "dropping unrecognized message");
        }
    }
}

/// Resolves a completed unit if any, then allocates the next one for `src`
/// and replies on the client tag, with the sentinel once the pool is dry.
fn reply_with_unit(
    shared: &ServerShared,
    world: &SystemCommunicator,
    src: i32,
    completed: Option<crate::wire::WorkUnit>,
) {
    let Some(pool) = work_pool(shared, src) else {
        return;
    };
    if let Some(unit) = completed {
        pool.complete(&unit);
    }
    let primary_slot = shared.geometry.primary_slot_for(src);
    let unit = pool.next_unit(src, primary_slot);
    world
        .process_at_rank(src)
        .send_with_tag(&Message::work_allocated(unit.as_ref()), CLIENT_TAG);
}

/// The pool, provided this rank actually holds the work role. Work messages
/// reaching any other rank indicate a confused peer and are dropped.
fn work_pool<'a>(shared: &'a ServerShared, src: i32) -> Option<&'a WorkPool> {
    if !shared.roles.contains(Roles::WORK) {
        warn!(
            rank = shared.geometry.rank(),
            src, "dropping work message, this rank has no work role"
        );
        return None;
    }
    shared.pool.as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Layout;

    /// A memory-only rank of a 2x2 grid over a 6x4 matrix.
    fn shared_for(rank: i32) -> ServerShared {
        let geometry =
            TileGeometry::new(rank, 4, 0, (6, 4), Some((2, 2)), Layout::RowMajor).unwrap();
        let tile = Tile::new(geometry.tile_len());
        ServerShared::new(geometry, tile, Roles::MEMORY, None)
    }

    #[test]
    fn remote_write_to_an_owned_cell_is_stored() {
        // Rank 2 owns rows [3, 6) and cols [0, 2); (4, 1) is its cell.
        let shared = shared_for(2);
        let at = IndexPair::new(4, 1);
        assert!(shared.store_remote(at, 2.5));
        let offset = shared.geometry.global_to_local_offset(at).unwrap();
        assert_eq!(shared.tile.load(offset), 2.5);
        // A second write to another owned cell lands independently.
        assert!(shared.store_remote(IndexPair::new(3, 0), -1.0));
        assert_eq!(shared.tile.load(0), -1.0);
        assert_eq!(shared.tile.load(offset), 2.5);
    }

    #[test]
    fn misaddressed_write_is_dropped() {
        let shared = shared_for(2);
        // (0, 0) belongs to rank 0; rank 2 must refuse it and leave its
        // tile untouched.
        assert!(!shared.store_remote(IndexPair::new(0, 0), 7.0));
        assert!((0..shared.tile.len()).all(|off| shared.tile.load(off) == 0.0));
    }

    #[test]
    fn phase_transitions_are_one_way() {
        let shared = shared_for(1);
        assert_eq!(shared.phase(), Phase::Running);
        shared.request_stop();
        assert_eq!(shared.phase(), Phase::Stopping);
        shared.mark_stopped();
        assert_eq!(shared.phase(), Phase::Stopped);
        // A late stop request cannot resurrect a stopped server.
        shared.request_stop();
        assert_eq!(shared.phase(), Phase::Stopped);
    }
}
