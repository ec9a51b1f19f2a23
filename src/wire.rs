//! On-wire message layout, tags, and the registered record datatypes.
//!
//! Every transaction between ranks is one fixed-size `Message`. The fabric
//! datatypes behind `IndexPair` and `Message` are registered lazily, once per
//! process; [`register_datatypes`] forces that registration so it happens
//! during rank init rather than racing with the server task.

use mpi::traits::*;

use crate::geometry::Layout;

/// Tag for messages addressed to a rank's server task.
pub const SERVER_TAG: i32 = 2;
/// Tag for replies addressed to a rank's compute loop.
pub const CLIENT_TAG: i32 = 3;

pub const MSG_TYPE_WORK: i32 = 1;
pub const MSG_TYPE_MEMORY: i32 = 2;

pub const MSG_ID_WORK_REQUEST: i32 = 0;
pub const MSG_ID_WORK_ALLOCATED: i32 = 1;
pub const MSG_ID_WORK_COMPLETED: i32 = 2;
pub const MSG_ID_WORK_COMPLETE_AND_ALLOCATE: i32 = 3;
pub const MSG_ID_MEMORY_WRITE: i32 = 0;
pub const MSG_ID_SHUTDOWN: i32 = 255;

/// `p_low` value meaning "no more work".
pub const NO_MORE_WORK: IndexPair = IndexPair { i: -1, j: -1 };

/// A global (row, column) index, or one corner of a half-open 2-D range.
#[derive(Equivalence, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexPair {
    pub i: i64,
    pub j: i64,
}

impl IndexPair {
    pub fn new(i: i64, j: i64) -> Self {
        Self { i, j }
    }
}

impl std::fmt::Display for IndexPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.i, self.j)
    }
}

/// A half-open 2-D index range `[low.i, high.i) x [low.j, high.j)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkUnit {
    pub low: IndexPair,
    pub high: IndexPair,
}

impl WorkUnit {
    pub fn new(low: IndexPair, high: IndexPair) -> Self {
        Self { low, high }
    }

    pub fn cell_count(&self) -> i64 {
        (self.high.i - self.low.i).max(0) * (self.high.j - self.low.j).max(0)
    }

    /// Every cell in the range, rows outermost.
    pub fn cells(&self) -> impl Iterator<Item = IndexPair> {
        let (low, high) = (self.low, self.high);
        (low.i..high.i).flat_map(move |i| (low.j..high.j).map(move |j| IndexPair { i, j }))
    }

    /// The indices this unit spans along the dispatch axis.
    pub fn primary_indices(&self, layout: Layout) -> std::ops::Range<i64> {
        match layout {
            Layout::RowMajor => self.low.i..self.high.i,
            Layout::ColumnMajor => self.low.j..self.high.j,
        }
    }
}

impl std::fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.low, self.high)
    }
}

/// The single on-wire record. Specific message ids leave unused fields at
/// their defaults.
#[derive(Equivalence, Debug, Clone, Copy, Default, PartialEq)]
pub struct Message {
    pub msg_type: i32,
    pub msg_id: i32,
    pub p_low: IndexPair,
    pub p_high: IndexPair,
    pub value: f64,
}

/// An inbound server message, decoded for dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Request {
    /// Shutdown is honored for every role the server holds.
    Shutdown,
    WorkRequest,
    WorkCompleteAndAllocate(WorkUnit),
    WorkCompleted(WorkUnit),
    MemoryWrite { at: IndexPair, value: f64 },
    Unknown { msg_type: i32, msg_id: i32 },
}

impl Message {
    pub fn work_request() -> Self {
        Self {
            msg_type: MSG_TYPE_WORK,
            msg_id: MSG_ID_WORK_REQUEST,
            ..Self::default()
        }
    }

    /// Reply carrying an allocated unit, or the no-more-work sentinel.
    pub fn work_allocated(unit: Option<&WorkUnit>) -> Self {
        let (p_low, p_high) = match unit {
            Some(unit) => (unit.low, unit.high),
            None => (NO_MORE_WORK, NO_MORE_WORK),
        };
        Self {
            msg_type: MSG_TYPE_WORK,
            msg_id: MSG_ID_WORK_ALLOCATED,
            p_low,
            p_high,
            ..Self::default()
        }
    }

    pub fn work_completed(unit: &WorkUnit) -> Self {
        Self {
            msg_type: MSG_TYPE_WORK,
            msg_id: MSG_ID_WORK_COMPLETED,
            p_low: unit.low,
            p_high: unit.high,
            ..Self::default()
        }
    }

    /// Completion of `unit` piggybacked on a request for the next one.
    pub fn work_complete_and_allocate(unit: &WorkUnit) -> Self {
        Self {
            msg_type: MSG_TYPE_WORK,
            msg_id: MSG_ID_WORK_COMPLETE_AND_ALLOCATE,
            p_low: unit.low,
            p_high: unit.high,
            ..Self::default()
        }
    }

    pub fn memory_write(at: IndexPair, value: f64) -> Self {
        Self {
            msg_type: MSG_TYPE_MEMORY,
            msg_id: MSG_ID_MEMORY_WRITE,
            p_low: at,
            p_high: at,
            value,
        }
    }

    /// The shutdown broadcast by the root once all work has completed. Every
    /// rank holds the memory role, so it is sent as a memory-class message.
    pub fn shutdown() -> Self {
        Self {
            msg_type: MSG_TYPE_MEMORY,
            msg_id: MSG_ID_SHUTDOWN,
            ..Self::default()
        }
    }

    fn unit(&self) -> WorkUnit {
        WorkUnit {
            low: self.p_low,
            high: self.p_high,
        }
    }

    /// Decodes an inbound server message.
    pub fn decode(&self) -> Request {
        match (self.msg_type, self.msg_id) {
            (MSG_TYPE_WORK | MSG_TYPE_MEMORY, MSG_ID_SHUTDOWN) => Request::Shutdown,
            (MSG_TYPE_WORK, MSG_ID_WORK_REQUEST) => Request::WorkRequest,
            (MSG_TYPE_WORK, MSG_ID_WORK_COMPLETE_AND_ALLOCATE) => {
                Request::WorkCompleteAndAllocate(self.unit())
            }
            (MSG_TYPE_WORK, MSG_ID_WORK_COMPLETED) => Request::WorkCompleted(self.unit()),
            (MSG_TYPE_MEMORY, MSG_ID_MEMORY_WRITE) => Request::MemoryWrite {
                at: self.p_low,
                value: self.value,
            },
            (msg_type, msg_id) => Request::Unknown { msg_type, msg_id },
        }
    }

    /// Interprets a client-side WORK_ALLOCATED reply. None means the sentinel
    /// (or a reply of an unexpected shape).
    pub fn allocated_unit(&self) -> Option<WorkUnit> {
        if self.msg_type != MSG_TYPE_WORK || self.msg_id != MSG_ID_WORK_ALLOCATED {
            return None;
        }
        if self.p_low.i == -1 {
            return None;
        }
        Some(self.unit())
    }
}

/// Forces registration of the process-wide fabric datatypes. Call during rank
/// init, before the server task starts.
pub fn register_datatypes() {
    let _ = IndexPair::equivalent_datatype();
    let _ = Message::equivalent_datatype();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> WorkUnit {
        WorkUnit::new(IndexPair::new(3, 0), IndexPair::new(4, 6))
    }

    #[test]
    fn decode_matches_constructors() {
        assert_eq!(Message::work_request().decode(), Request::WorkRequest);
        assert_eq!(Message::shutdown().decode(), Request::Shutdown);
        assert_eq!(
            Message::work_completed(&unit()).decode(),
            Request::WorkCompleted(unit())
        );
        assert_eq!(
            Message::work_complete_and_allocate(&unit()).decode(),
            Request::WorkCompleteAndAllocate(unit())
        );
        assert_eq!(
            Message::memory_write(IndexPair::new(2, 5), 1.5).decode(),
            Request::MemoryWrite {
                at: IndexPair::new(2, 5),
                value: 1.5
            }
        );
    }

    #[test]
    fn work_shutdown_also_decodes() {
        let msg = Message {
            msg_type: MSG_TYPE_WORK,
            msg_id: MSG_ID_SHUTDOWN,
            ..Message::default()
        };
        assert_eq!(msg.decode(), Request::Shutdown);
    }

    #[test]
    fn unknown_ids_are_preserved() {
        let msg = Message {
            msg_type: 9,
            msg_id: 1,
            ..Message::default()
        };
        assert_eq!(
            msg.decode(),
            Request::Unknown {
                msg_type: 9,
                msg_id: 1
            }
        );
    }

    #[test]
    fn allocation_reply_round_trips() {
        let reply = Message::work_allocated(Some(&unit()));
        assert_eq!(reply.allocated_unit(), Some(unit()));
        let done = Message::work_allocated(None);
        assert_eq!(done.allocated_unit(), None);
        assert_eq!(done.p_low, NO_MORE_WORK);
        // A reply of the wrong shape never yields a unit.
        assert_eq!(Message::work_request().allocated_unit(), None);
    }

    #[test]
    fn unit_iteration_order() {
        let u = WorkUnit::new(IndexPair::new(1, 0), IndexPair::new(2, 3));
        let cells: Vec<IndexPair> = u.cells().collect();
        assert_eq!(
            cells,
            vec![
                IndexPair::new(1, 0),
                IndexPair::new(1, 1),
                IndexPair::new(1, 2)
            ]
        );
        assert_eq!(u.cell_count(), 3);
        assert_eq!(u.primary_indices(Layout::RowMajor), 1..2);
        assert_eq!(u.primary_indices(Layout::ColumnMajor), 0..3);
    }
}
