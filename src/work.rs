//! The root rank's work pool.
//!
//! Primary-axis indices (rows when row-major, columns otherwise) are grouped
//! into one slot per block row or block column. A requester is served from
//! the slot matching its own grid position first, so the rows or columns it
//! computes overlap its own tile and most element writes stay local. When a
//! requester's slot runs dry it steals from whichever other slot has the most
//! work left, which keeps stragglers from sitting idle at the end of a run.
//!
//! Every index moves `available -> assigned -> completed` within its slot and
//! never backwards; the three sets of a slot always partition the slot's
//! original range. One mutex serializes the root's in-process allocations
//! with those arriving through its server task.

use std::fmt;
use std::sync::Mutex;

use tracing::trace;

use crate::geometry::{Layout, TileGeometry};
use crate::index_set::IndexSet;
use crate::wire::{IndexPair, WorkUnit};

#[derive(Debug, Default)]
struct Slot {
    available: IndexSet,
    assigned: IndexSet,
    completed: IndexSet,
}

pub struct WorkPool {
    /// Value copy of the partitioning constants, captured at construction.
    geometry: TileGeometry,
    slots: Mutex<Vec<Slot>>,
}

impl WorkPool {
    pub fn new(geometry: &TileGeometry) -> Self {
        let len = geometry.primary_len();
        let slots = (0..geometry.n_slots() as i64)
            .map(|s| {
                let mut slot = Slot::default();
                slot.available.push_range(s * len..(s + 1) * len);
                slot
            })
            .collect();
        Self {
            geometry: geometry.clone(),
            slots: Mutex::new(slots),
        }
    }

    /// Atomically allocates one work unit: the smallest index from the
    /// requester's primary slot, or a steal from the other slot with the most
    /// available indices (scanning upward, so ties go to the lowest slot).
    /// None means everything has been handed out.
    pub fn next_unit(&self, requester: i32, primary_slot: usize) -> Option<WorkUnit> {
        let mut slots = self.slots.lock().expect("work pool mutex poisoned");

        if let Some(index) = slots
            .get_mut(primary_slot)
            .and_then(|slot| slot.available.pop_next())
        {
            slots[primary_slot].assigned.push(index);
            trace!(requester, slot = primary_slot, index, "allocated from primary slot");
            return Some(self.unit_for(index));
        }

        let mut steal: Option<(usize, usize)> = None;
        for (n, slot) in slots.iter().enumerate() {
            if n == primary_slot {
                continue;
            }
            let avail = slot.available.len();
            if avail > steal.map_or(0, |(_, most)| most) {
                steal = Some((n, avail));
            }
        }
        let (n, _) = steal?;
        let index = slots[n].available.pop_next()?;
        slots[n].assigned.push(index);
        trace!(requester, slot = n, index, "allocated from alternate slot");
        Some(self.unit_for(index))
    }

    /// Marks every primary index of `unit` completed. Each allocated unit
    /// must be completed exactly once; double completion is a caller bug.
    pub fn complete(&self, unit: &WorkUnit) {
        let len = self.geometry.primary_len();
        let mut slots = self.slots.lock().expect("work pool mutex poisoned");
        for index in unit.primary_indices(self.geometry.layout()) {
            if let Some(slot) = slots.get_mut((index / len) as usize) {
                slot.assigned.remove(index);
                slot.completed.push(index);
            }
        }
    }

    /// True once no slot has available or assigned indices left. Indices only
    /// leave those sets by completing, so this is the termination predicate.
    pub fn all_completed(&self) -> bool {
        let slots = self.slots.lock().expect("work pool mutex poisoned");
        slots
            .iter()
            .all(|slot| slot.available.is_empty() && slot.assigned.is_empty())
    }

    /// One unit is one primary-axis index, full span on the other axis.
    fn unit_for(&self, index: i64) -> WorkUnit {
        let (rows, cols) = self.geometry.dim_global();
        match self.geometry.layout() {
            Layout::RowMajor => {
                WorkUnit::new(IndexPair::new(index, 0), IndexPair::new(index + 1, cols))
            }
            Layout::ColumnMajor => {
                WorkUnit::new(IndexPair::new(0, index), IndexPair::new(rows, index + 1))
            }
        }
    }
}

impl fmt::Display for WorkPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock().expect("work pool mutex poisoned");
        writeln!(f, "work pool ({} slots)", slots.len())?;
        for (n, slot) in slots.iter().enumerate() {
            writeln!(
                f,
                "  {n}: available {} assigned {} completed {}",
                slot.available, slot.assigned, slot.completed
            )?;
        }
        Ok(())
    }
}
