//! Per-basic-block live range bookkeeping.
//!
//! Generated by the DDG builder and consulted later by dead-result
//! elimination: a register write with no reader inside the block is still
//! live if the register is in the used-after set.

use std::collections::{BTreeMap, BTreeSet};

use ttac_program::{MoveNodeId, RegRef};

/// First/last defines and uses of each register in one block, plus the
/// definitions reaching in from predecessors.
///
/// Containers are ordered by register so that any iteration over them is
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct LiveRangeData {
    /// Last writes of each register in the block (several under exclusive
    /// guards).
    pub reg_defines: BTreeMap<RegRef, Vec<MoveNodeId>>,
    /// Last reads of each register after its final write.
    pub reg_last_uses: BTreeMap<RegRef, Vec<MoveNodeId>>,
    /// First writes of each register, before which the inherited value is
    /// still observable.
    pub reg_first_defines: BTreeMap<RegRef, Vec<MoveNodeId>>,
    /// Reads of each register before any write in the block.
    pub reg_first_uses: BTreeMap<RegRef, Vec<MoveNodeId>>,
    /// Definitions reaching in from predecessor blocks, with the loop
    /// distance of the control edge they travel.
    pub reg_def_reaches: BTreeMap<RegRef, Vec<(MoveNodeId, u8)>>,
    /// Uses reaching in from predecessor blocks (for antidependences).
    pub reg_use_reaches: BTreeMap<RegRef, Vec<(MoveNodeId, u8)>>,
    /// Registers read by some later block.
    pub registers_used_after: BTreeSet<RegRef>,
}

impl LiveRangeData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live_out(&self, reg: RegRef) -> bool {
        self.registers_used_after.contains(&reg)
    }

    pub fn record_use(&mut self, reg: RegRef, node: MoveNodeId, seen_write: bool) {
        if !seen_write {
            self.reg_first_uses.entry(reg).or_default().push(node);
        }
        self.reg_last_uses.entry(reg).or_default().push(node);
    }

    pub fn record_define(&mut self, reg: RegRef, node: MoveNodeId, first_write: bool) {
        if first_write {
            self.reg_first_defines.entry(reg).or_default().push(node);
        }
        // A new unconditional write supersedes the previous last define and
        // clears accumulated last uses; guarded writes accumulate.
        self.reg_defines.entry(reg).or_default().push(node);
        self.reg_last_uses.remove(&reg);
    }

    /// Replace the accumulated last defines of `reg` with only `node`, for
    /// an unconditional (kill) write.
    pub fn record_kill(&mut self, reg: RegRef, node: MoveNodeId) {
        self.reg_defines.insert(reg, vec![node]);
        self.reg_last_uses.remove(&reg);
    }

    /// Merge the used-after view of a successor into this block.
    pub fn merge_successor(&mut self, succ: &LiveRangeData) {
        for reg in succ.reg_first_uses.keys() {
            self.registers_used_after.insert(*reg);
        }
        for reg in &succ.registers_used_after {
            // Only registers the successor does not fully redefine first.
            if !succ.reg_first_defines.contains_key(reg) || succ.reg_first_uses.contains_key(reg) {
                self.registers_used_after.insert(*reg);
            }
        }
    }
}
