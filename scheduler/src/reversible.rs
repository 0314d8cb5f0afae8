//! The reversible transformation framework.
//!
//! Every local change the scheduler makes — placing a move, bypassing a
//! register, dropping a dead result — is a [Reversible] value: `apply`
//! attempts the change and records exactly what it touched, `undo` reverts
//! it together with every child transformation registered along the way.
//! A failed `apply` leaves the world untouched, which is what lets the
//! retry ladders explore alternatives without bookkeeping at the call
//! sites.

use crate::{
    sched::Bf2Scheduler,
    transforms::{assign, bypass, dre, front, push, regcopy, schedule, share, swap, unschedule},
};

/// The transformation payloads, one variant per transformation class.
///
/// Each payload carries the parameters of the attempt and, after a
/// successful `apply`, the captured state its `undo` needs.
pub enum TransformKind {
    Noop,
    ScheduleFront(front::ScheduleFront),
    ScheduleBu(schedule::ScheduleBu),
    ScheduleTd(schedule::ScheduleTd),
    ScheduleExact(schedule::ScheduleExact),
    AssignMove(assign::AssignMove),
    UnscheduleMove(unschedule::UnscheduleMove),
    EarlyBypass(bypass::EarlyBypass),
    LateBypass(bypass::LateBypass),
    LoopBypass(bypass::LoopBypass),
    GuardConversion(bypass::GuardConversion),
    DreEarly(dre::DreEarly),
    DreLate(dre::DreLate),
    DreLoop(dre::DreLoop),
    ShareOperand(share::ShareOperand),
    DropPreShared(share::DropPreShared),
    SwapOperands(swap::SwapOperands),
    RegCopyBefore(regcopy::RegCopyBefore),
    PushMoveUp(push::PushMoveUp),
    PushMoveDown(push::PushMoveDown),
}

impl TransformKind {
    fn apply(
        &mut self,
        sched: &mut Bf2Scheduler<'_>,
        pre: &mut Vec<Reversible>,
        post: &mut Vec<Reversible>,
    ) -> bool {
        match self {
            Self::Noop => true,
            Self::ScheduleFront(t) => t.apply(sched, pre, post),
            Self::ScheduleBu(t) => t.apply(sched, pre, post),
            Self::ScheduleTd(t) => t.apply(sched, pre, post),
            Self::ScheduleExact(t) => t.apply(sched, pre, post),
            Self::AssignMove(t) => t.apply(sched),
            Self::UnscheduleMove(t) => t.apply(sched),
            Self::EarlyBypass(t) => t.apply(sched, post),
            Self::LateBypass(t) => t.apply(sched, pre, post),
            Self::LoopBypass(t) => t.apply(sched, post),
            Self::GuardConversion(t) => t.apply(sched, pre, post),
            Self::DreEarly(t) => t.apply(sched, post),
            Self::DreLate(t) => t.apply(sched, pre, post),
            Self::DreLoop(t) => t.apply(sched, pre, post),
            Self::ShareOperand(t) => t.apply(sched),
            Self::DropPreShared(t) => t.apply(sched),
            Self::SwapOperands(t) => t.apply(sched),
            Self::RegCopyBefore(t) => t.apply(sched, pre, post),
            Self::PushMoveUp(t) => t.apply(sched, pre, post),
            Self::PushMoveDown(t) => t.apply(sched, pre, post),
        }
    }

    fn undo(&mut self, sched: &mut Bf2Scheduler<'_>) {
        match self {
            Self::Noop => {}
            Self::ScheduleFront(t) => t.undo(sched),
            Self::ScheduleBu(t) => t.undo(sched),
            Self::ScheduleTd(t) => t.undo(sched),
            Self::ScheduleExact(t) => t.undo(sched),
            Self::AssignMove(t) => t.undo(sched),
            Self::UnscheduleMove(t) => t.undo(sched),
            Self::EarlyBypass(t) => t.undo(sched),
            Self::LateBypass(t) => t.undo(sched),
            Self::LoopBypass(t) => t.undo(sched),
            Self::GuardConversion(t) => t.undo(sched),
            Self::DreEarly(t) => t.undo(sched),
            Self::DreLate(t) => t.undo(sched),
            Self::DreLoop(t) => t.undo(sched),
            Self::ShareOperand(t) => t.undo(sched),
            Self::DropPreShared(t) => t.undo(sched),
            Self::SwapOperands(t) => t.undo(sched),
            Self::RegCopyBefore(t) => t.undo(sched),
            Self::PushMoveUp(t) => t.undo(sched),
            Self::PushMoveDown(t) => t.undo(sched),
        }
    }
}

/// One reversible transformation with its child transformations.
///
/// `pre` children are prerequisites created before the own effect, `post`
/// children were chained after it. Undo runs post children in reverse, then
/// the own effect, then pre children in reverse.
pub struct Reversible {
    kind: TransformKind,
    pre: Vec<Reversible>,
    post: Vec<Reversible>,
}

impl Reversible {
    pub fn new(kind: TransformKind) -> Self {
        Self {
            kind,
            pre: Vec::new(),
            post: Vec::new(),
        }
    }

    /// Attempt the transformation. On failure the world is unchanged and
    /// the value carries no recorded state.
    pub fn apply(&mut self, sched: &mut Bf2Scheduler<'_>) -> bool {
        let mut kind = std::mem::replace(&mut self.kind, TransformKind::Noop);
        let ok = kind.apply(sched, &mut self.pre, &mut self.post);
        self.kind = kind;
        debug_assert!(ok || (self.pre.is_empty() && self.post.is_empty()));
        ok
    }

    /// Revert everything this transformation did.
    pub fn undo(mut self, sched: &mut Bf2Scheduler<'_>) {
        while let Some(child) = self.post.pop() {
            child.undo(sched);
        }
        self.kind.undo(sched);
        while let Some(child) = self.pre.pop() {
            child.undo(sched);
        }
    }
}

/// Run `child`; on success it is stacked on `list`, on failure it is
/// destroyed and nothing changed.
pub fn run_child(
    list: &mut Vec<Reversible>,
    kind: TransformKind,
    sched: &mut Bf2Scheduler<'_>,
) -> bool {
    let mut child = Reversible::new(kind);
    if child.apply(sched) {
        list.push(child);
        true
    } else {
        false
    }
}

/// Undo every child in `list` in reverse push order.
pub fn undo_children(list: &mut Vec<Reversible>, sched: &mut Bf2Scheduler<'_>) {
    while let Some(child) = list.pop() {
        child.undo(sched);
    }
}
