use crate::scheduler::SimCtx;
use crate::types::{Trigger, Wait};
use anyhow::Result;

/// A suspendable behavioral routine.
///
/// `resume` runs the body to its next suspension point and reports
/// what it suspends on. The kernel never observes anything else about
/// a process; all coordination goes through signals and the scheduler.
///
/// Closures of type `FnMut(&mut SimCtx) -> Result<Wait>` implement
/// this trait directly, so short free-running blocks don't need a
/// named state struct.
pub trait Behavior {
    fn resume(&mut self, ctx: &mut SimCtx<'_>) -> Result<Wait>;
}

impl<F> Behavior for F
where
    F: FnMut(&mut SimCtx<'_>) -> Result<Wait>,
{
    fn resume(&mut self, ctx: &mut SimCtx<'_>) -> Result<Wait> {
        self(ctx)
    }
}

/// An always-process: `forever { wait sensitivity; run body }`.
///
/// The first resumption arms the sensitivity list without running the
/// body; every later resumption runs the body once and re-arms. The
/// body must not suspend itself.
pub(crate) struct AlwaysProcess<F> {
    sensitivity: Vec<Trigger>,
    body: F,
    armed: bool,
}

impl<F> AlwaysProcess<F> {
    pub(crate) fn new(sensitivity: Vec<Trigger>, body: F) -> Self {
        Self {
            sensitivity,
            body,
            armed: false,
        }
    }
}

impl<F> Behavior for AlwaysProcess<F>
where
    F: FnMut(&mut SimCtx<'_>) -> Result<()>,
{
    fn resume(&mut self, ctx: &mut SimCtx<'_>) -> Result<Wait> {
        if self.armed {
            (self.body)(ctx)?;
        } else {
            self.armed = true;
        }
        Ok(Wait::On(self.sensitivity.clone()))
    }
}

/// A process registered in the design: its local name plus the
/// behavior, dropped once the yield sequence is exhausted.
pub(crate) struct ProcessSlot {
    pub(crate) name: String,
    behavior: Option<Box<dyn Behavior>>,
}

impl ProcessSlot {
    pub(crate) fn new(name: String, behavior: Box<dyn Behavior>) -> Self {
        Self {
            name,
            behavior: Some(behavior),
        }
    }

    /// Resume until the next suspension point. A retired process
    /// reports `Done` forever; stale wake-list entries may still reach
    /// it and must stay harmless.
    pub(crate) fn advance(&mut self, ctx: &mut SimCtx<'_>) -> Result<Wait> {
        match self.behavior.as_mut() {
            Some(behavior) => behavior.resume(ctx),
            None => Ok(Wait::Done),
        }
    }

    pub(crate) fn retire(&mut self) {
        self.behavior = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalState;
    use crate::types::{SignalId, Trigger};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ctx_parts() -> (Vec<SignalState>, Vec<SignalId>, Option<String>) {
        (vec![SignalState::new(0, 1)], Vec::new(), None)
    }

    #[test]
    fn always_arms_before_first_body_run() {
        let runs = Rc::new(RefCell::new(0));
        let seen = runs.clone();
        let sig = SignalId(0);
        let mut proc = AlwaysProcess::new(
            vec![Trigger::Change(sig)],
            move |_ctx: &mut SimCtx<'_>| -> Result<()> {
                *seen.borrow_mut() += 1;
                Ok(())
            },
        );

        let (mut signals, mut pending, mut finish) = ctx_parts();
        let mut ctx = SimCtx::new(&mut signals, &mut pending, 0, &mut finish);

        // First resumption only subscribes.
        let wait = proc.resume(&mut ctx).unwrap();
        assert!(matches!(wait, Wait::On(ref t) if t == &[Trigger::Change(sig)]));
        assert_eq!(*runs.borrow(), 0);

        // Each later resumption runs the body once and re-arms.
        proc.resume(&mut ctx).unwrap();
        proc.resume(&mut ctx).unwrap();
        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn retired_slot_reports_done() {
        let mut slot = ProcessSlot::new(
            "once".into(),
            Box::new(|_ctx: &mut SimCtx<'_>| -> Result<Wait> { Ok(Wait::delay(5)) }),
        );

        let (mut signals, mut pending, mut finish) = ctx_parts();
        let mut ctx = SimCtx::new(&mut signals, &mut pending, 0, &mut finish);

        assert!(matches!(slot.advance(&mut ctx).unwrap(), Wait::Delay(5)));
        slot.retire();
        assert!(matches!(slot.advance(&mut ctx).unwrap(), Wait::Done));
    }
}
