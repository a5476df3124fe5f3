// ─── Scalar aliases ───────────────────────────────────────────

/// Simulation time in timescale units (the trace header declares 1ns).
pub type Time = u64;

// ─── Arena handles ────────────────────────────────────────────

/// Handle to a signal stored in a [`Design`](crate::Design).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct SignalId(pub(crate) u32);

/// Handle to a module node in the design tree.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ModuleId(pub(crate) u32);

/// Handle to a behavioral process.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ProcessId(pub(crate) u32);

impl SignalId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl ModuleId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl ProcessId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

// ─── Sensitivity ──────────────────────────────────────────────

/// One element of a sensitivity set.
///
/// Edges are detected on the truthiness of the whole value: a
/// transition from zero to any nonzero value is a positive edge, and
/// nonzero to zero a negative edge, regardless of width.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Trigger {
    /// Wake on any value change of the signal.
    Change(SignalId),
    /// Wake on a zero → nonzero transition.
    Posedge(SignalId),
    /// Wake on a nonzero → zero transition.
    Negedge(SignalId),
}

impl Trigger {
    pub(crate) fn signal(self) -> SignalId {
        match self {
            Trigger::Change(s) | Trigger::Posedge(s) | Trigger::Negedge(s) => s,
        }
    }
}

// ─── Suspension ───────────────────────────────────────────────

/// What a process suspends on, reported from each advancement.
#[derive(Clone, Debug)]
pub enum Wait {
    /// Suspend until any one of the triggers fires (OR-sensitivity).
    /// The process is placed on every listed wait-list and advanced
    /// once by whichever fires first.
    On(Vec<Trigger>),
    /// Suspend for a relative number of time units. Zero is allowed
    /// and schedules a fresh time phase at the current time.
    Delay(Time),
    /// The yield sequence is exhausted; the process never runs again.
    Done,
}

impl Wait {
    /// Suspend on a single trigger.
    pub fn on(trigger: Trigger) -> Wait {
        Wait::On(vec![trigger])
    }

    /// Suspend on several triggers at once.
    pub fn any<I: IntoIterator<Item = Trigger>>(triggers: I) -> Wait {
        Wait::On(triggers.into_iter().collect())
    }

    /// Suspend for `d` time units.
    pub fn delay(d: Time) -> Wait {
        Wait::Delay(d)
    }
}
