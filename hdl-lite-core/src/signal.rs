use crate::types::ProcessId;

/// Two-phase storage for one signal.
///
/// Readers always see `current`; writers always target `next`. The two
/// only differ while a delta cycle is settling, and [`promote`] is the
/// single place they are reconciled. Values are stored unmasked: the
/// declared width only drives trace metadata and record formats.
///
/// [`promote`]: SignalState::promote
#[derive(Debug)]
pub(crate) struct SignalState {
    pub(crate) current: u64,
    pub(crate) next: u64,
    pub(crate) width: u32,
    /// Processes waiting on any value change.
    pub(crate) waiters: Vec<ProcessId>,
    /// Rising-edge wait-list, allocated on first subscription.
    pub(crate) posedge: Option<Vec<ProcessId>>,
    /// Falling-edge wait-list, allocated on first subscription.
    pub(crate) negedge: Option<Vec<ProcessId>>,
    /// Trace identifier code, present only while the signal is traced.
    pub(crate) vcd_code: Option<String>,
}

impl SignalState {
    pub(crate) fn new(init: u64, width: u32) -> Self {
        Self {
            current: init,
            next: init,
            width,
            waiters: Vec::new(),
            posedge: None,
            negedge: None,
            vcd_code: None,
        }
    }

    pub(crate) fn subscribe_change(&mut self, process: ProcessId) {
        self.waiters.push(process);
    }

    pub(crate) fn subscribe_posedge(&mut self, process: ProcessId) {
        self.posedge.get_or_insert_with(Vec::new).push(process);
    }

    pub(crate) fn subscribe_negedge(&mut self, process: ProcessId) {
        self.negedge.get_or_insert_with(Vec::new).push(process);
    }

    /// Promote `next` into `current` and drain everything the
    /// transition wakes: the change waiters, plus the edge list whose
    /// edge fired. An unchanged value wakes nobody and leaves every
    /// wait-list alone, so re-assigning the current value is invisible.
    pub(crate) fn promote(&mut self) -> Vec<ProcessId> {
        if self.current == self.next {
            return Vec::new();
        }
        if self.current == 0 && self.next != 0 {
            if let Some(edge) = self.posedge.as_mut() {
                self.waiters.append(edge);
            }
        }
        if self.current != 0 && self.next == 0 {
            if let Some(edge) = self.negedge.as_mut() {
                self.waiters.append(edge);
            }
        }
        self.current = self.next;
        std::mem::take(&mut self.waiters)
    }
}
