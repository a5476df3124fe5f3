use crate::error::SimError;
use crate::process::{AlwaysProcess, Behavior, ProcessSlot};
use crate::scheduler::SimCtx;
use crate::signal::SignalState;
use crate::types::{ModuleId, ProcessId, SignalId, Trigger};
use crate::vcd::VcdConfig;
use anyhow::Result;
use indexmap::IndexMap;
use std::path::PathBuf;

/// A node in the module tree. Purely structural: it carries local
/// names, the enclosing relation, and the trace-dump flag, nothing
/// more.
pub(crate) struct ModuleNode {
    pub(crate) name: String,
    pub(crate) signals: IndexMap<String, SignalId>,
    pub(crate) processes: Vec<ProcessId>,
    pub(crate) children: IndexMap<String, ModuleId>,
    /// Dump the signals directly under this node into the trace.
    pub(crate) dump: bool,
    /// At most one per tree; discovered by the scheduler at startup.
    pub(crate) vcd: Option<VcdConfig>,
}

impl ModuleNode {
    fn new(name: String) -> Self {
        Self {
            name,
            signals: IndexMap::new(),
            processes: Vec::new(),
            children: IndexMap::new(),
            dump: false,
            vcd: None,
        }
    }
}

/// The complete description handed to [`simulate`](crate::simulate):
/// an arena of signals and processes plus the module tree that names
/// them. Handles are dense indices into the arena, so identity
/// comparison is handle equality.
#[derive(Default)]
pub struct Design {
    pub(crate) modules: Vec<ModuleNode>,
    pub(crate) signals: Vec<SignalState>,
    pub(crate) processes: Vec<ProcessSlot>,
    /// Top-level modules by name; the roots of hierarchical paths.
    pub(crate) tops: IndexMap<String, ModuleId>,
}

impl Design {
    pub fn new() -> Design {
        Design::default()
    }

    // ── Tree construction ──

    /// Create a top-level module. Its name is the first segment of
    /// hierarchical paths.
    pub fn module(&mut self, name: &str) -> ModuleId {
        let id = ModuleId(self.modules.len() as u32);
        self.modules.push(ModuleNode::new(name.to_string()));
        self.tops.insert(name.to_string(), id);
        id
    }

    /// Create a module enclosed in `parent`.
    pub fn submodule(&mut self, parent: ModuleId, name: &str) -> ModuleId {
        let id = ModuleId(self.modules.len() as u32);
        self.modules.push(ModuleNode::new(name.to_string()));
        self.modules[parent.index()]
            .children
            .insert(name.to_string(), id);
        id
    }

    /// Create a single-bit signal with the given initial value.
    pub fn signal(&mut self, module: ModuleId, name: &str, init: u64) -> SignalId {
        self.signal_wide(module, name, init, 1)
    }

    /// Create a signal of `width` bits. Writes are not masked to the
    /// declared width; it only affects how the signal is traced.
    pub fn signal_wide(&mut self, module: ModuleId, name: &str, init: u64, width: u32) -> SignalId {
        assert!(width >= 1, "signal width must be at least 1");
        let id = SignalId(self.signals.len() as u32);
        self.signals.push(SignalState::new(init, width));
        self.modules[module.index()]
            .signals
            .insert(name.to_string(), id);
        id
    }

    /// Expose an existing signal under another module's scope. The
    /// mirror shares state and identity with the original; it only
    /// adds a name, and the trace keeps the first-assigned identifier
    /// code.
    pub fn attach_signal(&mut self, module: ModuleId, name: &str, signal: SignalId) {
        self.modules[module.index()]
            .signals
            .insert(name.to_string(), signal);
    }

    /// Register an always-process: an infinite repetition of "wait on
    /// the sensitivity set, then run the body once". The body may read
    /// values and assign pending ones but must not suspend.
    pub fn always<I, F>(&mut self, module: ModuleId, name: &str, sensitivity: I, body: F)
    where
        I: IntoIterator<Item = Trigger>,
        F: FnMut(&mut SimCtx<'_>) -> Result<()> + 'static,
    {
        let sensitivity = sensitivity.into_iter().collect();
        self.add_process(module, name, Box::new(AlwaysProcess::new(sensitivity, body)));
    }

    /// Register a free-form block process from any [`Behavior`].
    pub fn block<B>(&mut self, module: ModuleId, name: &str, behavior: B)
    where
        B: Behavior + 'static,
    {
        self.add_process(module, name, Box::new(behavior));
    }

    fn add_process(&mut self, module: ModuleId, name: &str, behavior: Box<dyn Behavior>) {
        let id = ProcessId(self.processes.len() as u32);
        self.processes
            .push(ProcessSlot::new(name.to_string(), behavior));
        self.modules[module.index()].processes.push(id);
    }

    /// Current value of a signal, as visible between delta cycles.
    /// Inside a process body, read through the context instead.
    pub fn value(&self, signal: SignalId) -> u64 {
        self.signals[signal.index()].current
    }

    // ── Hierarchical lookup ──

    /// Resolve a slash-delimited module path from a top-level module
    /// name, e.g. `"tb/u_timer"`.
    pub(crate) fn resolve_module(&self, path: &str) -> Result<ModuleId, SimError> {
        let mut segments = path.trim_matches('/').split('/');
        let first = segments.next().unwrap_or("");
        let mut module = *self
            .tops
            .get(first)
            .ok_or_else(|| SimError::UnknownModule(first.to_string()))?;
        for segment in segments {
            module = *self.modules[module.index()]
                .children
                .get(segment)
                .ok_or_else(|| SimError::UnknownModule(segment.to_string()))?;
        }
        Ok(module)
    }

    /// Return the existing signal at `mod/sub/signal` — never a copy.
    pub fn mirror_signal(&self, path: &str) -> Result<SignalId, SimError> {
        let trimmed = path.trim_matches('/');
        let (module_path, signal_name) = match trimmed.rsplit_once('/') {
            Some(split) => split,
            None => return Err(SimError::UnknownSignal(trimmed.to_string())),
        };
        let module = self.resolve_module(module_path)?;
        self.modules[module.index()]
            .signals
            .get(signal_name)
            .copied()
            .ok_or_else(|| SimError::UnknownSignal(signal_name.to_string()))
    }

    // ── Trace configuration ──

    /// Dump every signal under `module` (recursively) into a VCD file
    /// at `path`. The scheduler locates the configuration at startup;
    /// at most one per tree is honored.
    pub fn vcd_dump(&mut self, module: ModuleId, path: impl Into<PathBuf>) {
        self.set_dump(module, true);
        self.modules[module.index()].vcd = Some(VcdConfig { path: path.into() });
    }

    /// Re-include a subtree in the dump, by path.
    pub fn include_vcd_path(&mut self, path: &str) -> Result<(), SimError> {
        let module = self.resolve_module(path)?;
        self.set_dump(module, true);
        Ok(())
    }

    /// Exclude a subtree from the dump, by path.
    pub fn exclude_vcd_path(&mut self, path: &str) -> Result<(), SimError> {
        let module = self.resolve_module(path)?;
        self.set_dump(module, false);
        Ok(())
    }

    fn set_dump(&mut self, module: ModuleId, on: bool) {
        self.modules[module.index()].dump = on;
        let children: Vec<ModuleId> = self.modules[module.index()]
            .children
            .values()
            .copied()
            .collect();
        for child in children {
            self.set_dump(child, on);
        }
    }

    // ── Scheduler support ──

    /// All processes under `root` in tree order: a module's own
    /// processes first, then each child subtree.
    pub(crate) fn collect_processes(&self, root: ModuleId) -> Vec<ProcessId> {
        let mut out = Vec::new();
        self.collect_processes_into(root, &mut out);
        out
    }

    fn collect_processes_into(&self, module: ModuleId, out: &mut Vec<ProcessId>) {
        let node = &self.modules[module.index()];
        out.extend_from_slice(&node.processes);
        for &child in node.children.values() {
            self.collect_processes_into(child, out);
        }
    }

    /// First trace configuration found depth-first from `root`.
    pub(crate) fn find_vcd(&self, root: ModuleId) -> Option<(ModuleId, VcdConfig)> {
        let node = &self.modules[root.index()];
        if let Some(config) = &node.vcd {
            return Some((root, config.clone()));
        }
        for &child in node.children.values() {
            if let Some(found) = self.find_vcd(child) {
                return Some(found);
            }
        }
        None
    }
}
