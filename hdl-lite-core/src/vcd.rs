//! Value Change Dump encoding: identifier codes, the header, and the
//! change stream emitted while the simulation runs.

use crate::design::Design;
use crate::types::{ModuleId, SignalId, Time};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Number of printable ASCII characters usable in identifier codes
/// (codes 33..=126, `!` through `~`).
const ID_BASE: u64 = 94;

/// Trace destination, stored on the module whose subtree is dumped.
#[derive(Debug, Clone)]
pub(crate) struct VcdConfig {
    pub(crate) path: PathBuf,
}

/// Identifier code for index `n`: a bijection from the non-negative
/// integers onto non-empty strings over ASCII 33..=126. Code 0 is
/// `!`, 93 is `~`, 94 is `!!`, 95 is `"!`, and so on. Waveform
/// viewers rely on this exact assignment, so it is reproduced
/// digit-for-digit.
pub(crate) fn id_code(n: u64) -> String {
    let mut code = String::new();
    code.push((33 + (n % ID_BASE) as u8) as char);
    let mut q = n / ID_BASE;
    while q > 0 {
        q -= 1;
        code.push((33 + (q % ID_BASE) as u8) as char);
        q /= ID_BASE;
    }
    code
}

/// Assign identifier codes in a single depth-first walk from the
/// traced root: a flagged module's own signals first, in declaration
/// order, then each child subtree. A signal that already carries a
/// code (a mirror reached through another path) keeps it.
pub(crate) fn assign_codes(design: &mut Design, root: ModuleId) {
    let mut next = 0;
    assign_codes_walk(design, root, &mut next);
}

fn assign_codes_walk(design: &mut Design, module: ModuleId, next: &mut u64) {
    if design.modules[module.index()].dump {
        let ids: Vec<SignalId> = design.modules[module.index()]
            .signals
            .values()
            .copied()
            .collect();
        for id in ids {
            let signal = &mut design.signals[id.index()];
            if signal.vcd_code.is_none() {
                signal.vcd_code = Some(id_code(*next));
                *next += 1;
            }
        }
    }
    let children: Vec<ModuleId> = design.modules[module.index()]
        .children
        .values()
        .copied()
        .collect();
    for child in children {
        assign_codes_walk(design, child, next);
    }
}

/// Traced signals in dump order, deduplicated by identity so a mirror
/// contributes a single initial-value record.
fn collect_traced(
    design: &Design,
    module: ModuleId,
    seen: &mut HashSet<SignalId>,
    out: &mut Vec<SignalId>,
) {
    let node = &design.modules[module.index()];
    if node.dump {
        for &id in node.signals.values() {
            if seen.insert(id) {
                out.push(id);
            }
        }
    }
    for &child in node.children.values() {
        collect_traced(design, child, seen, out);
    }
}

/// Buffered writer over the open trace file. Owned by the scheduler;
/// nothing else writes to it.
pub(crate) struct VcdWriter {
    out: BufWriter<File>,
}

impl VcdWriter {
    pub(crate) fn create(path: &Path) -> io::Result<VcdWriter> {
        Ok(VcdWriter {
            out: BufWriter::new(File::create(path)?),
        })
    }

    /// Write the one-time header: date, version, timescale, the scope
    /// tree of the traced subtree, and the initial value of every
    /// traced signal. Scopes are emitted for every submodule, dumped
    /// or not; only signals holding a code get a `$var`.
    pub(crate) fn header(&mut self, design: &Design, root: ModuleId) -> io::Result<()> {
        let date = chrono::Local::now().format("%a %b %e %H:%M:%S %Y");
        writeln!(self.out, "$date")?;
        writeln!(self.out, "    {date}")?;
        writeln!(self.out, "$end")?;
        writeln!(self.out, "$version")?;
        writeln!(
            self.out,
            "    {} version {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )?;
        writeln!(self.out, "$end")?;
        writeln!(self.out, "$timescale")?;
        writeln!(self.out, "    1ns")?;
        writeln!(self.out, "$end")?;

        self.scope(design, root)?;

        writeln!(self.out, "$enddefinitions $end")?;
        writeln!(self.out, "$dumpvars")?;
        let mut seen = HashSet::new();
        let mut traced = Vec::new();
        collect_traced(design, root, &mut seen, &mut traced);
        for id in traced {
            let signal = &design.signals[id.index()];
            if let Some(code) = signal.vcd_code.as_deref() {
                self.record(signal.width, signal.current, code)?;
            }
        }
        writeln!(self.out, "$end")?;
        Ok(())
    }

    fn scope(&mut self, design: &Design, module: ModuleId) -> io::Result<()> {
        let node = &design.modules[module.index()];
        writeln!(self.out, "$scope module {} $end", node.name)?;
        for (name, &id) in &node.signals {
            let signal = &design.signals[id.index()];
            if let Some(code) = signal.vcd_code.as_deref() {
                writeln!(self.out, "$var reg {} {} {} $end", signal.width, code, name)?;
            }
        }
        for &child in node.children.values() {
            self.scope(design, child)?;
        }
        writeln!(self.out, "$upscope $end")?;
        Ok(())
    }

    /// One change record: single-bit signals as `<value><code>`,
    /// vectors as `b<binary> <code>`.
    pub(crate) fn record(&mut self, width: u32, value: u64, code: &str) -> io::Result<()> {
        if width == 1 {
            writeln!(self.out, "{value}{code}")
        } else {
            writeln!(self.out, "b{value:b} {code}")
        }
    }

    pub(crate) fn timestamp(&mut self, now: Time) -> io::Result<()> {
        writeln!(self.out, "#{now}")
    }

    pub(crate) fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
