//! Mod-10 timer testbench: a clock toggling every 10 ticks drives a
//! 4-bit counter with synchronous reset and rollover at 9; `pulse`
//! marks the rollover edges. The run writes `timer.vcd` (override with
//! `--vcd <path>` or `HDL_LITE_VCD`) and finishes after 700 ticks.

use anyhow::Result;
use hdl_lite_core::{simulate, Behavior, Design, ModuleId, SignalId, SimCtx, Trigger, Wait};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Free-running clock: toggle, wait half a period, repeat.
struct ClockGen {
    clock: SignalId,
    high: bool,
}

impl Behavior for ClockGen {
    fn resume(&mut self, ctx: &mut SimCtx<'_>) -> Result<Wait> {
        ctx.assign(self.clock, u64::from(self.high));
        self.high = !self.high;
        Ok(Wait::delay(10))
    }
}

/// Hold reset low for five rising clock edges, high for five, then
/// release and retire.
struct ResetGen {
    clock: SignalId,
    reset: SignalId,
    edges: u32,
}

impl Behavior for ResetGen {
    fn resume(&mut self, ctx: &mut SimCtx<'_>) -> Result<Wait> {
        match self.edges {
            0 => ctx.assign(self.reset, 0),
            5 => ctx.assign(self.reset, 1),
            10 => {
                ctx.assign(self.reset, 0);
                return Ok(Wait::Done);
            }
            _ => {}
        }
        self.edges += 1;
        Ok(Wait::on(Trigger::Posedge(self.clock)))
    }
}

/// Let the design run for a fixed span, then stop the simulation.
struct FinishAfter {
    span: u64,
    armed: bool,
}

impl Behavior for FinishAfter {
    fn resume(&mut self, ctx: &mut SimCtx<'_>) -> Result<Wait> {
        if self.armed {
            ctx.finish("Simulation finished.");
            return Ok(Wait::Done);
        }
        self.armed = true;
        Ok(Wait::delay(self.span))
    }
}

/// The device under test: a counter that rolls over after 9 and pulses
/// on the rollover edge.
fn timer(
    design: &mut Design,
    parent: ModuleId,
    clock: SignalId,
    reset: SignalId,
    pulse: SignalId,
) -> ModuleId {
    let m = design.submodule(parent, "u_timer");
    let count = design.signal_wide(m, "count", 0, 4);
    let count_eq9 = design.signal(m, "count_eq9", 0);

    design.always(m, "count_logic", [Trigger::Posedge(clock)], move |ctx| {
        if ctx.is_high(reset) || ctx.is_high(count_eq9) {
            ctx.assign(count, 0);
        } else {
            ctx.assign(count, ctx.value(count) + 1);
        }
        Ok(())
    });

    design.always(m, "count_eq9_logic", [Trigger::Change(count)], move |ctx| {
        ctx.assign(count_eq9, u64::from(ctx.value(count) == 9));
        Ok(())
    });

    design.always(m, "pulse_logic", [Trigger::Posedge(clock)], move |ctx| {
        ctx.assign(pulse, ctx.value(count_eq9));
        Ok(())
    });

    m
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let vcd_path = parse_vcd_path().unwrap_or_else(|| "timer.vcd".to_string());

    let mut design = Design::new();
    let tb = design.module("timer_tb");
    let clock = design.signal(tb, "clock", 0);
    let reset = design.signal(tb, "reset", 0);
    let pulse = design.signal(tb, "pulse", 0);

    let u_timer = timer(&mut design, tb, clock, reset, pulse);
    design.vcd_dump(u_timer, vcd_path.as_str());

    design.block(
        tb,
        "clock_gen",
        ClockGen {
            clock,
            high: false,
        },
    );
    design.block(
        tb,
        "reset_gen",
        ResetGen {
            clock,
            reset,
            edges: 0,
        },
    );

    design.always(tb, "reset_mon", [Trigger::Change(reset)], move |ctx| {
        info!("reset={} at time {}", ctx.value(reset), ctx.now());
        Ok(())
    });
    design.always(tb, "pulse_mon", [Trigger::Change(pulse)], move |ctx| {
        info!("pulse={} at time {}", ctx.value(pulse), ctx.now());
        Ok(())
    });

    design.block(
        tb,
        "finish_simulation",
        FinishAfter {
            span: 700,
            armed: false,
        },
    );

    let status = simulate(&mut design, tb)?;
    std::process::exit(status);
}

/// Trace file location from `--vcd <path>` or the `HDL_LITE_VCD`
/// environment variable; the CLI argument wins.
fn parse_vcd_path() -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    if let Some(path) = args
        .windows(2)
        .find(|w| w[0] == "--vcd")
        .map(|w| w[1].clone())
    {
        return Some(path);
    }
    std::env::var("HDL_LITE_VCD").ok()
}
