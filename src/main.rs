use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use warpsim::config::{DEFAULT_CYCLE_DELAY_MS, EngineConfig, NUM_LANES, WARP_SIZE};
use warpsim::{DefBoundsPolicy, Engine, RunReport, programs};

#[derive(Parser, Debug)]
#[command(name = "warpsim")]
#[command(version, about = "Run a demo program on the SIMT simulator", long_about = None)]
struct Args {
    /// Built-in program to run
    #[arg(long, default_value = "vector-add", value_parser = clap::builder::PossibleValuesParser::new(programs::NAMES))]
    program: String,

    /// Run the cycle loop on a background thread and sample it while it runs
    #[arg(long)]
    background: bool,

    /// Sleep between cycles (defaults to the interactive delay in background mode)
    #[arg(long)]
    delay_ms: Option<u64>,

    #[arg(long, default_value_t = NUM_LANES)]
    lanes: usize,

    #[arg(long, default_value_t = WARP_SIZE)]
    warp_size: usize,

    /// Report out-of-range DEF offsets as lane errors instead of skipping them
    #[arg(long)]
    strict_def: bool,

    /// Print the final snapshot as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let default_delay = if args.background { DEFAULT_CYCLE_DELAY_MS } else { 0 };
    let delay = Duration::from_millis(args.delay_ms.unwrap_or(default_delay));
    let policy = if args.strict_def {
        DefBoundsPolicy::Report
    } else {
        DefBoundsPolicy::Skip
    };
    let config = EngineConfig::default()
        .with_lanes(args.lanes)
        .with_warp_size(args.warp_size)
        .with_cycle_delay(delay)
        .with_def_bounds(policy)
        .with_compare(programs::compare_source(&args.program));

    let program = programs::by_name(&args.program)
        .ok_or_else(|| format!("unknown program {}", args.program))?;
    let mut engine = Engine::with_config(program, config)?;

    // Seed inputs: gm[i] = i
    {
        let mut gm = engine.global_memory_mut()?;
        for (i, cell) in gm.iter_mut().enumerate() {
            *cell = i as f32;
        }
    }

    info!(
        program = %args.program,
        lanes = args.lanes,
        warps = engine.num_warps(),
        "initialized simulator"
    );

    let report = if args.background {
        run_background(&mut engine, delay)?
    } else {
        engine.run()?
    };

    let snapshot = engine.snapshot();
    if args.json {
        println!("{}", snapshot.to_json()?);
        return Ok(());
    }

    for line in engine.trace() {
        println!("{}", line);
    }
    println!();
    println!(
        "Finished: {:?} after {} cycles ({} trace lines)",
        report.outcome, report.cycles, snapshot.trace_lines
    );
    println!("Global memory: {:?}", snapshot.global_memory);
    for warp in &snapshot.warps {
        println!("Warp {} shared memory: {:?}", warp.id, warp.shared_memory);
    }
    for lane in &snapshot.lanes {
        println!(
            "  lane {:>2} (warp {}) pc={:<3} regs={:?}",
            lane.id, lane.warp, lane.pc, lane.registers
        );
    }
    for var in &snapshot.variables {
        println!(
            "  L{} {} @ {}[{}] = {:?}",
            var.lane, var.name, var.location, var.offset, var.current
        );
    }
    Ok(())
}

/// Start the loop in the background and print progress until it ends.
fn run_background(
    engine: &mut Engine,
    delay: Duration,
) -> Result<RunReport, Box<dyn std::error::Error>> {
    engine.start()?;
    let poll = delay.max(Duration::from_millis(10));
    while engine.is_running() {
        let gm = engine.global_memory_snapshot();
        info!(cycle = engine.cycle_count(), global = ?gm, "sample");
        thread::sleep(poll);
    }
    let report = engine.wait()?.ok_or("background run produced no report")?;
    Ok(report)
}
