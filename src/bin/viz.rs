//! warpsim live inspector: runs a demo program on a background thread and
//! renders the machine state while it executes.
//!
//!   cargo run --bin viz -- --program counted-loop
//!
//!     ┌ header: program / state / cycle ───────────────────────────┐
//!     │ Lanes (pc, regs, status)        │ Progress + global memory │
//!     │ Trace tail                      │ Variables                │
//!     │ q/esc: quit  r: restart  s: stop/resume                    │
//!
//! Samples the engine every 200ms; every sample is taken under the engine
//! lock so it always shows a whole number of cycles.

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
};
use std::{fs::File, io, path::PathBuf, sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use warpsim::config::{DEFAULT_CYCLE_DELAY_MS, EngineConfig};
use warpsim::trace::TraceLine;
use warpsim::{Engine, EngineSnapshot, RunState, programs};

#[derive(Parser, Debug)]
#[command(name = "viz", about = "Live inspector for the SIMT simulator")]
struct Args {
    #[arg(long, default_value = "counted-loop", value_parser = clap::builder::PossibleValuesParser::new(programs::NAMES))]
    program: String,

    /// Sleep between cycles
    #[arg(long, default_value_t = DEFAULT_CYCLE_DELAY_MS * 4)]
    delay_ms: u64,

    /// Where engine logs go while the terminal is in raw mode
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// What the render pass needs, captured once per frame.
struct View<'a> {
    program: &'a str,
    snapshot: EngineSnapshot,
    max_cycles: u64,
    trace: Vec<TraceLine>,
    message: Option<&'a str>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_path = args
        .log_file
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("warpsim-viz.log"));
    let log_file = File::create(&log_path)?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(Arc::new(log_file)).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
    info!(program = %args.program, log = %log_path.display(), "viz starting");

    let config = EngineConfig::interactive()
        .with_cycle_delay(Duration::from_millis(args.delay_ms))
        .with_compare(programs::compare_source(&args.program));
    let program = programs::by_name(&args.program)
        .ok_or_else(|| format!("unknown program {}", args.program))?;
    let mut engine = Engine::with_config(program, config)?;
    seed(&engine)?;
    engine.start()?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal, &mut engine, &args.program);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    engine.stop()?;
    result
}

/// gm[i] = i
fn seed(engine: &Engine) -> Result<(), warpsim::EngineError> {
    let mut gm = engine.global_memory_mut()?;
    for (i, cell) in gm.iter_mut().enumerate() {
        *cell = i as f32;
    }
    Ok(())
}

fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    engine: &mut Engine,
    program: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let max_cycles = engine.config().max_cycles;
    let mut message: Option<String> = None;
    loop {
        {
            let view = View {
                program,
                snapshot: engine.snapshot(),
                max_cycles,
                trace: engine.trace(),
                message: message.as_deref(),
            };
            terminal.draw(|f| render(f, &view))?;
        }

        // Non-blocking: poll for 200ms, then redraw regardless
        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                let outcome = match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => break,
                    KeyCode::Char('r') => restart(engine),
                    KeyCode::Char('s') => toggle(engine),
                    _ => Ok(()),
                };
                message = outcome.err().map(|e| e.to_string());
            }
        }
    }
    Ok(())
}

/// Stop, reset and start again. Declared variables and labels survive.
fn restart(engine: &mut Engine) -> Result<(), warpsim::EngineError> {
    // A fault from the previous run is already shown; discard it here.
    let _ = engine.stop();
    engine.reset()?;
    seed(engine)?;
    engine.start()
}

fn toggle(engine: &mut Engine) -> Result<(), warpsim::EngineError> {
    match engine.state() {
        RunState::Running => engine.stop().map(|_| ()),
        RunState::Idle => engine.start(),
        RunState::Finished => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Top-level layout
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, view: &View) {
    let area = f.area();

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),  // header
            Constraint::Min(8),     // lanes + progress
            Constraint::Length(12), // trace + variables
            Constraint::Length(1),  // footer
        ])
        .split(area);

    render_header(f, rows[0], view);

    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(rows[1]);
    render_lanes(f, top[0], &view.snapshot);
    render_progress(f, top[1], view);

    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(rows[2]);
    render_trace(f, bottom[0], &view.trace);
    render_variables(f, bottom[1], &view.snapshot);

    render_footer(f, rows[3], view.message);
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

fn render_header(f: &mut Frame, area: Rect, view: &View) {
    let block = Block::default()
        .title(Span::styled(
            " ⚡ warpsim inspector ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let state = view.snapshot.state;
    let state_color = match state {
        RunState::Running => Color::Green,
        RunState::Finished => Color::Cyan,
        RunState::Idle => Color::DarkGray,
    };

    let spans = vec![
        Span::styled("  program: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            view.program,
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ),
        Span::styled("   state: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            state.to_string().to_uppercase(),
            Style::default().fg(state_color).add_modifier(Modifier::BOLD),
        ),
        Span::styled("   cycle: ", Style::default().fg(Color::DarkGray)),
        Span::raw(view.snapshot.cycle_count.to_string()),
    ];

    f.render_widget(Paragraph::new(Line::from(spans)), inner);
}

// ---------------------------------------------------------------------------
// Lanes
// ---------------------------------------------------------------------------

fn render_lanes(f: &mut Frame, area: Rect, snap: &EngineSnapshot) {
    let block = Block::default().title(" Lanes ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let legend = Line::from(vec![
        Span::styled("██", Style::default().fg(Color::Green)),
        Span::raw(" active   "),
        Span::styled("██", Style::default().fg(Color::Yellow)),
        Span::raw(" predicate set   "),
        Span::styled("░░", Style::default().fg(Color::DarkGray)),
        Span::raw(" halted"),
    ]);
    let mut lines: Vec<Line> = vec![legend, Line::raw("")];

    for lane in &snap.lanes {
        let (symbol, color) = match (lane.active, lane.predicate) {
            (false, _) => ("░░", Color::DarkGray),
            (true, true) => ("██", Color::Yellow),
            (true, false) => ("██", Color::Green),
        };
        let regs: Vec<String> = lane.registers.iter().map(|r| format!("{:>7.2}", r)).collect();
        lines.push(Line::from(vec![
            Span::styled(symbol, Style::default().fg(color)),
            Span::styled(
                format!(" L{:<2} w{} ", lane.id, lane.warp),
                Style::default().fg(Color::DarkGray),
            ),
            Span::raw(format!("pc={:<4}", pc_label(lane.pc))),
            Span::raw(regs.join(" ")),
        ]));
    }

    f.render_widget(Paragraph::new(lines), inner);
}

/// A lane parked one short of label 0 shows as `-`.
fn pc_label(pc: usize) -> String {
    if pc == usize::MAX {
        "-".to_string()
    } else {
        pc.to_string()
    }
}

// ---------------------------------------------------------------------------
// Progress panel
// ---------------------------------------------------------------------------

fn render_progress(f: &mut Frame, area: Rect, view: &View) {
    let block = Block::default().title(" Progress ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // cycle gauge
            Constraint::Length(1), // spacer
            Constraint::Length(2), // halted lanes gauge
            Constraint::Length(1), // spacer
            Constraint::Min(0),    // memory
        ])
        .split(inner);

    let snap = &view.snapshot;

    let cyc_pct = if view.max_cycles > 0 {
        ((snap.cycle_count as f64 / view.max_cycles as f64) * 100.0).clamp(0.0, 100.0) as u16
    } else {
        0
    };
    let cyc_color = match cyc_pct {
        0..=33 => Color::Green,
        34..=66 => Color::Yellow,
        _ => Color::Red,
    };
    let cyc_gauge = Gauge::default()
        .block(Block::default().title("Cycle budget"))
        .gauge_style(Style::default().fg(cyc_color))
        .percent(cyc_pct)
        .label(format!("{} / {}", snap.cycle_count, view.max_cycles));
    f.render_widget(cyc_gauge, rows[0]);

    let halted = snap.lanes.iter().filter(|l| !l.active).count();
    let total = snap.lanes.len();
    let halt_pct = if total > 0 {
        ((halted as f32 / total as f32) * 100.0) as u16
    } else {
        0
    };
    let halt_gauge = Gauge::default()
        .block(Block::default().title("Lanes halted"))
        .gauge_style(Style::default().fg(Color::Blue))
        .percent(halt_pct)
        .label(format!("{} / {}", halted, total));
    f.render_widget(halt_gauge, rows[2]);

    let mut text = vec![Line::from(Span::styled(
        "Global memory",
        Style::default().fg(Color::DarkGray),
    ))];
    text.extend(cells(&snap.global_memory));
    for warp in &snap.warps {
        text.push(Line::from(Span::styled(
            format!("Warp {} shared (sm {})", warp.id, warp.sm),
            Style::default().fg(Color::DarkGray),
        )));
        text.extend(cells(&warp.shared_memory));
    }
    f.render_widget(Paragraph::new(text), rows[4]);
}

fn cells(values: &[f32]) -> Vec<Line<'static>> {
    values
        .chunks(5)
        .map(|row| {
            let s: Vec<String> = row.iter().map(|v| format!("{:>7.2}", v)).collect();
            Line::raw(s.join(" "))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Trace tail
// ---------------------------------------------------------------------------

fn render_trace(f: &mut Frame, area: Rect, trace: &[TraceLine]) {
    let block = Block::default().title(" Trace ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let visible = inner.height as usize;
    let start = trace.len().saturating_sub(visible);
    let lines: Vec<Line> = trace[start..]
        .iter()
        .map(|l| {
            let style = if l.error.is_some() {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };
            Line::from(Span::styled(l.to_string(), style))
        })
        .collect();
    f.render_widget(Paragraph::new(lines), inner);
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

fn render_variables(f: &mut Frame, area: Rect, snap: &EngineSnapshot) {
    let block = Block::default().title(" Variables ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    if snap.variables.is_empty() {
        let msg = Paragraph::new(Line::from(Span::styled(
            "  No variables declared.",
            Style::default().fg(Color::DarkGray),
        )));
        f.render_widget(msg, inner);
        return;
    }

    let lines: Vec<Line> = snap
        .variables
        .iter()
        .map(|v| {
            let current = v
                .current
                .map(|c| format!("{:.2}", c))
                .unwrap_or_else(|| "—".to_string());
            Line::from(vec![
                Span::styled(format!("L{:<2} ", v.lane), Style::default().fg(Color::DarkGray)),
                Span::styled(v.name.clone(), Style::default().fg(Color::Yellow)),
                Span::styled(
                    format!(" {}[{}] ", v.location, v.offset),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::raw(current),
            ])
        })
        .collect();
    f.render_widget(Paragraph::new(lines), inner);
}

// ---------------------------------------------------------------------------
// Footer
// ---------------------------------------------------------------------------

fn render_footer(f: &mut Frame, area: Rect, message: Option<&str>) {
    let text = match message {
        Some(msg) => Span::styled(format!("  error: {}", msg), Style::default().fg(Color::Red)),
        None => Span::styled(
            "  q / esc: quit    r: reset + restart    s: stop / resume    refreshes every 200ms",
            Style::default().fg(Color::DarkGray),
        ),
    };
    f.render_widget(Paragraph::new(text), area);
}
