use std::thread;
use std::time::Duration;

use warpsim::handlers::HandlerTable;
use warpsim::{
    CompareSource, DefBoundsPolicy, Engine, EngineConfig, EngineError, Fault, Instruction,
    MemorySpace, Opcode, RunOutcome, RunState, Variable, imm, programs, sym,
};

fn ins<const N: usize>(opcode: Opcode, operands: [warpsim::Operand; N]) -> Instruction {
    Instruction::new(opcode, operands)
}

fn registers(engine: &Engine, reg: usize) -> Vec<f32> {
    engine.lanes().iter().map(|l| l.registers[reg]).collect()
}

/// The counted loop with CMP_LT reading live values, so it terminates.
fn counting(limit: f32) -> Engine {
    let config = EngineConfig::default().with_compare(CompareSource::Live);
    Engine::with_config(programs::counted_loop(limit), config).unwrap()
}

#[test]
fn mov_then_add_on_every_lane() {
    let mut engine = Engine::new(vec![
        ins(Opcode::Mov, [sym("r0"), imm(5.0)]),
        ins(Opcode::Add, [sym("r0"), sym("r0"), imm(3.0)]),
        Instruction::halt(),
    ]);
    let report = engine.run().unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.cycles, 3);
    assert!(registers(&engine, 0).iter().all(|&r| r == 8.0));
    assert_eq!(engine.state(), RunState::Finished);
}

#[test]
fn divide_by_zero_leaves_destination_alone() {
    let mut engine = Engine::new(vec![
        ins(Opcode::Mov, [sym("r0"), imm(7.0)]),
        ins(Opcode::Div, [sym("r0"), sym("r0"), imm(0.0)]),
        Instruction::halt(),
    ]);
    let report = engine.run().unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(registers(&engine, 0).iter().all(|&r| r == 7.0));
    let failed: Vec<_> = engine
        .trace()
        .into_iter()
        .filter(|l| l.opcode == Opcode::Div)
        .collect();
    assert_eq!(failed.len(), 10);
    assert!(failed.iter().all(|l| l.error.is_some()));
}

#[test]
fn lane_relative_def_gives_each_lane_its_own_cell() {
    let mut engine = Engine::new(vec![
        Instruction::def(Variable::new("x", 2.5, MemorySpace::Global).lane_relative()),
        Instruction::halt(),
    ]);
    engine.run().unwrap();

    assert!(engine.global_memory_snapshot().iter().all(|&c| c == 2.5));
    let vars = engine.variables();
    assert_eq!(vars.len(), 10);
    for v in &vars {
        assert_eq!(v.offset, v.lane);
        assert_eq!(v.current, Some(2.5));
    }
}

#[test]
fn load_uses_lane_id_for_tidx() {
    let mut engine = Engine::new(vec![
        ins(Opcode::Ld, [sym("r0"), sym("gmTIDX")]),
        Instruction::halt(),
    ]);
    engine.global_memory_mut().unwrap()[3] = 13.0;
    engine.run().unwrap();

    assert_eq!(engine.lane(3).map(|l| l.registers[0]), Some(13.0));
    assert_eq!(engine.lane(2).map(|l| l.registers[0]), Some(0.0));
}

#[test]
fn never_halting_program_times_out() {
    let mut engine = Engine::new(programs::spin());
    let report = engine.run().unwrap();

    assert_eq!(report.outcome, RunOutcome::TimedOut);
    assert_eq!(report.cycles, 1000);
    assert_eq!(engine.cycle_count(), 1000);
    assert_eq!(engine.state(), RunState::Finished);
}

#[test]
fn cycle_bound_is_configurable() {
    let config = EngineConfig::default().with_max_cycles(7);
    let mut engine = Engine::with_config(programs::spin(), config).unwrap();
    assert_eq!(engine.run().unwrap().cycles, 7);
}

#[test]
fn counted_loop_branches_back() {
    let mut engine = counting(5.0);
    let report = engine.run().unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(engine.label("loop"), Some(3));
    assert!(registers(&engine, 0).iter().all(|&r| r == 5.0));
    let taken = engine
        .trace()
        .into_iter()
        .filter(|l| l.lane == 0 && l.text.contains("taken ->"))
        .count();
    assert_eq!(taken, 4);
}

#[test]
fn diverged_lanes_execute_separately() {
    let config = EngineConfig::default().with_compare(CompareSource::Live);
    let mut engine = Engine::with_config(vec![
        Instruction::def(Variable::new("v", 0.0, MemorySpace::Local).at(1)),
        Instruction::def(Variable::new("t", 2.0, MemorySpace::Local).at(2)),
        Instruction::label("skip", 7),
        ins(Opcode::Ld, [sym("r1"), sym("gmTIDX")]),
        ins(Opcode::CmpLt, [sym("v"), sym("t")]),
        ins(Opcode::Jnz, [sym("skip")]),
        ins(Opcode::Mov, [sym("r3"), imm(7.0)]),
        Instruction::halt(),
    ], config)
    .unwrap();
    {
        let mut gm = engine.global_memory_mut().unwrap();
        for (i, cell) in gm.iter_mut().enumerate() {
            *cell = i as f32;
        }
    }
    assert_eq!(engine.run().unwrap().outcome, RunOutcome::Completed);

    let r3 = registers(&engine, 3);
    assert_eq!(&r3[..2], &[0.0, 0.0]);
    assert!(r3[2..].iter().all(|&r| r == 7.0));
    assert!(engine.lanes().iter().all(|l| !l.active));
}

#[test]
fn reset_keeps_registries() {
    let mut engine = counting(3.0);
    engine.run().unwrap();
    engine.reset().unwrap();

    assert_eq!(engine.state(), RunState::Idle);
    assert_eq!(engine.cycle_count(), 0);
    assert!(engine.trace().is_empty());
    assert_eq!(engine.label("loop"), Some(3));
    let vars = engine.variables();
    assert_eq!(vars.len(), 20);
    assert!(vars.iter().all(|v| v.current == Some(0.0)));

    engine.clear_registries().unwrap();
    assert!(engine.variables().is_empty());
    assert_eq!(engine.label("loop"), None);

    // And it runs again from scratch.
    assert_eq!(engine.run().unwrap().outcome, RunOutcome::Completed);
    assert!(registers(&engine, 0).iter().all(|&r| r == 3.0));
}

#[test]
fn finished_engine_refuses_to_run_again() {
    let mut engine = Engine::new(vec![Instruction::halt()]);
    engine.run().unwrap();
    assert!(matches!(engine.run(), Err(EngineError::AlreadyFinished)));
    assert!(matches!(engine.start(), Err(EngineError::AlreadyFinished)));
}

#[test]
fn background_run_can_be_stopped_and_resumed() {
    let config = EngineConfig::default().with_cycle_delay(Duration::from_millis(5));
    let mut engine = Engine::with_config(programs::spin(), config).unwrap();

    engine.start().unwrap();
    thread::sleep(Duration::from_millis(40));
    assert!(engine.is_running());
    assert!(matches!(engine.start(), Err(EngineError::AlreadyRunning)));
    assert!(matches!(engine.run(), Err(EngineError::AlreadyRunning)));
    assert!(matches!(engine.reset(), Err(EngineError::Busy)));
    assert!(matches!(engine.global_memory_mut(), Err(EngineError::Busy)));
    assert!(matches!(engine.lane_mut(0), Err(EngineError::Busy)));

    let report = engine.stop().unwrap().unwrap();
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(engine.state(), RunState::Idle);
    let paused_at = engine.cycle_count();
    assert!(paused_at > 0);
    assert_eq!(report.cycles, paused_at);

    engine.start().unwrap();
    thread::sleep(Duration::from_millis(20));
    let report = engine.stop().unwrap().unwrap();
    assert!(report.cycles >= paused_at);
    assert!(engine.stop().unwrap().is_none());
}

#[test]
fn background_run_completes_on_its_own() {
    let mut engine = counting(4.0);
    engine.start().unwrap();
    let report = engine.wait().unwrap().unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(engine.state(), RunState::Finished);
    assert!(registers(&engine, 0).iter().all(|&r| r == 4.0));
}

#[test]
fn snapshots_while_running_are_consistent() {
    let config = EngineConfig::default().with_cycle_delay(Duration::from_millis(2));
    let mut engine = Engine::with_config(programs::spin(), config).unwrap();
    engine.start().unwrap();
    for _ in 0..5 {
        let snap = engine.snapshot();
        assert_eq!(snap.lanes.len(), 10);
        // Every lane of the single warp sits at the same pc after a whole cycle.
        let pcs: Vec<usize> = snap.lanes.iter().map(|l| l.pc).collect();
        assert!(pcs.windows(2).all(|w| w[0] == w[1]));
        thread::sleep(Duration::from_millis(3));
    }
    engine.stop().unwrap();
}

#[test]
fn snapshot_state_agrees_with_lanes() {
    let mut engine = counting(50.0);
    engine.start().unwrap();
    loop {
        let snap = engine.snapshot();
        if snap.state == RunState::Running {
            assert!(snap.lanes.iter().any(|l| l.active), "cycle {}", snap.cycle_count);
        } else {
            assert_eq!(snap.state, RunState::Finished);
            assert!(snap.lanes.iter().all(|l| !l.active));
            break;
        }
    }
    assert_eq!(engine.wait().unwrap().unwrap().outcome, RunOutcome::Completed);
}

#[test]
fn counted_loop_with_declared_values_never_exits() {
    let config = EngineConfig::default().with_max_cycles(50);
    let mut engine = Engine::with_config(programs::counted_loop(3.0), config).unwrap();
    let report = engine.run().unwrap();

    assert_eq!(report.outcome, RunOutcome::TimedOut);
    assert!(engine.lanes().iter().all(|l| l.active && l.predicate));
}

/// DEF i=0, DEF n=3, overwrite i with 5, then branch on i < n.
fn branch_after_overwrite(source: CompareSource) -> Engine {
    let config = EngineConfig::default().with_compare(source);
    let mut engine = Engine::with_config(
        vec![
            Instruction::def(Variable::new("i", 0.0, MemorySpace::Local).at(0)),
            Instruction::def(Variable::new("n", 3.0, MemorySpace::Local).at(1)),
            Instruction::label("below", 7),
            ins(Opcode::Mov, [sym("i"), imm(5.0)]),
            ins(Opcode::CmpLt, [sym("i"), sym("n")]),
            ins(Opcode::Jnz, [sym("below")]),
            ins(Opcode::Mov, [sym("r2"), imm(1.0)]),
            Instruction::halt(),
        ],
        config,
    )
    .unwrap();
    assert_eq!(engine.run().unwrap().outcome, RunOutcome::Completed);
    engine
}

#[test]
fn cmp_lt_compares_declared_values_by_default() {
    let engine = branch_after_overwrite(CompareSource::Declared);
    assert!(registers(&engine, 0).iter().all(|&r| r == 5.0));
    // 0 < 3 holds, so the branch skips the write to r2
    assert!(engine.lanes().iter().all(|l| l.predicate));
    assert!(registers(&engine, 2).iter().all(|&r| r == 0.0));
}

#[test]
fn cmp_lt_compares_live_values_when_configured() {
    let engine = branch_after_overwrite(CompareSource::Live);
    // 5 < 3 fails, so execution falls through into the write
    assert!(engine.lanes().iter().all(|l| !l.predicate));
    assert!(registers(&engine, 2).iter().all(|&r| r == 1.0));
}

#[test]
fn untaken_jump_to_undeclared_label_is_harmless() {
    let mut engine = Engine::new(vec![
        ins(Opcode::Jnz, [sym("later")]),
        ins(Opcode::Mov, [sym("r0"), imm(1.0)]),
        Instruction::halt(),
    ]);
    let report = engine.run().unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(registers(&engine, 0).iter().all(|&r| r == 1.0));
}

#[test]
fn taken_jump_to_undefined_label_aborts_the_run() {
    let mut engine = Engine::new(vec![
        Instruction::def(Variable::new("a", 0.0, MemorySpace::Local).at(0)),
        Instruction::def(Variable::new("b", 1.0, MemorySpace::Local).at(1)),
        ins(Opcode::CmpLt, [sym("a"), sym("b")]),
        ins(Opcode::Jnz, [sym("nowhere")]),
        Instruction::halt(),
    ]);
    let err = engine.run().unwrap_err();

    match err {
        EngineError::Fault { lane, pc, source, .. } => {
            assert_eq!(lane, 0);
            assert_eq!(pc, 3);
            assert_eq!(source, Fault::UndefinedLabel { name: "nowhere".to_string() });
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.state(), RunState::Finished);
    assert!(engine.trace().last().and_then(|l| l.error.clone()).is_some());
}

#[test]
fn missing_handler_aborts_the_run() {
    let mut table = HandlerTable::standard();
    table.unregister(Opcode::Halt);
    let mut engine =
        Engine::with_handlers(vec![Instruction::halt()], EngineConfig::default(), table).unwrap();

    assert!(matches!(
        engine.run(),
        Err(EngineError::Fault {
            source: Fault::MissingHandler { opcode: Opcode::Halt },
            ..
        })
    ));
}

#[test]
fn one_trace_line_per_lane_execution() {
    let mut engine = Engine::new(vec![
        ins(Opcode::Mov, [sym("r0"), imm(1.0)]),
        Instruction::halt(),
    ]);
    engine.run().unwrap();

    let lines = engine.drain_trace();
    assert_eq!(lines.len(), 20);
    assert!(lines[..10].iter().all(|l| l.opcode == Opcode::Mov && l.cycle == 0));
    assert!(lines[10..].iter().all(|l| l.opcode == Opcode::Halt && l.cycle == 1));
    assert!(engine.trace().is_empty());
    assert_eq!(engine.snapshot().trace_lines, 20);
}

fn out_of_bounds_def(policy: DefBoundsPolicy) -> Engine {
    let config = EngineConfig::default().with_def_bounds(policy);
    let mut engine = Engine::with_config(
        vec![
            Instruction::def(Variable::new("far", 1.0, MemorySpace::Global).at(50)),
            Instruction::halt(),
        ],
        config,
    )
    .unwrap();
    assert_eq!(engine.run().unwrap().outcome, RunOutcome::Completed);
    engine
}

#[test]
fn out_of_bounds_def_is_skipped_by_default() {
    let engine = out_of_bounds_def(DefBoundsPolicy::Skip);
    assert!(engine.variables().is_empty());
    let defs: Vec<_> = engine
        .trace()
        .into_iter()
        .filter(|l| l.opcode == Opcode::Def)
        .collect();
    assert!(defs.iter().all(|l| l.error.is_none() && l.text.contains("skipped")));
}

#[test]
fn out_of_bounds_def_can_be_reported() {
    let engine = out_of_bounds_def(DefBoundsPolicy::Report);
    assert!(engine.variables().is_empty());
    assert!(
        engine
            .trace()
            .iter()
            .filter(|l| l.opcode == Opcode::Def)
            .all(|l| l.error.is_some())
    );
}

#[test]
fn shared_scratch_uses_the_warp_memory() {
    let mut engine = Engine::new(programs::shared_scratch(1.5));
    engine.run().unwrap();

    assert!(engine.global_memory_snapshot().iter().all(|&c| c == 3.0));
    assert_eq!(engine.shared_memory_snapshot(0), Some(vec![1.5; 10]));
    assert_eq!(engine.shared_memory_snapshot(1), None);
    assert!(engine.variables().iter().all(|v| v.current == Some(1.5)));
}

#[test]
fn vector_add_across_warps_and_sms() {
    let config = EngineConfig::default().with_warp_size(4).with_sms(2);
    let mut engine = Engine::with_config(programs::vector_add(3.0), config).unwrap();
    {
        let mut gm = engine.global_memory_mut().unwrap();
        for (i, cell) in gm.iter_mut().enumerate() {
            *cell = i as f32;
        }
    }
    engine.run().unwrap();

    let expected: Vec<f32> = (0..10).map(|i| i as f32 + 3.0).collect();
    assert_eq!(engine.global_memory_snapshot(), expected);
    assert_eq!(engine.num_warps(), 3);
}

#[test]
fn snapshot_serialises_to_json() {
    let mut engine = counting(2.0);
    engine.run().unwrap();
    let json = engine.snapshot().to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["state"], "Finished");
    assert_eq!(value["lanes"].as_array().map(Vec::len), Some(10));
}
