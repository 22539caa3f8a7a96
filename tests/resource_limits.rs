//! Checks the resource boundaries: the branch-depth cap terminates both
//! fork children early, and the fork cap degrades branching into
//! coin-flipped single-path exploration.

mod common;

use common::run_engine;
use interpolating_executor::{
    executor::Config,
    ir::{builder::reg, CmpOp, Instruction, ModuleBuilder, Operand},
};

/// `main(x, y) { if (x < 10) {} if (y < 10) {} return; }`: two
/// independent symbolic branches, four feasible paths.
fn two_branch_program() -> anyhow::Result<interpolating_executor::ir::Module> {
    let mut module = ModuleBuilder::new();
    module
        .define("main", vec![32, 32], |f| {
            let entry = f.entry();
            let mid = f.block();
            let tail = f.block();
            let x = f.param(0);
            let y = f.param(1);
            let cx = f.reg();
            let cy = f.reg();

            f.push(
                entry,
                Instruction::Cmp {
                    dest: cx,
                    op: CmpOp::Ult,
                    lhs: reg(x),
                    rhs: Operand::constant(32, 10u8),
                    width: 32,
                },
            );
            f.push(
                entry,
                Instruction::Br {
                    cond: reg(cx),
                    then_target: mid,
                    else_target: mid,
                },
            );
            f.push(
                mid,
                Instruction::Cmp {
                    dest: cy,
                    op: CmpOp::Ult,
                    lhs: reg(y),
                    rhs: Operand::constant(32, 10u8),
                    width: 32,
                },
            );
            f.push(
                mid,
                Instruction::Br {
                    cond: reg(cy),
                    then_target: tail,
                    else_target: tail,
                },
            );
            f.push(tail, Instruction::Ret { value: None });
        })
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(module.build())
}

#[test]
fn exceeding_max_depth_terminates_both_children_early() -> anyhow::Result<()> {
    // Interpolation is disabled so that the rejoining blocks are not
    // subsumed away before the depth limit can trigger.
    let config = Config::default().without_interpolation().with_max_depth(1);
    let engine = run_engine(two_branch_program()?, config)?;
    let stats = engine.statistics();

    // The first fork is within the limit; both forks at the second branch
    // push their children past it.
    assert_eq!(stats.terminated_early, 4);
    assert_eq!(stats.terminated_exit, 0);

    let tests = &engine.collected().expect("Default handler collects").tests;
    assert!(tests.iter().all(|t| t.suffix == "early"));

    Ok(())
}

#[test]
fn max_forks_degrades_to_single_path_exploration() -> anyhow::Result<()> {
    let config = Config::default().without_interpolation().with_max_forks(0);
    let engine = run_engine(two_branch_program()?, config)?;
    let stats = engine.statistics();

    // Forking never happens: each branch coin-flips a direction and
    // installs its constraint, so exactly one path is explored.
    assert_eq!(stats.forks, 0);
    assert_eq!(stats.paths_explored, 1);
    assert_eq!(stats.terminated_exit, 1);

    Ok(())
}

#[test]
fn instruction_quota_halts_the_run() -> anyhow::Result<()> {
    let mut config = Config::default().without_interpolation();
    config.stop_after_n_instructions = Some(3);
    config.dump_states_on_halt = true;

    let engine = run_engine(two_branch_program()?, config)?;
    let stats = engine.statistics();

    // The run halts early and dumps the remaining state as an early
    // termination.
    assert!(stats.instructions <= 4);
    assert!(stats.terminated_early >= 1);

    Ok(())
}
