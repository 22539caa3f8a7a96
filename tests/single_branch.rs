//! Explores a program with one symbolic branch where both sides are
//! feasible, and checks that both paths terminate with distinguishing
//! test inputs.

mod common;

use common::{le_u32, run_engine};
use interpolating_executor::{
    executor::Config,
    ir::{builder::reg, CmpOp, Instruction, ModuleBuilder, Operand},
};

/// `main(x: i32) { if (x < 10) return 1; else return 0; }`
fn branch_program() -> anyhow::Result<interpolating_executor::ir::Module> {
    let mut module = ModuleBuilder::new();
    module
        .define("main", vec![32], |f| {
            let entry = f.entry();
            let then_block = f.block();
            let else_block = f.block();
            let x = f.param(0);
            let c = f.reg();

            f.push(
                entry,
                Instruction::Cmp {
                    dest: c,
                    op: CmpOp::Ult,
                    lhs: reg(x),
                    rhs: Operand::constant(32, 10u8),
                    width: 32,
                },
            );
            f.push(
                entry,
                Instruction::Br {
                    cond: reg(c),
                    then_target: then_block,
                    else_target: else_block,
                },
            );
            f.push(
                then_block,
                Instruction::Ret {
                    value: Some(Operand::constant(32, 1u8)),
                },
            );
            f.push(
                else_block,
                Instruction::Ret {
                    value: Some(Operand::constant(32, 0u8)),
                },
            );
        })
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(module.build())
}

#[test]
fn both_sides_terminate_with_witnesses() -> anyhow::Result<()> {
    let engine = run_engine(branch_program()?, Config::default())?;
    let stats = engine.statistics();

    assert_eq!(stats.forks, 1);
    assert_eq!(stats.paths_explored, 2);
    assert_eq!(stats.terminated_exit, 2);
    assert_eq!(stats.terminated_error, 0);

    let tests = &engine.collected().expect("Default handler collects").tests;
    assert_eq!(tests.len(), 2);

    // One witness exercises each side of the branch.
    let values: Vec<u32> = tests
        .iter()
        .map(|t| le_u32(&t.inputs[0].bytes))
        .collect();
    assert!(values.iter().any(|v| *v < 10));
    assert!(values.iter().any(|v| *v >= 10));

    Ok(())
}

#[test]
fn fork_paths_record_opposite_branch_bits() -> anyhow::Result<()> {
    let engine = run_engine(branch_program()?, Config::default())?;
    let tests = &engine.collected().expect("Default handler collects").tests;

    let mut directions: Vec<bool> = tests.iter().map(|t| t.path[0]).collect();
    directions.sort_unstable();
    assert_eq!(directions, vec![false, true]);

    Ok(())
}

#[test]
fn interpolation_can_be_disabled() -> anyhow::Result<()> {
    let engine = run_engine(branch_program()?, Config::default().without_interpolation())?;
    let stats = engine.statistics();

    assert_eq!(stats.paths_explored, 2);
    assert!(engine.interpolation_tree().is_none());
    assert_eq!(stats.subsumption.stored, 0);

    Ok(())
}
