//! Explores a program whose error branch is unreachable under an assumed
//! precondition, and checks that the branch is pruned with an interpolant
//! recording the responsible literal.

mod common;

use common::run_engine;
use interpolating_executor::{
    executor::Config,
    ir::{builder::reg, Callee, CmpOp, Instruction, ModuleBuilder, Operand, Type},
};

/// `main(x: i32) { assume(x > 100); if (x < 10) report_error(); return; }`
fn assumed_program() -> anyhow::Result<interpolating_executor::ir::Module> {
    let mut module = ModuleBuilder::new();
    module
        .define("main", vec![32], |f| {
            let entry = f.entry();
            let err_block = f.block();
            let ok_block = f.block();
            let x = f.param(0);
            let assumed = f.reg();
            let c = f.reg();

            f.push(
                entry,
                Instruction::Cmp {
                    dest: assumed,
                    op: CmpOp::Ugt,
                    lhs: reg(x),
                    rhs: Operand::constant(32, 100u8),
                    width: 32,
                },
            );
            f.push(
                entry,
                Instruction::Call {
                    callee: Callee::External("assume".into()),
                    args: vec![reg(assumed)],
                    dest: None,
                    return_type: Type::Int(32),
                },
            );
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
                    then_target: err_block,
                    else_target: ok_block,
                },
            );
            f.push(
                err_block,
                Instruction::Call {
                    callee: Callee::External("report_error".into()),
                    args: vec![],
                    dest: None,
                    return_type: Type::Int(32),
                },
            );
            f.push(err_block, Instruction::Ret { value: None });
            f.push(ok_block, Instruction::Ret { value: None });
        })
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(module.build())
}

#[test]
fn unreachable_branch_is_pruned_without_forking() -> anyhow::Result<()> {
    let engine = run_engine(assumed_program()?, Config::default())?;
    let stats = engine.statistics();

    // The branch is determined, so no fork happens and no error path is
    // ever explored.
    assert_eq!(stats.forks, 0);
    assert_eq!(stats.paths_explored, 1);
    assert_eq!(stats.terminated_exit, 1);
    assert_eq!(stats.terminated_error, 0);

    let collected = engine.collected().expect("Default handler collects");
    assert_eq!(collected.tests.len(), 1);
    assert!(collected.errors.is_empty());

    Ok(())
}

#[test]
fn pruning_stores_the_responsible_literal() -> anyhow::Result<()> {
    let engine = run_engine(assumed_program()?, Config::default())?;

    let table = &engine
        .interpolation_tree()
        .expect("Interpolation is on by default")
        .table;
    assert!(!table.is_empty());

    // Some stored interpolant names the assumed input, and consists of
    // exactly the assumption literal.
    let points: Vec<_> = table.points().collect();
    let mut found = false;
    for point in points {
        for entry in table.entries_at(point) {
            if entry.interpolant.len() == 1
                && entry.dependency_signature.iter().any(|n| n == "arg0")
            {
                found = true;
            }
        }
    }
    assert!(found, "No interpolant records the assumption literal");

    Ok(())
}
