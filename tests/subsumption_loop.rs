//! Explores a bounded loop whose body branches on a loop-invariant
//! condition: the first path through the loop stores an interpolant at the
//! rejoin point, and the sibling path reaching the same point with a
//! stronger path condition is subsumed without re-exploring the loop.

mod common;

use common::run_engine;
use interpolating_executor::{
    executor::Config,
    ir::{builder::reg, Callee, CmpOp, Instruction, ModuleBuilder, Operand, Type},
};

/// A two-iteration counting loop entered through a rejoining symbolic
/// branch, with a loop-invariant branch in the body:
///
/// ```text
/// main(x, y) {
///     assume(x > 100);
///     i = 0;
///     if (y < 5) goto header; else goto header;   // rejoining fork
/// header:
///     if (i < 2) goto body; else goto done;
/// body:
///     i += 1;
///     if (x > 100) goto header; else goto dead;   // invariant, never forks
/// dead:
///     report_error();
/// done:
///     return;
/// }
/// ```
fn invariant_loop_program() -> anyhow::Result<interpolating_executor::ir::Module> {
    let mut module = ModuleBuilder::new();
    module
        .define("main", vec![32, 32], |f| {
            let entry = f.entry();
            let header = f.block();
            let body = f.block();
            let dead = f.block();
            let done = f.block();

            let x = f.param(0);
            let y = f.param(1);
            let assumed = f.reg();
            let counter = f.reg();
            let yc = f.reg();
            let iv = f.reg();
            let loop_c = f.reg();
            let iv2 = f.reg();
            let inc = f.reg();
            let invariant = f.reg();

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
                Instruction::Alloca {
                    dest: counter,
                    ty: Type::Int(32),
                    count: Operand::constant(32, 1u8),
                },
            );
            f.push(
                entry,
                Instruction::Store {
                    addr: reg(counter),
                    value: Operand::constant(32, 0u8),
                },
            );
            f.push(
                entry,
                Instruction::Cmp {
                    dest: yc,
                    op: CmpOp::Ult,
                    lhs: reg(y),
                    rhs: Operand::constant(32, 5u8),
                    width: 32,
                },
            );
            // Both directions land on the loop header, so the fork's two
            // states share their next program point.
            f.push(
                entry,
                Instruction::Br {
                    cond: reg(yc),
                    then_target: header,
                    else_target: header,
                },
            );

            f.push(
                header,
                Instruction::Load {
                    dest: iv,
                    addr: reg(counter),
                    ty: Type::Int(32),
                },
            );
            f.push(
                header,
                Instruction::Cmp {
                    dest: loop_c,
                    op: CmpOp::Ult,
                    lhs: reg(iv),
                    rhs: Operand::constant(32, 2u8),
                    width: 32,
                },
            );
            f.push(
                header,
                Instruction::Br {
                    cond: reg(loop_c),
                    then_target: body,
                    else_target: done,
                },
            );

            f.push(
                body,
                Instruction::Load {
                    dest: iv2,
                    addr: reg(counter),
                    ty: Type::Int(32),
                },
            );
            f.push(
                body,
                Instruction::BinOp {
                    dest: inc,
                    op: interpolating_executor::ir::BinOp::Add,
                    lhs: reg(iv2),
                    rhs: Operand::constant(32, 1u8),
                    width: 32,
                },
            );
            f.push(
                body,
                Instruction::Store {
                    addr: reg(counter),
                    value: reg(inc),
                },
            );
            f.push(
                body,
                Instruction::Cmp {
                    dest: invariant,
                    op: CmpOp::Ugt,
                    lhs: reg(x),
                    rhs: Operand::constant(32, 100u8),
                    width: 32,
                },
            );
            f.push(
                body,
                Instruction::Br {
                    cond: reg(invariant),
                    then_target: header,
                    else_target: dead,
                },
            );

            f.push(
                dead,
                Instruction::Call {
                    callee: Callee::External("report_error".into()),
                    args: vec![],
                    dest: None,
                    return_type: Type::Int(32),
                },
            );
            f.push(dead, Instruction::Ret { value: None });

            f.push(done, Instruction::Ret { value: None });
        })
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(module.build())
}

#[test]
fn second_path_is_subsumed_at_the_rejoin_point() -> anyhow::Result<()> {
    let engine = run_engine(invariant_loop_program()?, Config::default())?;
    let stats = engine.statistics();

    // One path explores the loop; its sibling is pruned at the header.
    assert_eq!(stats.forks, 1);
    assert_eq!(stats.terminated_exit, 1);
    assert_eq!(stats.terminated_subsumed, 1);
    assert_eq!(stats.terminated_error, 0);
    assert_eq!(stats.subsumption.hits, 1);

    Ok(())
}

#[test]
fn subsumed_paths_skip_their_instructions() -> anyhow::Result<()> {
    let pruned = run_engine(invariant_loop_program()?, Config::default())?;
    let exhaustive = run_engine(
        invariant_loop_program()?,
        Config::default().without_interpolation(),
    )?;

    // Without interpolation both siblings walk the loop in full.
    assert_eq!(exhaustive.statistics().terminated_subsumed, 0);
    assert_eq!(exhaustive.statistics().terminated_exit, 2);
    assert!(pruned.statistics().instructions < exhaustive.statistics().instructions);

    Ok(())
}

#[test]
fn subsumed_paths_can_emit_test_cases() -> anyhow::Result<()> {
    let engine = run_engine(
        invariant_loop_program()?,
        Config::default().with_subsumed_test(true),
    )?;

    let collected = engine.collected().expect("Default handler collects");
    assert_eq!(collected.tests.len(), 2);
    assert!(collected.tests.iter().any(|t| t.suffix == "subsumed"));

    Ok(())
}

#[test]
fn the_invariant_literal_reaches_the_stored_interpolants() -> anyhow::Result<()> {
    let engine = run_engine(invariant_loop_program()?, Config::default())?;
    let table = &engine
        .interpolation_tree()
        .expect("Interpolation is on by default")
        .table;

    // The loop-invariant branch was pruned via its unsat core, so some
    // interpolant depends on `x` (the first input) alone.
    let points: Vec<_> = table.points().collect();
    let found = points.iter().any(|point| {
        table.entries_at(*point).iter().any(|entry| {
            entry.dependency_signature == vec!["arg0".to_string()]
        })
    });
    assert!(found, "No interpolant records the invariant literal");

    Ok(())
}
