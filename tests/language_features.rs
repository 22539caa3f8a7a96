//! Exercises the wider instruction surface: switch lowering, phi
//! resolution, direct calls, globals, and the native dispatch of external
//! functions.

mod common;

use common::run_engine;
use interpolating_executor as ixe;
use interpolating_executor::{
    error::ErrorKind,
    executor::{Config, ExternalDispatcher},
    ir::{
        builder::reg,
        BinOp,
        Callee,
        CmpOp,
        FunctionBuilder,
        Instruction,
        ModuleBuilder,
        Operand,
        Type,
    },
    watchdog::LazyWatchdog,
};

#[test]
fn switch_explores_exactly_the_feasible_arms() -> anyhow::Result<()> {
    let mut module = ModuleBuilder::new();
    module
        .define("main", vec![32], |f| {
            let entry = f.entry();
            let arm_a = f.block();
            let arm_b = f.block();
            let arm_c = f.block();
            let fallback = f.block();
            let x = f.param(0);
            let small = f.reg();

            f.push(
                entry,
                Instruction::Cmp {
                    dest: small,
                    op: CmpOp::Ult,
                    lhs: reg(x),
                    rhs: Operand::constant(32, 3u8),
                    width: 32,
                },
            );
            f.push(
                entry,
                Instruction::Call {
                    callee: Callee::External("assume".into()),
                    args: vec![reg(small)],
                    dest: None,
                    return_type: Type::Int(32),
                },
            );
            f.push(
                entry,
                Instruction::Switch {
                    on: reg(x),
                    default: fallback,
                    arms: vec![
                        (ethnum::U256::from(0u8), arm_a),
                        (ethnum::U256::from(1u8), arm_b),
                        (ethnum::U256::from(2u8), arm_c),
                    ],
                },
            );
            for arm in [arm_a, arm_b, arm_c] {
                f.push(arm, Instruction::Ret { value: None });
            }
            f.push(
                fallback,
                Instruction::Call {
                    callee: Callee::External("report_error".into()),
                    args: vec![],
                    dest: None,
                    return_type: Type::Int(32),
                },
            );
            f.push(fallback, Instruction::Ret { value: None });
        })
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let engine = run_engine(module.build(), Config::default())?;
    let stats = engine.statistics();

    // Three feasible arms; the default is contradicted by the assumption
    // and never explored.
    assert_eq!(stats.paths_explored, 3);
    assert_eq!(stats.terminated_exit, 3);
    assert!(engine
        .collected()
        .expect("Default handler collects")
        .errors
        .is_empty());

    Ok(())
}

#[test]
fn phi_takes_the_value_of_the_incoming_edge() -> anyhow::Result<()> {
    let mut module = ModuleBuilder::new();
    module
        .define("main", vec![32], |f| {
            let entry = f.entry();
            let from_then = f.block();
            let from_else = f.block();
            let merge = f.block();
            let err_block = f.block();
            let ok_block = f.block();

            let x = f.param(0);
            let c = f.reg();
            let merged = f.reg();
            let took_then = f.reg();

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
                    then_target: from_then,
                    else_target: from_else,
                },
            );
            f.push(from_then, Instruction::Jump { target: merge });
            f.push(from_else, Instruction::Jump { target: merge });

            f.push(
                merge,
                Instruction::Phi {
                    dest: merged,
                    incoming: vec![
                        (from_then, Operand::constant(32, 1u8)),
                        (from_else, Operand::constant(32, 2u8)),
                    ],
                },
            );
            f.push(
                merge,
                Instruction::Cmp {
                    dest: took_then,
                    op: CmpOp::Eq,
                    lhs: reg(merged),
                    rhs: Operand::constant(32, 1u8),
                    width: 32,
                },
            );
            f.push(
                merge,
                Instruction::Br {
                    cond: reg(took_then),
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

    // Interpolation is off so the merge point is not subsumed away for
    // the second path.
    let engine = run_engine(module.build(), Config::default().without_interpolation())?;
    let collected = engine.collected().expect("Default handler collects");

    // The then-side merges the value 1 and reaches the error; the
    // else-side merges 2 and exits cleanly.
    assert_eq!(engine.statistics().paths_explored, 2);
    assert_eq!(collected.errors.len(), 1);
    assert_eq!(collected.errors[0].1, ErrorKind::ReportError);

    Ok(())
}

#[test]
fn direct_calls_bind_arguments_and_return_values() -> anyhow::Result<()> {
    let mut module = ModuleBuilder::new();

    let mut add = FunctionBuilder::new("add", vec![32, 32]);
    {
        let entry = add.entry();
        let a = add.param(0);
        let b = add.param(1);
        let sum = add.reg();
        add.push(
            entry,
            Instruction::BinOp {
                dest: sum,
                op: BinOp::Add,
                lhs: reg(a),
                rhs: reg(b),
                width: 32,
            },
        );
        add.push(
            entry,
            Instruction::Ret {
                value: Some(reg(sum)),
            },
        );
    }
    let add_id = module
        .add_function(add.build())
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    module
        .define("main", vec![], |f| {
            let entry = f.entry();
            let err_block = f.block();
            let ok_block = f.block();
            let result = f.reg();
            let correct = f.reg();

            f.push(
                entry,
                Instruction::Call {
                    callee: Callee::Function(add_id),
                    args: vec![
                        Operand::constant(32, 2u8),
                        Operand::constant(32, 3u8),
                    ],
                    dest: Some(result),
                    return_type: Type::Int(32),
                },
            );
            f.push(
                entry,
                Instruction::Cmp {
                    dest: correct,
                    op: CmpOp::Eq,
                    lhs: reg(result),
                    rhs: Operand::constant(32, 5u8),
                    width: 32,
                },
            );
            f.push(
                entry,
                Instruction::Br {
                    cond: reg(correct),
                    then_target: ok_block,
                    else_target: err_block,
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

    let engine = run_engine(module.build(), Config::default())?;
    let collected = engine.collected().expect("Default handler collects");

    assert_eq!(engine.statistics().paths_explored, 1);
    assert!(collected.errors.is_empty());

    Ok(())
}

#[test]
fn globals_are_initialised_and_read_only_is_enforced() -> anyhow::Result<()> {
    let mut module = ModuleBuilder::new();
    let constant = module
        .add_global("limit", 4, true, Some(vec![7, 0, 0, 0]))
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    module
        .define("main", vec![], |f| {
            let entry = f.entry();
            let v = f.reg();

            f.push(
                entry,
                Instruction::Load {
                    dest: v,
                    addr: Operand::Global(constant),
                    ty: Type::Int(32),
                },
            );
            // Writing a read-only global is a program error.
            f.push(
                entry,
                Instruction::Store {
                    addr: Operand::Global(constant),
                    value: Operand::constant(32, 1u8),
                },
            );
            f.push(entry, Instruction::Ret { value: None });
        })
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let engine = run_engine(module.build(), Config::default())?;
    let collected = engine.collected().expect("Default handler collects");

    assert_eq!(collected.errors.len(), 1);
    assert_eq!(collected.errors[0].1, ErrorKind::ReadOnly);

    Ok(())
}

/// A host dispatcher that knows a single function.
#[derive(Debug)]
struct HostAdd;

impl ExternalDispatcher for HostAdd {
    fn call(
        &mut self,
        name: &str,
        args: &[ethnum::U256],
    ) -> anyhow::Result<Option<ethnum::U256>> {
        match name {
            "host_add" => Ok(Some(args[0] + args[1])),
            _ => Err(anyhow::anyhow!("unknown external {name}")),
        }
    }
}

#[test]
fn external_calls_concretise_and_dispatch_natively() -> anyhow::Result<()> {
    let mut module = ModuleBuilder::new();
    module
        .define("main", vec![], |f| {
            let entry = f.entry();
            let err_block = f.block();
            let ok_block = f.block();
            let result = f.reg();
            let correct = f.reg();

            f.push(
                entry,
                Instruction::Call {
                    callee: Callee::External("host_add".into()),
                    args: vec![
                        Operand::constant(32, 20u8),
                        Operand::constant(32, 22u8),
                    ],
                    dest: Some(result),
                    return_type: Type::Int(32),
                },
            );
            f.push(
                entry,
                Instruction::Cmp {
                    dest: correct,
                    op: CmpOp::Eq,
                    lhs: reg(result),
                    rhs: Operand::constant(32, 42u8),
                    width: 32,
                },
            );
            f.push(
                entry,
                Instruction::Br {
                    cond: reg(correct),
                    then_target: ok_block,
                    else_target: err_block,
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

    let mut engine = ixe::new(module.build(), Config::default(), LazyWatchdog.in_rc())
        .with_external_dispatcher(Box::new(HostAdd));
    engine
        .run("main", vec![])
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let collected = engine.collected().expect("Default handler collects");
    assert!(collected.errors.is_empty());
    assert_eq!(engine.statistics().paths_explored, 1);

    // An unknown external fails the calling path with an external error.
    let mut module = ModuleBuilder::new();
    module
        .define("main", vec![], |f| {
            let entry = f.entry();
            f.push(
                entry,
                Instruction::Call {
                    callee: Callee::External("host_missing".into()),
                    args: vec![],
                    dest: None,
                    return_type: Type::Int(32),
                },
            );
            f.push(entry, Instruction::Ret { value: None });
        })
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let mut engine = ixe::new(module.build(), Config::default(), LazyWatchdog.in_rc())
        .with_external_dispatcher(Box::new(HostAdd));
    engine
        .run("main", vec![])
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let collected = engine.collected().expect("Default handler collects");
    assert_eq!(collected.errors.len(), 1);
    assert_eq!(collected.errors[0].1, ErrorKind::External);

    Ok(())
}
