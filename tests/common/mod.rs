//! This module contains common testing utilities for testing this library.
#![cfg(test)]
#![allow(unused)] // Not every helper is used by every scenario file.

use std::{
    fs,
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
};

use interpolating_executor as ixe;
use interpolating_executor::{
    executor::{Config, Executor},
    ir::{builder::reg, BinOp, Callee, CmpOp, Instruction, Module, ModuleBuilder, Operand, Type},
    seed::Seed,
    watchdog::LazyWatchdog,
};

/// Runs `module` from its `main` function with the provided configuration,
/// returning the finished engine for inspection.
pub fn run_engine(module: Module, config: Config) -> anyhow::Result<Executor> {
    run_engine_with_seeds(module, config, vec![])
}

/// As [`run_engine`], guided by the provided seeds.
pub fn run_engine_with_seeds(
    module: Module,
    config: Config,
    seeds: Vec<Seed>,
) -> anyhow::Result<Executor> {
    let mut engine = ixe::new(module, config, LazyWatchdog.in_rc());
    engine
        .run("main", seeds)
        .map_err(|e| anyhow::anyhow!("engine run failed: {e}"))?;
    Ok(engine)
}

/// Decodes a little-endian 32-bit test input.
pub fn le_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    for (i, b) in bytes.iter().take(4).enumerate() {
        word[i] = *b;
    }
    u32::from_le_bytes(word)
}

/// A two-iteration loop whose body carries an infeasible-side branch on
/// the symbolic input, used by the speculation scenarios:
///
/// ```text
/// main(x) {
///     assume(x > 100);
///     i = 0;
/// header:
///     if (i < 2) goto body; else goto done;
/// body:
///     i += 1;
///     if (x < 10) goto rare; else goto header;
/// rare:
///     report_error();
/// done:
///     return;
/// }
/// ```
pub fn guarded_loop_program() -> anyhow::Result<Module> {
    let mut module = ModuleBuilder::new();
    module
        .define("main", vec![32], |f| {
            let entry = f.entry();
            let header = f.block();
            let body = f.block();
            let rare = f.block();
            let done = f.block();

            let x = f.param(0);
            let assumed = f.reg();
            let counter = f.reg();
            let iv = f.reg();
            let loop_c = f.reg();
            let iv2 = f.reg();
            let inc = f.reg();
            let cb = f.reg();

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
            f.push(entry, Instruction::Jump { target: header });

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
                    op: BinOp::Add,
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
                    dest: cb,
                    op: CmpOp::Ult,
                    lhs: reg(x),
                    rhs: Operand::constant(32, 10u8),
                    width: 32,
                },
            );
            f.push(
                body,
                Instruction::Br {
                    cond: reg(cb),
                    then_target: rare,
                    else_target: header,
                },
            );

            f.push(
                rare,
                Instruction::Call {
                    callee: Callee::External("report_error".into()),
                    args: vec![],
                    dest: None,
                    return_type: Type::Int(32),
                },
            );
            f.push(rare, Instruction::Ret { value: None });

            f.push(done, Instruction::Ret { value: None });
        })
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(module.build())
}

static FOLDER_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Creates a dependency folder holding one avoid set with the provided
/// variable names.
pub fn dependency_folder_with_avoid(names: &[&str]) -> anyhow::Result<PathBuf> {
    let unique = FOLDER_COUNTER.fetch_add(1, Ordering::Relaxed);
    let folder = std::env::temp_dir().join(format!(
        "interpolating-executor-test-{}-{unique}",
        std::process::id()
    ));
    fs::create_dir_all(&folder)?;
    fs::write(folder.join("SpecAvoid_0.txt"), names.join("\n"))?;
    Ok(folder)
}
