//! Checks seed-guided exploration: under seed-only replay, a branch whose
//! seeds all go one way is fixed in that direction instead of forking.

mod common;

use common::run_engine_with_seeds;
use interpolating_executor::{
    executor::Config,
    ir::{builder::reg, CmpOp, Instruction, ModuleBuilder, Operand},
    seed::Seed,
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
fn seed_replay_follows_the_seeded_direction() -> anyhow::Result<()> {
    let mut config = Config::default();
    config.only_replay_seeds = true;

    let seed = Seed::new().with_value("arg0", vec![20, 0, 0, 0]);
    let engine = run_engine_with_seeds(branch_program()?, config, vec![seed])?;
    let stats = engine.statistics();

    // The seed drives the not-taken side, so the branch never forks.
    assert_eq!(stats.forks, 0);
    assert_eq!(stats.paths_explored, 1);

    let tests = &engine.collected().expect("Default handler collects").tests;
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].path, vec![false]);

    Ok(())
}

#[test]
fn seeds_split_across_forked_directions() -> anyhow::Result<()> {
    // Without seed-only replay, a branch with seeds on both sides forks
    // normally and each child keeps the seeds it satisfies.
    let seeds = vec![
        Seed::new().with_value("arg0", vec![3, 0, 0, 0]),
        Seed::new().with_value("arg0", vec![200, 0, 0, 0]),
    ];
    let engine = run_engine_with_seeds(branch_program()?, Config::default(), seeds)?;
    let stats = engine.statistics();

    assert_eq!(stats.forks, 1);
    assert_eq!(stats.paths_explored, 2);

    Ok(())
}
