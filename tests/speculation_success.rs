//! Explores a bounded loop whose body branches on a condition that is
//! independent of the configured avoid set: the engine wagers on the
//! branch without opening a speculation subtree, and the wager never has
//! to be unwound.

mod common;

use common::{dependency_folder_with_avoid, guarded_loop_program, run_engine};
use interpolating_executor::{
    executor::Config,
    speculation::{SpecStrategy, SpecType},
};

#[test]
fn independent_branches_are_assumed_without_speculating() -> anyhow::Result<()> {
    let folder = dependency_folder_with_avoid(&["unrelated"])?;
    let config = Config::default()
        .with_speculation(SpecType::Coverage, SpecStrategy::Aggressive)
        .with_dependency_folder(folder);

    let engine = run_engine(guarded_loop_program()?, config)?;
    let stats = engine.statistics();

    // The branch is judged independent on both loop iterations; no
    // speculation subtree is ever opened, and nothing rolls back.
    assert_eq!(stats.independence_yes, 2);
    assert_eq!(stats.spec_fail, 0);
    assert_eq!(stats.dynamic_yes, 0);
    assert_eq!(stats.forks, 0);

    assert_eq!(stats.terminated_exit, 1);
    assert_eq!(stats.terminated_error, 0);
    assert_eq!(
        engine.collected().expect("Default handler collects").tests.len(),
        1
    );

    Ok(())
}

#[test]
fn dependent_branches_do_not_take_the_wager() -> anyhow::Result<()> {
    // With the branch variable in the avoid set, aggressive speculation
    // opens a subtree instead of assuming the branch away.
    let folder = dependency_folder_with_avoid(&["arg0"])?;
    let config = Config::default()
        .with_speculation(SpecType::Coverage, SpecStrategy::Aggressive)
        .with_dependency_folder(folder);

    let engine = run_engine(guarded_loop_program()?, config)?;
    let stats = engine.statistics();

    assert_eq!(stats.independence_yes, 0);
    assert!(stats.independence_no >= 1);
    assert!(stats.spec_fail >= 1);

    Ok(())
}
