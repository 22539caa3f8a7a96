//! Exercises a failing speculation under the custom strategy: the
//! speculated subtree reaches a new basic block and rolls back, and the
//! visited-block snapshot then refuses to re-speculate the same branch
//! until genuinely new blocks appear.

mod common;

use common::{dependency_folder_with_avoid, guarded_loop_program, run_engine};
use interpolating_executor::{
    executor::Config,
    searcher::SearchPolicy,
    speculation::{SpecStrategy, SpecType},
};

/// Builds the custom-strategy configuration with the branch variable in
/// the avoid set.
///
/// Breadth-first selection steps the speculative state ahead of its
/// sibling, so the rollback lands before the sibling re-reaches the
/// branch.
fn custom_config() -> anyhow::Result<Config> {
    let folder = dependency_folder_with_avoid(&["arg0"])?;
    let mut config = Config::default()
        .with_speculation(SpecType::Coverage, SpecStrategy::Custom)
        .with_dependency_folder(folder)
        .with_search_policy(SearchPolicy::BreadthFirst);
    config.wp_interpolant = false;
    Ok(config)
}

#[test]
fn failed_speculation_rolls_back_and_refuses_reentry() -> anyhow::Result<()> {
    let engine = run_engine(guarded_loop_program()?, custom_config()?)?;
    let stats = engine.statistics();

    // The first visit of the branch opens a speculation subtree; reaching
    // the new `rare` block fails it.
    assert_eq!(stats.dynamic_yes, 1);
    assert_eq!(stats.spec_fail, 1);

    // The second visit happens under the same visited-block snapshot and
    // is refused, falling through with an interpolant mark instead.
    assert_eq!(stats.dynamic_no, 1);
    assert_eq!(stats.independence_no, 2);

    Ok(())
}

#[test]
fn rolled_back_states_leave_no_artefacts() -> anyhow::Result<()> {
    let engine = run_engine(guarded_loop_program()?, custom_config()?)?;
    let stats = engine.statistics();

    // Only the feasible path survives; the speculation subtree's states
    // are removed without counting as explored paths or emitting tests.
    assert_eq!(stats.paths_explored, 1);
    assert_eq!(stats.terminated_exit, 1);
    assert_eq!(stats.terminated_error, 0);

    let collected = engine.collected().expect("Default handler collects");
    assert_eq!(collected.tests.len(), 1);
    assert!(collected.errors.is_empty());
    assert!(stats.total_spec_fail_time >= std::time::Duration::ZERO);

    Ok(())
}
