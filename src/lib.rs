//! This library implements a symbolic execution engine that prunes path
//! exploration using Craig interpolation and speculative branch execution.
//! Given a module in a typed low-level intermediate representation, the
//! engine explores feasible control-flow paths by carrying a symbolic
//! store and an accumulated path condition, consulting a solver at
//! branches, and emitting a test input for every distinct explored path.
//!
//! # How it Works
//!
//! From a very high level, one run proceeds as follows:
//!
//! 1. A module is constructed through the [`ir::builder`] API (or by an
//!    external loader producing the same structures).
//! 2. The [`executor::Executor`] explores the module from its entry
//!    function, forking an [`state::ExecutionState`] at every branch both
//!    sides of which are feasible under the path condition.
//! 3. Alongside the fork tree, the engine maintains an
//!    [`interpolation::InterpolationTree`]. Whenever a subtree is proved
//!    infeasible or completes, a weakest-sufficient condition (an
//!    interpolant) condenses at the subtree root and is stored by program
//!    point; a later state whose path condition entails a stored
//!    interpolant is terminated without re-exploration.
//! 4. A speculation layer may additionally wager that a branch is
//!    irrelevant to the property being checked, skipping its fork; losing
//!    wagers are rolled back by removing the speculation subtree.
//! 5. Every terminated path emits a test-case record through the
//!    [`handler::RunHandler`].
//!
//! The analysis is _best effort_: the built-in solver back-end decides
//! satisfiability by deterministic counter-model search and defers to
//! external SMT back-ends, plugged in through [`solver::Backend`], for
//! completeness beyond its candidate space.
//!
//! # Basic Usage
//!
//! ```
//! use interpolating_executor as ixe;
//! use interpolating_executor::{
//!     executor::Config,
//!     ir::{builder::reg, Callee, CmpOp, Instruction, ModuleBuilder, Operand, Type},
//!     watchdog::LazyWatchdog,
//! };
//!
//! // x = sym i32; if (x < 10) { return 1 } else { return 0 }
//! let mut module = ModuleBuilder::new();
//! module
//!     .define("main", vec![], |f| {
//!         let entry = f.entry();
//!         let then_block = f.block();
//!         let else_block = f.block();
//!         let p = f.reg();
//!         let x = f.reg();
//!         let c = f.reg();
//!
//!         f.push(entry, Instruction::Alloca {
//!             dest: p,
//!             ty: Type::Int(32),
//!             count: Operand::constant(32, 1u8),
//!         });
//!         f.push(entry, Instruction::Call {
//!             callee: Callee::External("make_symbolic".into()),
//!             args: vec![reg(p)],
//!             dest: None,
//!             return_type: Type::Int(32),
//!         });
//!         f.push(entry, Instruction::Load { dest: x, addr: reg(p), ty: Type::Int(32) });
//!         f.push(entry, Instruction::Cmp {
//!             dest: c,
//!             op: CmpOp::Ult,
//!             lhs: reg(x),
//!             rhs: Operand::constant(32, 10u8),
//!             width: 32,
//!         });
//!         f.push(entry, Instruction::Br {
//!             cond: reg(c),
//!             then_target: then_block,
//!             else_target: else_block,
//!         });
//!         f.push(then_block, Instruction::Ret {
//!             value: Some(Operand::constant(32, 1u8)),
//!         });
//!         f.push(else_block, Instruction::Ret {
//!             value: Some(Operand::constant(32, 0u8)),
//!         });
//!     })
//!     .unwrap();
//!
//! let mut engine = ixe::new(module.build(), Config::default(), LazyWatchdog.in_rc());
//! engine.run("main", vec![]).unwrap();
//!
//! // Both sides of the branch are feasible, so two paths terminate.
//! assert_eq!(engine.collected().unwrap().tests.len(), 2);
//! ```

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod constant;
pub mod constraints;
pub mod error;
pub mod executor;
pub mod expr;
pub mod governor;
pub mod handler;
pub mod interpolation;
pub mod ir;
pub mod memory;
pub mod ptree;
pub mod searcher;
pub mod seed;
pub mod solver;
pub mod speculation;
pub mod state;
pub mod stats;
pub mod watchdog;

// Re-exports to provide the library interface.
pub use executor::{new, Executor};
pub use stats::Statistics;
