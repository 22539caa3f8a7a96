//! This module contains the memory-operation dispatch: bounds-checked
//! loads and stores with multi-object resolution, allocation and freeing,
//! the symbolic-input intrinsics, and the concretised native call path.

use std::rc::Rc;

use ethnum::U256;

use crate::{
    error::{
        container::Locatable,
        execution::{Error, Result},
        ErrorKind,
    },
    expr::ExprRef,
    ir::{Operand, RegisterId},
    memory::{Binding, MemoryObject, ObjectState},
    solver::Solver,
    state::{ExecutionState, StateId},
};

use super::{fork::ForkOutcome, Executor, Termination};

/// The state currently holding the unbound remainder of a multi-object
/// resolution.
enum Residual {
    /// The state the run loop is stepping.
    Current,

    /// A forked sibling, temporarily taken out of the live set.
    Owned(Box<ExecutionState>),

    /// Fully consumed; no remainder exists.
    Consumed,
}

impl Executor {
    /// Performs a load (`write` absent) or store (`write` present) of
    /// `width` bits at `address`.
    ///
    /// The fast path resolves the address to a unique object and proves
    /// the access in bounds; the slow path forks one state per candidate
    /// object and terminates the out-of-bounds remainder with a pointer
    /// error, recording a memory-bound interpolant first.
    pub(crate) fn execute_memory_operation(
        &mut self,
        state: &mut ExecutionState,
        write: Option<ExprRef>,
        mut address: ExprRef,
        width: u32,
        dest: Option<RegisterId>,
    ) -> Result<Option<Termination>> {
        let bytes = u64::from(width.div_ceil(8));

        let mut value = write;
        if self.config.simplify_sym_indices {
            if !address.is_constant() {
                address = state.constraints.simplify_expr(&self.builder, &address);
            }
            if let Some(v) = &value {
                if !v.is_constant() {
                    value = Some(state.constraints.simplify_expr(&self.builder, v));
                }
            }
        }

        // Fast path: a unique candidate that is provably in bounds.
        let constraints: Vec<ExprRef> = state.constraints.constraints().to_vec();
        let resolved = state
            .address_space
            .resolve_one(&mut self.solver, &constraints, &address);
        match resolved {
            Ok(Some(binding)) => {
                let offset = binding.object.offset_expr(&self.builder, &address);
                let bounds = binding
                    .object
                    .bounds_check_offset(&self.builder, &offset, bytes);

                match self.solver.must_be_true(&constraints, &bounds) {
                    Ok(true) => {
                        return self.do_access(state, &binding, &address, width, value.as_ref(), dest);
                    }
                    Ok(false) => {}
                    Err(_) => {
                        state.pc = state.prev_pc;
                        return Ok(Some(Termination::Early(
                            "query timed out (bounds check)".into(),
                        )));
                    }
                }
            }
            Ok(None) => {}
            Err(_) => {
                state.pc = state.prev_pc;
                return Ok(Some(Termination::Early("query timed out (resolve)".into())));
            }
        }

        // Slow path: enumerate candidates and fork per object.
        let resolution = match state.address_space.resolve(
            &mut self.solver,
            &self.builder,
            &constraints,
            &address,
            self.config.max_resolutions,
        ) {
            Ok(resolution) => resolution,
            Err(_) => {
                state.pc = state.prev_pc;
                return Ok(Some(Termination::Early("query timed out (resolve)".into())));
            }
        };

        let mut residual = Residual::Current;
        let mut current_termination: Option<Termination> = None;
        let mut violations: Vec<ExprRef> = Vec::new();

        for binding in &resolution.candidates {
            let in_bounds = binding
                .object
                .bounds_check_pointer(&self.builder, &address, bytes);
            if self.config.mark_global || !binding.object.is_global {
                violations.push(self.builder.not_bool(in_bounds.clone()));
            }

            let (is_current, holder): (bool, &mut ExecutionState) = match &mut residual {
                Residual::Current => (true, &mut *state),
                Residual::Owned(owned) => (false, owned.as_mut()),
                Residual::Consumed => break,
            };

            match self.fork(holder, in_bounds)? {
                ForkOutcome::TakeTrue => {
                    // The address always lands in this object; the holder
                    // is the bound state and no remainder exists.
                    let termination =
                        self.do_access(holder, binding, &address, width, value.as_ref(), dest)?;
                    if is_current {
                        current_termination = termination;
                    } else if let Residual::Owned(owned) =
                        std::mem::replace(&mut residual, Residual::Consumed)
                    {
                        self.settle_sibling(*owned, termination);
                    }
                    residual = Residual::Consumed;
                    break;
                }
                ForkOutcome::TakeFalse => {
                    // Never this object; the holder stays the residual.
                }
                ForkOutcome::Fork { other, .. } => {
                    // The holder is the bound side; the fresh sibling
                    // carries the remainder.
                    let termination =
                        self.do_access(holder, binding, &address, width, value.as_ref(), dest)?;
                    if is_current {
                        current_termination = termination;
                    } else if let Residual::Owned(owned) =
                        std::mem::replace(&mut residual, Residual::Consumed)
                    {
                        self.settle_sibling(*owned, termination);
                    }

                    residual = match self.states.remove(&other) {
                        Some(next) => Residual::Owned(Box::new(next)),
                        None => Residual::Consumed,
                    };
                }
                ForkOutcome::Terminated(termination) => {
                    if is_current {
                        current_termination = Some(termination);
                    } else if let Residual::Owned(owned) =
                        std::mem::replace(&mut residual, Residual::Consumed)
                    {
                        self.settle_sibling(*owned, Some(termination));
                    }
                    residual = Residual::Consumed;
                    break;
                }
            }
        }

        // Whatever remains is bound by no object: either resolution gave
        // up, or the access is a proven pointer error.
        let unbound_termination = if resolution.incomplete {
            Termination::Early("query timed out (resolve)".into())
        } else {
            Termination::Error {
                kind: ErrorKind::Ptr,
                message: "memory error: out of bound pointer".into(),
            }
        };

        match residual {
            Residual::Consumed => {}
            Residual::Current => {
                if !resolution.incomplete {
                    self.record_bound_violation(state, &violations);
                }
                current_termination = Some(unbound_termination);
            }
            Residual::Owned(owned) => {
                let mut owned = *owned;
                if !resolution.incomplete {
                    self.record_bound_violation(&mut owned, &violations);
                }
                self.settle_sibling(owned, Some(unbound_termination));
            }
        }

        Ok(current_termination)
    }

    /// Performs the access on a state proven (or constrained) to be in
    /// bounds of `binding`.
    fn do_access(
        &mut self,
        state: &mut ExecutionState,
        binding: &Binding,
        address: &ExprRef,
        width: u32,
        write: Option<&ExprRef>,
        dest: Option<RegisterId>,
    ) -> Result<Option<Termination>> {
        let offset = binding.object.offset_expr(&self.builder, address);

        match write {
            Some(value) => {
                if binding.state.read_only() {
                    return Ok(Some(Termination::Error {
                        kind: ErrorKind::ReadOnly,
                        message: "memory error: object read only".into(),
                    }));
                }
                let Some(contents) = state.address_space.get_writeable(&binding.object) else {
                    return Err(Error::UnboundGlobal {
                        global: crate::ir::GlobalId(u32::MAX),
                    }
                    .locate(state.prev_pc));
                };
                if !contents.write(&self.builder, &offset, value) {
                    return Ok(Some(Termination::Error {
                        kind: ErrorKind::ReadOnly,
                        message: "memory error: object read only".into(),
                    }));
                }
            }
            None => {
                // Reads may flush concrete contents into the update list,
                // so they also go through the writeable view.
                let Some(contents) = state.address_space.get_writeable(&binding.object) else {
                    return Err(Error::UnboundGlobal {
                        global: crate::ir::GlobalId(u32::MAX),
                    }
                    .locate(state.prev_pc));
                };
                let value = contents.read(&self.builder, &offset, width);
                if let Some(dest) = dest {
                    self.bind_local(state, dest, value)?;
                }
            }
        }

        Ok(None)
    }

    /// Records the out-of-all-bounds literals at a state's interpolation
    /// node, so later states with a narrower address range are subsumed.
    fn record_bound_violation(&mut self, state: &mut ExecutionState, violations: &[ExprRef]) {
        if violations.is_empty() {
            return;
        }
        if let (Some(node), Some(itree)) = (state.itree_node, self.itree.as_mut()) {
            for violation in violations {
                itree.record_memory_bound(node, violation.clone());
            }
        }
    }

    /// Puts a temporarily owned sibling back, or terminates it.
    fn settle_sibling(&mut self, sibling: ExecutionState, termination: Option<Termination>) {
        match termination {
            Some(termination) => self.finish_with(sibling, termination),
            None => self.put_state(sibling),
        }
    }

    /// Allocates `size` bytes, binding the base address to `dest`.
    pub(crate) fn execute_alloc(
        &mut self,
        state: &mut ExecutionState,
        size: u64,
        is_local: bool,
        dest: RegisterId,
    ) -> Result<()> {
        let (id, address) = self.allocator.allocate(size);
        let name = if is_local {
            format!("alloca_{id}")
        } else {
            format!("malloc_{id}")
        };

        let object = Rc::new(MemoryObject {
            id,
            address,
            size,
            name: name.clone(),
            is_local,
            is_global: false,
            read_only: false,
        });
        let contents = ObjectState::new_zeroed(&name, size, false);
        state.address_space.bind(object.clone(), contents);

        if is_local {
            state
                .stack
                .current_mut()
                .map_err(|e| e.locate(state.prev_pc))?
                .allocas
                .push(object);
        }

        let pointer = self.builder.constant_u64(64, address);
        self.bind_local(state, dest, pointer)
    }

    /// Frees the heap allocation at `address`.
    fn execute_free(
        &mut self,
        state: &mut ExecutionState,
        address: &ExprRef,
    ) -> Result<Option<Termination>> {
        let concrete = match self.to_constant(state, address)? {
            Ok(value) => value.as_u128() as u64,
            Err(termination) => return Ok(Some(termination)),
        };

        if concrete == 0 {
            // Freeing null is a no-op.
            return Ok(None);
        }

        let Some(binding) = state.address_space.find(concrete) else {
            return Ok(Some(Termination::Error {
                kind: ErrorKind::Free,
                message: "memory error: free of unallocated address".into(),
            }));
        };
        let object = binding.object.clone();

        if object.address != concrete || object.is_local || object.is_global {
            return Ok(Some(Termination::Error {
                kind: ErrorKind::Free,
                message: "memory error: invalid free".into(),
            }));
        }

        state.address_space.unbind(&object);
        Ok(None)
    }

    /// Replaces the contents of the object at `address` with fresh
    /// symbolic bytes.
    fn execute_make_symbolic(
        &mut self,
        state: &mut ExecutionState,
        address: &ExprRef,
    ) -> Result<Option<Termination>> {
        let concrete = match self.to_constant(state, address)? {
            Ok(value) => value.as_u128() as u64,
            Err(termination) => return Ok(Some(termination)),
        };

        let Some(binding) = state.address_space.find(concrete) else {
            return Ok(Some(Termination::Error {
                kind: ErrorKind::User,
                message: "make_symbolic of an unallocated address".into(),
            }));
        };
        let object = binding.object.clone();

        let name = format!("{}#{}", object.name, self.next_symbolic);
        self.next_symbolic += 1;

        let contents = ObjectState::new_symbolic(&name, object.size);
        let array = contents.array().clone();
        state.address_space.bind(object.clone(), contents);
        state.symbolics.push((object, array.clone()));

        // Seeded states consume the next seed value for this input.
        self.consume_seed_value(state.id, &array, &name);
        Ok(None)
    }

    /// Creates a fresh symbolic input object of `width` bits, returning
    /// its value; used to bind entry-function parameters.
    pub(crate) fn make_symbolic_input(
        &mut self,
        state: &mut ExecutionState,
        name: &str,
        width: u32,
    ) -> ExprRef {
        let size = u64::from(width.div_ceil(8));
        let (id, address) = self.allocator.allocate(size);
        let object = Rc::new(MemoryObject {
            id,
            address,
            size,
            name: name.to_string(),
            is_local: false,
            is_global: false,
            read_only: false,
        });

        let mut contents = ObjectState::new_symbolic(name, size);
        let array = contents.array().clone();
        let zero = self.builder.constant_u64(64, 0);
        let value = contents.read(&self.builder, &zero, width);

        state.address_space.bind(object.clone(), contents);
        state.symbolics.push((object, array.clone()));
        self.consume_seed_value(state.id, &array, name);

        value
    }

    /// Consumes a seed value for a newly created symbolic input, dropping
    /// seeds the sizing policy cannot reconcile.
    fn consume_seed_value(&mut self, id: StateId, array: &crate::expr::ArrayRef, name: &str) {
        let Some(seeds) = self.seed_map.get_mut(&id) else {
            return;
        };

        let named = self.config.named_seed_matching;
        let extend = self.config.allow_seed_extension;
        let zero_extend = self.config.zero_seed_extension;
        let truncate = self.config.allow_seed_truncation;

        seeds.retain_mut(|seed| {
            seed.consume(array, name, named, extend, zero_extend, truncate)
                .is_some()
        });
        if seeds.is_empty() {
            self.seed_map.remove(&id);
        }
    }

    /// Executes a call to an external function: the engine-interpreted
    /// intrinsics, or the host's native dispatcher.
    pub(crate) fn execute_external(
        &mut self,
        state: &mut ExecutionState,
        name: &str,
        args: &[Operand],
        dest: Option<RegisterId>,
        return_width: u32,
    ) -> Result<Option<Termination>> {
        match name {
            "make_symbolic" => {
                let address = self.eval_first_arg(state, args)?;
                self.execute_make_symbolic(state, &address)
            }
            "assume" => {
                let raw = self.eval_first_arg(state, args)?;
                let condition = if raw.width == 1 {
                    raw
                } else {
                    let zero = self.builder.constant(raw.width, U256::ZERO);
                    self.builder.not_bool(self.builder.equals(zero, raw))
                };

                let constraints: Vec<ExprRef> = state.constraints.constraints().to_vec();
                match self.solver.evaluate(&constraints, &condition) {
                    Ok((crate::solver::Validity::False, _)) => Ok(Some(Termination::Error {
                        kind: ErrorKind::User,
                        message: "invalid assumption: provably false".into(),
                    })),
                    Ok(_) => {
                        self.add_constraint(state, condition)?;
                        Ok(None)
                    }
                    Err(_) => Ok(Some(Termination::Early(
                        "query timed out (assume)".into(),
                    ))),
                }
            }
            "abort" => Ok(Some(Termination::Error {
                kind: ErrorKind::Abort,
                message: "abort called".into(),
            })),
            "assert_fail" => Ok(Some(Termination::Error {
                kind: ErrorKind::Assert,
                message: "assertion failed".into(),
            })),
            "report_error" => Ok(Some(Termination::Error {
                kind: ErrorKind::ReportError,
                message: "error reported by the program".into(),
            })),
            "malloc" => {
                let size = self.eval_first_arg(state, args)?;
                let size = match self.to_constant(state, &size)? {
                    Ok(value) => value.as_u128() as u64,
                    Err(termination) => return Ok(Some(termination)),
                };
                let Some(dest) = dest else {
                    return Ok(None);
                };
                self.execute_alloc(state, size.max(1), false, dest)?;
                Ok(None)
            }
            "free" => {
                let address = self.eval_first_arg(state, args)?;
                self.execute_free(state, &address)
            }
            _ => self.dispatch_native(state, name, args, dest, return_width),
        }
    }

    /// Concretises arguments and invokes the native dispatcher.
    fn dispatch_native(
        &mut self,
        state: &mut ExecutionState,
        name: &str,
        args: &[Operand],
        dest: Option<RegisterId>,
        return_width: u32,
    ) -> Result<Option<Termination>> {
        let mut concrete = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.eval_operand(state, arg)?;
            match self.to_constant(state, &value)? {
                Ok(constant) => concrete.push(constant),
                Err(termination) => return Ok(Some(termination)),
            }
        }

        let Some(dispatcher) = self.external.as_mut() else {
            return Ok(Some(Termination::Error {
                kind: ErrorKind::External,
                message: format!("no dispatcher for external function {name}"),
            }));
        };

        match dispatcher.call(name, &concrete) {
            Ok(Some(returned)) => {
                if let Some(dest) = dest {
                    let value = self.builder.constant(return_width.max(1), returned);
                    self.bind_local(state, dest, value)?;
                }
                Ok(None)
            }
            Ok(None) => Ok(None),
            Err(error) => Ok(Some(Termination::Error {
                kind: ErrorKind::External,
                message: format!("external call to {name} failed: {error}"),
            })),
        }
    }

    /// Evaluates the first argument of an intrinsic call.
    fn eval_first_arg(&self, state: &ExecutionState, args: &[Operand]) -> Result<ExprRef> {
        let Some(first) = args.first() else {
            return Err(Error::UnboundRegister {
                register: RegisterId(u32::MAX),
            }
            .locate(state.prev_pc));
        };
        self.eval_operand(state, first)
    }
}
