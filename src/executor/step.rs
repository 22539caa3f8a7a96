//! This module contains the instruction dispatcher: one `match` arm per IR
//! opcode, orchestrating the expression algebra, the fork machinery, and
//! the memory model.

use ethnum::U256;

use crate::{
    constant::FUNCTION_POINTER_BASE,
    error::{
        container::Locatable,
        execution::{Error, Result},
        ErrorKind,
    },
    expr::ExprRef,
    ir::{
        BinOp,
        BlockId,
        Callee,
        CastOp,
        CmpOp,
        FBinOp,
        FCmpOp,
        FunctionId,
        GepIndex,
        InstId,
        Instruction,
        Operand,
        RegisterId,
    },
    solver::Solver,
    state::{CallFrame, ExecutionState},
};

use super::{fork::ForkOutcome, Executor, Termination};

/// The outcome of concretising an expression: either its value, or the
/// termination the failed attempt imposes on the state.
pub(crate) type Concretized = std::result::Result<U256, Termination>;

impl Executor {
    /// Executes one instruction of `state`.
    ///
    /// Returns the termination the instruction imposed on the state, if
    /// any.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] on internal engine faults; program-level failures
    /// are terminations, not errors.
    pub(crate) fn step_state(
        &mut self,
        state: &mut ExecutionState,
    ) -> Result<Option<Termination>> {
        let module = self.module.clone();
        let Some(instruction) = module.instruction(state.pc) else {
            let available = module
                .function(state.pc.function)
                .map_or(0, |f| f.instructions.len());
            return Err(Error::InstructionOutOfBounds {
                requested: state.pc.index as usize,
                available,
            }
            .locate(state.pc));
        };

        state.prev_pc = state.pc;
        state.pc = InstId {
            function: state.pc.function,
            index: state.pc.index + 1,
        };
        state.steps += 1;
        self.stats.instructions += 1;
        if let (Some(node), Some(itree)) = (state.itree_node, self.itree.as_mut()) {
            itree.step(node);
        }

        self.execute_instruction(state, instruction)
    }

    /// Dispatches on the instruction kind.
    fn execute_instruction(
        &mut self,
        state: &mut ExecutionState,
        instruction: &Instruction,
    ) -> Result<Option<Termination>> {
        match instruction {
            Instruction::Ret { value } => self.execute_ret(state, value.as_ref()),
            Instruction::Jump { target } => {
                self.transfer(state, state.prev_pc.function, *target)?;
                Ok(None)
            }
            Instruction::Br {
                cond,
                then_target,
                else_target,
            } => self.execute_br(state, cond, *then_target, *else_target),
            Instruction::Switch { on, default, arms } => {
                self.execute_switch(state, on, *default, arms)
            }
            Instruction::Call {
                callee,
                args,
                dest,
                return_type,
            } => self.execute_call(state, callee, args, *dest, return_type.width_bits()),
            Instruction::Phi { dest, incoming } => {
                let from = state
                    .stack
                    .current()
                    .map_err(|e| e.locate(state.prev_pc))?
                    .incoming_block;
                let Some(from) = from else {
                    return Err(Error::MissingPhiIncoming.locate(state.prev_pc));
                };
                let Some((_, operand)) = incoming.iter().find(|(block, _)| *block == from)
                else {
                    return Err(Error::MissingPhiIncoming.locate(state.prev_pc));
                };
                let value = self.eval_operand(state, operand)?;
                self.bind_local(state, *dest, value)?;
                Ok(None)
            }
            Instruction::Select {
                dest,
                cond,
                on_true,
                on_false,
            } => {
                let cond = self.eval_condition(state, cond)?;
                let on_true = self.eval_operand(state, on_true)?;
                let on_false = self.eval_operand(state, on_false)?;
                let width = on_true.width.max(on_false.width);
                let on_true = self.coerce(on_true, width);
                let on_false = self.coerce(on_false, width);
                let value = self.builder.select(cond, on_true, on_false);
                self.bind_local(state, *dest, value)?;
                Ok(None)
            }
            Instruction::Alloca { dest, ty, count } => {
                let count = self.eval_operand(state, count)?;
                let count = match self.to_constant(state, &count)? {
                    Ok(value) => value.as_u128() as u64,
                    Err(termination) => return Ok(Some(termination)),
                };
                let size = ty.store_size().saturating_mul(count).max(1);
                self.execute_alloc(state, size, true, *dest)?;
                Ok(None)
            }
            Instruction::Load { dest, addr, ty } => {
                let address = self.eval_operand(state, addr)?;
                let address = self.coerce(address, 64);
                self.execute_memory_operation(state, None, address, ty.width_bits(), Some(*dest))
            }
            Instruction::Store { addr, value } => {
                let address = self.eval_operand(state, addr)?;
                let address = self.coerce(address, 64);
                let value = self.eval_operand(state, value)?;
                self.execute_memory_operation(state, Some(value.clone()), address, value.width, None)
            }
            Instruction::Gep {
                dest,
                base,
                offset,
                indices,
            } => {
                let value = self.execute_gep(state, base, *offset, indices)?;
                self.bind_local(state, *dest, value)?;
                Ok(None)
            }
            Instruction::BinOp {
                dest,
                op,
                lhs,
                rhs,
                width,
            } => {
                let lhs = self.eval_width(state, lhs, *width)?;
                let rhs = self.eval_width(state, rhs, *width)?;
                let op = binary_of(*op);
                let value = self.builder.binary(op, lhs, rhs);
                self.bind_local(state, *dest, value)?;
                Ok(None)
            }
            Instruction::Cmp {
                dest,
                op,
                lhs,
                rhs,
                width,
            } => {
                let lhs = self.eval_width(state, lhs, *width)?;
                let rhs = self.eval_width(state, rhs, *width)?;
                let value = self.execute_cmp(*op, lhs, rhs);
                self.bind_local(state, *dest, value)?;
                Ok(None)
            }
            Instruction::FBinOp {
                dest,
                op,
                lhs,
                rhs,
                width,
            } => self.execute_fbinop(state, *dest, *op, lhs, rhs, *width),
            Instruction::FCmp {
                dest,
                op,
                lhs,
                rhs,
                width,
            } => self.execute_fcmp(state, *dest, *op, lhs, rhs, *width),
            Instruction::Cast {
                dest,
                op,
                value,
                from,
                to,
            } => self.execute_cast(state, *dest, *op, value, *from, *to),
            Instruction::ExtractValue {
                dest,
                aggregate,
                offset,
                width,
            } => {
                let aggregate = self.eval_operand(state, aggregate)?;
                let bit_offset = u32::try_from(offset * 8).unwrap_or(u32::MAX);
                let value = self.builder.extract(aggregate, bit_offset, *width);
                self.bind_local(state, *dest, value)?;
                Ok(None)
            }
            Instruction::InsertValue {
                dest,
                aggregate,
                element,
                offset,
                width,
            } => {
                let aggregate = self.eval_operand(state, aggregate)?;
                let element = self.eval_operand(state, element)?;
                let element = self.coerce(element, *width);
                let value = self.execute_insert_value(aggregate, element, *offset);
                self.bind_local(state, *dest, value)?;
                Ok(None)
            }
            Instruction::Unreachable => Ok(Some(Termination::Error {
                kind: ErrorKind::Exec,
                message: "reached an unreachable instruction".into(),
            })),
        }
    }

    /// Evaluates an operand to its expression.
    pub(crate) fn eval_operand(
        &self,
        state: &ExecutionState,
        operand: &Operand,
    ) -> Result<ExprRef> {
        match operand {
            Operand::Register(register) => state
                .stack
                .current()
                .and_then(|frame| frame.read(*register))
                .map_err(|e| e.locate(state.prev_pc)),
            Operand::Constant { width, value } => Ok(self.builder.constant(*width, *value)),
            Operand::Global(global) => {
                let object = self
                    .globals
                    .get(global)
                    .ok_or_else(|| Error::UnboundGlobal { global: *global }.locate(state.prev_pc))?;
                Ok(self.builder.constant_u64(64, object.address))
            }
            Operand::Function(function) => Ok(self
                .builder
                .constant_u64(64, FUNCTION_POINTER_BASE | u64::from(function.0))),
        }
    }

    /// Evaluates an operand and coerces it to `width` bits.
    fn eval_width(
        &self,
        state: &ExecutionState,
        operand: &Operand,
        width: u32,
    ) -> Result<ExprRef> {
        let value = self.eval_operand(state, operand)?;
        Ok(self.coerce(value, width))
    }

    /// Evaluates an operand as a width-1 branch condition.
    fn eval_condition(&self, state: &ExecutionState, operand: &Operand) -> Result<ExprRef> {
        let value = self.eval_operand(state, operand)?;
        if value.width == 1 {
            Ok(value)
        } else {
            let zero = self.builder.constant(value.width, U256::ZERO);
            Ok(self
                .builder
                .not_bool(self.builder.equals(zero, value)))
        }
    }

    /// Coerces `value` to exactly `width` bits by truncation or zero
    /// extension.
    pub(crate) fn coerce(&self, value: ExprRef, width: u32) -> ExprRef {
        if value.width == width {
            value
        } else if value.width > width {
            self.builder.extract(value, 0, width)
        } else {
            self.builder.zext(value, width)
        }
    }

    /// Binds `value` to `register` of the current frame.
    pub(crate) fn bind_local(
        &self,
        state: &mut ExecutionState,
        register: RegisterId,
        value: ExprRef,
    ) -> Result<()> {
        state
            .stack
            .current_mut()
            .and_then(|frame| frame.bind(register, value))
            .map_err(|e| e.locate(state.prev_pc))
    }

    /// Transfers control of `state` to the entry of `target`, recording
    /// the block it came from for phi resolution.
    pub(crate) fn transfer(
        &self,
        state: &mut ExecutionState,
        function: FunctionId,
        target: BlockId,
    ) -> Result<()> {
        let module = self.module.clone();
        let Some(func) = module.function(function) else {
            return Err(Error::NoSuchFunction { function }.locate(state.prev_pc));
        };
        let Some(entry) = func.block_entry(target) else {
            return Err(Error::NoSuchBlock {
                function,
                block: target,
            }
            .locate(state.prev_pc));
        };

        let from = func.block_of(state.prev_pc.index);
        state
            .stack
            .current_mut()
            .map_err(|e| e.locate(state.prev_pc))?
            .incoming_block = from;
        state.pc = InstId {
            function,
            index: entry,
        };

        Ok(())
    }

    /// Concretises `value` to a constant, pinning the choice into the path
    /// condition.
    pub(crate) fn to_constant(
        &mut self,
        state: &mut ExecutionState,
        value: &ExprRef,
    ) -> Result<Concretized> {
        if let Some(constant) = value.as_constant() {
            return Ok(Ok(constant));
        }

        let constraints: Vec<ExprRef> = state.constraints.constraints().to_vec();
        match self.solver.get_value(&constraints, value) {
            Ok(constant) => {
                let pinned = self
                    .builder
                    .equals(self.builder.constant(value.width, constant), value.clone());
                self.add_constraint(state, pinned)?;
                Ok(Ok(constant))
            }
            Err(_) => Ok(Err(Termination::Early(
                "query timed out (concretisation)".into(),
            ))),
        }
    }

    /// Executes a return instruction.
    fn execute_ret(
        &mut self,
        state: &mut ExecutionState,
        value: Option<&Operand>,
    ) -> Result<Option<Termination>> {
        let returned = value
            .map(|operand| self.eval_operand(state, operand))
            .transpose()?;

        let frame = state
            .stack
            .pop()
            .map_err(|e| e.locate(state.prev_pc))?;
        for alloca in &frame.allocas {
            state.address_space.unbind(alloca);
        }

        let Some((call_site, dest)) = frame.return_to else {
            // Returning from the entry function ends the path.
            return Ok(Some(Termination::Exit));
        };

        if let (Some(dest), Some(returned)) = (dest, returned) {
            self.bind_local(state, dest, returned)?;
        }

        state.pc = InstId {
            function: call_site.function,
            index: call_site.index + 1,
        };
        Ok(None)
    }

    /// Executes a conditional branch through the fork machinery.
    fn execute_br(
        &mut self,
        state: &mut ExecutionState,
        cond: &Operand,
        then_target: BlockId,
        else_target: BlockId,
    ) -> Result<Option<Termination>> {
        let function = state.prev_pc.function;
        let condition = self.eval_condition(state, cond)?;

        match self.branch_fork(state, condition)? {
            ForkOutcome::TakeTrue => {
                self.transfer(state, function, then_target)?;
                Ok(None)
            }
            ForkOutcome::TakeFalse => {
                self.transfer(state, function, else_target)?;
                Ok(None)
            }
            ForkOutcome::Fork {
                other,
                current_is_true,
            } => {
                let (current_target, other_target) = if current_is_true {
                    (then_target, else_target)
                } else {
                    (else_target, then_target)
                };
                self.transfer(state, function, current_target)?;

                if let Some(mut sibling) = self.states.remove(&other) {
                    self.transfer(&mut sibling, function, other_target)?;
                    self.states.insert(other, sibling);
                }
                Ok(None)
            }
            ForkOutcome::Terminated(termination) => Ok(Some(termination)),
        }
    }

    /// Executes a switch by constraining one sibling per feasible target.
    fn execute_switch(
        &mut self,
        state: &mut ExecutionState,
        on: &Operand,
        default: BlockId,
        arms: &[(U256, BlockId)],
    ) -> Result<Option<Termination>> {
        let function = state.prev_pc.function;
        let on = self.eval_operand(state, on)?;

        if let Some(value) = on.as_constant() {
            let target = arms
                .iter()
                .find(|(arm, _)| *arm == value)
                .map_or(default, |(_, target)| *target);
            self.transfer(state, function, target)?;
            return Ok(None);
        }

        // Merge arms per target, then build the default as the negation of
        // every arm condition.
        let mut target_conditions: Vec<(BlockId, ExprRef)> = Vec::new();
        let mut not_any = self.builder.bool_true();
        for (value, target) in arms {
            let arm = self
                .builder
                .equals(self.builder.constant(on.width, *value), on.clone());
            not_any = self
                .builder
                .and_bool(not_any, self.builder.not_bool(arm.clone()));

            match target_conditions.iter_mut().find(|(t, _)| t == target) {
                Some((_, existing)) => {
                    *existing = self.builder.binary(
                        crate::expr::BinaryOp::Or,
                        existing.clone(),
                        arm,
                    );
                }
                None => target_conditions.push((*target, arm)),
            }
        }
        target_conditions.push((default, not_any));

        // Keep only the feasible targets.
        let constraints: Vec<ExprRef> = state.constraints.constraints().to_vec();
        let mut feasible: Vec<(BlockId, ExprRef)> = Vec::new();
        for (target, condition) in target_conditions {
            match self.solver.may_be_true(&constraints, &condition) {
                Ok(true) => feasible.push((target, condition)),
                Ok(false) => {}
                Err(_) => {
                    state.pc = state.prev_pc;
                    return Ok(Some(Termination::Early("query timed out (switch)".into())));
                }
            }
        }

        let Some((first_target, first_condition)) = feasible.first().cloned() else {
            return Err(Error::InvalidConstraint.locate(state.prev_pc));
        };

        if feasible.len() == 1 {
            self.add_constraint(state, first_condition)?;
            self.transfer(state, function, first_target)?;
            return Ok(None);
        }

        let siblings = self.branch_many(state, feasible.len() - 1);
        self.add_constraint(state, first_condition)?;
        self.transfer(state, function, first_target)?;

        for (sibling, (target, condition)) in siblings.into_iter().zip(feasible.into_iter().skip(1))
        {
            if let Some(mut other) = self.states.remove(&sibling) {
                self.add_constraint_of(&mut other, condition)?;
                self.transfer(&mut other, function, target)?;
                self.states.insert(sibling, other);
            }
        }

        Ok(None)
    }

    /// Splits `state` into `count` additional siblings, attaching each to
    /// both trees. The callers install the distinguishing constraints.
    fn branch_many(&mut self, state: &mut ExecutionState, count: usize) -> Vec<crate::state::StateId> {
        let mut siblings = Vec::with_capacity(count);

        for _ in 0..count {
            self.stats.forks += 1;
            *self.fork_counts.entry(state.prev_pc).or_insert(0) += 1;

            let sibling_id = self.fresh_state_id();
            let mut sibling = state.branch(sibling_id);

            let ptree = self.ptree.as_mut().expect("Forks require the tree");
            let (left, right) = ptree.split(state.ptree_node, sibling_id, state.id);
            sibling.ptree_node = left;
            state.ptree_node = right;

            if let (Some(node), Some(itree)) = (state.itree_node, self.itree.as_mut()) {
                let current_block = self.module.point_of(state.prev_pc);
                let (left, right) = itree.split(node, current_block);
                sibling.itree_node = Some(left);
                state.itree_node = Some(right);
            }

            self.register_sibling(sibling);
            siblings.push(sibling_id);
        }

        siblings
    }

    /// Executes a call instruction.
    fn execute_call(
        &mut self,
        state: &mut ExecutionState,
        callee: &Callee,
        args: &[Operand],
        dest: Option<RegisterId>,
        return_width: u32,
    ) -> Result<Option<Termination>> {
        match callee {
            Callee::Function(function) => {
                let arguments = args
                    .iter()
                    .map(|a| self.eval_operand(state, a))
                    .collect::<Result<Vec<_>>>()?;
                self.enter_function(state, *function, arguments, dest)
            }
            Callee::Indirect(operand) => {
                let target = self.eval_operand(state, operand)?;
                let target = match self.to_constant(state, &target)? {
                    Ok(value) => value.as_u128() as u64,
                    Err(termination) => return Ok(Some(termination)),
                };
                if target & FUNCTION_POINTER_BASE != FUNCTION_POINTER_BASE {
                    return Ok(Some(Termination::Error {
                        kind: ErrorKind::Exec,
                        message: "indirect call to a non-function value".into(),
                    }));
                }
                let function =
                    FunctionId(u32::try_from(target & !FUNCTION_POINTER_BASE).unwrap_or(u32::MAX));
                let arguments = args
                    .iter()
                    .map(|a| self.eval_operand(state, a))
                    .collect::<Result<Vec<_>>>()?;
                self.enter_function(state, function, arguments, dest)
            }
            Callee::External(name) => {
                self.execute_external(state, name, args, dest, return_width)
            }
        }
    }

    /// Pushes a frame for `function` and transfers control to its entry.
    fn enter_function(
        &mut self,
        state: &mut ExecutionState,
        function: FunctionId,
        arguments: Vec<ExprRef>,
        dest: Option<RegisterId>,
    ) -> Result<Option<Termination>> {
        let module = self.module.clone();
        let Some(func) = module.function(function) else {
            return Err(Error::NoSuchFunction { function }.locate(state.prev_pc));
        };

        let mut frame = CallFrame::new(
            function,
            func.register_count,
            Some((state.prev_pc, dest)),
        );

        for (index, argument) in arguments.into_iter().enumerate() {
            if let Some(width) = func.param_widths.get(index) {
                let value = self.coerce(argument, *width);
                frame
                    .bind(
                        RegisterId(u32::try_from(index).unwrap_or(u32::MAX)),
                        value,
                    )
                    .map_err(|e| e.locate(state.prev_pc))?;
            } else {
                frame.varargs.push(argument);
            }
        }

        state
            .stack
            .push(frame)
            .map_err(|e| e.locate(state.prev_pc))?;
        state.pc = InstId {
            function,
            index: func.blocks[0].entry,
        };

        Ok(None)
    }

    /// Executes an integer comparison.
    fn execute_cmp(&self, op: CmpOp, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        match op {
            CmpOp::Eq => self.builder.equals(lhs, rhs),
            CmpOp::Ne => self.builder.compare(crate::expr::CompareOp::Ne, lhs, rhs),
            CmpOp::Ult => self.builder.ult(lhs, rhs),
            CmpOp::Ule => self.builder.ule(lhs, rhs),
            CmpOp::Ugt => self.builder.ugt(lhs, rhs),
            CmpOp::Uge => self.builder.uge(lhs, rhs),
            CmpOp::Slt => self.builder.slt(lhs, rhs),
            CmpOp::Sle => self.builder.sle(lhs, rhs),
            CmpOp::Sgt => self.builder.sgt(lhs, rhs),
            CmpOp::Sge => self.builder.sge(lhs, rhs),
        }
    }

    /// Executes an address computation.
    fn execute_gep(
        &mut self,
        state: &mut ExecutionState,
        base: &Operand,
        offset: u64,
        indices: &[GepIndex],
    ) -> Result<ExprRef> {
        let base = self.eval_operand(state, base)?;
        let mut address = self.coerce(base, 64);

        if offset != 0 {
            address = self
                .builder
                .add(address, self.builder.constant_u64(64, offset));
        }

        for index in indices {
            let value = self.eval_operand(state, &index.index)?;
            // Address indices are sign-extended to the pointer width.
            let value = if value.width < 64 {
                self.builder.sext(value, 64)
            } else {
                self.coerce(value, 64)
            };
            let scaled = self
                .builder
                .mul(value, self.builder.constant_u64(64, index.scale));
            address = self.builder.add(address, scaled);
        }

        Ok(address)
    }

    /// Rewrites `width` bits at byte `offset` of `aggregate` with
    /// `element`.
    fn execute_insert_value(
        &self,
        aggregate: ExprRef,
        element: ExprRef,
        offset: u64,
    ) -> ExprRef {
        let bit_offset = u32::try_from(offset * 8).unwrap_or(u32::MAX);
        let total = aggregate.width;
        let element_width = element.width;

        let mut result = element;
        if bit_offset > 0 {
            let low = self.builder.extract(aggregate.clone(), 0, bit_offset);
            result = self.builder.concat(result, low);
        }
        let used = bit_offset + element_width;
        if used < total {
            let high = self.builder.extract(aggregate, used, total - used);
            result = self.builder.concat(high, result);
        }

        result
    }

    /// Executes a floating-point binary operation by concretising both
    /// operands.
    fn execute_fbinop(
        &mut self,
        state: &mut ExecutionState,
        dest: RegisterId,
        op: FBinOp,
        lhs: &Operand,
        rhs: &Operand,
        width: u32,
    ) -> Result<Option<Termination>> {
        let lhs = self.eval_width(state, lhs, width)?;
        let rhs = self.eval_width(state, rhs, width)?;

        let lhs = match self.to_constant(state, &lhs)? {
            Ok(value) => value,
            Err(termination) => return Ok(Some(termination)),
        };
        let rhs = match self.to_constant(state, &rhs)? {
            Ok(value) => value,
            Err(termination) => return Ok(Some(termination)),
        };

        let bits = match width {
            32 => {
                let l = f32::from_bits(lhs.as_u32());
                let r = f32::from_bits(rhs.as_u32());
                let result = match op {
                    FBinOp::FAdd => l + r,
                    FBinOp::FSub => l - r,
                    FBinOp::FMul => l * r,
                    FBinOp::FDiv => l / r,
                    FBinOp::FRem => l % r,
                };
                u64::from(result.to_bits())
            }
            64 => {
                let l = f64::from_bits(lhs.as_u64());
                let r = f64::from_bits(rhs.as_u64());
                let result = match op {
                    FBinOp::FAdd => l + r,
                    FBinOp::FSub => l - r,
                    FBinOp::FMul => l * r,
                    FBinOp::FDiv => l / r,
                    FBinOp::FRem => l % r,
                };
                result.to_bits()
            }
            _ => {
                return Ok(Some(Termination::Error {
                    kind: ErrorKind::Unhandled,
                    message: format!("unsupported floating point width {width}"),
                }))
            }
        };

        let value = self.builder.constant_u64(width, bits);
        self.bind_local(state, dest, value)?;
        Ok(None)
    }

    /// Executes a floating-point comparison by concretising both operands.
    fn execute_fcmp(
        &mut self,
        state: &mut ExecutionState,
        dest: RegisterId,
        op: FCmpOp,
        lhs: &Operand,
        rhs: &Operand,
        width: u32,
    ) -> Result<Option<Termination>> {
        let lhs = self.eval_width(state, lhs, width)?;
        let rhs = self.eval_width(state, rhs, width)?;

        let lhs = match self.to_constant(state, &lhs)? {
            Ok(value) => value,
            Err(termination) => return Ok(Some(termination)),
        };
        let rhs = match self.to_constant(state, &rhs)? {
            Ok(value) => value,
            Err(termination) => return Ok(Some(termination)),
        };

        let result = match width {
            32 => compare_floats(
                f64::from(f32::from_bits(lhs.as_u32())),
                f64::from(f32::from_bits(rhs.as_u32())),
                op,
            ),
            64 => compare_floats(f64::from_bits(lhs.as_u64()), f64::from_bits(rhs.as_u64()), op),
            _ => {
                return Ok(Some(Termination::Error {
                    kind: ErrorKind::Unhandled,
                    message: format!("unsupported floating point width {width}"),
                }))
            }
        };

        let value = self.builder.bool(result);
        self.bind_local(state, dest, value)?;
        Ok(None)
    }

    /// Executes a value conversion.
    fn execute_cast(
        &mut self,
        state: &mut ExecutionState,
        dest: RegisterId,
        op: CastOp,
        operand: &Operand,
        from: u32,
        to: u32,
    ) -> Result<Option<Termination>> {
        let value = self.eval_operand(state, operand)?;
        let value = self.coerce(value, from);

        let result = match op {
            CastOp::Trunc => self.builder.extract(value, 0, to),
            CastOp::ZExt | CastOp::PtrToInt | CastOp::IntToPtr => self.coerce(value, to),
            CastOp::SExt => self.builder.sext(value, to),
            CastOp::Bitcast => self.coerce(value, to),
            CastOp::SiToFp | CastOp::UiToFp => {
                let constant = match self.to_constant(state, &value)? {
                    Ok(v) => v,
                    Err(termination) => return Ok(Some(termination)),
                };
                let signed = op == CastOp::SiToFp;
                let numeric = if signed {
                    let extended = crate::expr::sign_extend(constant, from);
                    extended.as_i128() as f64
                } else {
                    constant.as_u128() as f64
                };
                let bits = match to {
                    32 => u64::from((numeric as f32).to_bits()),
                    64 => numeric.to_bits(),
                    _ => {
                        return Ok(Some(Termination::Error {
                            kind: ErrorKind::Unhandled,
                            message: format!("unsupported floating point width {to}"),
                        }))
                    }
                };
                self.builder.constant_u64(to, bits)
            }
            CastOp::FpToSi | CastOp::FpToUi => {
                let constant = match self.to_constant(state, &value)? {
                    Ok(v) => v,
                    Err(termination) => return Ok(Some(termination)),
                };
                let numeric = match from {
                    32 => f64::from(f32::from_bits(constant.as_u32())),
                    64 => f64::from_bits(constant.as_u64()),
                    _ => {
                        return Ok(Some(Termination::Error {
                            kind: ErrorKind::Unhandled,
                            message: format!("unsupported floating point width {from}"),
                        }))
                    }
                };
                let integral = if op == CastOp::FpToSi {
                    U256::from(numeric as i64 as u64)
                } else {
                    U256::from(numeric as u64)
                };
                self.builder.constant(to, integral)
            }
            CastOp::FpTrunc | CastOp::FpExt => {
                let constant = match self.to_constant(state, &value)? {
                    Ok(v) => v,
                    Err(termination) => return Ok(Some(termination)),
                };
                let numeric = match from {
                    32 => f64::from(f32::from_bits(constant.as_u32())),
                    64 => f64::from_bits(constant.as_u64()),
                    _ => {
                        return Ok(Some(Termination::Error {
                            kind: ErrorKind::Unhandled,
                            message: format!("unsupported floating point width {from}"),
                        }))
                    }
                };
                let bits = match to {
                    32 => u64::from((numeric as f32).to_bits()),
                    64 => numeric.to_bits(),
                    _ => {
                        return Ok(Some(Termination::Error {
                            kind: ErrorKind::Unhandled,
                            message: format!("unsupported floating point width {to}"),
                        }))
                    }
                };
                self.builder.constant_u64(to, bits)
            }
        };

        self.bind_local(state, dest, result)?;
        Ok(None)
    }
}

/// Maps the IR's binary operation onto the algebra's.
fn binary_of(op: BinOp) -> crate::expr::BinaryOp {
    match op {
        BinOp::Add => crate::expr::BinaryOp::Add,
        BinOp::Sub => crate::expr::BinaryOp::Sub,
        BinOp::Mul => crate::expr::BinaryOp::Mul,
        BinOp::UDiv => crate::expr::BinaryOp::UDiv,
        BinOp::SDiv => crate::expr::BinaryOp::SDiv,
        BinOp::URem => crate::expr::BinaryOp::URem,
        BinOp::SRem => crate::expr::BinaryOp::SRem,
        BinOp::And => crate::expr::BinaryOp::And,
        BinOp::Or => crate::expr::BinaryOp::Or,
        BinOp::Xor => crate::expr::BinaryOp::Xor,
        BinOp::Shl => crate::expr::BinaryOp::Shl,
        BinOp::LShr => crate::expr::BinaryOp::LShr,
        BinOp::AShr => crate::expr::BinaryOp::AShr,
    }
}

/// Applies an ordered floating-point comparison.
fn compare_floats(lhs: f64, rhs: f64, op: FCmpOp) -> bool {
    if lhs.is_nan() || rhs.is_nan() {
        return false;
    }
    match op {
        FCmpOp::Oeq => lhs == rhs,
        FCmpOp::One => lhs != rhs,
        FCmpOp::Olt => lhs < rhs,
        FCmpOp::Ole => lhs <= rhs,
        FCmpOp::Ogt => lhs > rhs,
        FCmpOp::Oge => lhs >= rhs,
    }
}
