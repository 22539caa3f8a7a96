//! This module contains the call stack carried by each execution state.

use crate::{
    constant::MAXIMUM_STACK_FRAMES,
    error::execution::Error,
    expr::ExprRef,
    ir::{BlockId, FunctionId, InstId, RegisterId},
    memory::MemoryObjectRef,
};

/// One frame of a state's call stack.
#[derive(Clone, Debug)]
pub struct CallFrame {
    /// The function this frame executes.
    pub function: FunctionId,

    /// The call site to return to, and the register the return value binds
    /// to there; absent for the entry frame.
    pub return_to: Option<(InstId, Option<RegisterId>)>,

    /// The values bound to the function's virtual registers.
    pub locals: Vec<Option<ExprRef>>,

    /// The stack allocations owned by this frame, unbound from the address
    /// space when the frame pops.
    pub allocas: Vec<MemoryObjectRef>,

    /// Arguments beyond the declared parameters, available to variadic
    /// callees.
    pub varargs: Vec<ExprRef>,

    /// The block control most recently arrived from, consulted by phi
    /// instructions.
    pub incoming_block: Option<BlockId>,
}

impl CallFrame {
    /// Constructs a frame for `function` with `register_count` empty local
    /// cells.
    #[must_use]
    pub fn new(
        function: FunctionId,
        register_count: u32,
        return_to: Option<(InstId, Option<RegisterId>)>,
    ) -> Self {
        Self {
            function,
            return_to,
            locals: vec![None; register_count as usize],
            allocas: Vec::new(),
            varargs: Vec::new(),
            incoming_block: None,
        }
    }

    /// Binds `value` to `register`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the register does not exist in this frame.
    pub fn bind(&mut self, register: RegisterId, value: ExprRef) -> Result<(), Error> {
        let cell = self
            .locals
            .get_mut(register.0 as usize)
            .ok_or(Error::UnboundRegister { register })?;
        *cell = Some(value);
        Ok(())
    }

    /// Reads the value bound to `register`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if nothing has been bound to the register.
    pub fn read(&self, register: RegisterId) -> Result<ExprRef, Error> {
        self.locals
            .get(register.0 as usize)
            .and_then(Clone::clone)
            .ok_or(Error::UnboundRegister { register })
    }
}

/// The call stack of one execution state.
#[derive(Clone, Debug, Default)]
pub struct CallStack {
    frames: Vec<CallFrame>,
}

impl CallStack {
    /// Constructs an empty call stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `frame`, growing the stack.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack is at its depth limit.
    pub fn push(&mut self, frame: CallFrame) -> Result<(), Error> {
        if self.frames.len() + 1 > MAXIMUM_STACK_FRAMES {
            return Err(Error::StackDepthExceeded {
                requested: self.frames.len() + 1,
            });
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Pops the current frame, returning it for alloca unbinding.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack is empty.
    pub fn pop(&mut self) -> Result<CallFrame, Error> {
        self.frames.pop().ok_or(Error::NoSuchFrame)
    }

    /// Gets the executing frame.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack is empty.
    pub fn current(&self) -> Result<&CallFrame, Error> {
        self.frames.last().ok_or(Error::NoSuchFrame)
    }

    /// Gets the executing frame for modification.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack is empty.
    pub fn current_mut(&mut self) -> Result<&mut CallFrame, Error> {
        self.frames.last_mut().ok_or(Error::NoSuchFrame)
    }

    /// Gets the number of frames on the stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Checks whether the stack has no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Iterates over the frames, outermost first.
    pub fn iter(&self) -> impl Iterator<Item = &CallFrame> {
        self.frames.iter()
    }
}

#[cfg(test)]
mod test {
    use super::{CallFrame, CallStack};
    use crate::ir::{FunctionId, RegisterId};

    #[test]
    fn can_push_and_pop_frames() -> anyhow::Result<()> {
        let mut stack = CallStack::new();
        stack
            .push(CallFrame::new(FunctionId(0), 4, None))
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(stack.depth(), 1);

        stack.pop().map_err(|e| anyhow::anyhow!("{e}"))?;
        assert!(stack.is_empty());

        Ok(())
    }

    #[test]
    fn cannot_pop_empty_stack() {
        let mut stack = CallStack::new();
        stack.pop().expect_err("Popped an empty stack");
    }

    #[test]
    fn unbound_registers_cannot_be_read() {
        let frame = CallFrame::new(FunctionId(0), 4, None);
        frame
            .read(RegisterId(2))
            .expect_err("Read an unbound register");
    }
}
