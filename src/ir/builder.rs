//! This module contains the programmatic construction API for
//! [`crate::ir::Module`]s.
//!
//! External loaders and the test suite both go through this API: it is the
//! single place where block structure, register arity, and branch targets
//! are validated, so anything that survives [`ModuleBuilder::add_function`]
//! is safe for the engine to execute without re-checking.

use crate::{
    error::{
        container::Locatable,
        ir::{Error, Result},
    },
    ir::{
        instruction::{Callee, Instruction, Operand},
        BasicBlock,
        BlockId,
        Function,
        FunctionId,
        Global,
        GlobalId,
        InstId,
        Module,
        RegisterId,
    },
};

/// A builder for one function of a module.
///
/// Blocks are created up front with [`Self::block`] and filled in any
/// order, which makes forward branches straightforward to express.
#[derive(Clone, Debug)]
pub struct FunctionBuilder {
    name: String,
    param_widths: Vec<u32>,
    next_register: u32,
    blocks: Vec<Vec<Instruction>>,
}

impl FunctionBuilder {
    /// Constructs a builder for a function called `name` whose parameters
    /// have the provided bit-widths.
    ///
    /// Parameters are bound to registers `0..param_widths.len()` at call
    /// time. The entry block is created eagerly as block zero.
    #[must_use]
    pub fn new(name: impl Into<String>, param_widths: Vec<u32>) -> Self {
        let name = name.into();
        let next_register = u32::try_from(param_widths.len()).unwrap_or(u32::MAX);
        let blocks = vec![Vec::new()];
        Self {
            name,
            param_widths,
            next_register,
            blocks,
        }
    }

    /// Gets the register holding the parameter at `index`.
    #[must_use]
    pub fn param(&self, index: u32) -> RegisterId {
        RegisterId(index)
    }

    /// Allocates a fresh virtual register.
    pub fn reg(&mut self) -> RegisterId {
        let id = RegisterId(self.next_register);
        self.next_register += 1;
        id
    }

    /// Gets the entry block of the function.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    /// Creates a new, empty basic block.
    pub fn block(&mut self) -> BlockId {
        let id = BlockId(u32::try_from(self.blocks.len()).unwrap_or(u32::MAX));
        self.blocks.push(Vec::new());
        id
    }

    /// Appends `inst` to the end of `block`.
    ///
    /// # Panics
    ///
    /// Panics if `block` was not created by this builder. This is a
    /// programmer bug.
    pub fn push(&mut self, block: BlockId, inst: Instruction) {
        self.blocks
            .get_mut(block.0 as usize)
            .unwrap_or_else(|| panic!("Block {block:?} does not belong to this builder"))
            .push(inst);
    }

    /// Flattens the builder into a [`Function`].
    ///
    /// Validation happens when the function is added to a module, as only
    /// the module knows the function's identity.
    #[must_use]
    pub fn build(self) -> Function {
        let mut instructions = Vec::new();
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for block in self.blocks {
            let entry = u32::try_from(instructions.len()).unwrap_or(u32::MAX);
            let len = u32::try_from(block.len()).unwrap_or(u32::MAX);
            blocks.push(BasicBlock { entry, len });
            instructions.extend(block);
        }

        let param_count = u32::try_from(self.param_widths.len()).unwrap_or(u32::MAX);
        Function {
            name: self.name,
            param_count,
            param_widths: self.param_widths,
            register_count: self.next_register,
            instructions,
            blocks,
        }
    }
}

/// A builder for a [`Module`].
#[derive(Clone, Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    /// Constructs a builder holding an empty module.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a global variable to the module.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a global of the same name exists, or if the
    /// initializer does not match the declared size.
    pub fn add_global(
        &mut self,
        name: impl Into<String>,
        size: u64,
        read_only: bool,
        initializer: Option<Vec<u8>>,
    ) -> Result<GlobalId> {
        let name = name.into();
        let location = InstId {
            function: FunctionId(u32::MAX),
            index: 0,
        };

        if self.module.globals.iter().any(|g| g.name == name) {
            return Err(Error::DuplicateGlobal { name }.locate(location));
        }
        if let Some(init) = &initializer {
            let actual = u64::try_from(init.len()).unwrap_or(u64::MAX);
            if actual != size {
                return Err(Error::InitializerSizeMismatch {
                    declared: size,
                    actual,
                }
                .locate(location));
            }
        }

        let id = GlobalId(u32::try_from(self.module.globals.len()).unwrap_or(u32::MAX));
        self.module.globals.push(Global {
            name,
            size,
            read_only,
            initializer,
        });
        Ok(id)
    }

    /// Validates `function` and adds it to the module.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the function is structurally invalid: duplicate
    /// name, empty function, empty or unterminated blocks, terminators
    /// before the end of a block, branch targets that do not exist, or
    /// registers outside the declared count.
    pub fn add_function(&mut self, function: Function) -> Result<FunctionId> {
        let id = FunctionId(u32::try_from(self.module.functions.len()).unwrap_or(u32::MAX));
        let head = InstId {
            function: id,
            index: 0,
        };

        if self.module.functions.iter().any(|f| f.name == function.name) {
            return Err(Error::DuplicateFunction {
                name: function.name,
            }
            .locate(head));
        }
        if function.blocks.is_empty() {
            return Err(Error::EmptyFunction {
                name: function.name,
            }
            .locate(head));
        }

        self.validate_blocks(id, &function)?;
        self.validate_operands(id, &function)?;

        self.module.functions.push(function);
        Ok(id)
    }

    /// Consumes the builder, producing the finished module.
    #[must_use]
    pub fn build(self) -> Module {
        self.module
    }

    /// Checks the block structure of `function`.
    fn validate_blocks(&self, id: FunctionId, function: &Function) -> Result<()> {
        let block_count = u32::try_from(function.blocks.len()).unwrap_or(u32::MAX);

        for (index, block) in function.blocks.iter().enumerate() {
            let block_no = u32::try_from(index).unwrap_or(u32::MAX);
            let location = InstId {
                function: id,
                index: block.entry,
            };

            if block.len == 0 {
                return Err(Error::EmptyBlock { block: block_no }.locate(location));
            }

            let range = block.entry..block.entry + block.len;
            for i in range.clone() {
                let inst = &function.instructions[i as usize];
                let is_last = i + 1 == block.entry + block.len;
                let at = InstId {
                    function: id,
                    index: i,
                };

                if inst.is_terminator() && !is_last {
                    return Err(Error::TerminatorNotLast { block: block_no }.locate(at));
                }
                if is_last && !inst.is_terminator() {
                    return Err(Error::UnterminatedBlock { block: block_no }.locate(at));
                }

                for target in Self::targets_of(inst) {
                    if target.0 >= block_count {
                        return Err(Error::NoSuchTarget { target: target.0 }.locate(at));
                    }
                }
            }
        }

        Ok(())
    }

    /// Checks that every register mentioned by `function` is within its
    /// declared register count.
    fn validate_operands(&self, id: FunctionId, function: &Function) -> Result<()> {
        let count = function.register_count;

        for (index, inst) in function.instructions.iter().enumerate() {
            let at = InstId {
                function: id,
                index: u32::try_from(index).unwrap_or(u32::MAX),
            };

            let mut check = |r: RegisterId| {
                if r.0 >= count {
                    Err(Error::RegisterOutOfRange {
                        register: r.0,
                        count,
                    }
                    .locate(at))
                } else {
                    Ok(())
                }
            };

            if let Some(dest) = inst.dest() {
                check(dest)?;
            }
            for source in inst.sources() {
                check(source)?;
            }
        }

        Ok(())
    }

    /// Gets the block targets mentioned by `inst`.
    fn targets_of(inst: &Instruction) -> Vec<BlockId> {
        match inst {
            Instruction::Jump { target } => vec![*target],
            Instruction::Br {
                then_target,
                else_target,
                ..
            } => vec![*then_target, *else_target],
            Instruction::Switch { default, arms, .. } => {
                let mut targets = vec![*default];
                targets.extend(arms.iter().map(|(_, t)| *t));
                targets
            }
            Instruction::Phi { incoming, .. } => incoming.iter().map(|(b, _)| *b).collect(),
            _ => vec![],
        }
    }
}

/// Convenience constructors used pervasively by clients and tests.
impl ModuleBuilder {
    /// Adds a function whose body is produced by `f` operating on a fresh
    /// [`FunctionBuilder`].
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the produced function fails validation.
    pub fn define(
        &mut self,
        name: impl Into<String>,
        param_widths: Vec<u32>,
        f: impl FnOnce(&mut FunctionBuilder),
    ) -> Result<FunctionId> {
        let mut builder = FunctionBuilder::new(name, param_widths);
        f(&mut builder);
        self.add_function(builder.build())
    }
}

/// Checks whether `callee` names one of the intrinsics the engine
/// interprets directly rather than dispatching natively.
#[must_use]
pub fn is_intrinsic(callee: &Callee) -> bool {
    match callee {
        Callee::External(name) => matches!(
            name.as_str(),
            "make_symbolic" | "assume" | "abort" | "assert_fail" | "report_error" | "malloc" | "free"
        ),
        _ => false,
    }
}

/// A shorthand for a register operand.
#[must_use]
pub fn reg(r: RegisterId) -> Operand {
    Operand::Register(r)
}

#[cfg(test)]
mod test {
    use super::{FunctionBuilder, ModuleBuilder};
    use crate::ir::{
        instruction::{Instruction, Operand},
        BlockId,
    };

    #[test]
    fn can_build_single_block_function() -> anyhow::Result<()> {
        let mut module = ModuleBuilder::new();
        let mut f = FunctionBuilder::new("main", vec![]);
        let entry = f.entry();
        f.push(entry, Instruction::Ret { value: None });
        let id = module.add_function(f.build())?;

        let module = module.build();
        let main = module.function(id).unwrap();
        assert_eq!(main.blocks.len(), 1);
        assert_eq!(main.instructions.len(), 1);

        Ok(())
    }

    #[test]
    fn rejects_unterminated_block() {
        let mut module = ModuleBuilder::new();
        let mut f = FunctionBuilder::new("main", vec![]);
        let entry = f.entry();
        let dest = f.reg();
        f.push(
            entry,
            Instruction::Select {
                dest,
                cond: Operand::bool(true),
                on_true: Operand::constant(32, 1u8),
                on_false: Operand::constant(32, 2u8),
            },
        );

        module
            .add_function(f.build())
            .expect_err("Unterminated block was not rejected");
    }

    #[test]
    fn rejects_branch_to_missing_block() {
        let mut module = ModuleBuilder::new();
        let mut f = FunctionBuilder::new("main", vec![]);
        let entry = f.entry();
        f.push(
            entry,
            Instruction::Jump {
                target: BlockId(7),
            },
        );

        module
            .add_function(f.build())
            .expect_err("Branch to a missing block was not rejected");
    }

    #[test]
    fn rejects_register_out_of_range() {
        let mut module = ModuleBuilder::new();
        let mut f = FunctionBuilder::new("main", vec![]);
        let entry = f.entry();
        f.push(
            entry,
            Instruction::Ret {
                value: Some(Operand::Register(crate::ir::RegisterId(42))),
            },
        );

        module
            .add_function(f.build())
            .expect_err("Out-of-range register was not rejected");
    }

    #[test]
    fn rejects_mismatched_global_initializer() {
        let mut module = ModuleBuilder::new();
        module
            .add_global("g", 4, false, Some(vec![0u8; 3]))
            .expect_err("Initializer size mismatch was not rejected");
    }
}
