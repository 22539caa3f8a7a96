//! This module contains the typed three-address intermediate representation
//! consumed by the engine.
//!
//! The representation is deliberately loader-agnostic: an external front-end
//! lowers whatever surface language it handles into [`Module`]s, either
//! directly or through the [`builder`] API. The engine itself only ever
//! walks the structures defined here.

pub mod builder;
pub mod instruction;
pub mod types;

pub use builder::{FunctionBuilder, ModuleBuilder};
pub use instruction::{
    BinOp,
    Callee,
    CastOp,
    CmpOp,
    FBinOp,
    FCmpOp,
    GepIndex,
    Instruction,
    Operand,
};
pub use types::{StructField, StructLayout, Type};

use std::fmt::{Display, Formatter};

/// The identifier of a function within a module.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FunctionId(pub u32);

/// The identifier of a basic block within a function.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BlockId(pub u32);

/// The identifier of a virtual register within a function.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RegisterId(pub u32);

/// The identifier of a global variable within a module.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GlobalId(pub u32);

/// The identity of one instruction in the module: a function together with
/// a flat index into that function's instruction array.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InstId {
    /// The function containing the instruction.
    pub function: FunctionId,

    /// The index of the instruction in the function's flat instruction
    /// array.
    pub index: u32,
}

impl Display for InstId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "f{}+{}", self.function.0, self.index)
    }
}

/// A position in the module usable as a subsumption key: the entry of one
/// basic block.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ProgramPoint {
    /// The function containing the block.
    pub function: FunctionId,

    /// The block whose entry this point names.
    pub block: BlockId,
}

impl Display for ProgramPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "f{}b{}", self.function.0, self.block.0)
    }
}

/// A basic block: a contiguous range in the owning function's instruction
/// array, ending with a terminator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BasicBlock {
    /// The index of the block's first instruction.
    pub entry: u32,

    /// The number of instructions in the block.
    pub len: u32,
}

/// A function of the module.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Function {
    /// The name of the function.
    pub name: String,

    /// The number of parameters; parameters occupy registers `0..param_count`.
    pub param_count: u32,

    /// The bit-widths of the parameters, used to size call argument
    /// bindings.
    pub param_widths: Vec<u32>,

    /// The total number of virtual registers the function uses.
    pub register_count: u32,

    /// The flat instruction array of the function.
    pub instructions: Vec<Instruction>,

    /// The blocks of the function; block 0 is the entry block.
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    /// Gets the block containing the instruction at `index`, if any.
    #[must_use]
    pub fn block_of(&self, index: u32) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|b| index >= b.entry && index < b.entry + b.len)
            .map(|i| BlockId(u32::try_from(i).unwrap_or(u32::MAX)))
    }

    /// Checks whether the instruction at `index` is the first instruction
    /// of its block.
    #[must_use]
    pub fn is_block_entry(&self, index: u32) -> bool {
        self.blocks.iter().any(|b| b.entry == index)
    }

    /// Gets the entry instruction index of `block`, if the block exists.
    #[must_use]
    pub fn block_entry(&self, block: BlockId) -> Option<u32> {
        self.blocks.get(block.0 as usize).map(|b| b.entry)
    }
}

/// A global variable of the module.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Global {
    /// The name of the global.
    pub name: String,

    /// The size of the global in bytes.
    pub size: u64,

    /// Whether writes to the global are rejected.
    pub read_only: bool,

    /// The initial contents of the global, when constant; zero-filled
    /// otherwise.
    pub initializer: Option<Vec<u8>>,
}

/// A module: the unit the engine analyses.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Module {
    /// The functions of the module.
    pub functions: Vec<Function>,

    /// The global variables of the module.
    pub globals: Vec<Global>,
}

impl Module {
    /// Gets the function with the provided `id`, if it exists.
    #[must_use]
    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id.0 as usize)
    }

    /// Gets the identifier of the function named `name`, if it exists.
    #[must_use]
    pub fn function_named(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FunctionId(u32::try_from(i).unwrap_or(u32::MAX)))
    }

    /// Gets the global with the provided `id`, if it exists.
    #[must_use]
    pub fn global(&self, id: GlobalId) -> Option<&Global> {
        self.globals.get(id.0 as usize)
    }

    /// Gets the instruction identified by `id`, if it exists.
    #[must_use]
    pub fn instruction(&self, id: InstId) -> Option<&Instruction> {
        self.function(id.function)
            .and_then(|f| f.instructions.get(id.index as usize))
    }

    /// Gets the program point of the block containing `id`, if it exists.
    #[must_use]
    pub fn point_of(&self, id: InstId) -> Option<ProgramPoint> {
        let function = self.function(id.function)?;
        let block = function.block_of(id.index)?;
        Some(ProgramPoint {
            function: id.function,
            block,
        })
    }

    /// Counts the basic blocks across all functions of the module.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.functions.iter().map(|f| f.blocks.len()).sum()
    }
}
