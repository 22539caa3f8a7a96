//! This module contains the instruction set of the intermediate
//! representation consumed by the engine.

use ethnum::U256;

use crate::ir::{
    types::Type,
    BlockId,
    FunctionId,
    GlobalId,
    RegisterId,
};

/// An operand of an instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Operand {
    /// The value currently bound to a virtual register of the executing
    /// frame.
    Register(RegisterId),

    /// An integer (or pointer, or float bit-pattern) immediate of the given
    /// width.
    Constant {
        /// The bit-width of the immediate.
        width: u32,

        /// The value, masked to `width` bits.
        value: U256,
    },

    /// The address of a global variable.
    Global(GlobalId),

    /// A reference to a function, usable as an indirect call target.
    Function(FunctionId),
}

impl Operand {
    /// Constructs an integer immediate of the provided `width`.
    #[must_use]
    pub fn constant(width: u32, value: impl Into<U256>) -> Self {
        Self::Constant {
            width,
            value: value.into(),
        }
    }

    /// Constructs a boolean immediate.
    #[must_use]
    pub fn bool(value: bool) -> Self {
        Self::constant(1, u8::from(value))
    }
}

/// The integer binary operations.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

/// The integer comparison predicates.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CmpOp {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

/// The floating-point binary operations.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FBinOp {
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

/// The floating-point comparison predicates (ordered forms).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FCmpOp {
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
}

/// The value conversion operations.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    PtrToInt,
    IntToPtr,
    Bitcast,
    SiToFp,
    UiToFp,
    FpToSi,
    FpToUi,
    FpTrunc,
    FpExt,
}

/// The target of a call instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Callee {
    /// A function defined in the module.
    Function(FunctionId),

    /// A host-provided external function, dispatched by name.
    External(String),

    /// A call target computed at run time.
    Indirect(Operand),
}

/// One scaled index of an address-computation instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GepIndex {
    /// The index value.
    pub index: Operand,

    /// The number of bytes one unit of `index` advances the address.
    pub scale: u64,
}

/// An instruction of the intermediate representation.
///
/// The representation is three-address: instructions read operands and bind
/// at most one destination register. Control flow is explicit through block
/// identifiers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Instruction {
    /// Returns from the executing function.
    Ret { value: Option<Operand> },

    /// Transfers control unconditionally to `target`.
    Jump { target: BlockId },

    /// Transfers control to `then_target` when `cond` is non-zero and to
    /// `else_target` otherwise.
    Br {
        cond: Operand,
        then_target: BlockId,
        else_target: BlockId,
    },

    /// Transfers control to the arm whose value equals `on`, or to
    /// `default` when none matches.
    Switch {
        on: Operand,
        default: BlockId,
        arms: Vec<(U256, BlockId)>,
    },

    /// Calls `callee` with `args`, binding the return value to `dest` when
    /// one is declared.
    Call {
        callee: Callee,
        args: Vec<Operand>,
        dest: Option<RegisterId>,
        return_type: Type,
    },

    /// Selects the incoming value matching the block control arrived from.
    Phi {
        dest: RegisterId,
        incoming: Vec<(BlockId, Operand)>,
    },

    /// Binds `on_true` or `on_false` to `dest` depending on `cond`, without
    /// forking control flow.
    Select {
        dest: RegisterId,
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
    },

    /// Allocates stack memory for `count` values of type `ty`, binding the
    /// address to `dest`.
    Alloca {
        dest: RegisterId,
        ty: Type,
        count: Operand,
    },

    /// Loads a value of type `ty` from `addr`, binding it to `dest`.
    Load {
        dest: RegisterId,
        addr: Operand,
        ty: Type,
    },

    /// Stores `value` to `addr`.
    Store { addr: Operand, value: Operand },

    /// Computes `base + offset + Σ index·scale`, binding the resulting
    /// address to `dest`.
    Gep {
        dest: RegisterId,
        base: Operand,
        offset: u64,
        indices: Vec<GepIndex>,
    },

    /// An integer binary operation over operands of width `width`.
    BinOp {
        dest: RegisterId,
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
        width: u32,
    },

    /// An integer comparison producing a width-1 result.
    Cmp {
        dest: RegisterId,
        op: CmpOp,
        lhs: Operand,
        rhs: Operand,
        width: u32,
    },

    /// A floating-point binary operation; `width` is 32 or 64.
    FBinOp {
        dest: RegisterId,
        op: FBinOp,
        lhs: Operand,
        rhs: Operand,
        width: u32,
    },

    /// A floating-point comparison producing a width-1 result; `width` is
    /// 32 or 64.
    FCmp {
        dest: RegisterId,
        op: FCmpOp,
        lhs: Operand,
        rhs: Operand,
        width: u32,
    },

    /// A value conversion from width `from` to width `to`.
    Cast {
        dest: RegisterId,
        op: CastOp,
        value: Operand,
        from: u32,
        to: u32,
    },

    /// Extracts `width` bits at byte `offset` of an aggregate register
    /// value.
    ExtractValue {
        dest: RegisterId,
        aggregate: Operand,
        offset: u64,
        width: u32,
    },

    /// Overwrites `width` bits at byte `offset` of an aggregate register
    /// value with `element`.
    InsertValue {
        dest: RegisterId,
        aggregate: Operand,
        element: Operand,
        offset: u64,
        width: u32,
    },

    /// A point the program asserts is never reached.
    Unreachable,
}

impl Instruction {
    /// Checks whether this instruction ends a basic block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Ret { .. }
                | Self::Jump { .. }
                | Self::Br { .. }
                | Self::Switch { .. }
                | Self::Unreachable
        )
    }

    /// Gets the register this instruction binds, if any.
    #[must_use]
    pub fn dest(&self) -> Option<RegisterId> {
        match self {
            Self::Call { dest, .. } => *dest,
            Self::Phi { dest, .. }
            | Self::Select { dest, .. }
            | Self::Alloca { dest, .. }
            | Self::Load { dest, .. }
            | Self::Gep { dest, .. }
            | Self::BinOp { dest, .. }
            | Self::Cmp { dest, .. }
            | Self::FBinOp { dest, .. }
            | Self::FCmp { dest, .. }
            | Self::Cast { dest, .. }
            | Self::ExtractValue { dest, .. }
            | Self::InsertValue { dest, .. } => Some(*dest),
            _ => None,
        }
    }

    /// Gets the register operands this instruction reads.
    #[must_use]
    pub fn sources(&self) -> Vec<RegisterId> {
        let mut out = Vec::new();
        let mut push = |op: &Operand| {
            if let Operand::Register(r) = op {
                out.push(*r);
            }
        };

        match self {
            Self::Ret { value } => {
                if let Some(v) = value {
                    push(v);
                }
            }
            Self::Br { cond, .. } => push(cond),
            Self::Switch { on, .. } => push(on),
            Self::Call { args, callee, .. } => {
                if let Callee::Indirect(op) = callee {
                    push(op);
                }
                args.iter().for_each(&mut push);
            }
            Self::Phi { incoming, .. } => incoming.iter().for_each(|(_, op)| push(op)),
            Self::Select {
                cond,
                on_true,
                on_false,
                ..
            } => {
                push(cond);
                push(on_true);
                push(on_false);
            }
            Self::Alloca { count, .. } => push(count),
            Self::Load { addr, .. } => push(addr),
            Self::Store { addr, value } => {
                push(addr);
                push(value);
            }
            Self::Gep { base, indices, .. } => {
                push(base);
                indices.iter().for_each(|i| push(&i.index));
            }
            Self::BinOp { lhs, rhs, .. }
            | Self::Cmp { lhs, rhs, .. }
            | Self::FBinOp { lhs, rhs, .. }
            | Self::FCmp { lhs, rhs, .. } => {
                push(lhs);
                push(rhs);
            }
            Self::Cast { value, .. } => push(value),
            Self::ExtractValue { aggregate, .. } => push(aggregate),
            Self::InsertValue {
                aggregate, element, ..
            } => {
                push(aggregate);
                push(element);
            }
            Self::Jump { .. } | Self::Unreachable => {}
        }

        out
    }
}
