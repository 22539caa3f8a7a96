//! This module contains the type language of the intermediate representation
//! consumed by the engine.

use std::rc::Rc;

use crate::constant::{MAXIMUM_EXPR_WIDTH, POINTER_WIDTH};

/// A type in the intermediate representation.
///
/// Integer types carry an arbitrary bit-width up to
/// [`MAXIMUM_EXPR_WIDTH`]. Pointers have the fixed width
/// [`POINTER_WIDTH`]. Aggregates carry their layout explicitly so that the
/// engine never needs a target data-layout oracle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Type {
    /// An integer of the contained bit-width.
    Int(u32),

    /// A 32-bit IEEE-754 floating point number.
    F32,

    /// A 64-bit IEEE-754 floating point number.
    F64,

    /// A pointer into the engine's address space.
    Ptr,

    /// A structure with an explicit layout.
    Struct(Rc<StructLayout>),

    /// A fixed-length array of a single element type.
    Array {
        /// The type of each element.
        elem: Rc<Type>,

        /// The number of elements.
        len: u64,
    },
}

impl Type {
    /// Gets the number of bits needed to represent a value of this type in a
    /// register, where such a representation exists.
    ///
    /// Aggregates are held in registers as their full flattened bit pattern.
    #[must_use]
    pub fn width_bits(&self) -> u32 {
        match self {
            Self::Int(w) => *w,
            Self::F32 => 32,
            Self::F64 => 64,
            Self::Ptr => POINTER_WIDTH,
            Self::Struct(layout) => u32::try_from(layout.size * 8).unwrap_or(MAXIMUM_EXPR_WIDTH),
            Self::Array { elem, len } => {
                let bits = u64::from(elem.width_bits()) * len;
                u32::try_from(bits).unwrap_or(MAXIMUM_EXPR_WIDTH)
            }
        }
    }

    /// Gets the number of bytes a value of this type occupies in memory.
    #[must_use]
    pub fn store_size(&self) -> u64 {
        match self {
            Self::Int(w) => u64::from(w.div_ceil(8)),
            Self::F32 => 4,
            Self::F64 => 8,
            Self::Ptr => u64::from(POINTER_WIDTH / 8),
            Self::Struct(layout) => layout.size,
            Self::Array { elem, len } => elem.store_size() * len,
        }
    }

    /// Checks whether this type is held in registers as a first-class
    /// scalar.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Int(_) | Self::F32 | Self::F64 | Self::Ptr)
    }

    /// Checks whether this type is a floating point type.
    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

/// The explicit layout of a structure type.
///
/// Element offsets are byte offsets from the start of the structure; `size`
/// includes any trailing padding, so consecutive structures in an array are
/// `size` bytes apart.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StructLayout {
    /// The fields of the structure, in declaration order.
    pub fields: Vec<StructField>,

    /// The total size of the structure in bytes.
    pub size: u64,
}

/// A single field of a structure layout.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StructField {
    /// The type of the field.
    pub ty: Type,

    /// The byte offset of the field from the start of the structure.
    pub offset: u64,
}

impl StructLayout {
    /// Constructs a packed layout in which every field immediately follows
    /// its predecessor.
    #[must_use]
    pub fn packed(field_types: Vec<Type>) -> Rc<Self> {
        let mut fields = Vec::with_capacity(field_types.len());
        let mut offset = 0;
        for ty in field_types {
            let size = ty.store_size();
            fields.push(StructField { ty, offset });
            offset += size;
        }
        Rc::new(Self {
            fields,
            size: offset,
        })
    }
}

#[cfg(test)]
mod test {
    use super::{StructLayout, Type};

    #[test]
    fn integer_widths_round_up_to_bytes() {
        assert_eq!(Type::Int(1).store_size(), 1);
        assert_eq!(Type::Int(8).store_size(), 1);
        assert_eq!(Type::Int(33).store_size(), 5);
        assert_eq!(Type::Int(64).store_size(), 8);
    }

    #[test]
    fn packed_struct_layout_accumulates_offsets() {
        let layout = StructLayout::packed(vec![Type::Int(32), Type::Int(8), Type::Ptr]);
        assert_eq!(layout.fields[0].offset, 0);
        assert_eq!(layout.fields[1].offset, 4);
        assert_eq!(layout.fields[2].offset, 5);
        assert_eq!(layout.size, 13);
    }

    #[test]
    fn array_store_size_multiplies_elements() {
        let ty = Type::Array {
            elem: std::rc::Rc::new(Type::Int(16)),
            len: 10,
        };
        assert_eq!(ty.store_size(), 20);
        assert_eq!(ty.width_bits(), 160);
    }
}
