//! This module contains the memory object and object state types: the
//! identity of an allocation and the contents stored in it.

use std::rc::Rc;

use ethnum::U256;

use crate::expr::{Array, ArrayRef, ExprBuilder, ExprRef, UpdateList};

/// The identity of one allocation: a base address, a size, and the flags
/// describing how the allocation may be used.
///
/// Objects are immutable once allocated; the mutable contents live in the
/// per-state [`ObjectState`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemoryObject {
    /// The sequential identity of the object, unique within one engine.
    pub id: u64,

    /// The base address of the object.
    pub address: u64,

    /// The size of the object in bytes.
    pub size: u64,

    /// The name of the object, used in diagnostics and test cases.
    pub name: String,

    /// Whether the object is a stack allocation of some frame.
    pub is_local: bool,

    /// Whether the object backs a global variable.
    pub is_global: bool,

    /// Whether writes to the object are rejected.
    pub read_only: bool,
}

/// The type of a reference-counted memory object.
pub type MemoryObjectRef = Rc<MemoryObject>;

impl MemoryObject {
    /// Gets the expression for the offset of `address` into this object.
    #[must_use]
    pub fn offset_expr(&self, builder: &ExprBuilder, address: &ExprRef) -> ExprRef {
        let base = builder.constant(address.width, U256::from(self.address));
        builder.sub(address.clone(), base)
    }

    /// Gets the predicate that an access of `bytes` bytes at `offset` into
    /// this object stays in bounds.
    #[must_use]
    pub fn bounds_check_offset(
        &self,
        builder: &ExprBuilder,
        offset: &ExprRef,
        bytes: u64,
    ) -> ExprRef {
        if bytes > self.size {
            return builder.bool_false();
        }
        // offset < size - bytes + 1
        let limit = builder.constant(offset.width, U256::from(self.size - bytes + 1));
        builder.ult(offset.clone(), limit)
    }

    /// Gets the predicate that an access of `bytes` bytes at the absolute
    /// `address` stays inside this object.
    #[must_use]
    pub fn bounds_check_pointer(
        &self,
        builder: &ExprBuilder,
        address: &ExprRef,
        bytes: u64,
    ) -> ExprRef {
        let offset = self.offset_expr(builder, address);
        self.bounds_check_offset(builder, &offset, bytes)
    }

    /// Checks whether the concrete `address` lies within this object.
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address - self.address < self.size
    }
}

/// The contents of one memory object along one path.
///
/// Contents start as a concrete byte vector. The object also owns a backing
/// symbolic array whose identity is stable for the object's lifetime: when
/// the object is made symbolic, or when a write lands at a symbolic offset,
/// the concrete bytes are flushed into the update list over that array and
/// all further operations go through the list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObjectState {
    /// The size of the contents, always equal to the owning object's size.
    size: u64,

    /// The backing symbolic array.
    array: ArrayRef,

    /// The writes applied over the backing array.
    updates: UpdateList,

    /// The concrete contents, present until the state is flushed to the
    /// update list. When present, the backing array is semantically equal
    /// to these bytes.
    concrete: Option<Vec<u8>>,

    /// Whether writes to this state are rejected.
    read_only: bool,
}

impl ObjectState {
    /// Constructs a state holding the provided concrete `contents`.
    #[must_use]
    pub fn new_concrete(name: &str, contents: Vec<u8>, read_only: bool) -> Self {
        let size = u64::try_from(contents.len()).unwrap_or(u64::MAX);
        let array = Array::new(name, size);
        let updates = UpdateList::new(array.clone());
        Self {
            size,
            array,
            updates,
            concrete: Some(contents),
            read_only,
        }
    }

    /// Constructs a state of `size` zeroed bytes.
    #[must_use]
    pub fn new_zeroed(name: &str, size: u64, read_only: bool) -> Self {
        let len = usize::try_from(size).unwrap_or(usize::MAX);
        Self::new_concrete(name, vec![0; len], read_only)
    }

    /// Constructs a fully symbolic state of `size` bytes backed by a fresh
    /// array named `name`.
    #[must_use]
    pub fn new_symbolic(name: &str, size: u64) -> Self {
        let array = Array::new(name, size);
        let updates = UpdateList::new(array.clone());
        Self {
            size,
            array,
            updates,
            concrete: None,
            read_only: false,
        }
    }

    /// Gets the size of the contents in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Gets the backing symbolic array.
    #[must_use]
    pub fn array(&self) -> &ArrayRef {
        &self.array
    }

    /// Checks whether writes to this state are rejected.
    #[must_use]
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Checks whether the contents are still tracked concretely.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        self.concrete.is_some() && self.updates.is_empty()
    }

    /// Makes the contents fully symbolic, discarding the concrete bytes and
    /// installing a fresh backing array named `name`.
    pub fn make_symbolic(&mut self, name: &str) {
        let array = Array::new(name, self.size);
        self.array = array.clone();
        self.updates = UpdateList::new(array);
        self.concrete = None;
    }

    /// Flushes the concrete contents into the update list so that symbolic
    /// offsets can observe them.
    fn flush(&mut self, builder: &ExprBuilder) {
        let Some(bytes) = self.concrete.take() else {
            return;
        };

        // The concrete bytes become the oldest writes over the backing
        // array; existing symbolic-offset writes stay newer.
        let mut list = UpdateList::new(self.array.clone());
        for (i, byte) in bytes.iter().enumerate() {
            let index = builder.constant_u64(64, u64::try_from(i).unwrap_or(u64::MAX));
            let value = builder.constant_u64(8, u64::from(*byte));
            list = list.write(index, value);
        }

        // Replay newer writes on top of the flushed base.
        let mut newer = Vec::new();
        let mut node = self.updates.head.as_ref();
        while let Some(n) = node {
            newer.push((n.index.clone(), n.value.clone()));
            node = n.next.as_ref();
        }
        for (index, value) in newer.into_iter().rev() {
            list = list.write(index, value);
        }

        self.updates = list;
    }

    /// Reads the byte at `offset`.
    pub fn read8(&mut self, builder: &ExprBuilder, offset: &ExprRef) -> ExprRef {
        if let (Some(bytes), Some(concrete)) = (&self.concrete, offset.as_constant()) {
            let index = usize::try_from(concrete.as_u128()).unwrap_or(usize::MAX);

            // A concrete read can skip concrete-offset updates that miss,
            // but a symbolic-offset update in the list may alias anything.
            let mut node = self.updates.head.as_ref();
            let mut aliased = false;
            while let Some(n) = node {
                match n.index.as_constant() {
                    Some(written) if written == concrete => return n.value.clone(),
                    Some(_) => node = n.next.as_ref(),
                    None => {
                        aliased = true;
                        break;
                    }
                }
            }
            if !aliased {
                let byte = bytes.get(index).copied().unwrap_or(0);
                return builder.constant_u64(8, u64::from(byte));
            }
        }

        // Any symbolic read needs the concrete contents visible through
        // the update list.
        if self.concrete.is_some() {
            self.flush(builder);
        }

        let offset = builder.zext(offset.clone(), 64);
        builder.read8(&self.updates, offset)
    }

    /// Reads `width` bits little-endian starting at byte `offset`.
    pub fn read(&mut self, builder: &ExprBuilder, offset: &ExprRef, width: u32) -> ExprRef {
        let bytes = width.div_ceil(8);
        let offset = builder.zext(offset.clone(), 64);

        let mut result = self.read8(builder, &offset);
        for i in 1..bytes {
            let at = builder.add(offset.clone(), builder.constant_u64(64, u64::from(i)));
            let byte = self.read8(builder, &at);
            result = builder.concat(byte, result);
        }

        if bytes * 8 == width {
            result
        } else {
            builder.extract(result, 0, width)
        }
    }

    /// Writes the byte `value` at `offset`.
    ///
    /// Returns `false` when the state is read-only and the write was
    /// refused.
    #[must_use]
    pub fn write8(&mut self, builder: &ExprBuilder, offset: &ExprRef, value: ExprRef) -> bool {
        if self.read_only {
            return false;
        }

        if let (Some(bytes), Some(concrete_offset), Some(concrete_value)) = (
            &mut self.concrete,
            offset.as_constant(),
            value.as_constant(),
        ) {
            if self.updates.is_empty() {
                let index = usize::try_from(concrete_offset.as_u128()).unwrap_or(usize::MAX);
                if let Some(slot) = bytes.get_mut(index) {
                    *slot = concrete_value.as_u128() as u8;
                    return true;
                }
            }
        }

        if self.concrete.is_some() && !offset.is_constant() {
            self.flush(builder);
        }

        let offset = builder.zext(offset.clone(), 64);
        self.updates = self.updates.write(offset, value);
        true
    }

    /// Writes `value` little-endian starting at byte `offset`.
    ///
    /// Returns `false` when the state is read-only and the write was
    /// refused.
    #[must_use]
    pub fn write(&mut self, builder: &ExprBuilder, offset: &ExprRef, value: &ExprRef) -> bool {
        if self.read_only {
            return false;
        }

        let bytes = value.width.div_ceil(8);
        let offset = builder.zext(offset.clone(), 64);

        for i in 0..bytes {
            let at = builder.add(offset.clone(), builder.constant_u64(64, u64::from(i)));
            let remaining = value.width - i * 8;
            let byte = builder.extract(value.clone(), i * 8, remaining.min(8));
            let byte = builder.zext(byte, 8);
            if !self.write8(builder, &at, byte) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use super::ObjectState;
    use crate::expr::ExprBuilder;

    #[test]
    fn concrete_reads_return_constants() {
        let builder = ExprBuilder::new();
        let mut os = ObjectState::new_concrete("obj", vec![0xaa, 0xbb, 0xcc, 0xdd], false);

        let offset = builder.constant_u64(64, 1);
        let byte = os.read8(&builder, &offset);
        assert_eq!(byte.as_constant(), Some(U256::from(0xbbu8)));

        let word = os.read(&builder, &builder.constant_u64(64, 0), 32);
        assert_eq!(word.as_constant(), Some(U256::from(0xddcc_bbaau32)));
    }

    #[test]
    fn concrete_writes_update_in_place() {
        let builder = ExprBuilder::new();
        let mut os = ObjectState::new_zeroed("obj", 4, false);

        let offset = builder.constant_u64(64, 2);
        assert!(os.write8(&builder, &offset, builder.constant_u64(8, 0x7f)));
        assert!(os.is_concrete());

        let byte = os.read8(&builder, &offset);
        assert_eq!(byte.as_constant(), Some(U256::from(0x7fu8)));
    }

    #[test]
    fn read_only_states_refuse_writes() {
        let builder = ExprBuilder::new();
        let mut os = ObjectState::new_zeroed("obj", 4, true);

        let offset = builder.constant_u64(64, 0);
        assert!(!os.write8(&builder, &offset, builder.constant_u64(8, 1)));
    }

    #[test]
    fn symbolic_offsets_flush_concrete_contents() {
        let builder = ExprBuilder::new();
        let mut os = ObjectState::new_concrete("obj", vec![0x11, 0x22], false);

        // A read at a symbolic offset sees the concrete bytes through the
        // flushed update list.
        let mut sym = ObjectState::new_symbolic("idx", 1);
        let offset = builder.zext(
            sym.read8(&builder, &builder.constant_u64(64, 0)),
            64,
        );
        let value = os.read8(&builder, &offset);
        assert!(!value.is_constant());
        assert!(!os.is_concrete());

        // The flushed contents are still observable at concrete offsets.
        let byte = os.read8(&builder, &builder.constant_u64(64, 1));
        assert_eq!(byte.as_constant(), Some(U256::from(0x22u8)));
    }

    #[test]
    fn symbolic_states_have_stable_backing_arrays() {
        let builder = ExprBuilder::new();
        let mut os = ObjectState::new_symbolic("input", 4);
        let id = os.array().id;

        let a = os.read8(&builder, &builder.constant_u64(64, 0));
        let b = os.read8(&builder, &builder.constant_u64(64, 0));
        assert!(std::rc::Rc::ptr_eq(&a, &b));
        assert_eq!(os.array().id, id);
    }
}
