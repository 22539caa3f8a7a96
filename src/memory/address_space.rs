//! This module contains the address space: the per-state mapping from
//! memory objects to their contents.
//!
//! Object states are shared between forked states through reference
//! counting; [`AddressSpace::get_writeable`] clones a shared state on first
//! write, so sibling states never observe each other's mutations.

use std::{collections::BTreeMap, rc::Rc};

use crate::{
    expr::{ExprBuilder, ExprRef},
    memory::object::{MemoryObjectRef, ObjectState},
    solver::Solver,
};

/// A memory object bound to its contents.
#[derive(Clone, Debug)]
pub struct Binding {
    /// The object.
    pub object: MemoryObjectRef,

    /// The contents of the object along this path.
    pub state: Rc<ObjectState>,
}

/// The result of resolving an address against the address space: the
/// candidate objects, and whether enumeration stopped early.
#[derive(Clone, Debug, Default)]
pub struct ResolutionList {
    /// The objects the address may point into.
    pub candidates: Vec<Binding>,

    /// Whether resolution gave up before ruling out further objects.
    pub incomplete: bool,
}

/// The mapping from memory objects to object states carried by one
/// execution state.
#[derive(Clone, Debug, Default)]
pub struct AddressSpace {
    /// The bindings, ordered by object base address.
    objects: BTreeMap<u64, Binding>,
}

impl AddressSpace {
    /// Constructs an empty address space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `state` as the contents of `object`.
    pub fn bind(&mut self, object: MemoryObjectRef, state: ObjectState) {
        self.objects.insert(
            object.address,
            Binding {
                object,
                state: Rc::new(state),
            },
        );
    }

    /// Removes the binding for `object`, if one exists.
    pub fn unbind(&mut self, object: &MemoryObjectRef) {
        self.objects.remove(&object.address);
    }

    /// Gets the binding for `object`, if one exists.
    #[must_use]
    pub fn get(&self, object: &MemoryObjectRef) -> Option<&Binding> {
        self.objects.get(&object.address)
    }

    /// Gets the binding containing the concrete `address`, if one exists.
    #[must_use]
    pub fn find(&self, address: u64) -> Option<&Binding> {
        self.objects
            .range(..=address)
            .next_back()
            .map(|(_, binding)| binding)
            .filter(|binding| binding.object.contains(address))
    }

    /// Gets a unique, mutable object state for `object`, cloning the
    /// contents if they are shared with a sibling state.
    pub fn get_writeable(&mut self, object: &MemoryObjectRef) -> Option<&mut ObjectState> {
        self.objects
            .get_mut(&object.address)
            .map(|binding| Rc::make_mut(&mut binding.state))
    }

    /// Iterates over the bindings in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.objects.values()
    }

    /// Gets the number of bound objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Checks whether the address space has no bound objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Gets an approximation of the bytes held by this address space.
    #[must_use]
    pub fn footprint_bytes(&self) -> u64 {
        self.objects.values().map(|b| b.object.size).sum()
    }

    /// Resolves `address` to a unique candidate object, if a cheap path to
    /// one exists.
    ///
    /// For a concrete address this is an exact map lookup. For a symbolic
    /// address the solver provides one witness value, and the object
    /// containing the witness is the candidate; if the witness falls
    /// outside every object the fast path fails and the caller falls back
    /// to [`Self::resolve`].
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver fails or times out.
    pub fn resolve_one(
        &self,
        solver: &mut dyn Solver,
        constraints: &[ExprRef],
        address: &ExprRef,
    ) -> crate::error::solver::Result<Option<Binding>> {
        if let Some(concrete) = address.as_constant() {
            let concrete = concrete.as_u128() as u64;
            return Ok(self.find(concrete).cloned());
        }

        let witness = solver.get_value(constraints, address)?;
        let witness = witness.as_u128() as u64;
        Ok(self.find(witness).cloned())
    }

    /// Resolves `address` to every object it may point into, stopping after
    /// `max` candidates.
    ///
    /// Enumeration walks the object map outward from the solver's witness
    /// value, asking for each object whether the address may lie inside
    /// it. When `max` candidates have been found with objects still
    /// unchecked, the result is marked incomplete.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver fails or times out.
    pub fn resolve(
        &self,
        solver: &mut dyn Solver,
        builder: &ExprBuilder,
        constraints: &[ExprRef],
        address: &ExprRef,
        max: usize,
    ) -> crate::error::solver::Result<ResolutionList> {
        let mut result = ResolutionList::default();

        if let Some(concrete) = address.as_constant() {
            let concrete = concrete.as_u128() as u64;
            if let Some(binding) = self.find(concrete) {
                result.candidates.push(binding.clone());
            }
            return Ok(result);
        }

        let witness = solver.get_value(constraints, address)?.as_u128() as u64;

        // Walk objects in order of distance from the witness so that the
        // cap, when hit, keeps the most plausible candidates.
        let mut ordered: Vec<&Binding> = self.objects.values().collect();
        ordered.sort_by_key(|b| {
            let base = b.object.address;
            base.abs_diff(witness)
        });

        for binding in ordered {
            if result.candidates.len() >= max {
                result.incomplete = true;
                break;
            }

            let in_object = binding
                .object
                .bounds_check_pointer(builder, address, 1);
            if solver.may_be_true(constraints, &in_object)? {
                result.candidates.push(binding.clone());
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::{
        expr::ExprBuilder,
        memory::{
            address_space::AddressSpace,
            object::{MemoryObject, ObjectState},
        },
    };

    fn new_object(id: u64, address: u64, size: u64) -> Rc<MemoryObject> {
        Rc::new(MemoryObject {
            id,
            address,
            size,
            name: format!("obj_{id}"),
            is_local: false,
            is_global: false,
            read_only: false,
        })
    }

    #[test]
    fn concrete_lookup_finds_containing_object() {
        let mut space = AddressSpace::new();
        let object = new_object(0, 0x1000, 16);
        space.bind(object.clone(), ObjectState::new_zeroed("obj_0", 16, false));

        assert!(space.find(0x1000).is_some());
        assert!(space.find(0x100f).is_some());
        assert!(space.find(0x1010).is_none());
        assert!(space.find(0xfff).is_none());
    }

    #[test]
    fn writes_are_not_visible_across_copies() {
        let builder = ExprBuilder::new();
        let mut space = AddressSpace::new();
        let object = new_object(0, 0x1000, 4);
        space.bind(object.clone(), ObjectState::new_zeroed("obj_0", 4, false));

        let forked = space.clone();

        let os = space.get_writeable(&object).unwrap();
        let offset = builder.constant_u64(64, 0);
        assert!(os.write8(&builder, &offset, builder.constant_u64(8, 0x42)));

        // The forked space still observes the original contents.
        let mut forked_clone = (*forked.get(&object).unwrap().state).clone();
        let byte = forked_clone.read8(&builder, &offset);
        assert_eq!(byte.as_constant(), Some(ethnum::U256::ZERO));
    }

    #[test]
    fn unbinding_removes_objects() {
        let mut space = AddressSpace::new();
        let object = new_object(0, 0x1000, 4);
        space.bind(object.clone(), ObjectState::new_zeroed("obj_0", 4, false));
        assert_eq!(space.len(), 1);

        space.unbind(&object);
        assert!(space.is_empty());
    }
}
