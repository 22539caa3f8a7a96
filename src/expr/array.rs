//! This module contains the symbolic byte-array representation over which
//! the expression algebra's `Read` terms operate.

use std::rc::Rc;

use uuid::Uuid;

use crate::expr::ExprRef;

/// A named symbolic byte-array of fixed size.
///
/// Arrays have a stable identity that outlives any particular expression
/// mentioning them: the identity is what the solver treats as a variable,
/// and what seed assignments bind concrete bytes to.
///
/// # Shadows
///
/// Each array used in a stored interpolant is renamed to a _shadow_ array
/// of identical size. The shadow stands for an existentially-quantified
/// occurrence: a later subsumption check is free to witness the shadow with
/// whichever of its own arrays matches the stored renaming.
#[derive(Clone, Debug, Eq)]
pub struct Array {
    /// The unique identity of the array.
    pub id: Uuid,

    /// The human-readable name of the array, used in diagnostics and test
    /// cases.
    pub name: String,

    /// The size of the array in bytes.
    pub size: u64,

    /// Whether this array is the shadow counterpart of another array.
    pub is_shadow: bool,
}

/// The type of a reference-counted array.
pub type ArrayRef = Rc<Array>;

impl Array {
    /// Constructs a new array with a fresh identity.
    #[must_use]
    pub fn new(name: impl Into<String>, size: u64) -> ArrayRef {
        Rc::new(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            size,
            is_shadow: false,
        })
    }

    /// Constructs the shadow counterpart of `array`.
    ///
    /// The shadow has its own identity but records the name of the array it
    /// shadows, which is how subsumption-time renamings are re-established.
    #[must_use]
    pub fn shadow_of(array: &ArrayRef) -> ArrayRef {
        Rc::new(Self {
            id: Uuid::new_v4(),
            name: format!("{}'", array.name),
            size: array.size,
            is_shadow: true,
        })
    }
}

/// Array equality is identity equality.
impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl std::hash::Hash for Array {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A single write on top of an array: `(index, value)` with a link to the
/// preceding writes.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct UpdateNode {
    /// The byte index written to.
    pub index: ExprRef,

    /// The byte value written.
    pub value: ExprRef,

    /// The writes this one shadows.
    pub next: Option<Rc<UpdateNode>>,
}

/// An array together with the ordered writes applied on top of it.
///
/// The write list is persistent: extending it shares the tail with every
/// earlier version, which is what makes copy-on-write object states cheap
/// to fork.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct UpdateList {
    /// The array being read through.
    pub array: ArrayRef,

    /// The most recent write, if any.
    pub head: Option<Rc<UpdateNode>>,
}

impl UpdateList {
    /// Constructs an update list over `array` with no writes.
    #[must_use]
    pub fn new(array: ArrayRef) -> Self {
        Self { array, head: None }
    }

    /// Produces the update list that additionally records a write of
    /// `value` at `index`.
    #[must_use]
    pub fn write(&self, index: ExprRef, value: ExprRef) -> Self {
        let node = Rc::new(UpdateNode {
            index,
            value,
            next: self.head.clone(),
        });
        Self {
            array: self.array.clone(),
            head: Some(node),
        }
    }

    /// Counts the writes recorded on this list.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut node = self.head.as_ref();
        while let Some(n) = node {
            count += 1;
            node = n.next.as_ref();
        }
        count
    }

    /// Checks if the list records no writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

#[cfg(test)]
mod test {
    use super::{Array, UpdateList};

    #[test]
    fn arrays_compare_by_identity() {
        let a = Array::new("x", 4);
        let b = Array::new("x", 4);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn shadow_preserves_size() {
        let a = Array::new("x", 4);
        let s = Array::shadow_of(&a);
        assert_eq!(s.size, a.size);
        assert!(s.is_shadow);
        assert_ne!(s.id, a.id);
    }

    #[test]
    fn update_lists_share_tails() {
        let a = Array::new("x", 4);
        let empty = UpdateList::new(a);
        assert!(empty.is_empty());
    }
}
