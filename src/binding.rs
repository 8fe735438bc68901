use crate::{
    key::Key,
    shape::{Shape, ShapeTraits},
};

/// One dependency slot of a candidate.
///
/// The multiplicity flags are derived from the requested shape's trait set,
/// never set by hand: `direct` is the inverse of the shape's `lazy` trait,
/// so deferred slots are invisible to cycle analysis.
#[derive(Debug, Clone)]
pub struct Binding {
    pub slot: usize,
    /// `None` means the slot can always produce a value, e.g. an
    /// always-satisfiable empty collection.
    pub required: Option<Key>,
    pub shape: Shape,
    pub optional: bool,
    pub collection: bool,
    pub direct: bool,
}

impl Binding {
    #[must_use]
    pub fn new(slot: usize, required: Option<Key>, shape: Shape) -> Self {
        let ShapeTraits {
            lazy,
            collection,
            optional,
        } = shape.traits();

        Self {
            slot,
            required,
            shape,
            optional,
            collection,
            direct: !lazy,
        }
    }

    /// A required, non-optional, non-collection slot: the store must hold
    /// exactly one match for it.
    #[inline]
    #[must_use]
    pub(crate) fn is_singular(&self) -> bool {
        self.required.is_some() && !self.optional && !self.collection
    }
}
