use alloc::boxed::Box;

/// The form a dependency is requested in.
///
/// Shapes compose: `Deferred(Box::new(All))` is a lazily-evaluated
/// collection. The shape decides both the resolution strategy and, through
/// [`ShapeTraits`], whether the binding takes part in cycle analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// Exactly one instance. Zero matches is unsatisfied, two is ambiguous.
    One,
    /// Zero or one instance. Zero yields an explicit no-value.
    Maybe,
    /// Every matching instance. An empty collection is valid.
    All,
    /// Resolution of the inner shape is deferred behind a handle until the
    /// handle is invoked, past construction time.
    Deferred(Box<Shape>),
}

/// Trait set a shape strategy declares about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeTraits {
    /// Resolution happens after construction, so the binding cannot form an
    /// edge in the construction-time dependency graph.
    pub lazy: bool,
    pub collection: bool,
    pub optional: bool,
}

impl Shape {
    #[must_use]
    pub fn traits(&self) -> ShapeTraits {
        match self {
            Shape::One => ShapeTraits {
                lazy: false,
                collection: false,
                optional: false,
            },
            Shape::Maybe => ShapeTraits {
                lazy: false,
                collection: false,
                optional: true,
            },
            Shape::All => ShapeTraits {
                lazy: false,
                collection: true,
                optional: false,
            },
            Shape::Deferred(inner) => ShapeTraits {
                lazy: true,
                ..inner.traits()
            },
        }
    }

    #[inline]
    #[must_use]
    pub fn deferred(inner: Shape) -> Self {
        Shape::Deferred(Box::new(inner))
    }
}
