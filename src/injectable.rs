use alloc::{collections::BTreeSet, sync::Arc, vec::Vec};

use crate::{
    any::{AnyInstance, TypeInfo},
    binding::Binding,
    constructable::{BoxedConstructable, Constructable, LifecycleHooks, Slots},
    errors::DefinitionErrorKind,
    key::{Key, Qualifier},
    scope::{DefaultScope, Scope, ScopeMarker},
    shape::Shape,
};

/// A registered candidate: its identity, scope, dependency slots and
/// construction strategy. Immutable once built; a new candidate replaces
/// rather than mutates an existing one.
#[derive(Clone)]
pub struct Injectable {
    pub key: Key,
    /// Further types this candidate is exposed as, e.g. the trait-object
    /// type of an implemented interface.
    pub aliases: BTreeSet<TypeInfo>,
    pub scope: ScopeMarker,
    pub bindings: Vec<Binding>,
    pub(crate) constructable: BoxedConstructable,
    pub(crate) hooks: Option<Arc<dyn LifecycleHooks>>,
    /// Candidates this one explicitly derives, e.g. values produced by a
    /// factory declared on the registered type. Pulled in by discovery even
    /// when auto-discovery is off.
    pub(crate) produces: Vec<Injectable>,
}

impl core::fmt::Debug for Injectable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Injectable")
            .field("key", &self.key)
            .field("aliases", &self.aliases)
            .field("scope", &self.scope)
            .field("bindings", &self.bindings)
            .field("constructable", &"<constructable>")
            .field("hooks", &self.hooks.as_ref().map(|_| "<hooks>"))
            .field("produces", &self.produces)
            .finish()
    }
}

impl Injectable {
    #[inline]
    #[must_use]
    pub fn builder<T: Send + Sync + 'static>() -> InjectableBuilder {
        InjectableBuilder::new(Key::of::<T>())
    }

    /// Candidate wrapping a value created outside the engine. Every
    /// resolution hands out the same shared instance.
    #[must_use]
    pub fn instance<T: Send + Sync + 'static>(value: T) -> InjectableBuilder {
        let mut builder = InjectableBuilder::new(Key::of::<T>());
        builder.constructable = Some(Arc::new(InstanceConstructable {
            instance: Arc::new(value),
        }));
        builder
    }

    /// Whether this candidate is exposed as the given type.
    #[inline]
    #[must_use]
    pub fn provides(&self, type_info: &TypeInfo) -> bool {
        self.key.type_info == *type_info || self.aliases.contains(type_info)
    }

    pub(crate) fn provided_types(&self) -> impl Iterator<Item = TypeInfo> + '_ {
        core::iter::once(self.key.type_info).chain(self.aliases.iter().copied())
    }
}

struct InstanceConstructable {
    instance: AnyInstance,
}

impl Constructable for InstanceConstructable {
    fn create(&self, _slots: &Slots) -> Result<AnyInstance, anyhow::Error> {
        Ok(self.instance.clone())
    }
}

pub struct InjectableBuilder {
    key: Key,
    aliases: BTreeSet<TypeInfo>,
    scope: ScopeMarker,
    bindings: Vec<Binding>,
    constructable: Option<BoxedConstructable>,
    hooks: Option<Arc<dyn LifecycleHooks>>,
    produces: Vec<Injectable>,
}

impl InjectableBuilder {
    #[must_use]
    fn new(key: Key) -> Self {
        Self {
            key,
            aliases: BTreeSet::new(),
            scope: ScopeMarker::of(&DefaultScope::App),
            bindings: Vec::new(),
            constructable: None,
            hooks: None,
            produces: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn qualified(mut self, qualifier: Qualifier) -> Self {
        self.key.qualifiers.insert(qualifier);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_qualifiers(mut self, qualifiers: impl IntoIterator<Item = Qualifier>) -> Self {
        self.key.qualifiers.extend(qualifiers);
        self
    }

    #[inline]
    #[must_use]
    pub fn alias<I: ?Sized + 'static>(mut self) -> Self {
        self.aliases.insert(TypeInfo::of::<I>());
        self
    }

    #[inline]
    #[must_use]
    pub fn scope<S: Scope>(mut self, scope: S) -> Self {
        self.scope = ScopeMarker::of(&scope);
        self
    }

    /// Declares the next slot: exactly one instance of `D`, resolved at
    /// construction time.
    #[inline]
    #[must_use]
    pub fn require<D: ?Sized + 'static>(self) -> Self {
        self.require_shaped(Key::of::<D>(), Shape::One)
    }

    /// Declares the next slot: zero or one instance of `D`.
    #[inline]
    #[must_use]
    pub fn require_maybe<D: ?Sized + 'static>(self) -> Self {
        self.require_shaped(Key::of::<D>(), Shape::Maybe)
    }

    /// Declares the next slot: every registered instance of `D`.
    #[inline]
    #[must_use]
    pub fn require_all<D: ?Sized + 'static>(self) -> Self {
        self.require_shaped(Key::of::<D>(), Shape::All)
    }

    /// Declares the next slot: a handle deferring resolution of one `D`
    /// until invoked. Deferred slots break dependency cycles.
    #[inline]
    #[must_use]
    pub fn require_lazy<D: ?Sized + 'static>(self) -> Self {
        self.require_shaped(Key::of::<D>(), Shape::deferred(Shape::One))
    }

    #[inline]
    #[must_use]
    pub fn require_shaped(mut self, key: Key, shape: Shape) -> Self {
        self.bindings.push(Binding::new(self.bindings.len(), Some(key), shape));
        self
    }

    /// Declares an always-satisfiable slot with no lookup behind it.
    #[inline]
    #[must_use]
    pub fn require_none(mut self, shape: Shape) -> Self {
        self.bindings.push(Binding::new(self.bindings.len(), None, shape));
        self
    }

    #[inline]
    #[must_use]
    pub fn produces(mut self, injectable: Injectable) -> Self {
        self.produces.push(injectable);
        self
    }

    #[inline]
    #[must_use]
    pub fn hooks(mut self, hooks: impl LifecycleHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    #[inline]
    #[must_use]
    pub fn construct(mut self, constructable: impl Constructable + 'static) -> Self {
        self.constructable = Some(Arc::new(constructable));
        self
    }

    /// # Errors
    /// Returns [`DefinitionErrorKind::MissingConstructable`] if neither
    /// [`Self::construct`] nor [`Injectable::instance`] supplied a
    /// construction strategy.
    pub fn build(self) -> Result<Injectable, DefinitionErrorKind> {
        let Some(constructable) = self.constructable else {
            return Err(DefinitionErrorKind::MissingConstructable { key: self.key });
        };

        Ok(Injectable {
            key: self.key,
            aliases: self.aliases,
            scope: self.scope,
            bindings: self.bindings,
            constructable,
            hooks: self.hooks,
            produces: self.produces,
        })
    }
}
