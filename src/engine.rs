use alloc::{
    boxed::Box,
    collections::BTreeMap,
    sync::Arc,
    vec::Vec,
};
use anyhow::anyhow;
use core::sync::atomic::{AtomicU64, Ordering};
use parking_lot::RwLock;
use tracing::{debug, error, info_span};

use crate::{
    any::{AnyInstance, TypeInfo},
    config::Config,
    constructable::{SlotValue, Slots},
    context::CreationalContext,
    discovery::{self, DerivationExtension},
    errors::{DefinitionErrorKind, RegistryErrorKind, ResolveErrorKind},
    injectable::Injectable,
    key::{Key, Predicate, Qualifier},
    lazy::{Lazy, LazyHandle},
    policy::{self, Batch},
    scope::{DefaultScope, Dependent, MapScopeResolver, Scope, ScopeResolver, ScopedInstance},
    shape::Shape,
    store::StoreInner,
};

/// The container. Cheap to clone; clones share the candidate store and
/// scope state. [`Self::enter`] produces a handle carrying an additional
/// scope discriminator.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
    discriminators: BTreeMap<&'static str, u64>,
}

/// Keys admitted by one registration batch, with the generation tag the
/// whole batch can later be unregistered by.
pub struct Registration {
    pub epoch: u64,
    pub keys: Vec<Key>,
}

pub struct EngineBuilder {
    scopes: BTreeMap<&'static str, Box<dyn ScopeResolver>>,
    extensions: Vec<Box<dyn DerivationExtension>>,
    config: Config,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Builder preloaded with resolvers for the default scopes: a pseudo
    /// resolver for [`DefaultScope::App`] and keyed resolvers for
    /// [`DefaultScope::Session`] and [`DefaultScope::Request`].
    /// [`DefaultScope::Transient`] needs no resolver; it never caches.
    #[must_use]
    pub fn new() -> Self {
        let mut scopes: BTreeMap<&'static str, Box<dyn ScopeResolver>> = BTreeMap::new();
        scopes.insert(DefaultScope::App.name(), Box::new(MapScopeResolver::pseudo()));
        scopes.insert(DefaultScope::Session.name(), Box::new(MapScopeResolver::keyed()));
        scopes.insert(DefaultScope::Request.name(), Box::new(MapScopeResolver::keyed()));

        Self {
            scopes,
            extensions: Vec::new(),
            config: Config::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_scope_resolver(mut self, name: &'static str, resolver: impl ScopeResolver + 'static) -> Self {
        self.scopes.insert(name, Box::new(resolver));
        self
    }

    #[inline]
    #[must_use]
    pub fn with_extension(mut self, extension: impl DerivationExtension + 'static) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn build(self) -> Engine {
        Engine {
            inner: Arc::new(EngineInner {
                store: RwLock::new(StoreInner::new()),
                scopes: self.scopes,
                extensions: self.extensions,
                config: self.config,
                epoch: AtomicU64::new(1),
            }),
            discriminators: BTreeMap::new(),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        EngineBuilder::new().build()
    }

    #[inline]
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Registers a batch of seed candidates, first expanded by discovery to
    /// the full set of candidates their required bindings need.
    ///
    /// The expanded batch is validated as a whole; either every candidate
    /// is admitted or none is and the store is exactly as before the call.
    ///
    /// # Errors
    /// - [`RegistryErrorKind::AutoDiscoveryFailed`] when discovery leaves
    ///   required bindings unresolved
    /// - [`RegistryErrorKind::Definition`] on malformed candidates
    /// - [`RegistryErrorKind::Ambiguous`], [`RegistryErrorKind::Unsatisfied`]
    ///   or [`RegistryErrorKind::Cyclic`] when the batch would break a
    ///   store invariant
    pub fn register(&self, seeds: Vec<Injectable>) -> Result<Vec<Key>, RegistryErrorKind> {
        self.register_tagged(seeds).map(|registration| registration.keys)
    }

    /// Like [`Self::register`], also returning the batch's generation tag
    /// for later [`Self::remove_epoch`].
    #[allow(clippy::missing_errors_doc)]
    pub fn register_tagged(&self, seeds: Vec<Injectable>) -> Result<Registration, RegistryErrorKind> {
        let span = info_span!("register", seeds = seeds.len());
        let _guard = span.enter();

        // Discovery, validation and commit form one writer-exclusive
        // critical section; a concurrent writer cannot invalidate the
        // state this batch was validated against.
        let mut store = self.inner.store.write();

        let discovery = discovery::expand(&store, seeds, &self.inner.extensions, self.inner.config.auto_discover);
        if !discovery.problems.is_empty() {
            let err = RegistryErrorKind::AutoDiscoveryFailed {
                problems: discovery.problems,
            };
            error!("{}", err);
            return Err(err);
        }

        for injectable in &discovery.additions {
            let scope = injectable.scope;
            if scope.is_shared && !self.inner.scopes.contains_key(scope.name) {
                let err = RegistryErrorKind::Definition(DefinitionErrorKind::UnknownScope {
                    key: injectable.key.clone(),
                    scope: scope.name,
                });
                error!("{}", err);
                return Err(err);
            }
        }

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let batch = Batch {
            additions: discovery.additions,
            removals: Vec::new(),
        };

        match policy::validate_batch(&store, &batch, epoch) {
            Ok(shadow) => {
                *store = shadow;
                let keys: Vec<Key> = batch.additions.iter().map(|injectable| injectable.key.clone()).collect();
                debug!(count = keys.len(), epoch, "Batch committed");
                Ok(Registration { epoch, keys })
            }
            Err(err) => {
                error!("{}", err);
                Err(err)
            }
        }
    }

    /// Removes every candidate registered under the given keys, tearing
    /// down their scoped instances.
    ///
    /// # Errors
    /// Returns [`RegistryErrorKind::StillRequired`] when a surviving
    /// candidate's required binding would be left without its provider;
    /// the store is then unchanged. Remove dependents and their providers
    /// in one batch instead.
    pub fn remove(&self, keys: Vec<Key>) -> Result<(), RegistryErrorKind> {
        let span = info_span!("remove", keys = keys.len());
        let _guard = span.enter();

        let (removed_keys, removed_candidates) = {
            let mut store = self.inner.store.write();
            let batch = Batch {
                additions: Vec::new(),
                removals: keys,
            };
            let shadow = policy::validate_batch(&store, &batch, 0).map_err(|err| {
                error!("{}", err);
                err
            })?;

            // The dropped candidates are kept aside so their destroy hooks
            // still run once they are gone from the store.
            let removed_candidates: Vec<Arc<Injectable>> = batch
                .removals
                .iter()
                .flat_map(|key| store.resolve(key, None))
                .map(|(_, injectable)| injectable)
                .filter(|injectable| batch.removals.contains(&injectable.key))
                .collect();

            *store = shadow;
            (batch.removals, removed_candidates)
        };

        for key in &removed_keys {
            self.inner.evict_scoped(key, &removed_candidates);
        }
        Ok(())
    }

    /// Unregisters the whole batch admitted under a generation tag, e.g.
    /// an unloaded plugin's candidate set, and frees its scoped instances.
    #[allow(clippy::missing_errors_doc)]
    pub fn remove_epoch(&self, epoch: u64) -> Result<(), RegistryErrorKind> {
        let keys = self.inner.store.read().keys_in_epoch(epoch);
        if keys.is_empty() {
            return Ok(());
        }
        self.remove(keys)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.inner.store.read().contains(key)
    }

    /// Gets the single shared instance for `T`.
    #[allow(clippy::missing_errors_doc)]
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ResolveErrorKind> {
        self.get_by_key(Key::of::<T>())
    }

    /// Gets the single instance for `T` narrowed by qualifiers.
    #[allow(clippy::missing_errors_doc)]
    pub fn get_with<T: Send + Sync + 'static>(
        &self,
        qualifiers: impl IntoIterator<Item = Qualifier>,
    ) -> Result<Arc<T>, ResolveErrorKind> {
        self.get_by_key(Key::of::<T>().with_qualifiers(qualifiers))
    }

    /// Gets the instance for `T` if exactly one candidate matches, an
    /// explicit no-value if none does.
    #[allow(clippy::missing_errors_doc)]
    pub fn try_get<T: Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>, ResolveErrorKind> {
        match self.resolve(&Key::of::<T>(), &Shape::Maybe, None)? {
            SlotValue::Maybe(Some(instance)) => downcast::<T>(instance).map(Some),
            SlotValue::Maybe(None) => Ok(None),
            _ => Err(incorrect_type::<T>()),
        }
    }

    /// Gets every matching instance for `T`. An empty collection is valid.
    #[allow(clippy::missing_errors_doc)]
    pub fn get_all<T: Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>, ResolveErrorKind> {
        match self.resolve(&Key::of::<T>(), &Shape::All, None)? {
            SlotValue::All(instances) => instances.into_iter().map(downcast::<T>).collect(),
            _ => Err(incorrect_type::<T>()),
        }
    }

    /// A handle deferring resolution of `T` until first use.
    #[must_use]
    pub fn get_lazy<T: Send + Sync + 'static>(&self) -> Lazy<T> {
        Lazy::new(LazyHandle::new(self.clone(), Key::of::<T>(), Shape::One))
    }

    fn get_by_key<T: Send + Sync + 'static>(&self, key: Key) -> Result<Arc<T>, ResolveErrorKind> {
        match self.resolve(&key, &Shape::One, None)? {
            SlotValue::One(instance) => downcast::<T>(instance),
            _ => Err(incorrect_type::<T>()),
        }
    }

    /// Type-erased resolution of a key in a requested shape.
    ///
    /// Failures are local to this call: the store is untouched and any
    /// instance under construction is rolled back, its freshly created
    /// dependents released.
    #[allow(clippy::missing_errors_doc)]
    pub fn resolve(&self, key: &Key, shape: &Shape, predicate: Option<&Predicate>) -> Result<SlotValue, ResolveErrorKind> {
        let span = info_span!("resolve", key = %key);
        let _guard = span.enter();

        let mut ctx = CreationalContext::new();
        match self.resolve_shaped(key, shape, predicate, &mut ctx) {
            Ok(value) => Ok(value),
            Err(err) => {
                error!("{}", err);
                for dependent in ctx.drain_dependents().into_iter().rev() {
                    self.inner.destroy(&dependent.key, &dependent.instance);
                }
                Err(err)
            }
        }
    }

    fn resolve_shaped(
        &self,
        key: &Key,
        shape: &Shape,
        predicate: Option<&Predicate>,
        ctx: &mut CreationalContext,
    ) -> Result<SlotValue, ResolveErrorKind> {
        if let Shape::Deferred(inner) = shape {
            return Ok(SlotValue::Deferred(LazyHandle::new(
                self.clone(),
                key.clone(),
                (**inner).clone(),
            )));
        }

        // Matches are collected under a short read lock; construction runs
        // against the committed state without holding it.
        let matches = self.inner.store.read().resolve(key, predicate);

        match shape {
            Shape::One => match matches.len() {
                1 => {
                    let (_, candidate) = matches.into_iter().next().expect("matches len is 1");
                    self.materialize(candidate, ctx).map(SlotValue::One)
                }
                0 => Err(ResolveErrorKind::Unsatisfied { key: key.clone() }),
                _ => Err(ambiguous(key, &matches)),
            },
            Shape::Maybe => match matches.len() {
                0 => Ok(SlotValue::Maybe(None)),
                1 => {
                    let (_, candidate) = matches.into_iter().next().expect("matches len is 1");
                    self.materialize(candidate, ctx).map(|instance| SlotValue::Maybe(Some(instance)))
                }
                _ => Err(ambiguous(key, &matches)),
            },
            Shape::All => {
                let mut instances = Vec::with_capacity(matches.len());
                for (_, candidate) in matches {
                    instances.push(self.materialize(candidate, ctx)?);
                }
                Ok(SlotValue::All(instances))
            }
            Shape::Deferred(_) => unreachable!("deferred shapes return above"),
        }
    }

    /// Turns one matched candidate into a live instance through its scope.
    fn materialize(&self, candidate: Arc<Injectable>, ctx: &mut CreationalContext) -> Result<AnyInstance, ResolveErrorKind> {
        let scope = candidate.scope;

        if !scope.is_shared {
            let instance = self.construct(&candidate, ctx)?;
            ctx.push_dependent(Dependent {
                key: candidate.key.clone(),
                instance: instance.clone(),
            });
            return Ok(instance);
        }

        let Some(resolver) = self.inner.scopes.get(scope.name) else {
            return Err(ResolveErrorKind::NoScopeResolver { scope: scope.name });
        };

        let discriminator = if scope.is_pseudo {
            None
        } else {
            match self.discriminators.get(scope.name) {
                Some(discriminator) => Some(*discriminator),
                None => return Err(ResolveErrorKind::ScopeNotActive { scope: scope.name }),
            }
        };
        if !resolver.is_active(discriminator) {
            return Err(ResolveErrorKind::ScopeNotActive { scope: scope.name });
        }

        resolver.get_or_create(discriminator, &candidate.key, &mut || {
            let mark = ctx.mark();
            let instance = self.construct(&candidate, ctx)?;
            Ok((instance, ctx.take_dependents_from(mark)))
        })
    }

    fn construct(&self, candidate: &Arc<Injectable>, ctx: &mut CreationalContext) -> Result<AnyInstance, ResolveErrorKind> {
        ctx.enter(&candidate.key)?;
        let result = self.construct_inner(candidate, ctx);
        ctx.exit();
        result
    }

    fn construct_inner(&self, candidate: &Arc<Injectable>, ctx: &mut CreationalContext) -> Result<AnyInstance, ResolveErrorKind> {
        let mut values = Vec::with_capacity(candidate.bindings.len());
        for binding in &candidate.bindings {
            let value = match &binding.required {
                Some(required) => self.resolve_shaped(required, &binding.shape, None, ctx)?,
                None => match &binding.shape {
                    Shape::All => SlotValue::All(Vec::new()),
                    Shape::Maybe => SlotValue::Maybe(None),
                    Shape::One | Shape::Deferred(_) => {
                        return Err(ResolveErrorKind::CreationFailed(anyhow!(
                            "slot {} of {} has no lookup behind it",
                            binding.slot,
                            candidate.key,
                        )))
                    }
                },
            };
            values.push(value);
        }

        let slots = Slots::new(values);
        let instance = candidate.constructable.create(&slots).map_err(ResolveErrorKind::CreationFailed)?;
        if let Some(hooks) = &candidate.hooks {
            hooks.after_construct(&instance).map_err(ResolveErrorKind::CreationFailed)?;
        }

        debug!(key = %candidate.key, "Constructed");
        Ok(instance)
    }

    /// A handle sharing this engine with `scope` activated under the given
    /// discriminator.
    #[must_use]
    pub fn enter<S: Scope>(&self, scope: S, discriminator: u64) -> Engine {
        let mut entered = self.clone();
        entered.discriminators.insert(scope.name(), discriminator);
        entered
    }

    /// Tears down every instance the scope holds for the discriminator, in
    /// LIFO order of creation, cascading through their dependents.
    pub fn release<S: Scope>(&self, scope: S, discriminator: u64) {
        let Some(resolver) = self.inner.scopes.get(scope.name()) else {
            return;
        };
        let discriminator = if scope.is_pseudo() { None } else { Some(discriminator) };
        for scoped in resolver.release(discriminator) {
            self.inner.teardown(scoped);
        }
    }

    /// Releases every resolver's instances. Also runs when the last engine
    /// handle is dropped.
    pub fn close(&self) {
        self.inner.close();
    }
}

pub(crate) struct EngineInner {
    store: RwLock<StoreInner>,
    scopes: BTreeMap<&'static str, Box<dyn ScopeResolver>>,
    extensions: Vec<Box<dyn DerivationExtension>>,
    config: Config,
    epoch: AtomicU64,
}

impl EngineInner {
    fn evict_scoped(&self, key: &Key, unregistered: &[Arc<Injectable>]) {
        for resolver in self.scopes.values() {
            for scoped in resolver.evict_key(key) {
                self.teardown_with(unregistered, scoped);
            }
        }
    }

    fn teardown(&self, scoped: ScopedInstance) {
        self.teardown_with(&[], scoped);
    }

    fn teardown_with(&self, unregistered: &[Arc<Injectable>], scoped: ScopedInstance) {
        self.destroy_with(unregistered, &scoped.key, &scoped.instance);
        for dependent in scoped.dependents.into_iter().rev() {
            self.destroy_with(unregistered, &dependent.key, &dependent.instance);
        }
    }

    fn destroy(&self, key: &Key, instance: &AnyInstance) {
        self.destroy_with(&[], key, instance);
    }

    /// Runs the before-destroy hook and the construction strategy's
    /// destructor. The candidate is looked up in the store, falling back to
    /// the just-unregistered set so removal still destroys properly.
    fn destroy_with(&self, unregistered: &[Arc<Injectable>], key: &Key, instance: &AnyInstance) {
        let candidate = unregistered.iter().find(|injectable| injectable.key == *key).cloned().or_else(|| {
            self.store
                .read()
                .resolve(key, None)
                .into_iter()
                .map(|(_, injectable)| injectable)
                .find(|injectable| injectable.key == *key)
        });

        if let Some(candidate) = candidate {
            if let Some(hooks) = &candidate.hooks {
                hooks.before_destroy(instance);
            }
            candidate.constructable.destroy(instance);
            debug!(key = %key, "Destroyed");
        }
    }

    fn close(&self) {
        for resolver in self.scopes.values() {
            for scoped in resolver.release_all() {
                self.teardown(scoped);
            }
        }
        debug!("Engine closed");
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.close();
    }
}

fn downcast<T: Send + Sync + 'static>(instance: AnyInstance) -> Result<Arc<T>, ResolveErrorKind> {
    instance.downcast::<T>().map_err(|_| incorrect_type::<T>())
}

fn incorrect_type<T: 'static>() -> ResolveErrorKind {
    ResolveErrorKind::IncorrectType {
        expected: TypeInfo::of::<T>(),
        actual: "an instance of another type or shape",
    }
}

fn ambiguous(key: &Key, matches: &[(crate::store::InjectableId, Arc<Injectable>)]) -> ResolveErrorKind {
    ResolveErrorKind::Ambiguous {
        key: key.clone(),
        candidates: matches
            .iter()
            .map(|(_, candidate)| candidate.key.clone())
            .collect::<Vec<_>>()
            .into_boxed_slice(),
    }
}
