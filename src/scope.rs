use alloc::{collections::BTreeMap, vec::Vec};
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::{any::AnyInstance, errors::ResolveErrorKind, key::Key};

/// A scope marker type. Pseudo-scopes need no external discriminator;
/// unshared scopes hand out a fresh instance per request and never cache.
pub trait Scope {
    #[must_use]
    fn name(&self) -> &'static str;

    #[must_use]
    fn is_pseudo(&self) -> bool {
        false
    }

    #[must_use]
    fn is_shared(&self) -> bool {
        true
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DefaultScope {
    /// Always active, one shared instance per engine.
    App,
    /// Never shared, a fresh instance per request, released with its owner.
    Transient,
    /// Active while a session discriminator is entered.
    Session,
    /// Active while a request discriminator is entered.
    Request,
}

impl Scope for DefaultScope {
    #[inline]
    fn name(&self) -> &'static str {
        match self {
            DefaultScope::App => "app",
            DefaultScope::Transient => "transient",
            DefaultScope::Session => "session",
            DefaultScope::Request => "request",
        }
    }

    #[inline]
    fn is_pseudo(&self) -> bool {
        matches!(self, DefaultScope::App | DefaultScope::Transient)
    }

    #[inline]
    fn is_shared(&self) -> bool {
        !matches!(self, DefaultScope::Transient)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScopeMarker {
    pub name: &'static str,
    pub is_pseudo: bool,
    pub is_shared: bool,
}

impl ScopeMarker {
    #[inline]
    #[must_use]
    pub fn of<S: Scope>(scope: &S) -> Self {
        Self {
            name: scope.name(),
            is_pseudo: scope.is_pseudo(),
            is_shared: scope.is_shared(),
        }
    }
}

/// An instance created while building another, released together with it.
pub struct Dependent {
    pub key: Key,
    pub instance: AnyInstance,
}

/// A live scoped instance together with the dependents its construction
/// produced, as handed back by teardown.
pub struct ScopedInstance {
    pub key: Key,
    pub instance: AnyInstance,
    pub dependents: Vec<Dependent>,
}

/// Owns instance lifetime for one scope marker, keyed by
/// `(discriminator, Key)`.
///
/// `get_or_create` must construct at most once per pair under concurrent
/// callers: a second requester waits for the first result instead of
/// double-constructing. A failed construction leaves the pair absent.
pub trait ScopeResolver: Send + Sync {
    #[must_use]
    fn is_active(&self, discriminator: Option<u64>) -> bool;

    #[must_use]
    fn get(&self, discriminator: Option<u64>, key: &Key) -> Option<AnyInstance>;

    fn get_or_create(
        &self,
        discriminator: Option<u64>,
        key: &Key,
        build: &mut dyn FnMut() -> Result<(AnyInstance, Vec<Dependent>), ResolveErrorKind>,
    ) -> Result<AnyInstance, ResolveErrorKind>;

    fn remove(&self, discriminator: Option<u64>, key: &Key) -> Option<ScopedInstance>;

    /// Evicts the key's instance from every discriminator, e.g. when the
    /// candidate itself is unregistered.
    fn evict_key(&self, key: &Key) -> Vec<ScopedInstance>;

    /// Tears down every instance of one discriminator, in LIFO order of
    /// creation. Idempotent.
    fn release(&self, discriminator: Option<u64>) -> Vec<ScopedInstance>;

    /// Tears down every instance of every discriminator.
    fn release_all(&self) -> Vec<ScopedInstance>;
}

enum EntryState {
    UnderConstruction,
    Live {
        instance: AnyInstance,
        dependents: Vec<Dependent>,
    },
}

struct ScopeMapState {
    entries: BTreeMap<(u64, Key), EntryState>,
    order: Vec<(u64, Key)>,
}

/// Map-backed resolver used for both pseudo and discriminator-driven
/// scopes. Pseudo mode ignores the discriminator entirely.
pub struct MapScopeResolver {
    pseudo: bool,
    state: Mutex<ScopeMapState>,
    construction_done: Condvar,
}

impl MapScopeResolver {
    #[must_use]
    fn new(pseudo: bool) -> Self {
        Self {
            pseudo,
            state: Mutex::new(ScopeMapState {
                entries: BTreeMap::new(),
                order: Vec::new(),
            }),
            construction_done: Condvar::new(),
        }
    }

    /// Resolver for an always-active scope, e.g. application singletons.
    #[inline]
    #[must_use]
    pub fn pseudo() -> Self {
        Self::new(true)
    }

    /// Resolver for a scope activated per external discriminator.
    #[inline]
    #[must_use]
    pub fn keyed() -> Self {
        Self::new(false)
    }

    #[inline]
    fn slot(&self, discriminator: Option<u64>, key: &Key) -> (u64, Key) {
        (if self.pseudo { 0 } else { discriminator.unwrap_or(0) }, key.clone())
    }
}

impl ScopeResolver for MapScopeResolver {
    fn is_active(&self, discriminator: Option<u64>) -> bool {
        self.pseudo || discriminator.is_some()
    }

    fn get(&self, discriminator: Option<u64>, key: &Key) -> Option<AnyInstance> {
        let slot = self.slot(discriminator, key);
        match self.state.lock().entries.get(&slot) {
            Some(EntryState::Live { instance, .. }) => Some(instance.clone()),
            _ => None,
        }
    }

    fn get_or_create(
        &self,
        discriminator: Option<u64>,
        key: &Key,
        build: &mut dyn FnMut() -> Result<(AnyInstance, Vec<Dependent>), ResolveErrorKind>,
    ) -> Result<AnyInstance, ResolveErrorKind> {
        let slot = self.slot(discriminator, key);

        {
            let mut state = self.state.lock();
            loop {
                match state.entries.get(&slot) {
                    Some(EntryState::Live { instance, .. }) => return Ok(instance.clone()),
                    Some(EntryState::UnderConstruction) => {
                        // Another caller is building this pair; wait and re-check
                        self.construction_done.wait(&mut state);
                    }
                    None => {
                        state.entries.insert(slot.clone(), EntryState::UnderConstruction);
                        break;
                    }
                }
            }
        }

        // The map lock is released here: construction may re-enter the
        // resolver for other keys of the same scope.
        let built = build();

        let mut state = self.state.lock();
        match built {
            Ok((instance, dependents)) => {
                state.entries.insert(
                    slot.clone(),
                    EntryState::Live {
                        instance: instance.clone(),
                        dependents,
                    },
                );
                state.order.push(slot);
                self.construction_done.notify_all();
                Ok(instance)
            }
            Err(err) => {
                state.entries.remove(&slot);
                self.construction_done.notify_all();
                Err(err)
            }
        }
    }

    fn remove(&self, discriminator: Option<u64>, key: &Key) -> Option<ScopedInstance> {
        let slot = self.slot(discriminator, key);
        let mut state = self.state.lock();
        match state.entries.remove(&slot) {
            Some(EntryState::Live { instance, dependents }) => {
                state.order.retain(|held| *held != slot);
                Some(ScopedInstance {
                    key: slot.1,
                    instance,
                    dependents,
                })
            }
            Some(EntryState::UnderConstruction) => {
                // Not ours to remove; put the marker back for the builder
                state.entries.insert(slot, EntryState::UnderConstruction);
                None
            }
            None => None,
        }
    }

    fn evict_key(&self, key: &Key) -> Vec<ScopedInstance> {
        let mut state = self.state.lock();

        let mut evicted = Vec::new();
        let mut kept = Vec::with_capacity(state.order.len());
        for slot in core::mem::take(&mut state.order).into_iter().rev() {
            if slot.1 != *key {
                kept.push(slot);
                continue;
            }
            if let Some(EntryState::Live { instance, dependents }) = state.entries.remove(&slot) {
                evicted.push(ScopedInstance {
                    key: slot.1,
                    instance,
                    dependents,
                });
            }
        }
        kept.reverse();
        state.order = kept;
        evicted
    }

    fn release(&self, discriminator: Option<u64>) -> Vec<ScopedInstance> {
        let target = if self.pseudo { 0 } else { discriminator.unwrap_or(0) };
        let mut state = self.state.lock();

        let mut released = Vec::new();
        let mut kept = Vec::with_capacity(state.order.len());
        for slot in core::mem::take(&mut state.order).into_iter().rev() {
            if slot.0 != target {
                kept.push(slot);
                continue;
            }
            if let Some(EntryState::Live { instance, dependents }) = state.entries.remove(&slot) {
                released.push(ScopedInstance {
                    key: slot.1,
                    instance,
                    dependents,
                });
            }
        }
        kept.reverse();
        state.order = kept;

        debug!(count = released.len(), "Scope released");
        released
    }

    fn release_all(&self) -> Vec<ScopedInstance> {
        let mut state = self.state.lock();

        let mut released = Vec::new();
        for slot in core::mem::take(&mut state.order).into_iter().rev() {
            if let Some(EntryState::Live { instance, dependents }) = state.entries.remove(&slot) {
                released.push(ScopedInstance {
                    key: slot.1,
                    instance,
                    dependents,
                });
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::{MapScopeResolver, Scope as _, ScopeResolver};
    use crate::{any::AnyInstance, errors::ResolveErrorKind, key::Key, scope::{DefaultScope, Dependent}};

    use alloc::{
        format,
        string::{String, ToString},
        sync::Arc,
        vec::Vec,
    };
    use core::sync::atomic::{AtomicU8, Ordering};
    use std::thread;
    use tracing_test::traced_test;

    struct Session(u8);

    fn live<T: Send + Sync + 'static>(value: T) -> Result<(AnyInstance, Vec<Dependent>), ResolveErrorKind> {
        Ok((Arc::new(value), Vec::new()))
    }

    #[test]
    fn test_default_scope_markers() {
        assert!(DefaultScope::App.is_pseudo());
        assert!(DefaultScope::App.is_shared());
        assert!(DefaultScope::Transient.is_pseudo());
        assert!(!DefaultScope::Transient.is_shared());
        assert!(!DefaultScope::Request.is_pseudo());
    }

    #[test]
    #[traced_test]
    fn test_pseudo_skips_discriminator() {
        let resolver = MapScopeResolver::pseudo();
        assert!(resolver.is_active(None));

        let created = resolver
            .get_or_create(None, &Key::of::<Session>(), &mut || live(Session(1)))
            .unwrap();
        // Any discriminator maps onto the same single slot
        let looked_up = resolver.get(Some(7), &Key::of::<Session>()).unwrap();
        assert!(Arc::ptr_eq(&created, &looked_up));
    }

    #[test]
    #[traced_test]
    fn test_keyed_isolation() {
        let resolver = MapScopeResolver::keyed();
        assert!(!resolver.is_active(None));
        assert!(resolver.is_active(Some(1)));

        let first = resolver
            .get_or_create(Some(1), &Key::of::<Session>(), &mut || live(Session(1)))
            .unwrap();
        let second = resolver
            .get_or_create(Some(2), &Key::of::<Session>(), &mut || live(Session(2)))
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(resolver.get(Some(1), &Key::of::<Session>()).is_some());
        assert!(resolver.get(Some(3), &Key::of::<Session>()).is_none());
    }

    #[test]
    #[traced_test]
    fn test_failed_construction_leaves_absent() {
        let resolver = MapScopeResolver::keyed();

        let result = resolver.get_or_create(Some(1), &Key::of::<Session>(), &mut || {
            Err(ResolveErrorKind::CreationFailed(anyhow::anyhow!("boom")))
        });
        assert!(result.is_err());
        assert!(resolver.get(Some(1), &Key::of::<Session>()).is_none());

        // The pair is constructible again after the failure
        resolver
            .get_or_create(Some(1), &Key::of::<Session>(), &mut || live(Session(1)))
            .unwrap();
        assert!(resolver.get(Some(1), &Key::of::<Session>()).is_some());
    }

    #[test]
    #[traced_test]
    fn test_release_lifo_and_idempotent() {
        let resolver = MapScopeResolver::keyed();

        resolver
            .get_or_create(Some(1), &Key::of::<Session>(), &mut || live(Session(1)))
            .unwrap();
        resolver
            .get_or_create(Some(1), &Key::of::<u8>(), &mut || live(2u8))
            .unwrap();
        resolver
            .get_or_create(Some(9), &Key::of::<u8>(), &mut || live(9u8))
            .unwrap();

        let released = resolver.release(Some(1));
        assert_eq!(released.len(), 2);
        // LIFO: last created comes out first
        assert_eq!(released[0].key, Key::of::<u8>());
        assert_eq!(released[1].key, Key::of::<Session>());

        assert!(resolver.release(Some(1)).is_empty());
        // Other discriminators are untouched
        assert!(resolver.get(Some(9), &Key::of::<u8>()).is_some());
    }

    #[test]
    #[traced_test]
    fn test_concurrent_construction_happens_once() {
        let resolver = Arc::new(MapScopeResolver::keyed());
        let construction_count = Arc::new(AtomicU8::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                let construction_count = construction_count.clone();
                thread::spawn(move || {
                    resolver
                        .get_or_create(Some(1), &Key::of::<Session>(), &mut || {
                            construction_count.fetch_add(1, Ordering::SeqCst);
                            live(Session(1))
                        })
                        .unwrap()
                })
            })
            .collect();

        let instances: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

        assert_eq!(construction_count.load(Ordering::SeqCst), 1);
        for instance in &instances[1..] {
            assert!(Arc::ptr_eq(&instances[0], instance));
        }
    }
}
