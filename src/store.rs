use alloc::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    vec::Vec,
};

use crate::{
    any::TypeInfo,
    injectable::Injectable,
    key::{Key, Predicate},
};

/// Arena handle of a stored candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct InjectableId(pub(crate) u32);

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) injectable: Arc<Injectable>,
    /// Generation tag of the batch that admitted this candidate; whole
    /// batches are unregistered by tag.
    pub(crate) epoch: u64,
}

/// The indexed candidate collection.
///
/// The primary map and the per-type index are updated together inside
/// `pub(crate)` mutators that are only reachable through the consistency
/// policy, so readers never observe a stale index entry. The whole value is
/// cheaply `Clone` (candidates are shared), which is what makes shadow
/// validation and single-swap commits possible.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreInner {
    entries: BTreeMap<InjectableId, Entry>,
    by_type: BTreeMap<TypeInfo, BTreeSet<InjectableId>>,
    next_id: u32,
}

impl StoreInner {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, injectable: Arc<Injectable>, epoch: u64) -> InjectableId {
        let id = InjectableId(self.next_id);
        self.next_id += 1;

        for type_info in injectable.provided_types() {
            self.by_type.entry(type_info).or_default().insert(id);
        }
        self.entries.insert(id, Entry { injectable, epoch });
        id
    }

    pub(crate) fn remove_id(&mut self, id: InjectableId) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        for type_info in entry.injectable.provided_types() {
            if let Some(ids) = self.by_type.get_mut(&type_info) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_type.remove(&type_info);
                }
            }
        }
        Some(entry)
    }

    /// Removes every candidate whose own key equals `key` exactly.
    pub(crate) fn remove_key(&mut self, key: &Key) -> Vec<Arc<Injectable>> {
        let ids: Vec<InjectableId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.injectable.key == *key)
            .map(|(id, _)| *id)
            .collect();

        ids.into_iter()
            .filter_map(|id| self.remove_id(id))
            .map(|entry| entry.injectable)
            .collect()
    }

    #[must_use]
    pub(crate) fn keys_in_epoch(&self, epoch: u64) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .entries
            .values()
            .filter(|entry| entry.epoch == epoch)
            .map(|entry| entry.injectable.key.clone())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// All candidates matching the key and predicate. Index-backed; never
    /// triggers discovery or construction.
    #[must_use]
    pub(crate) fn resolve(&self, key: &Key, predicate: Option<&Predicate>) -> Vec<(InjectableId, Arc<Injectable>)> {
        let Some(ids) = self.by_type.get(&key.type_info) else {
            return Vec::new();
        };

        ids.iter()
            .filter_map(|id| self.entries.get(id).map(|entry| (*id, entry.injectable.clone())))
            .filter(|(_, injectable)| key.matches(injectable))
            .filter(|(_, injectable)| predicate.map_or(true, |predicate| predicate(injectable)))
            .collect()
    }

    #[inline]
    #[must_use]
    pub(crate) fn contains(&self, key: &Key) -> bool {
        !self.resolve(key, None).is_empty()
    }

    #[inline]
    #[must_use]
    pub(crate) fn get(&self, id: InjectableId) -> Option<&Arc<Injectable>> {
        self.entries.get(&id).map(|entry| &entry.injectable)
    }

    #[inline]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (InjectableId, &Arc<Injectable>)> {
        self.entries.iter().map(|(id, entry)| (*id, &entry.injectable))
    }

    #[inline]
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::StoreInner;
    use crate::{
        injectable::Injectable,
        key::{Key, Qualifier},
    };

    use alloc::sync::Arc;

    struct Config;
    struct Service;
    trait Api {}
    struct ApiImpl;
    impl Api for ApiImpl {}

    fn store_with_basics() -> StoreInner {
        let mut store = StoreInner::new();
        store.insert(Arc::new(Injectable::instance(Config).build().unwrap()), 0);
        store.insert(
            Arc::new(
                Injectable::instance(ApiImpl)
                    .alias::<dyn Api + Send + Sync>()
                    .build()
                    .unwrap(),
            ),
            0,
        );
        store
    }

    #[test]
    fn test_resolve_by_own_type_and_alias() {
        let store = store_with_basics();

        assert_eq!(store.resolve(&Key::of::<Config>(), None).len(), 1);
        assert_eq!(store.resolve(&Key::of::<ApiImpl>(), None).len(), 1);
        assert_eq!(store.resolve(&Key::of::<dyn Api + Send + Sync>(), None).len(), 1);
        assert!(store.resolve(&Key::of::<Service>(), None).is_empty());
    }

    #[test]
    fn test_predicate_filter() {
        let mut store = StoreInner::new();
        store.insert(
            Arc::new(Injectable::instance(Config).qualified(Qualifier::named("a")).build().unwrap()),
            0,
        );
        store.insert(
            Arc::new(Injectable::instance(Config).qualified(Qualifier::named("b")).build().unwrap()),
            0,
        );

        assert_eq!(store.resolve(&Key::of::<Config>(), None).len(), 2);

        let only_b = store.resolve(
            &Key::of::<Config>(),
            Some(&|injectable: &Injectable| injectable.key.qualifiers.contains(&Qualifier::named("b"))),
        );
        assert_eq!(only_b.len(), 1);
    }

    #[test]
    fn test_remove_reindexes() {
        let mut store = store_with_basics();

        let removed = store.remove_key(&Key::of::<ApiImpl>());
        assert_eq!(removed.len(), 1);

        // Both the own-type and the alias index entries are gone
        assert!(store.resolve(&Key::of::<ApiImpl>(), None).is_empty());
        assert!(store.resolve(&Key::of::<dyn Api + Send + Sync>(), None).is_empty());
        assert!(store.contains(&Key::of::<Config>()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_key_is_exact() {
        let mut store = StoreInner::new();
        store.insert(
            Arc::new(Injectable::instance(Config).qualified(Qualifier::named("a")).build().unwrap()),
            0,
        );
        store.insert(Arc::new(Injectable::instance(Config).build().unwrap()), 0);

        let removed = store.remove_key(&Key::of::<Config>().qualified(Qualifier::named("a")));
        assert_eq!(removed.len(), 1);
        // The unqualified candidate survives
        assert!(store.contains(&Key::of::<Config>()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_epoch_listing() {
        let mut store = StoreInner::new();
        store.insert(Arc::new(Injectable::instance(Config).build().unwrap()), 3);
        store.insert(Arc::new(Injectable::instance(Service).build().unwrap()), 3);
        store.insert(Arc::new(Injectable::instance(ApiImpl).build().unwrap()), 4);

        assert_eq!(store.keys_in_epoch(3).len(), 2);
        assert_eq!(store.keys_in_epoch(4).len(), 1);
        assert!(store.keys_in_epoch(9).is_empty());
    }

    #[test]
    fn test_shadow_clone_is_independent() {
        let store = store_with_basics();
        let mut shadow = store.clone();

        shadow.remove_key(&Key::of::<Config>());
        shadow.insert(Arc::new(Injectable::instance(Service).build().unwrap()), 1);

        assert!(store.contains(&Key::of::<Config>()));
        assert!(!store.contains(&Key::of::<Service>()));
        assert!(!shadow.contains(&Key::of::<Config>()));
        assert!(shadow.contains(&Key::of::<Service>()));
    }
}
