use alloc::{sync::Arc, vec::Vec};
use anyhow::anyhow;
use core::any::type_name;

use crate::{
    any::AnyInstance,
    lazy::{Lazy, LazyHandle},
};

/// Construction strategy of a candidate, opaque to the consistency engine.
///
/// `create` receives the already-resolved binding values in slot order and
/// returns the erased instance. `destroy` is invoked at release, after the
/// before-destroy hook.
pub trait Constructable: Send + Sync {
    fn create(&self, slots: &Slots) -> Result<AnyInstance, anyhow::Error>;

    fn destroy(&self, _instance: &AnyInstance) {}
}

pub(crate) type BoxedConstructable = Arc<dyn Constructable>;

/// Post-construction and pre-destruction callbacks for one candidate.
pub trait LifecycleHooks: Send + Sync {
    fn after_construct(&self, _instance: &AnyInstance) -> Result<(), anyhow::Error> {
        Ok(())
    }

    fn before_destroy(&self, _instance: &AnyInstance) {}
}

/// A resolved binding value, in the form the slot's shape dictates.
#[derive(Clone)]
pub enum SlotValue {
    One(AnyInstance),
    Maybe(Option<AnyInstance>),
    All(Vec<AnyInstance>),
    Deferred(LazyHandle),
}

/// Resolved binding values passed to [`Constructable::create`], indexed by
/// slot in declaration order.
pub struct Slots {
    pub(crate) values: Vec<SlotValue>,
}

impl Slots {
    #[inline]
    #[must_use]
    pub(crate) fn new(values: Vec<SlotValue>) -> Self {
        Self { values }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn one<T: Send + Sync + 'static>(&self, slot: usize) -> Result<Arc<T>, anyhow::Error> {
        match self.values.get(slot) {
            Some(SlotValue::One(instance)) => downcast::<T>(instance.clone()),
            Some(_) => Err(anyhow!("slot {slot} does not hold a single value")),
            None => Err(anyhow!("no slot {slot}")),
        }
    }

    pub fn maybe<T: Send + Sync + 'static>(&self, slot: usize) -> Result<Option<Arc<T>>, anyhow::Error> {
        match self.values.get(slot) {
            Some(SlotValue::Maybe(Some(instance))) => downcast::<T>(instance.clone()).map(Some),
            Some(SlotValue::Maybe(None)) => Ok(None),
            Some(_) => Err(anyhow!("slot {slot} does not hold an optional value")),
            None => Err(anyhow!("no slot {slot}")),
        }
    }

    pub fn all<T: Send + Sync + 'static>(&self, slot: usize) -> Result<Vec<Arc<T>>, anyhow::Error> {
        match self.values.get(slot) {
            Some(SlotValue::All(instances)) => instances.iter().map(|instance| downcast::<T>(instance.clone())).collect(),
            Some(_) => Err(anyhow!("slot {slot} does not hold a collection")),
            None => Err(anyhow!("no slot {slot}")),
        }
    }

    pub fn deferred<T: Send + Sync + 'static>(&self, slot: usize) -> Result<Lazy<T>, anyhow::Error> {
        match self.values.get(slot) {
            Some(SlotValue::Deferred(handle)) => Ok(Lazy::new(handle.clone())),
            Some(_) => Err(anyhow!("slot {slot} does not hold a deferred value")),
            None => Err(anyhow!("no slot {slot}")),
        }
    }
}

fn downcast<T: Send + Sync + 'static>(instance: AnyInstance) -> Result<Arc<T>, anyhow::Error> {
    instance
        .downcast::<T>()
        .map_err(|_| anyhow!("slot value is not a {}", type_name::<T>()))
}

#[derive(Clone)]
struct ConstructableFn<F> {
    f: F,
}

impl<T, F> Constructable for ConstructableFn<F>
where
    T: Send + Sync + 'static,
    F: Fn(&Slots) -> Result<T, anyhow::Error> + Send + Sync,
{
    fn create(&self, slots: &Slots) -> Result<AnyInstance, anyhow::Error> {
        (self.f)(slots).map(|value| Arc::new(value) as AnyInstance)
    }
}

/// Wraps a plain function into a construction strategy.
#[inline]
#[must_use]
pub fn constructable_fn<T, F>(f: F) -> impl Constructable
where
    T: Send + Sync + 'static,
    F: Fn(&Slots) -> Result<T, anyhow::Error> + Send + Sync,
{
    ConstructableFn { f }
}
