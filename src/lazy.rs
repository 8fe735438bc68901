use alloc::{sync::Arc, vec::Vec};
use core::marker::PhantomData;
use parking_lot::Mutex;

use crate::{
    any::TypeInfo,
    constructable::SlotValue,
    engine::Engine,
    errors::ResolveErrorKind,
    key::Key,
    shape::Shape,
};

/// Erased deferred-access handle. Resolution of the captured request runs
/// on first use, in a fresh creational context: by then the construction
/// that received the handle has completed, which is what lets a deferred
/// slot close an otherwise cyclic graph.
#[derive(Clone)]
pub struct LazyHandle {
    engine: Engine,
    key: Key,
    shape: Shape,
    cell: Arc<Mutex<Option<SlotValue>>>,
}

impl LazyHandle {
    #[inline]
    #[must_use]
    pub(crate) fn new(engine: Engine, key: Key, shape: Shape) -> Self {
        Self {
            engine,
            key,
            shape,
            cell: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn force(&self) -> Result<SlotValue, ResolveErrorKind> {
        let mut cell = self.cell.lock();
        if let Some(value) = &*cell {
            return Ok(value.clone());
        }

        let value = self.engine.resolve(&self.key, &self.shape, None)?;
        *cell = Some(value.clone());
        Ok(value)
    }
}

/// Typed deferred-access wrapper handed to constructors for deferred slots.
pub struct Lazy<T: ?Sized> {
    handle: LazyHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ?Sized> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Lazy<T> {
    #[inline]
    #[must_use]
    pub(crate) fn new(handle: LazyHandle) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> Lazy<T> {
    /// Resolves the deferred single value. The result is cached; repeated
    /// calls return the same instance.
    pub fn get(&self) -> Result<Arc<T>, ResolveErrorKind> {
        match self.handle.force()? {
            SlotValue::One(instance) => downcast::<T>(instance),
            _ => Err(shape_mismatch::<T>()),
        }
    }

    /// Resolves a deferred optional value.
    pub fn try_get(&self) -> Result<Option<Arc<T>>, ResolveErrorKind> {
        match self.handle.force()? {
            SlotValue::Maybe(Some(instance)) => downcast::<T>(instance).map(Some),
            SlotValue::Maybe(None) => Ok(None),
            _ => Err(shape_mismatch::<T>()),
        }
    }

    /// Resolves a deferred collection.
    pub fn get_all(&self) -> Result<Vec<Arc<T>>, ResolveErrorKind> {
        match self.handle.force()? {
            SlotValue::All(instances) => instances.into_iter().map(downcast::<T>).collect(),
            _ => Err(shape_mismatch::<T>()),
        }
    }
}

fn downcast<T: Send + Sync + 'static>(instance: crate::any::AnyInstance) -> Result<Arc<T>, ResolveErrorKind> {
    instance.downcast::<T>().map_err(|_| ResolveErrorKind::IncorrectType {
        expected: TypeInfo::of::<T>(),
        actual: "an instance of another type",
    })
}

fn shape_mismatch<T: 'static>() -> ResolveErrorKind {
    ResolveErrorKind::IncorrectType {
        expected: TypeInfo::of::<T>(),
        actual: "a differently-shaped slot",
    }
}
