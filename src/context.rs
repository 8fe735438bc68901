use alloc::vec::Vec;

use crate::{errors::ResolveErrorKind, key::Key, scope::Dependent};

/// Per-resolution call state: the explicit construction stack (the guard
/// against construction-triggered cycles) and the unshared instances
/// created along the way, grouped into per-owner frames via marks.
///
/// Passed through the resolution call path rather than living in ambient
/// thread-local state, so the guard is visible in signatures and testable.
pub struct CreationalContext {
    pub(crate) stack: Vec<Key>,
    pub(crate) dependents: Vec<Dependent>,
}

impl Default for CreationalContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CreationalContext {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            dependents: Vec::new(),
        }
    }

    /// Pushes a candidate onto the construction stack, failing if it is
    /// already under construction in this call.
    pub(crate) fn enter(&mut self, key: &Key) -> Result<(), ResolveErrorKind> {
        if self.stack.contains(key) {
            let mut path = self.stack.clone();
            path.push(key.clone());
            return Err(ResolveErrorKind::ConstructionCycle {
                path: path.into_boxed_slice(),
            });
        }
        self.stack.push(key.clone());
        Ok(())
    }

    #[inline]
    pub(crate) fn exit(&mut self) {
        self.stack.pop();
    }

    #[inline]
    #[must_use]
    pub(crate) fn mark(&self) -> usize {
        self.dependents.len()
    }

    /// Hands over the dependents created since `mark` to the instance they
    /// were built for.
    #[inline]
    pub(crate) fn take_dependents_from(&mut self, mark: usize) -> Vec<Dependent> {
        self.dependents.split_off(mark)
    }

    #[inline]
    pub(crate) fn push_dependent(&mut self, dependent: Dependent) {
        self.dependents.push(dependent);
    }

    #[inline]
    pub(crate) fn drain_dependents(&mut self) -> Vec<Dependent> {
        core::mem::take(&mut self.dependents)
    }
}
