use core::{
    any::{type_name, Any, TypeId},
    cmp::Ordering,
    fmt::{self, Display, Formatter},
};

use alloc::sync::Arc;

/// Canonical descriptor of a Rust type.
///
/// Identity is the [`TypeId`], which is structural: two syntactic spellings
/// of the same generic shape (e.g. a type alias and its expansion) share one
/// id. The name is carried for diagnostics only and never participates in
/// equality or ordering.
#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    pub name: &'static str,
    pub id: TypeId,
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeInfo {}

impl PartialOrd for TypeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl TypeInfo {
    #[inline]
    #[must_use]
    pub fn of<T>() -> Self
    where
        T: ?Sized + 'static,
    {
        Self {
            name: type_name::<T>(),
            id: TypeId::of::<T>(),
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn short_name(&self) -> &'static str {
        self.name.rsplit_once("::").map_or(self.name, |(_, name)| name)
    }
}

impl Display for TypeInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A shared, type-erased instance as held by scope maps and caches.
pub type AnyInstance = Arc<dyn Any + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::TypeInfo;

    use alloc::{string::String, vec::Vec};

    #[test]
    fn test_structural_identity() {
        type Spelled = Vec<String>;

        assert_eq!(TypeInfo::of::<Vec<String>>(), TypeInfo::of::<Spelled>());
        assert_ne!(TypeInfo::of::<Vec<String>>(), TypeInfo::of::<Vec<u8>>());
    }

    #[test]
    fn test_short_name() {
        assert_eq!(TypeInfo::of::<String>().short_name(), "String");
        assert_eq!(TypeInfo::of::<u8>().short_name(), "u8");
    }
}
