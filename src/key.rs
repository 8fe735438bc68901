use alloc::collections::BTreeSet;
use core::fmt::{self, Display, Formatter};

use crate::{any::TypeInfo, injectable::Injectable};

/// A marker narrowing a lookup beyond the bare type, e.g. `named("primary")`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Qualifier {
    pub name: &'static str,
    pub value: Option<&'static str>,
}

impl Qualifier {
    #[inline]
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name, value: None }
    }

    #[inline]
    #[must_use]
    pub const fn named(value: &'static str) -> Self {
        Self {
            name: "named",
            value: Some(value),
        }
    }
}

/// Identity of a lookup: a type descriptor plus an unordered,
/// deduplicated qualifier set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Key {
    pub type_info: TypeInfo,
    pub qualifiers: BTreeSet<Qualifier>,
}

impl Key {
    #[inline]
    #[must_use]
    pub fn of<T>() -> Self
    where
        T: ?Sized + 'static,
    {
        Self {
            type_info: TypeInfo::of::<T>(),
            qualifiers: BTreeSet::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn from_type_info(type_info: TypeInfo) -> Self {
        Self {
            type_info,
            qualifiers: BTreeSet::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn qualified(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.insert(qualifier);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_qualifiers(mut self, qualifiers: impl IntoIterator<Item = Qualifier>) -> Self {
        self.qualifiers.extend(qualifiers);
        self
    }

    /// Whether a candidate satisfies this lookup: the candidate provides the
    /// requested type (its own type or a declared alias) and carries every
    /// requested qualifier.
    #[must_use]
    pub fn matches(&self, candidate: &Injectable) -> bool {
        if !candidate.provides(&self.type_info) {
            return false;
        }
        self.qualifiers.is_subset(&candidate.key.qualifiers)
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_info)?;
        if !self.qualifiers.is_empty() {
            f.write_str(" [")?;
            for (index, qualifier) in self.qualifiers.iter().enumerate() {
                if index > 0 {
                    f.write_str(", ")?;
                }
                match qualifier.value {
                    Some(value) => write!(f, "{}={value}", qualifier.name)?,
                    None => f.write_str(qualifier.name)?,
                }
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

/// Caller-supplied filter applied on top of type and qualifier matching.
pub type Predicate = dyn Fn(&Injectable) -> bool + Send + Sync;

#[cfg(test)]
mod tests {
    use super::{Key, Qualifier};
    use crate::{any::TypeInfo, injectable::Injectable, scope::DefaultScope};

    use alloc::{format, string::String};

    struct Repo;
    trait Backend {}

    fn candidate(qualifiers: &[Qualifier]) -> Injectable {
        Injectable::instance(Repo)
            .with_qualifiers(qualifiers.iter().copied())
            .scope(DefaultScope::App)
            .build()
            .unwrap()
    }

    #[test]
    fn test_key_equality() {
        let plain = Key::of::<Repo>();
        let named = Key::of::<Repo>().qualified(Qualifier::named("primary"));

        assert_eq!(plain, Key::of::<Repo>());
        assert_ne!(plain, named);
        // Insertion order must not matter for equality
        assert_eq!(
            Key::of::<Repo>()
                .qualified(Qualifier::new("a"))
                .qualified(Qualifier::new("b")),
            Key::of::<Repo>()
                .qualified(Qualifier::new("b"))
                .qualified(Qualifier::new("a")),
        );
    }

    #[test]
    fn test_qualifier_subset_match() {
        let unqualified = candidate(&[]);
        let primary = candidate(&[Qualifier::named("primary")]);

        assert!(Key::of::<Repo>().matches(&unqualified));
        // An unqualified request matches qualified candidates too
        assert!(Key::of::<Repo>().matches(&primary));

        let request = Key::of::<Repo>().qualified(Qualifier::named("primary"));
        assert!(request.matches(&primary));
        assert!(!request.matches(&unqualified));

        let wrong = Key::of::<Repo>().qualified(Qualifier::named("secondary"));
        assert!(!wrong.matches(&primary));
    }

    #[test]
    fn test_alias_match() {
        let aliased = Injectable::instance(Repo)
            .alias::<dyn Backend + Send + Sync>()
            .scope(DefaultScope::App)
            .build()
            .unwrap();

        assert!(Key::of::<dyn Backend + Send + Sync>().matches(&aliased));
        assert!(Key::of::<Repo>().matches(&aliased));
        assert!(!Key::of::<String>().matches(&aliased));
    }

    #[test]
    fn test_display() {
        let key = Key::of::<Repo>().qualified(Qualifier::named("primary"));
        let rendered = format!("{key}");

        assert!(rendered.contains("Repo"));
        assert!(rendered.contains("named=primary"));
        assert_eq!(format!("{}", TypeInfo::of::<Repo>()), "Repo");
    }
}
