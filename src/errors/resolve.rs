use alloc::boxed::Box;
use core::fmt::{self, Display, Formatter};

use crate::{any::TypeInfo, key::Key};

/// Failure of a single `resolve` call. Store state is never affected; any
/// instance under construction at the time is rolled back.
#[derive(thiserror::Error, Debug)]
pub enum ResolveErrorKind {
    Unsatisfied { key: Key },
    Ambiguous { key: Key, candidates: Box<[Key]> },
    ScopeNotActive { scope: &'static str },
    NoScopeResolver { scope: &'static str },
    ConstructionCycle { path: Box<[Key]> },
    CreationFailed(#[source] anyhow::Error),
    IncorrectType { expected: TypeInfo, actual: &'static str },
}

impl Display for ResolveErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ResolveErrorKind::Unsatisfied { key } => write!(f, "No candidate for {key}"),
            ResolveErrorKind::Ambiguous { key, candidates } => {
                write!(f, "Several candidates for {key}: ")?;
                for (index, candidate) in candidates.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{candidate}")?;
                }
                Ok(())
            }
            ResolveErrorKind::ScopeNotActive { scope } => {
                write!(f, "Scope {scope:?} has no active discriminator")
            }
            ResolveErrorKind::NoScopeResolver { scope } => {
                write!(f, "No resolver registered for scope {scope:?}")
            }
            ResolveErrorKind::ConstructionCycle { path } => {
                f.write_str("Construction re-entered its own dependency: ")?;
                for (index, key) in path.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" -> ")?;
                    }
                    write!(f, "{key}")?;
                }
                Ok(())
            }
            ResolveErrorKind::CreationFailed(err) => write!(f, "Construction failed: {err}"),
            ResolveErrorKind::IncorrectType { expected, actual } => {
                write!(f, "Constructed value is not a {expected}; got {actual}")
            }
        }
    }
}
