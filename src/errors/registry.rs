use alloc::{boxed::Box, vec::Vec};
use core::fmt::{self, Display, Formatter};

use super::definition::DefinitionErrorKind;
use crate::key::Key;

/// A required binding the discovery pass could not satisfy. Problems are
/// collected across the whole pass and reported together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedProblem {
    pub key: Key,
    pub requester: Key,
}

impl Display for UnresolvedProblem {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} required by {}", self.key, self.requester)
    }
}

/// Rejection of a registration or removal batch. The store is left exactly
/// as it was before the call.
#[derive(thiserror::Error, Debug)]
pub enum RegistryErrorKind {
    Definition(#[from] DefinitionErrorKind),
    Cyclic { path: Box<[Key]> },
    Ambiguous { key: Key, requester: Key, candidates: Box<[Key]> },
    Unsatisfied { key: Key, requester: Key },
    StillRequired { key: Key, dependents: Box<[Key]> },
    AutoDiscoveryFailed { problems: Vec<UnresolvedProblem> },
}

impl Display for RegistryErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RegistryErrorKind::Definition(err) => Display::fmt(err, f),
            RegistryErrorKind::Cyclic { path } => {
                f.write_str("Cyclic dependency detected: ")?;
                for (index, key) in path.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" -> ")?;
                    }
                    write!(f, "{key}")?;
                }
                Ok(())
            }
            RegistryErrorKind::Ambiguous {
                key,
                requester,
                candidates,
            } => {
                write!(f, "Ambiguous dependency {key} required by {requester}; candidates: ")?;
                for (index, candidate) in candidates.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{candidate}")?;
                }
                Ok(())
            }
            RegistryErrorKind::Unsatisfied { key, requester } => {
                write!(f, "Unsatisfied dependency {key} required by {requester}")
            }
            RegistryErrorKind::StillRequired { key, dependents } => {
                write!(f, "Cannot remove {key}, still required by: ")?;
                for (index, dependent) in dependents.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{dependent}")?;
                }
                Ok(())
            }
            RegistryErrorKind::AutoDiscoveryFailed { problems } => {
                write!(f, "Discovery left {} unresolved problem(s): ", problems.len())?;
                for (index, problem) in problems.iter().enumerate() {
                    if index > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{problem}")?;
                }
                Ok(())
            }
        }
    }
}
