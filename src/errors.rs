mod definition;
mod registry;
mod resolve;

pub use definition::DefinitionErrorKind;
pub use registry::{RegistryErrorKind, UnresolvedProblem};
pub use resolve::ResolveErrorKind;
