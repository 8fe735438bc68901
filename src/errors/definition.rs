use crate::key::Key;

/// Malformed candidate metadata, detected before any graph analysis.
#[derive(thiserror::Error, Debug)]
pub enum DefinitionErrorKind {
    #[error("Candidate {key} has no construction strategy")]
    MissingConstructable { key: Key },
    #[error("Candidate {key} declares scope {scope:?}, but no resolver is registered for it")]
    UnknownScope { key: Key, scope: &'static str },
}
