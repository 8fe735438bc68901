#![no_std]

extern crate alloc;

pub(crate) mod any;
pub(crate) mod binding;
pub(crate) mod config;
pub(crate) mod constructable;
pub(crate) mod context;
pub(crate) mod discovery;
pub(crate) mod engine;
pub(crate) mod errors;
pub(crate) mod injectable;
pub(crate) mod key;
pub(crate) mod lazy;
pub(crate) mod policy;
pub(crate) mod scope;
pub(crate) mod shape;
pub(crate) mod store;

pub use any::{AnyInstance, TypeInfo};
pub use binding::Binding;
pub use config::Config;
pub use constructable::{constructable_fn, Constructable, LifecycleHooks, SlotValue, Slots};
pub use context::CreationalContext;
pub use discovery::DerivationExtension;
pub use engine::{Engine, EngineBuilder, Registration};
pub use errors::{DefinitionErrorKind, RegistryErrorKind, ResolveErrorKind, UnresolvedProblem};
pub use injectable::{Injectable, InjectableBuilder};
pub use key::{Key, Predicate, Qualifier};
pub use lazy::Lazy;
pub use scope::{DefaultScope, Dependent, MapScopeResolver, Scope, ScopeMarker, ScopeResolver, ScopedInstance};
pub use shape::{Shape, ShapeTraits};
pub use store::InjectableId;
