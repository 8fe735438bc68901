use alloc::{
    boxed::Box,
    collections::{BTreeSet, VecDeque},
    sync::Arc,
    vec::Vec,
};
use tracing::debug;

use crate::{errors::UnresolvedProblem, injectable::Injectable, key::Key, store::StoreInner};

/// Pluggable producer of candidates for keys nothing registered satisfies
/// yet, e.g. metadata-driven auto-registration.
pub trait DerivationExtension: Send + Sync {
    fn derive(&self, key: &Key) -> Vec<Injectable>;
}

pub(crate) struct Discovery {
    /// The seeds plus everything derived for them, submitted to the policy
    /// as one batch.
    pub(crate) additions: Vec<Arc<Injectable>>,
    pub(crate) problems: Vec<UnresolvedProblem>,
}

/// Expands the seeds to the full transitive closure of candidates needed so
/// every required binding along the way is satisfiable.
///
/// Breadth-first to a fixed point. Derivation is consulted per key at most
/// once and takes precedence over generic materialization (an empty
/// collection); problems are collected, not thrown, so one pass reports
/// them all. With auto-discovery off only the explicit `produces`
/// derivations of the seeds apply.
pub(crate) fn expand(
    store: &StoreInner,
    seeds: Vec<Injectable>,
    extensions: &[Box<dyn DerivationExtension>],
    auto_discover: bool,
) -> Discovery {
    let mut additions: Vec<Arc<Injectable>> = Vec::new();
    let mut problems: Vec<UnresolvedProblem> = Vec::new();
    let mut handled: BTreeSet<Key> = BTreeSet::new();

    let mut frontier: VecDeque<Injectable> = seeds.into_iter().collect();

    while let Some(injectable) = frontier.pop_front() {
        // Explicit producer-style derivations always apply.
        for produced in &injectable.produces {
            frontier.push_back(produced.clone());
        }

        let current = Arc::new(injectable);
        additions.push(current.clone());

        for binding in &current.bindings {
            let Some(required) = &binding.required else {
                continue;
            };

            let satisfiable = !store.resolve(required, None).is_empty()
                || additions.iter().any(|discovered| required.matches(discovered))
                || frontier.iter().any(|queued| required.matches(queued));
            if satisfiable {
                continue;
            }
            if !handled.insert(required.clone()) {
                continue;
            }

            let derived = if auto_discover {
                extensions
                    .iter()
                    .map(|extension| extension.derive(required))
                    .find(|derived| !derived.is_empty())
                    .unwrap_or_default()
            } else {
                Vec::new()
            };

            if derived.is_empty() {
                if binding.is_singular() {
                    problems.push(UnresolvedProblem {
                        key: required.clone(),
                        requester: current.key.clone(),
                    });
                }
                continue;
            }

            debug!(key = %required, count = derived.len(), "Derived candidates");
            frontier.extend(derived);
        }
    }

    Discovery { additions, problems }
}
