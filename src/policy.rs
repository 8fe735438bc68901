use alloc::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    vec::Vec,
};
use tracing::debug;

use crate::{
    any::TypeInfo,
    errors::RegistryErrorKind,
    injectable::Injectable,
    key::Key,
    store::{InjectableId, StoreInner},
};

/// A proposed store mutation: candidates to add and keys to remove,
/// admitted or rejected as a whole.
pub(crate) struct Batch {
    pub(crate) additions: Vec<Arc<Injectable>>,
    pub(crate) removals: Vec<Key>,
}

/// Validates the batch against the global invariants on a shadow of the
/// live store and returns the shadow for the caller to swap in. The live
/// store is never touched; on any failure it is provably unchanged.
pub(crate) fn validate_batch(live: &StoreInner, batch: &Batch, epoch: u64) -> Result<StoreInner, RegistryErrorKind> {
    let mut shadow = live.clone();

    // Removals before additions, so a batch that removes and re-adds one
    // key has replace semantics.
    let mut touched: BTreeSet<TypeInfo> = BTreeSet::new();
    for key in &batch.removals {
        for removed in shadow.remove_key(key) {
            touched.extend(removed.provided_types());
        }
    }

    let mut added_ids = Vec::with_capacity(batch.additions.len());
    for injectable in &batch.additions {
        touched.extend(injectable.provided_types());
        added_ids.push(shadow.insert(injectable.clone(), epoch));
    }

    audit_bindings(live, &shadow, &added_ids, &touched, &batch.removals)?;

    if let Some(path) = detect_cycle(&shadow) {
        debug!(len = path.len(), "Cycle detected, batch rejected");
        return Err(RegistryErrorKind::Cyclic {
            path: path.into_boxed_slice(),
        });
    }

    debug!(additions = batch.additions.len(), removals = batch.removals.len(), "Batch validated");
    Ok(shadow)
}

/// Re-checks the singularity invariant for every candidate the batch could
/// have affected: all added ones, plus every survivor with a binding whose
/// required type the batch touched.
fn audit_bindings(
    live: &StoreInner,
    shadow: &StoreInner,
    added_ids: &[InjectableId],
    touched: &BTreeSet<TypeInfo>,
    removals: &[Key],
) -> Result<(), RegistryErrorKind> {
    let added: BTreeSet<InjectableId> = added_ids.iter().copied().collect();

    let audited = shadow.iter().filter(|(id, injectable)| {
        added.contains(id)
            || injectable.bindings.iter().any(|binding| {
                binding
                    .required
                    .as_ref()
                    .map_or(false, |required| touched.contains(&required.type_info))
            })
    });

    let mut first_failure: Option<RegistryErrorKind> = None;
    let mut still_required: BTreeMap<Key, Vec<Key>> = BTreeMap::new();

    for (_, injectable) in audited {
        for binding in &injectable.bindings {
            let Some(required) = &binding.required else {
                continue;
            };
            if binding.collection {
                continue;
            }

            let matches = shadow.resolve(required, None);
            match matches.len() {
                1 => {}
                0 if binding.optional => {}
                0 => {
                    // Distinguish "never satisfiable" from "this batch just
                    // removed the only provider".
                    let removed_providers: Vec<Key> = live
                        .resolve(required, None)
                        .into_iter()
                        .filter(|(_, provider)| removals.contains(&provider.key))
                        .map(|(_, provider)| provider.key.clone())
                        .collect();

                    if let Some(provider) = removed_providers.into_iter().next() {
                        still_required.entry(provider).or_default().push(injectable.key.clone());
                    } else if first_failure.is_none() {
                        first_failure = Some(RegistryErrorKind::Unsatisfied {
                            key: required.clone(),
                            requester: injectable.key.clone(),
                        });
                    }
                }
                _ => {
                    if first_failure.is_none() {
                        first_failure = Some(RegistryErrorKind::Ambiguous {
                            key: required.clone(),
                            requester: injectable.key.clone(),
                            candidates: matches
                                .into_iter()
                                .map(|(_, candidate)| candidate.key.clone())
                                .collect::<Vec<_>>()
                                .into_boxed_slice(),
                        });
                    }
                }
            }
        }
    }

    if let Some((key, mut dependents)) = still_required.into_iter().next() {
        dependents.sort();
        dependents.dedup();
        return Err(RegistryErrorKind::StillRequired {
            key,
            dependents: dependents.into_boxed_slice(),
        });
    }
    match first_failure {
        Some(failure) => Err(failure),
        None => Ok(()),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Iterative three-colouring over the direct-binding graph. Returns the
/// full cycle path on the first back-edge. Deferred bindings contribute no
/// edges; they are the legitimate cycle breakers.
fn detect_cycle(shadow: &StoreInner) -> Option<Vec<Key>> {
    let mut colors: BTreeMap<InjectableId, Color> = shadow.iter().map(|(id, _)| (id, Color::White)).collect();

    let direct_targets = |id: InjectableId| -> Vec<InjectableId> {
        let Some(injectable) = shadow.get(id) else {
            return Vec::new();
        };
        injectable
            .bindings
            .iter()
            .filter(|binding| binding.direct)
            .filter_map(|binding| binding.required.as_ref())
            .flat_map(|required| shadow.resolve(required, None))
            .map(|(target_id, _)| target_id)
            .collect()
    };

    let roots: Vec<InjectableId> = shadow.iter().map(|(id, _)| id).collect();
    for root in roots {
        if colors[&root] != Color::White {
            continue;
        }

        // Explicit frame stack; `path` mirrors the gray chain for cycle
        // reconstruction.
        let mut frames: Vec<(InjectableId, Vec<InjectableId>, usize)> = Vec::new();
        let mut path: Vec<InjectableId> = Vec::new();

        colors.insert(root, Color::Gray);
        frames.push((root, direct_targets(root), 0));
        path.push(root);

        while let Some((id, targets, cursor)) = frames.last_mut() {
            if *cursor >= targets.len() {
                colors.insert(*id, Color::Black);
                path.pop();
                frames.pop();
                continue;
            }

            let target = targets[*cursor];
            *cursor += 1;

            match colors[&target] {
                Color::Gray => {
                    let start = path.iter().position(|held| *held == target).unwrap_or(0);
                    return Some(
                        path[start..]
                            .iter()
                            .filter_map(|cycle_id| shadow.get(*cycle_id))
                            .map(|injectable| injectable.key.clone())
                            .collect(),
                    );
                }
                Color::White => {
                    colors.insert(target, Color::Gray);
                    frames.push((target, direct_targets(target), 0));
                    path.push(target);
                }
                Color::Black => {}
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::{validate_batch, Batch};
    use crate::{
        constructable::{constructable_fn, Slots},
        errors::RegistryErrorKind,
        injectable::Injectable,
        key::{Key, Qualifier},
        store::StoreInner,
    };

    use alloc::{
        format,
        string::{String, ToString},
        sync::Arc,
        vec,
        vec::Vec,
    };
    use tracing_test::traced_test;

    struct A;
    struct B;
    struct C;
    struct D;

    fn leaf<T: Send + Sync + 'static + Default>() -> Arc<Injectable> {
        Arc::new(Injectable::instance(T::default()).build().unwrap())
    }

    impl Default for A {
        fn default() -> Self {
            A
        }
    }
    impl Default for B {
        fn default() -> Self {
            B
        }
    }
    impl Default for C {
        fn default() -> Self {
            C
        }
    }
    impl Default for D {
        fn default() -> Self {
            D
        }
    }

    fn requires<T, D>() -> Arc<Injectable>
    where
        T: Send + Sync + 'static + Default,
        D: 'static,
    {
        Arc::new(
            Injectable::builder::<T>()
                .require::<D>()
                .construct(constructable_fn(|_: &Slots| Ok(T::default())))
                .build()
                .unwrap(),
        )
    }

    fn add(additions: Vec<Arc<Injectable>>) -> Batch {
        Batch {
            additions,
            removals: Vec::new(),
        }
    }

    #[test]
    #[traced_test]
    fn test_valid_batch_commits_additions() {
        let live = StoreInner::new();
        let shadow = validate_batch(&live, &add(vec![leaf::<A>(), requires::<B, A>()]), 1).unwrap();

        assert!(shadow.contains(&Key::of::<A>()));
        assert!(shadow.contains(&Key::of::<B>()));
        // The live store is untouched until the caller swaps
        assert!(!live.contains(&Key::of::<A>()));
    }

    #[test]
    #[traced_test]
    fn test_unsatisfied_rejected() {
        let live = StoreInner::new();
        let err = validate_batch(&live, &add(vec![requires::<B, A>()]), 1).unwrap_err();

        assert!(matches!(err, RegistryErrorKind::Unsatisfied { key, .. } if key == Key::of::<A>()));
    }

    #[test]
    #[traced_test]
    fn test_optional_zero_allowed() {
        let live = StoreInner::new();
        let optional = Arc::new(
            Injectable::builder::<B>()
                .require_maybe::<A>()
                .construct(constructable_fn(|_: &Slots| Ok(B)))
                .build()
                .unwrap(),
        );

        assert!(validate_batch(&live, &add(vec![optional]), 1).is_ok());
    }

    #[test]
    #[traced_test]
    fn test_collection_zero_allowed() {
        let live = StoreInner::new();
        let collector = Arc::new(
            Injectable::builder::<B>()
                .require_all::<A>()
                .construct(constructable_fn(|_: &Slots| Ok(B)))
                .build()
                .unwrap(),
        );

        assert!(validate_batch(&live, &add(vec![collector]), 1).is_ok());
    }

    #[test]
    #[traced_test]
    fn test_ambiguity_rejected() {
        let live = StoreInner::new();
        let err = validate_batch(&live, &add(vec![leaf::<A>(), leaf::<A>(), requires::<B, A>()]), 1).unwrap_err();

        match err {
            RegistryErrorKind::Ambiguous { key, candidates, .. } => {
                assert_eq!(key, Key::of::<A>());
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("expected ambiguity, got {other}"),
        }
    }

    #[test]
    #[traced_test]
    fn test_disjoint_qualifiers_not_ambiguous() {
        let live = StoreInner::new();
        let primary = Arc::new(Injectable::instance(A).qualified(Qualifier::named("primary")).build().unwrap());
        let fallback = Arc::new(Injectable::instance(A).qualified(Qualifier::named("fallback")).build().unwrap());
        let requirer = Arc::new(
            Injectable::builder::<B>()
                .require_shaped(
                    Key::of::<A>().qualified(Qualifier::named("primary")),
                    crate::shape::Shape::One,
                )
                .construct(constructable_fn(|_: &Slots| Ok(B)))
                .build()
                .unwrap(),
        );

        assert!(validate_batch(&live, &add(vec![primary, fallback, requirer]), 1).is_ok());
    }

    #[test]
    #[traced_test]
    fn test_addition_breaks_existing_singular_binding() {
        let live = StoreInner::new();
        let live = validate_batch(&live, &add(vec![leaf::<A>(), requires::<B, A>()]), 1).unwrap();

        // The new candidate is valid in isolation; it is the pre-existing
        // binding of B that becomes ambiguous.
        let err = validate_batch(&live, &add(vec![leaf::<A>()]), 2).unwrap_err();
        assert!(matches!(err, RegistryErrorKind::Ambiguous { requester, .. } if requester == Key::of::<B>()));
    }

    #[test]
    #[traced_test]
    fn test_cycle_rejected_with_full_path() {
        let live = StoreInner::new();
        let err = validate_batch(
            &live,
            &add(vec![requires::<A, B>(), requires::<B, C>(), requires::<C, A>()]),
            1,
        )
        .unwrap_err();

        match err {
            RegistryErrorKind::Cyclic { path } => {
                assert_eq!(path.len(), 3);
                assert!(path.contains(&Key::of::<A>()));
                assert!(path.contains(&Key::of::<B>()));
                assert!(path.contains(&Key::of::<C>()));
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    #[traced_test]
    fn test_self_cycle_rejected() {
        let live = StoreInner::new();
        let err = validate_batch(&live, &add(vec![requires::<A, A>()]), 1).unwrap_err();

        assert!(matches!(err, RegistryErrorKind::Cyclic { path } if path.len() == 1));
    }

    #[test]
    #[traced_test]
    fn test_lazy_binding_breaks_cycle() {
        let live = StoreInner::new();
        let lazy_back = Arc::new(
            Injectable::builder::<B>()
                .require_lazy::<A>()
                .construct(constructable_fn(|_: &Slots| Ok(B)))
                .build()
                .unwrap(),
        );

        assert!(validate_batch(&live, &add(vec![requires::<A, B>(), lazy_back]), 1).is_ok());
    }

    #[test]
    #[traced_test]
    fn test_removal_guard() {
        let live = StoreInner::new();
        let live = validate_batch(&live, &add(vec![leaf::<A>(), requires::<B, A>()]), 1).unwrap();

        let err = validate_batch(
            &live,
            &Batch {
                additions: Vec::new(),
                removals: vec![Key::of::<A>()],
            },
            2,
        )
        .unwrap_err();

        match err {
            RegistryErrorKind::StillRequired { key, dependents } => {
                assert_eq!(key, Key::of::<A>());
                assert_eq!(&*dependents, &[Key::of::<B>()]);
            }
            other => panic!("expected removal guard, got {other}"),
        }

        // Removing both in one batch is fine
        let shadow = validate_batch(
            &live,
            &Batch {
                additions: Vec::new(),
                removals: vec![Key::of::<A>(), Key::of::<B>()],
            },
            2,
        )
        .unwrap();
        assert_eq!(shadow.len(), 0);
    }

    #[test]
    #[traced_test]
    fn test_replace_in_one_batch() {
        let live = StoreInner::new();
        let live = validate_batch(&live, &add(vec![leaf::<A>(), requires::<B, A>()]), 1).unwrap();

        // Removal applies before addition, so this is a replace, not an
        // ambiguity.
        let shadow = validate_batch(
            &live,
            &Batch {
                additions: vec![leaf::<A>()],
                removals: vec![Key::of::<A>()],
            },
            2,
        )
        .unwrap();
        assert_eq!(shadow.resolve(&Key::of::<A>(), None).len(), 1);
    }

    #[test]
    #[traced_test]
    fn test_rejection_leaves_live_unchanged() {
        let live = StoreInner::new();
        let live = validate_batch(&live, &add(vec![leaf::<A>(), requires::<B, A>()]), 1).unwrap();
        let before = live.len();

        let _ = validate_batch(&live, &add(vec![requires::<D, C>()]), 2).unwrap_err();

        assert_eq!(live.len(), before);
        assert!(live.contains(&Key::of::<A>()));
        assert!(live.contains(&Key::of::<B>()));
        assert!(!live.contains(&Key::of::<D>()));
    }
}
