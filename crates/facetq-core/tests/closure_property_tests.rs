use std::collections::BTreeSet;

use facetq_core::combinator::{combine, GroupingKey, MatchMode, RowFilter};
use facetq_core::eval::{row_keys, ClassificationRecord, EntityRecord, FactSnapshot};
use facetq_core::taxonomy::{NodeSet, TaxonomyIndex, TaxonomyNode};
use proptest::prelude::*;

const MAX_NODES: usize = 24;
const MAX_ENTITIES: i64 = 8;

/// A random forest: node `i` either is a root or hangs under an earlier node.
fn forest_strategy() -> impl Strategy<Value = Vec<TaxonomyNode>> {
    (1usize..=MAX_NODES)
        .prop_flat_map(|n| prop::collection::vec(prop::option::weighted(0.8, any::<prop::sample::Index>()), n))
        .prop_map(|parents| {
            parents
                .into_iter()
                .enumerate()
                .map(|(i, parent)| {
                    let id = i as i64 + 1;
                    let parent = if i == 0 {
                        None
                    } else {
                        parent.map(|ix| ix.index(i) as i64 + 1)
                    };
                    TaxonomyNode::new(id, format!("node-{id:02}"), parent)
                })
                .collect()
        })
}

/// Forest plus random (entity, node) facts over it.
fn snapshot_strategy() -> impl Strategy<Value = FactSnapshot> {
    forest_strategy().prop_flat_map(|nodes| {
        let n = nodes.len() as i64;
        prop::collection::vec((1..=MAX_ENTITIES, 1..=n), 0..40).prop_map(move |facts| FactSnapshot {
            nodes: nodes.clone(),
            entities: (1..=MAX_ENTITIES)
                .map(|id| EntityRecord {
                    id,
                    last_name: format!("entity-{id}"),
                    first_name: String::new(),
                })
                .collect(),
            classifications: facts
                .into_iter()
                .map(|(entity_id, node_id)| ClassificationRecord {
                    entity_id,
                    node_id,
                    role: Some("Expert".into()),
                    temporal_status: Some("Présent".into()),
                    ..Default::default()
                })
                .collect(),
        })
    })
}

fn index(nodes: &[TaxonomyNode]) -> TaxonomyIndex {
    TaxonomyIndex::from_nodes(nodes.iter().cloned()).unwrap()
}

fn entities_for(snapshot: &FactSnapshot, seeds: &[i64], mode: MatchMode) -> BTreeSet<i64> {
    let taxonomy = snapshot.taxonomy().unwrap();
    let set = NodeSet::new(seeds.to_vec(), true);
    let pred = combine(
        GroupingKey::Entity,
        taxonomy.closures_per_seed(&set),
        mode,
        None,
        RowFilter::default(),
    );
    row_keys(GroupingKey::Entity, &snapshot.evaluate(&pred))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn closure_without_inclusion_is_the_seed_set(nodes in forest_strategy(), seeds in prop::collection::vec(1i64..=40, 0..6)) {
        let taxonomy = index(&nodes);
        let closure = taxonomy.closure_of(&NodeSet::new(seeds.clone(), false));
        let expected: BTreeSet<i64> = seeds.into_iter().collect();
        prop_assert_eq!(closure, expected);
    }

    #[test]
    fn closure_is_exactly_descendants_or_self(nodes in forest_strategy(), seed in 1i64..=MAX_NODES as i64) {
        let taxonomy = index(&nodes);
        prop_assume!(taxonomy.contains(seed));
        let closure = taxonomy.closure_of(&NodeSet::new(vec![seed], true));
        for node in taxonomy.nodes() {
            prop_assert_eq!(
                closure.contains(&node.id),
                taxonomy.is_descendant_or_self(node.id, seed),
                "node {} vs seed {}", node.id, seed
            );
        }
        prop_assert!(closure.contains(&seed));
        prop_assert!(!taxonomy.descendants_of(seed).contains(&seed));
    }

    #[test]
    fn tree_lists_every_node_once(nodes in forest_strategy()) {
        let taxonomy = index(&nodes);
        let listed: Vec<i64> = taxonomy.tree().into_iter().map(|e| e.id).collect();
        let distinct: BTreeSet<i64> = listed.iter().copied().collect();
        prop_assert_eq!(listed.len(), nodes.len());
        prop_assert_eq!(distinct.len(), nodes.len());
    }

    #[test]
    fn any_grows_and_all_shrinks_with_more_seeds(
        snapshot in snapshot_strategy(),
        seeds in prop::collection::vec(1i64..=MAX_NODES as i64, 1..4),
        extra in 1i64..=MAX_NODES as i64,
    ) {
        let mut more = seeds.clone();
        more.push(extra);

        let any_few = entities_for(&snapshot, &seeds, MatchMode::Any);
        let any_more = entities_for(&snapshot, &more, MatchMode::Any);
        prop_assert!(any_few.is_subset(&any_more));

        let all_few = entities_for(&snapshot, &seeds, MatchMode::All);
        let all_more = entities_for(&snapshot, &more, MatchMode::All);
        prop_assert!(all_more.is_subset(&all_few));
        prop_assert!(all_few.is_subset(&any_few));
    }

    #[test]
    fn single_seed_any_equals_all(snapshot in snapshot_strategy(), seed in 1i64..=MAX_NODES as i64) {
        let any = entities_for(&snapshot, &[seed], MatchMode::Any);
        let all = entities_for(&snapshot, &[seed], MatchMode::All);
        prop_assert_eq!(any, all);
    }
}
