//! End-to-end mapping workflows over the public API: building the graph from rows, resolving
//! it level by level, user corrections, and resuming a saved session.

mod common;

use common::{hierarchy, memory_store, row, BLOCK, DISTRICT, STATE};
use lgd_resolve::{
    builder::GraphBuilder,
    event::MappingEvent,
    export::annotate_rows,
    feedback::{submit_variation, suggest_variation},
    graph::NodeState,
    matcher::{MatchOptions, Matcher},
    nodekey::{KeyStrategy, NodeKey},
    orchestrator::Orchestrator,
    properties::{Entity, Match, MatchType},
    session::MappingSession,
    state::StateMetadata,
    store::{MemoryStore, ReferenceStore},
    MapperError,
};
use test_log::test;

fn kerala() -> NodeKey {
    NodeKey::root(STATE, "Kerala")
}

#[test]
fn rows_become_one_node_per_place() {
    let rows = vec![
        row(&[("state", "Kerala"), ("district", "Ernakulam")]),
        row(&[("state", "Kerala"), ("district", "Kottayam")]),
    ];
    let graph = GraphBuilder::default()
        .build(&rows, &hierarchy(&[("state", STATE), ("district", DISTRICT)]))
        .unwrap();

    assert_eq!(graph.len(), 3);
    assert_eq!(graph.nodes_of_level(STATE).len(), 1);
    assert_eq!(graph.nodes_of_level(DISTRICT).len(), 2);
    let state = graph.lookup(&kerala()).unwrap();
    let children = graph.children(state);
    assert_eq!(children.len(), 2);
    for child in children {
        assert_eq!(graph.parent(child), Some(state));
    }
}

#[test(tokio::test)]
async fn curated_variation_resolves_common_spelling() {
    let matcher = Matcher::new(memory_store());
    let matches = matcher.match_name("Bangalore", Some(DISTRICT), None).await;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].entity.name, "Bengaluru");
    assert_eq!(matches[0].match_type, MatchType::Variation);
}

#[test(tokio::test)]
async fn unknown_name_under_parent_finds_nothing() {
    let matcher = Matcher::new(memory_store());
    let matches = matcher.match_name("Xyzzy Town", Some(BLOCK), Some(12)).await;
    assert!(matches.is_empty());
}

#[test(tokio::test)]
async fn unscoped_districts_split_by_candidate_count() {
    let rows = vec![
        row(&[("state", "Atlantis"), ("district", "Ernakulam")]),
        row(&[("state", "Atlantis"), ("district", "Central")]),
        row(&[("state", "Atlantis"), ("district", "Nowhere")]),
    ];
    let mut graph = GraphBuilder::default()
        .build(&rows, &hierarchy(&[("state", STATE), ("district", DISTRICT)]))
        .unwrap();
    Orchestrator::new(Matcher::new(memory_store()))
        .map_in_batches(&mut graph, &[], |_| {})
        .await
        .unwrap();

    let atlantis = NodeKey::root(STATE, "Atlantis");
    let node = |name: &str| {
        let id = graph.lookup(&atlantis.child(DISTRICT, name)).unwrap();
        graph.node(id).unwrap().clone()
    };
    let ernakulam = node("Ernakulam");
    assert_eq!(ernakulam.state, NodeState::AutoMatched);
    assert_eq!(ernakulam.confirmed.unwrap().entity.code, 537);

    let central = node("Central");
    assert_eq!(central.state, NodeState::Ambiguous);
    assert_eq!(central.candidate_count(), 2);
    assert!(!central.is_unmatched_empty());

    let nowhere = node("Nowhere");
    assert_eq!(nowhere.state, NodeState::Ambiguous);
    assert!(nowhere.is_unmatched_empty());

    let stats = graph.stats();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.auto_matched, 1);
    assert_eq!(stats.ambiguous, 3);
    assert_eq!(stats.ambiguous_empty, 2);
}

#[test(tokio::test)]
async fn confirming_a_node_rescopes_its_children() {
    let rows = vec![
        row(&[("state", "Kerala"), ("district", "Ernakulum"), ("block", "Nowhere")]),
        row(&[("state", "Kerala"), ("district", "Ernakulum"), ("block", "Central")]),
    ];
    let h = hierarchy(&[("state", STATE), ("district", DISTRICT), ("block", BLOCK)]);
    let mut graph = GraphBuilder::default().build(&rows, &h).unwrap();
    let orchestrator = Orchestrator::new(Matcher::new(memory_store()));
    orchestrator
        .map_in_batches(&mut graph, &[], |_| {})
        .await
        .unwrap();

    let state = graph.lookup(&kerala()).unwrap();
    let district_key = kerala().child(DISTRICT, "Ernakulum");
    let district = graph.lookup(&district_key).unwrap();
    let central = graph
        .lookup(&district_key.child(BLOCK, "Central"))
        .unwrap();

    // A misspelt district only gets a fuzzy suggestion; both blocks stay open.
    let node = graph.node(district).unwrap();
    assert_eq!(node.state, NodeState::Ambiguous);
    assert_eq!(node.matches.as_ref().unwrap()[0].entity.name, "Ernakulam");
    assert_eq!(graph.node(central).unwrap().candidate_count(), 2);
    assert_eq!(graph.node(state).unwrap().unmatched_count, 3);

    let suggestion = graph.node(district).unwrap().matches.as_ref().unwrap()[0].clone();
    let remapped = orchestrator
        .confirm_match(&mut graph, district, suggestion)
        .await
        .unwrap();

    // Central now resolves to the block under Ernakulam; Nowhere still has nothing.
    assert_eq!(remapped, vec![central]);
    let central = graph.node(central).unwrap();
    assert_eq!(central.state, NodeState::AutoMatched);
    assert_eq!(central.confirmed.as_ref().unwrap().entity.code, 6003);
    assert_eq!(
        graph.node(district).unwrap().state,
        NodeState::ManuallyMatched
    );
    assert_eq!(graph.node(state).unwrap().unmatched_count, 1);
    assert_eq!(graph.node(district).unwrap().unmatched_count, 1);
    graph.check_invariants().unwrap();
}

#[test(tokio::test)]
async fn clearing_and_remapping_a_subtree() {
    let rows = vec![row(&[("state", "Karnataka"), ("district", "Bengaluru"), ("block", "Anekal")])];
    let h = hierarchy(&[("state", STATE), ("district", DISTRICT), ("block", BLOCK)]);
    let mut graph = GraphBuilder::default().build(&rows, &h).unwrap();
    let orchestrator = Orchestrator::new(Matcher::new(memory_store()));
    orchestrator
        .map_in_batches(&mut graph, &[], |_| {})
        .await
        .unwrap();
    assert_eq!(graph.stats().auto_matched, 3);

    let district_key = NodeKey::root(STATE, "Karnataka").child(DISTRICT, "Bengaluru");
    let district = graph.lookup(&district_key).unwrap();
    let block = graph.lookup(&district_key.child(BLOCK, "Anekal")).unwrap();

    assert!(orchestrator.clear_match(&mut graph, block).unwrap());
    assert_eq!(graph.node(block).unwrap().state, NodeState::Ambiguous);
    assert_eq!(graph.node(district).unwrap().unmatched_count, 1);

    // An automatic run leaves the cleared node alone.
    orchestrator
        .map_in_batches(&mut graph, &[], |_| {})
        .await
        .unwrap();
    assert!(!graph.node(block).unwrap().is_matched());

    let remapped = orchestrator.remap_subtree(&mut graph, district).await.unwrap();
    assert_eq!(remapped, vec![block]);
    assert_eq!(graph.node(block).unwrap().state, NodeState::AutoMatched);
    assert_eq!(graph.node(district).unwrap().unmatched_count, 0);
}

#[test(tokio::test)]
async fn session_resumes_from_exported_state() {
    let rows = vec![
        row(&[("state", "Kerala"), ("district", "Ernakulam")]),
        row(&[("state", "Kerala"), ("district", "Central")]),
    ];
    let h = hierarchy(&[("state", STATE), ("district", DISTRICT)]);
    let graph = GraphBuilder::default().build(&rows, &h).unwrap();
    let metadata = StateMetadata {
        columns: vec!["state".to_string(), "district".to_string()],
        hierarchy: h.clone(),
        key_strategy: KeyStrategy::AncestorPath,
        ..Default::default()
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let session = MappingSession::new(
        Orchestrator::new(Matcher::new(memory_store())).with_events(tx),
    );
    session.start_run(graph, metadata).await;
    let mut progress = Vec::new();
    let stats = session
        .map_in_batches(&[], |p| progress.push(p))
        .await
        .unwrap();
    assert_eq!(stats.matched(), 3);
    assert_eq!(progress.last().copied(), Some(1.0));

    let mut finished = false;
    while let Ok(event) = rx.try_recv() {
        finished |= matches!(event, MappingEvent::RunFinished { .. });
    }
    assert!(finished);

    let central_key = kerala().child(DISTRICT, "Central");
    session.set_active_node(Some(central_key.clone())).await.unwrap();
    let json = session.export_state().await.unwrap();

    let resumed = MappingSession::new(Orchestrator::new(Matcher::new(memory_store())));
    let generation = resumed.import_state(&json).await.unwrap();
    assert_eq!(generation, resumed.generation().await);

    let (graph, metadata) = resumed.snapshot().await;
    assert_eq!(metadata.active_node, Some(central_key.clone()));
    assert_eq!(graph.stats(), stats);
    let central = graph.lookup(&central_key).unwrap();
    assert_eq!(
        graph.node(central).unwrap().confirmed.as_ref().unwrap().entity.code,
        5901
    );

    let annotated = annotate_rows(&rows, &h, &graph, metadata.key_strategy).unwrap();
    assert_eq!(annotated.mapped.len(), 2);
    assert_eq!(
        annotated.mapped[1]["district_lgd_code"],
        Some("5901".to_string())
    );

    assert!(matches!(
        resumed.import_state("{ not json").await,
        Err(MapperError::MalformedImportedState(_))
    ));
    assert_eq!(resumed.generation().await, generation);
}

#[test(tokio::test)]
async fn confirmed_spelling_flows_back_as_community_variation() {
    let store = memory_store();
    let rows = vec![row(&[("state", "Kerala"), ("district", "Cochin")])];
    let h = hierarchy(&[("state", STATE), ("district", DISTRICT)]);
    let mut graph = GraphBuilder::default().build(&rows, &h).unwrap();
    let orchestrator = Orchestrator::new(Matcher::new(store.clone()));
    orchestrator
        .map_in_batches(&mut graph, &[], |_| {})
        .await
        .unwrap();
    let cochin = graph.lookup(&kerala().child(DISTRICT, "Cochin")).unwrap();
    assert!(!graph.node(cochin).unwrap().is_matched());

    let ernakulam = Entity {
        id: 10,
        code: 537,
        name: "Ernakulam".to_string(),
        level_id: DISTRICT,
    };
    orchestrator
        .confirm_match(&mut graph, cochin, Match::new(ernakulam, MatchType::Exact))
        .await
        .unwrap();
    let proposal = suggest_variation(&graph, cochin).unwrap();
    let ack = submit_variation(&store, &proposal.name, proposal.entity_code, "owner@data.gov.in")
        .await
        .unwrap();
    assert!(ack.accepted);

    let community = Matcher::new(store.clone()).with_options(MatchOptions {
        include_parents: true,
        include_community_variations: true,
    });
    let matches = community.match_name("Cochin", Some(DISTRICT), Some(1)).await;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].entity.code, 537);
    let parents = matches[0].parents.as_ref().unwrap();
    assert_eq!(
        parents.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        vec!["India", "Kerala"]
    );

    // Curated-only matching still ignores it.
    let curated = Matcher::new(store).match_name("Cochin", Some(DISTRICT), Some(1)).await;
    assert!(curated.is_empty());
}

#[test(tokio::test)]
async fn store_levels_hide_the_root() {
    let store: MemoryStore = memory_store();
    let levels = store.list_levels().await.unwrap();
    assert_eq!(
        levels.iter().map(|l| l.name.as_str()).collect::<Vec<_>>(),
        vec!["state", "district", "sub_district", "block"]
    );
}
