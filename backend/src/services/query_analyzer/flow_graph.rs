//! Flow graph builder
//!
//! Bipartite graph between statement groups and indexes, built from the
//! statement and index aggregates. Groups that touched no index and indexes
//! no captured query touched keep a zero-weight edge with the other side
//! left empty.

use crate::services::query_analyzer::aggregator::Aggregates;
use crate::services::query_analyzer::models::{FlowEdge, FlowGraph, FlowIndexNode, FlowQueryNode};

pub struct FlowGraphBuilder;

impl FlowGraphBuilder {
    pub fn build(aggregates: &Aggregates) -> FlowGraph {
        let mut graph = FlowGraph::default();

        for group in &aggregates.statement_groups {
            graph.query_nodes.push(FlowQueryNode {
                signature_id: group.signature_id.clone(),
                statement_signature: group.statement_signature.clone(),
                representative_statement: group.representative_statement.clone(),
                count: group.count(),
                isolated: !group.touches_index(),
            });

            if !group.touches_index() {
                graph.edges.push(FlowEdge {
                    signature_id: Some(group.signature_id.clone()),
                    index_name: None,
                    occurrences: group.count(),
                    items_scanned: 0,
                    items_fetched: 0,
                    scan_time_ms: 0.0,
                    weight: 0,
                });
                continue;
            }

            for usage in &group.index_usage {
                let items_scanned = usage.items_scanned.unwrap_or(0);
                let items_fetched = usage.items_fetched.unwrap_or(0);
                graph.edges.push(FlowEdge {
                    signature_id: Some(group.signature_id.clone()),
                    index_name: Some(usage.index_name.clone()),
                    occurrences: usage.occurrences,
                    items_scanned,
                    items_fetched,
                    scan_time_ms: usage.scan_time_ms.unwrap_or(0.0),
                    weight: items_scanned.saturating_add(items_fetched),
                });
            }
        }

        for index in &aggregates.indexes {
            let isolated = index.usage_count() == 0;
            graph.index_nodes.push(FlowIndexNode {
                index_name: index.index_name.clone(),
                keyspaces: index.keyspaces.clone(),
                is_primary: index.is_primary,
                usage_count: index.usage_count(),
                metadata_available: index.metadata_available,
                isolated,
            });

            if isolated {
                graph.edges.push(FlowEdge {
                    signature_id: None,
                    index_name: Some(index.index_name.clone()),
                    occurrences: 0,
                    items_scanned: 0,
                    items_fetched: 0,
                    scan_time_ms: 0.0,
                    weight: 0,
                });
            }
        }

        tracing::debug!(
            "Built flow graph: {} query nodes, {} index nodes, {} edges",
            graph.query_nodes.len(),
            graph.index_nodes.len(),
            graph.edges.len()
        );
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query_analyzer::insights::rules::test_support::Fixture;
    use serde_json::json;

    #[test]
    fn test_edges_carry_scan_and_fetch_weight() {
        let fixture = Fixture::new(json!([
            {"completed_requests": {"requestId": "r1", "statement": "SELECT * FROM b WHERE x = 1"},
             "plan": {"#operator": "Sequence", "~children": [
                {"#operator": "IndexScan3", "index": "idx_x", "#stats": {"#itemsOut": 40}},
                {"#operator": "Fetch", "#stats": {"#itemsIn": 40, "#itemsOut": 40}}
             ]}},
            {"completed_requests": {"requestId": "r2", "statement": "SELECT * FROM b WHERE x = 7"},
             "plan": {"#operator": "Sequence", "~children": [
                {"#operator": "IndexScan3", "index": "idx_x", "#stats": {"#itemsOut": 10}},
                {"#operator": "Fetch", "#stats": {"#itemsIn": 10, "#itemsOut": 10}}
             ]}}
        ]));

        let graph = FlowGraphBuilder::build(&fixture.aggregates);
        assert_eq!(graph.query_nodes.len(), 1);
        assert_eq!(graph.index_nodes.len(), 1);
        assert_eq!(graph.edges.len(), 1);

        let edge = &graph.edges[0];
        assert_eq!(edge.index_name.as_deref(), Some("idx_x"));
        assert_eq!(edge.occurrences, 2);
        assert_eq!(edge.items_scanned, 50);
        assert_eq!(edge.items_fetched, 50);
        assert_eq!(edge.weight, 100);
    }

    #[test]
    fn test_isolated_nodes_are_retained() {
        let fixture = Fixture::with_metadata(
            json!([{"requestId": "r1", "statement": "SELECT 1"}]),
            Some(json!([{"name": "idx_unused", "keyspace_id": "b", "index_key": ["`x`"]}])),
            None,
        );

        let graph = FlowGraphBuilder::build(&fixture.aggregates);
        assert!(graph.query_nodes[0].isolated);
        assert!(graph.index_nodes[0].isolated);
        assert_eq!(graph.edges.len(), 2);
        assert!(graph.edges.iter().all(|e| e.weight == 0));
        assert!(graph.edges[0].index_name.is_none());
        assert!(graph.edges[1].signature_id.is_none());
    }

    #[test]
    fn test_same_named_indexes_get_separate_nodes() {
        let fixture = Fixture::with_metadata(
            json!([{
                "completed_requests": {"requestId": "r1", "statement": "SELECT * FROM b WHERE type = 'x'"},
                "plan": {"#operator": "IndexScan3", "index": "idx_type", "keyspace": "b",
                         "#stats": {"#itemsOut": 5}}
            }]),
            Some(json!([
                {"name": "idx_type", "keyspace_id": "b"},
                {"name": "idx_type", "keyspace_id": "c"}
            ])),
            None,
        );

        let graph = FlowGraphBuilder::build(&fixture.aggregates);
        assert_eq!(graph.index_nodes.len(), 2);
        assert_eq!(graph.index_nodes[0].keyspaces, vec!["b"]);
        assert!(!graph.index_nodes[0].isolated);
        assert_eq!(graph.index_nodes[1].keyspaces, vec!["c"]);
        assert!(graph.index_nodes[1].isolated);
    }
}
