pub mod algorithm;
pub mod constraint;
pub mod graph;
pub mod index;

pub use algorithm::{
    waypoint_shortest_path, AllPairShortestPath, Dfs, GraphSearchAlgorithmConfig, KShortestPaths,
    ShortestPath, SimpleDirectedGraph,
};
pub use constraint::{AvoidLinks, Conjunction, Disjunction, DummyConstraint, PathConstraint};
pub use graph::{Link, Node, Path, PathStorage, Region};
pub use index::{LinkIndex, NodeIndex};

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn braess_topology() -> PathStorage {
        let mut storage = PathStorage::new();
        let a = storage.intern_node("A");
        let b = storage.intern_node("B");
        let c = storage.intern_node("C");
        let d = storage.intern_node("D");

        // Insertion order matters: it fixes DFS/adjacency traversal order.
        // Delays are proportional to the canonical Braess-paradox topology
        // (C-D=10ms, B-D=8ms, A-B=10ms, A-C=5ms, B-C=1ms).
        storage.add_link(a, c, 1, 1, 1_000_000, 5_000);
        storage.add_link(a, b, 2, 1, 1_000_000, 10_000);
        storage.add_link(b, d, 2, 1, 1_000_000, 8_000);
        storage.add_link(b, c, 3, 2, 1_000_000, 1_000);
        storage.add_link(c, d, 2, 2, 1_000_000, 10_000);

        storage
    }

    #[test]
    fn braess_dfs_and_yen_agree_on_order() {
        let storage = braess_topology();
        let a = storage.node_by_id("A").unwrap();
        let d = storage.node_by_id("D").unwrap();
        let graph = SimpleDirectedGraph::new(&storage);

        let dfs = Dfs::new(GraphSearchAlgorithmConfig::new(), &storage, &graph);
        let found = RefCell::new(Vec::new());
        dfs.paths(a, d, 1_000_000, 10, |links| {
            found.borrow_mut().push(links.to_vec());
        });
        let found = found.into_inner();

        let render = |links: &[LinkIndex]| storage.path_to_string(links, false);
        let rendered: Vec<String> = found.iter().map(|p| render(p)).collect();
        assert_eq!(
            rendered,
            vec!["[A->C, C->D]", "[A->B, B->D]", "[A->B, B->C, C->D]"]
        );

        let mut yen = KShortestPaths::new(
            GraphSearchAlgorithmConfig::new(),
            Vec::new(),
            a,
            d,
            &storage,
            &graph,
        );
        let mut yen_rendered = Vec::new();
        while let Some(path) = yen.next_path() {
            yen_rendered.push(render(&path));
            if yen_rendered.len() == 3 {
                break;
            }
        }
        assert_eq!(
            yen_rendered,
            vec!["[A->C, C->D]", "[A->B, B->D]", "[A->B, B->C, C->D]"]
        );
    }

    #[test]
    fn all_pair_shortest_path_matches_dijkstra() {
        let storage = braess_topology();
        let a = storage.node_by_id("A").unwrap();
        let d = storage.node_by_id("D").unwrap();
        let graph = SimpleDirectedGraph::new(&storage);
        let config = GraphSearchAlgorithmConfig::new();

        let apsp = AllPairShortestPath::new(&config, &storage, &graph);
        let sssp = ShortestPath::new(&config, a, &storage, &graph);

        assert_eq!(apsp.get_distance(a, d), sssp.get_distance(d));
        assert_eq!(apsp.get_distance(a, d), Some(15_000));
    }

    #[test]
    fn path_tags_are_interned_and_reversible() {
        let mut storage = PathStorage::new();
        let a = storage.intern_node("A");
        let b = storage.intern_node("B");
        let link = storage.add_link(a, b, 1, 1, 1_000_000, 1_000);

        let tag1 = storage.path_from_links(vec![link], 0);
        let tag2 = storage.path_from_links(vec![link], 0);
        assert_eq!(tag1, tag2);

        let tag3 = storage.path_from_links(vec![link], 1);
        assert_ne!(tag1, tag3);

        let (seq, cookie) = storage.path_for_tag(tag1).unwrap();
        assert_eq!(seq, &[link]);
        assert_eq!(cookie, 0);
    }

    #[test]
    fn duplicate_edge_is_fatal() {
        let mut storage = PathStorage::new();
        let a = storage.intern_node("A");
        let b = storage.intern_node("B");
        storage.add_link(a, b, 1, 1, 1_000_000, 1_000);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            storage.add_link(a, b, 1, 1, 1_000_000, 1_000);
        }));
        assert!(result.is_err());
    }
}
