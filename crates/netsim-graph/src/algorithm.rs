use crate::graph::PathStorage;
use crate::index::{LinkIndex, NodeIndex};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

const MAX_DISTANCE: u64 = u64::MAX;

/// Adjacency list over a `PathStorage`, built once and reused by every
/// search algorithm that runs against the same topology. The graph is
/// assumed simple: at most one link per ordered `(src, dst)` pair.
pub struct SimpleDirectedGraph {
    adjacency: Vec<Vec<LinkIndex>>,
}

impl SimpleDirectedGraph {
    pub fn new(storage: &PathStorage) -> SimpleDirectedGraph {
        let mut adjacency = vec![Vec::new(); storage.node_count()];
        let mut seen_pairs = HashSet::new();
        for link_idx in storage.link_indices() {
            let link = storage.link(link_idx);
            let pair = (link.src_node, link.dst_node);
            assert!(
                seen_pairs.insert(pair),
                "duplicate edge {} -> {} in a simple directed graph",
                link.src_node,
                link.dst_node
            );
            adjacency[link.src_node.index()].push(link_idx);
        }
        SimpleDirectedGraph { adjacency }
    }

    pub fn adjacency_list(&self) -> &[Vec<LinkIndex>] {
        &self.adjacency
    }

    pub fn out_links(&self, node: NodeIndex) -> &[LinkIndex] {
        &self.adjacency[node.index()]
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }
}

/// Links and nodes to exclude from a search. Built up from multiple
/// exclusion sets (e.g. "links down for maintenance" plus "nodes excluded
/// by this particular query").
#[derive(Default, Clone)]
pub struct GraphSearchAlgorithmConfig {
    excluded_links: HashSet<LinkIndex>,
    excluded_nodes: HashSet<NodeIndex>,
}

impl GraphSearchAlgorithmConfig {
    pub fn new() -> GraphSearchAlgorithmConfig {
        GraphSearchAlgorithmConfig::default()
    }

    pub fn exclude_links(&mut self, links: impl IntoIterator<Item = LinkIndex>) {
        self.excluded_links.extend(links);
    }

    pub fn exclude_nodes(&mut self, nodes: impl IntoIterator<Item = NodeIndex>) {
        self.excluded_nodes.extend(nodes);
    }

    pub fn can_exclude_link(&self, link: LinkIndex) -> bool {
        self.excluded_links.contains(&link)
    }

    pub fn can_exclude_node(&self, node: NodeIndex) -> bool {
        self.excluded_nodes.contains(&node)
    }
}

fn link_is_usable(
    storage: &PathStorage,
    config: &GraphSearchAlgorithmConfig,
    link: LinkIndex,
) -> bool {
    if config.can_exclude_link(link) {
        return false;
    }
    let l = storage.link(link);
    !config.can_exclude_node(l.src_node) && !config.can_exclude_node(l.dst_node)
}

/// All-pairs shortest path, computed once via Floyd-Warshall with successor
/// reconstruction. Also usable to detect whether the graph is partitioned
/// (`get_distance` returns `None` for disconnected pairs).
pub struct AllPairShortestPath {
    n: usize,
    distance: Vec<Vec<u64>>,
    next_link: Vec<Vec<Option<LinkIndex>>>,
    next_node: Vec<Vec<Option<NodeIndex>>>,
}

impl AllPairShortestPath {
    pub fn new(
        config: &GraphSearchAlgorithmConfig,
        storage: &PathStorage,
        graph: &SimpleDirectedGraph,
    ) -> AllPairShortestPath {
        let n = graph.node_count();
        let mut distance = vec![vec![MAX_DISTANCE; n]; n];
        let mut next_link: Vec<Vec<Option<LinkIndex>>> = vec![vec![None; n]; n];
        let mut next_node: Vec<Vec<Option<NodeIndex>>> = vec![vec![None; n]; n];

        for i in 0..n {
            distance[i][i] = 0;
        }

        for src in 0..n {
            for &link_idx in graph.out_links(NodeIndex(src)) {
                if !link_is_usable(storage, config, link_idx) {
                    continue;
                }
                let link = storage.link(link_idx);
                let dst = link.dst_node.index();
                if link.delay_ns < distance[src][dst] {
                    distance[src][dst] = link.delay_ns;
                    next_link[src][dst] = Some(link_idx);
                    next_node[src][dst] = Some(link.dst_node);
                }
            }
        }

        for k in 0..n {
            for i in 0..n {
                if distance[i][k] == MAX_DISTANCE {
                    continue;
                }
                for j in 0..n {
                    if distance[k][j] == MAX_DISTANCE {
                        continue;
                    }
                    let via = distance[i][k] + distance[k][j];
                    if via < distance[i][j] {
                        distance[i][j] = via;
                        next_link[i][j] = next_link[i][k];
                        next_node[i][j] = next_node[i][k];
                    }
                }
            }
        }

        AllPairShortestPath {
            n,
            distance,
            next_link,
            next_node,
        }
    }

    pub fn get_distance(&self, src: NodeIndex, dst: NodeIndex) -> Option<u64> {
        let d = self.distance[src.index()][dst.index()];
        if d == MAX_DISTANCE {
            None
        } else {
            Some(d)
        }
    }

    /// Reconstructs the shortest path's link sequence, following the
    /// successor table one hop at a time.
    pub fn get_path(&self, src: NodeIndex, dst: NodeIndex) -> Option<Vec<LinkIndex>> {
        self.get_distance(src, dst)?;
        if src == dst {
            return Some(Vec::new());
        }

        let mut path = Vec::new();
        let mut at = src;
        while at != dst {
            let link = self.next_link[at.index()][dst.index()]?;
            let next = self.next_node[at.index()][dst.index()]?;
            path.push(link);
            at = next;
            if path.len() > self.n {
                // Should be unreachable given a simple graph with no
                // negative cycles, but guards against an infinite loop.
                return None;
            }
        }
        Some(path)
    }
}

#[derive(Eq, PartialEq)]
struct HeapEntry {
    distance: u64,
    node: NodeIndex,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.distance.cmp(&self.distance)
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Single-source shortest path via Dijkstra.
pub struct ShortestPath {
    src: NodeIndex,
    previous: Vec<Option<LinkIndex>>,
    distance: Vec<u64>,
}

impl ShortestPath {
    pub fn new(
        config: &GraphSearchAlgorithmConfig,
        src: NodeIndex,
        storage: &PathStorage,
        graph: &SimpleDirectedGraph,
    ) -> ShortestPath {
        let n = graph.node_count();
        let mut distance = vec![MAX_DISTANCE; n];
        let mut previous: Vec<Option<LinkIndex>> = vec![None; n];
        distance[src.index()] = 0;

        let mut heap = BinaryHeap::new();
        heap.push(HeapEntry {
            distance: 0,
            node: src,
        });

        while let Some(HeapEntry { distance: d, node }) = heap.pop() {
            if d > distance[node.index()] {
                continue;
            }
            for &link_idx in graph.out_links(node) {
                if !link_is_usable(storage, config, link_idx) {
                    continue;
                }
                let link = storage.link(link_idx);
                let candidate = d + link.delay_ns;
                let dst = link.dst_node.index();
                if candidate < distance[dst] {
                    distance[dst] = candidate;
                    previous[dst] = Some(link_idx);
                    heap.push(HeapEntry {
                        distance: candidate,
                        node: link.dst_node,
                    });
                }
            }
        }

        ShortestPath {
            src,
            previous,
            distance,
        }
    }

    pub fn get_distance(&self, dst: NodeIndex) -> Option<u64> {
        let d = self.distance[dst.index()];
        if d == MAX_DISTANCE {
            None
        } else {
            Some(d)
        }
    }

    pub fn get_path(&self, storage: &PathStorage, dst: NodeIndex) -> Option<Vec<LinkIndex>> {
        self.get_distance(dst)?;
        if dst == self.src {
            return Some(Vec::new());
        }
        let mut path = Vec::new();
        let mut at = dst;
        while at != self.src {
            let link_idx = self.previous[at.index()]?;
            path.push(link_idx);
            at = storage.link(link_idx).src_node;
        }
        path.reverse();
        Some(path)
    }
}

fn path_delay(storage: &PathStorage, links: &[LinkIndex]) -> u64 {
    storage.path_delay_ns(links)
}

/// The single shortest path from `src` to `dst` that traverses `waypoints`
/// in order, or `None` if no such path exists. Computed by chaining
/// shortest-path queries between consecutive waypoints (and the endpoints).
pub fn waypoint_shortest_path(
    config: &GraphSearchAlgorithmConfig,
    waypoints: &[LinkIndex],
    src: NodeIndex,
    dst: NodeIndex,
    storage: &PathStorage,
    graph: &SimpleDirectedGraph,
) -> Option<Vec<LinkIndex>> {
    let mut stops = vec![src];
    for &wp in waypoints {
        stops.push(storage.link(wp).src_node);
        stops.push(storage.link(wp).dst_node);
    }
    stops.push(dst);

    let mut full_path = Vec::new();
    let mut waypoint_iter = waypoints.iter();
    let mut i = 0;
    while i + 1 < stops.len() {
        let from = stops[i];
        let to = stops[i + 1];
        if from == to {
            i += 1;
            continue;
        }
        let sp = ShortestPath::new(config, from, storage, graph);
        let segment = sp.get_path(storage, to)?;
        full_path.extend(segment);
        if i % 2 == 1 {
            if let Some(&wp) = waypoint_iter.next() {
                full_path.push(wp);
            }
        }
        i += 1;
    }
    Some(full_path)
}

fn has_prefix(path: &[LinkIndex], prefix: &[LinkIndex]) -> bool {
    prefix.len() <= path.len() && path[..prefix.len()] == *prefix
}

#[derive(Clone, Eq, PartialEq)]
struct Candidate {
    distance: u64,
    links: Vec<LinkIndex>,
    start_index: usize,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .cmp(&self.distance)
            .then_with(|| other.links.cmp(&self.links))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// K shortest (loopless) paths between `src` and `dst`, optionally
/// constrained to pass through `waypoints` in order, produced lazily one at
/// a time via Yen's algorithm.
pub struct KShortestPaths<'a> {
    config: GraphSearchAlgorithmConfig,
    waypoints: Vec<LinkIndex>,
    src: NodeIndex,
    dst: NodeIndex,
    storage: &'a PathStorage,
    graph: &'a SimpleDirectedGraph,
    k_paths: Vec<Vec<LinkIndex>>,
    candidates: BinaryHeap<Candidate>,
}

impl<'a> KShortestPaths<'a> {
    pub fn new(
        config: GraphSearchAlgorithmConfig,
        waypoints: Vec<LinkIndex>,
        src: NodeIndex,
        dst: NodeIndex,
        storage: &'a PathStorage,
        graph: &'a SimpleDirectedGraph,
    ) -> KShortestPaths<'a> {
        KShortestPaths {
            config,
            waypoints,
            src,
            dst,
            storage,
            graph,
            k_paths: Vec::new(),
            candidates: BinaryHeap::new(),
        }
    }

    fn shortest_from(&self, src: NodeIndex, cfg: &GraphSearchAlgorithmConfig) -> Option<Vec<LinkIndex>> {
        if self.waypoints.is_empty() {
            ShortestPath::new(cfg, src, self.storage, self.graph).get_path(self.storage, self.dst)
        } else {
            waypoint_shortest_path(cfg, &self.waypoints, src, self.dst, self.storage, self.graph)
        }
    }

    /// Returns the set of links that must be excluded when exploring
    /// deviations of `root_path`: for any previously found path that shares
    /// `root_path` as a prefix, the link immediately following the shared
    /// prefix is excluded so the new spur can't retrace an already-found
    /// path.
    fn link_exclusion_set(&self, root_path: &[LinkIndex]) -> HashSet<LinkIndex> {
        let mut out = HashSet::new();
        for path in &self.k_paths {
            if has_prefix(path, root_path) && path.len() > root_path.len() {
                out.insert(path[root_path.len()]);
            }
        }
        out
    }

    pub fn next_path(&mut self) -> Option<Vec<LinkIndex>> {
        if self.k_paths.is_empty() {
            let shortest = self.shortest_from(self.src, &self.config)?;
            self.k_paths.push(shortest.clone());
            return Some(shortest);
        }

        let prev = self.k_paths.last().unwrap().clone();
        for i in 0..prev.len() {
            let spur_node = self.storage.link(prev[i]).src_node;
            let root_path = &prev[..i];

            let mut cfg = self.config.clone();
            cfg.exclude_links(self.link_exclusion_set(root_path));
            for link in root_path {
                let l = self.storage.link(*link);
                if l.src_node != spur_node {
                    cfg.exclude_nodes(std::iter::once(l.src_node));
                }
            }

            if let Some(spur_path) = self.shortest_from(spur_node, &cfg) {
                if spur_path.is_empty() && spur_node != self.dst {
                    continue;
                }
                let mut total_path = root_path.to_vec();
                total_path.extend(spur_path);
                if total_path.iter().collect::<HashSet<_>>().len() != total_path.len() {
                    continue;
                }
                let distance = path_delay(self.storage, &total_path);
                if !self.candidates.iter().any(|c| c.links == total_path) {
                    self.candidates.push(Candidate {
                        distance,
                        links: total_path,
                        start_index: i,
                    });
                }
            }
        }

        let next = self.candidates.pop()?;
        self.k_paths.push(next.links.clone());
        Some(next.links)
    }
}

/// Depth-limited DFS over all paths between two nodes, pruned by an
/// all-pairs shortest-path lower bound the way A* prunes a search frontier:
/// a partial path is abandoned as soon as `distance so far + lower bound to
/// dst` exceeds `max_distance_ns`.
pub struct Dfs<'a> {
    config: GraphSearchAlgorithmConfig,
    storage: &'a PathStorage,
    graph: &'a SimpleDirectedGraph,
    all_pair_sp: AllPairShortestPath,
}

impl<'a> Dfs<'a> {
    pub fn new(
        config: GraphSearchAlgorithmConfig,
        storage: &'a PathStorage,
        graph: &'a SimpleDirectedGraph,
    ) -> Dfs<'a> {
        let all_pair_sp = AllPairShortestPath::new(&config, storage, graph);
        Dfs {
            config,
            storage,
            graph,
            all_pair_sp,
        }
    }

    pub fn paths(
        &self,
        src: NodeIndex,
        dst: NodeIndex,
        max_distance_ns: u64,
        max_hops: usize,
        mut on_path: impl FnMut(&[LinkIndex]),
    ) {
        let mut nodes_seen = HashSet::new();
        nodes_seen.insert(src);
        let mut current = Vec::new();
        self.paths_recursive(
            max_distance_ns,
            max_hops,
            src,
            dst,
            &mut on_path,
            &mut nodes_seen,
            &mut current,
            0,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn paths_recursive(
        &self,
        max_distance_ns: u64,
        max_hops: usize,
        at: NodeIndex,
        dst: NodeIndex,
        on_path: &mut impl FnMut(&[LinkIndex]),
        nodes_seen: &mut HashSet<NodeIndex>,
        current: &mut Vec<LinkIndex>,
        total_distance: u64,
    ) {
        if at == dst {
            on_path(current);
            return;
        }
        if current.len() >= max_hops {
            return;
        }

        for &link_idx in self.graph.out_links(at) {
            if !link_is_usable(self.storage, &self.config, link_idx) {
                continue;
            }
            let link = self.storage.link(link_idx);
            if nodes_seen.contains(&link.dst_node) {
                continue;
            }
            let new_distance = total_distance + link.delay_ns;
            let lower_bound = match self.all_pair_sp.get_distance(link.dst_node, dst) {
                Some(d) => d,
                None => continue,
            };
            if new_distance.saturating_add(lower_bound) > max_distance_ns {
                continue;
            }

            current.push(link_idx);
            nodes_seen.insert(link.dst_node);
            self.paths_recursive(
                max_distance_ns,
                max_hops,
                link.dst_node,
                dst,
                on_path,
                nodes_seen,
                current,
                new_distance,
            );
            nodes_seen.remove(&link.dst_node);
            current.pop();
        }
    }
}
