use crate::index::{LinkIndex, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
}

/// A unidirectional link between two nodes. Bandwidth and delay must be
/// strictly positive; a link's source and destination must differ. Indices
/// are stable for the lifetime of the owning `PathStorage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub src_node: NodeIndex,
    pub dst_node: NodeIndex,
    pub src_port: u16,
    pub dst_port: u16,
    pub bandwidth_bps: u64,
    pub delay_ns: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub nodes: HashSet<NodeIndex>,
}

/// An ordered sequence of link indices with no repeated link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Path {
    pub links: Vec<LinkIndex>,
}

impl Path {
    pub fn empty() -> Path {
        Path { links: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }
}

/// Owns nodes, links, regions and the tag-interning table for paths.
///
/// Node and link indices are assigned densely on first mention and never
/// reused, so `Vec`-backed adjacency and distance tables stay valid for the
/// storage's lifetime.
#[derive(Default)]
pub struct PathStorage {
    nodes: Vec<Node>,
    node_by_id: HashMap<String, NodeIndex>,
    links: Vec<Link>,
    link_by_endpoints: HashMap<(NodeIndex, NodeIndex, u16, u16), LinkIndex>,
    regions: Vec<Region>,
    path_tags: HashMap<(Vec<LinkIndex>, u64), u32>,
    tags_reverse: HashMap<u32, (Vec<LinkIndex>, u64)>,
    next_tag: u32,
}

impl PathStorage {
    pub fn new() -> PathStorage {
        PathStorage {
            next_tag: 1,
            ..Default::default()
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx.index()]
    }

    pub fn link(&self, idx: LinkIndex) -> &Link {
        &self.links[idx.index()]
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> {
        (0..self.nodes.len()).map(NodeIndex)
    }

    pub fn link_indices(&self) -> impl Iterator<Item = LinkIndex> {
        (0..self.links.len()).map(LinkIndex)
    }

    /// Interns a node by string id, assigning a dense index on first
    /// mention.
    pub fn intern_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.node_by_id.get(id) {
            return idx;
        }
        let idx = NodeIndex(self.nodes.len());
        self.nodes.push(Node { id: id.to_string() });
        self.node_by_id.insert(id.to_string(), idx);
        idx
    }

    pub fn node_by_id(&self, id: &str) -> Option<NodeIndex> {
        self.node_by_id.get(id).copied()
    }

    /// Adds a link. Fatal (panics) if bandwidth or delay is non-positive, or
    /// if source and destination are the same node — these are programmer
    /// errors in the topology description, not runtime conditions.
    pub fn add_link(
        &mut self,
        src: NodeIndex,
        dst: NodeIndex,
        src_port: u16,
        dst_port: u16,
        bandwidth_bps: u64,
        delay_ns: u64,
    ) -> LinkIndex {
        assert!(src != dst, "link source and destination must differ");
        assert!(bandwidth_bps > 0, "link bandwidth must be positive");
        assert!(delay_ns > 0, "link delay must be positive");

        let key = (src, dst, src_port, dst_port);
        assert!(
            !self.link_by_endpoints.contains_key(&key),
            "duplicate link {}:{} -> {}:{}",
            src,
            src_port,
            dst,
            dst_port
        );

        let idx = LinkIndex(self.links.len());
        self.links.push(Link {
            src_node: src,
            dst_node: dst,
            src_port,
            dst_port,
            bandwidth_bps,
            delay_ns,
        });
        self.link_by_endpoints.insert(key, idx);
        idx
    }

    /// Looks up a link by `(src, dst, src_port, dst_port)`. If either port
    /// is zero, it is treated as a wildcard and a single matching link is
    /// returned if exactly one exists.
    pub fn find_link(
        &self,
        src: NodeIndex,
        dst: NodeIndex,
        src_port: u16,
        dst_port: u16,
    ) -> Option<LinkIndex> {
        if src_port != 0 && dst_port != 0 {
            return self
                .link_by_endpoints
                .get(&(src, dst, src_port, dst_port))
                .copied();
        }

        let mut found = None;
        for (&(ls, ld, lsp, ldp), &idx) in &self.link_by_endpoints {
            if ls != src || ld != dst {
                continue;
            }
            if src_port != 0 && lsp != src_port {
                continue;
            }
            if dst_port != 0 && ldp != dst_port {
                continue;
            }
            if found.is_some() {
                return None;
            }
            found = Some(idx);
        }
        found
    }

    pub fn add_region(&mut self, name: &str, nodes: HashSet<NodeIndex>) {
        self.regions.push(Region {
            name: name.to_string(),
            nodes,
        });
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Total propagation delay of a link sequence.
    pub fn path_delay_ns(&self, links: &[LinkIndex]) -> u64 {
        links.iter().map(|&l| self.link(l).delay_ns).sum()
    }

    /// Interns a `(sequence, cookie)` pair, assigning a new tag the first
    /// time it is seen. The tag namespace is shared across cookies.
    pub fn path_from_links(&mut self, links: Vec<LinkIndex>, cookie: u64) -> u32 {
        let key = (links, cookie);
        if let Some(&tag) = self.path_tags.get(&key) {
            return tag;
        }
        let tag = self.next_tag;
        self.next_tag += 1;
        self.path_tags.insert(key.clone(), tag);
        self.tags_reverse.insert(tag, key);
        tag
    }

    pub fn path_for_tag(&self, tag: u32) -> Option<(&[LinkIndex], u64)> {
        self.tags_reverse.get(&tag).map(|(seq, cookie)| (seq.as_slice(), *cookie))
    }

    /// Human-readable `[src:sp->dst:dp, …]` rendering of a path, optionally
    /// without port numbers.
    pub fn path_to_string(&self, links: &[LinkIndex], with_ports: bool) -> String {
        let parts: Vec<String> = links
            .iter()
            .map(|&l| {
                let link = self.link(l);
                let src = &self.node(link.src_node).id;
                let dst = &self.node(link.dst_node).id;
                if with_ports {
                    format!(
                        "{}:{}->{}:{}",
                        src, link.src_port, dst, link.dst_port
                    )
                } else {
                    format!("{}->{}", src, dst)
                }
            })
            .collect();
        format!("[{}]", parts.join(", "))
    }

    /// Serializes a path to its binary form: the sequence of link indices.
    pub fn serialize_path(&self, links: &[LinkIndex]) -> Vec<u32> {
        links.iter().map(|l| l.index() as u32).collect()
    }

    pub fn deserialize_path(&self, raw: &[u32]) -> Vec<LinkIndex> {
        raw.iter().map(|&i| LinkIndex(i as usize)).collect()
    }
}
