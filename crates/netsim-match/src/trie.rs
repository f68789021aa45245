use netsim_types::RuleKey;
use std::collections::HashMap;

/// The fixed field order a 7-level match tree walks, from root to leaf:
/// input port, input tag, destination IP, source IP, IP protocol, source
/// port, destination port. Every implementation of the matcher must use
/// this order so rule sets stay interchangeable.
pub type FieldVector = [u32; 7];

pub fn fields_for_query(
    input_port: u16,
    input_tag: u32,
    ip_dst: u32,
    ip_src: u32,
    ip_proto: u8,
    src_port: u16,
    dst_port: u16,
) -> FieldVector {
    [
        input_port as u32,
        input_tag,
        ip_dst,
        ip_src,
        ip_proto as u32,
        src_port as u32,
        dst_port as u32,
    ]
}

/// One level of the match tree. A field value of zero is the wildcard at
/// that level and is stored in `wildcard` rather than `children`, so a
/// lookup that misses on an exact child falls back to the wildcard branch
/// without a hash lookup at zero.
#[derive(Default)]
pub struct TrieNode {
    children: HashMap<u32, TrieNode>,
    wildcard: Option<Box<TrieNode>>,
    rule_key: Option<RuleKey>,
}

impl TrieNode {
    pub fn new() -> TrieNode {
        TrieNode::default()
    }

    /// Installs `rule_key` along the path described by `fields`, starting
    /// at `depth`. Returns the rule key that previously occupied the leaf,
    /// if any, so the caller can merge its stats into the new rule.
    pub fn insert_or_update(
        &mut self,
        fields: &FieldVector,
        depth: usize,
        rule_key: RuleKey,
    ) -> Option<RuleKey> {
        if depth == fields.len() {
            return self.rule_key.replace(rule_key);
        }

        let value = fields[depth];
        let child = if value == 0 {
            self.wildcard.get_or_insert_with(|| Box::new(TrieNode::new()))
        } else {
            self.children.entry(value).or_default()
        };
        child.insert_or_update(fields, depth + 1, rule_key)
    }

    /// Removes every leaf referencing `rule_key` from the subtree.
    pub fn clear_rule(&mut self, rule_key: &RuleKey) {
        for child in self.children.values_mut() {
            child.clear_rule(rule_key);
        }
        if let Some(child) = self.wildcard.as_mut() {
            child.clear_rule(rule_key);
        }
        if self.rule_key.as_ref() == Some(rule_key) {
            self.rule_key = None;
        }
    }

    /// Exact children are tried before the wildcard branch at every level,
    /// so a more specific rule always outranks a more general one.
    pub fn match_or_null(&self, fields: &FieldVector, depth: usize) -> Option<&RuleKey> {
        if depth == fields.len() {
            return self.rule_key.as_ref();
        }

        let value = fields[depth];
        if let Some(child) = self.children.get(&value) {
            if let Some(found) = child.match_or_null(fields, depth + 1) {
                return Some(found);
            }
        }
        self.wildcard
            .as_ref()
            .and_then(|child| child.match_or_null(fields, depth + 1))
    }
}
