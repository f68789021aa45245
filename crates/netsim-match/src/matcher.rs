use crate::rule::InstalledRule;
use crate::trie::{fields_for_query, TrieNode};
use netsim_types::{ActionStats, FiveTuple, ForwardingRule, RuleAction, RuleKey, WILD_PORT};
use std::collections::HashMap;

/// Matches packets against an installed rule set: a 7-level decision tree
/// keyed on `(input_port, input_tag, ip_dst, ip_src, ip_proto, src_port,
/// dst_port)` with exact-then-wildcard traversal at each level, backed by
/// the rules themselves (owning per-action counters) in a side table.
pub struct Matcher {
    id: String,
    root: TrieNode,
    rules: HashMap<RuleKey, InstalledRule>,
}

impl Matcher {
    pub fn new(id: impl Into<String>) -> Matcher {
        Matcher {
            id: id.into(),
            root: TrieNode::new(),
            rules: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn num_rules(&self) -> usize {
        self.rules.len()
    }

    /// Installs or replaces a rule. An empty action list deletes the rule
    /// for that key. Installing over an existing key carries its per-action
    /// counters forward, matched up positionally.
    pub fn add_rule(&mut self, rule: ForwardingRule) {
        let key = rule.key.clone();

        if rule.is_delete() {
            self.root.clear_rule(&key);
            self.rules.remove(&key);
            return;
        }

        let previous = self.rules.remove(&key);
        let mut installed = InstalledRule::new(rule);
        if let Some(previous) = &previous {
            installed.merge_stats_from(previous);
        }

        for five_tuple in installed.key().five_tuples.clone() {
            let fields = fields_for_query(
                key.input_port,
                key.tag,
                five_tuple.ip_dst,
                five_tuple.ip_src,
                five_tuple.ip_proto,
                five_tuple.src_port,
                five_tuple.dst_port,
            );
            self.root.insert_or_update(&fields, 0, key.clone());
        }
        if installed.key().five_tuples.is_empty() {
            // A key with no five-tuple patterns matches any flow for its
            // (input_port, tag) combination.
            let fields = fields_for_query(key.input_port, key.tag, 0, 0, 0, 0, 0);
            self.root.insert_or_update(&fields, 0, key.clone());
        }

        self.rules.insert(key, installed);
    }

    /// Looks up the rule matching the given classification fields and
    /// returns its chosen action, recording the match against that action's
    /// stats. Returns `None` if no rule matches or the matched rule is a
    /// drop rule with no actions.
    pub fn match_or_null(
        &mut self,
        input_port: u16,
        input_tag: u32,
        five_tuple: &FiveTuple,
        bytes: u32,
    ) -> Option<RuleAction> {
        assert!(
            input_port != WILD_PORT,
            "an input port of wildcard is a programming error"
        );
        let fields = fields_for_query(
            input_port,
            input_tag,
            five_tuple.ip_dst,
            five_tuple.ip_src,
            five_tuple.ip_proto,
            five_tuple.src_port,
            five_tuple.dst_port,
        );
        let key = self.root.match_or_null(&fields, 0)?.clone();
        let rule = self.rules.get_mut(&key)?;
        rule.choose_and_record(five_tuple, bytes).cloned()
    }

    /// Like `match_or_null` but does not touch stats, used by callers that
    /// only need to know where a flow would go.
    pub fn match_readonly(
        &self,
        input_port: u16,
        input_tag: u32,
        five_tuple: &FiveTuple,
    ) -> Option<&RuleAction> {
        assert!(
            input_port != WILD_PORT,
            "an input port of wildcard is a programming error"
        );
        let fields = fields_for_query(
            input_port,
            input_tag,
            five_tuple.ip_dst,
            five_tuple.ip_src,
            five_tuple.ip_proto,
            five_tuple.src_port,
            five_tuple.dst_port,
        );
        let key = self.root.match_or_null(&fields, 0)?;
        self.rules.get(key)?.choose_readonly(five_tuple)
    }

    /// Snapshots every installed rule's per-action stats, for an SSCP
    /// `StatsReply`.
    pub fn populate_sscp_stats(&self) -> Vec<(RuleKey, Vec<ActionStats>)> {
        self.rules
            .iter()
            .map(|(key, rule)| (key.clone(), rule.stats().to_vec()))
            .collect()
    }
}
