use netsim_types::{ActionStats, FiveTuple, ForwardingRule, RuleAction, RuleKey};

/// A rule as installed in a `Matcher`: the wire-level `ForwardingRule` plus
/// live per-action counters that survive rule updates sharing the same key.
#[derive(Debug, Clone)]
pub struct InstalledRule {
    key: RuleKey,
    actions: Vec<RuleAction>,
    stats: Vec<ActionStats>,
    total_weight: u32,
}

impl InstalledRule {
    pub fn new(rule: ForwardingRule) -> InstalledRule {
        let total_weight = rule.actions.iter().map(|a| a.weight).sum();
        let stats = vec![ActionStats::default(); rule.actions.len()];
        InstalledRule {
            key: rule.key,
            actions: rule.actions,
            stats,
            total_weight,
        }
    }

    pub fn key(&self) -> &RuleKey {
        &self.key
    }

    pub fn actions(&self) -> &[RuleAction] {
        &self.actions
    }

    pub fn is_drop(&self) -> bool {
        self.actions.is_empty()
    }

    /// Stably selects one action by weight, using the five-tuple's
    /// deterministic hash so the same flow always lands on the same
    /// action and long-run traffic splits match the configured weights.
    pub fn choose_readonly(&self, five_tuple: &FiveTuple) -> Option<&RuleAction> {
        if self.actions.is_empty() || self.total_weight == 0 {
            return None;
        }
        let mut slot = five_tuple.stable_hash() % self.total_weight as u64;
        for action in &self.actions {
            if slot < action.weight as u64 {
                return Some(action);
            }
            slot -= action.weight as u64;
        }
        self.actions.last()
    }

    /// Chooses an action and records the match against its stats.
    pub fn choose_and_record(
        &mut self,
        five_tuple: &FiveTuple,
        bytes: u32,
    ) -> Option<&RuleAction> {
        let idx = self.choose_index(five_tuple)?;
        self.stats[idx].record(bytes);
        Some(&self.actions[idx])
    }

    fn choose_index(&self, five_tuple: &FiveTuple) -> Option<usize> {
        if self.actions.is_empty() || self.total_weight == 0 {
            return None;
        }
        let mut slot = five_tuple.stable_hash() % self.total_weight as u64;
        for (idx, action) in self.actions.iter().enumerate() {
            if slot < action.weight as u64 {
                return Some(idx);
            }
            slot -= action.weight as u64;
        }
        Some(self.actions.len() - 1)
    }

    pub fn stats(&self) -> &[ActionStats] {
        &self.stats
    }

    /// Merges another (presumably superseded) rule's per-action stats into
    /// this one, matching actions up by `(rewrite_tag, output_port)`
    /// identity rather than position, so counters survive an action list
    /// being reordered or resized across a reinstall.
    pub fn merge_stats_from(&mut self, previous: &InstalledRule) {
        for (idx, action) in self.actions.iter().enumerate() {
            let identity = (action.rewrite_tag, action.output_port);
            if let Some(prev_idx) = previous
                .actions
                .iter()
                .position(|a| (a.rewrite_tag, a.output_port) == identity)
            {
                self.stats[idx].merge(previous.stats[prev_idx]);
            }
        }
    }
}
