pub mod matcher;
pub mod rule;
pub mod trie;

pub use matcher::Matcher;
pub use rule::InstalledRule;

#[cfg(test)]
mod tests {
    use super::*;
    use netsim_types::{FiveTuple, FiveTupleMatch, ForwardingRule, RuleAction, RuleKey};

    fn five_tuple(src: u32, dst: u32) -> FiveTuple {
        FiveTuple {
            ip_src: src,
            ip_dst: dst,
            ip_proto: 17,
            src_port: 1000,
            dst_port: 2000,
        }
    }

    #[test]
    fn exact_match_beats_wildcard() {
        let mut m = Matcher::new("device-a");
        m.add_rule(ForwardingRule::new(
            RuleKey::new(0, 0, vec![]),
            vec![RuleAction::new(1, 1)],
        ));
        m.add_rule(ForwardingRule::new(
            RuleKey::new(
                0,
                0,
                vec![FiveTupleMatch {
                    ip_src: 10,
                    ip_dst: 20,
                    ip_proto: 17,
                    src_port: 1000,
                    dst_port: 2000,
                }],
            ),
            vec![RuleAction::new(2, 1)],
        ));

        let matched = m
            .match_or_null(7, 0, &five_tuple(10, 20), 100)
            .expect("exact rule should match");
        assert_eq!(matched.output_port, 2);

        let matched = m
            .match_or_null(7, 0, &five_tuple(99, 99), 100)
            .expect("wildcard rule should match");
        assert_eq!(matched.output_port, 1);
    }

    #[test]
    fn deleting_a_rule_clears_it_from_the_tree() {
        let mut m = Matcher::new("device-a");
        let key = RuleKey::new(0, 0, vec![]);
        m.add_rule(ForwardingRule::new(key.clone(), vec![RuleAction::new(1, 1)]));
        assert!(m.match_or_null(7, 0, &five_tuple(1, 2), 10).is_some());

        m.add_rule(ForwardingRule::new(key, vec![]));
        assert!(m.match_or_null(7, 0, &five_tuple(1, 2), 10).is_none());
        assert_eq!(m.num_rules(), 0);
    }

    #[test]
    fn reinstalling_a_rule_carries_stats_forward() {
        let mut m = Matcher::new("device-a");
        let key = RuleKey::new(0, 0, vec![]);
        m.add_rule(ForwardingRule::new(key.clone(), vec![RuleAction::new(1, 1)]));
        m.match_or_null(7, 0, &five_tuple(1, 2), 1000);

        m.add_rule(ForwardingRule::new(key, vec![RuleAction::new(1, 1)]));
        let stats = m.populate_sscp_stats();
        let (_, action_stats) = &stats[0];
        assert_eq!(action_stats[0].total_bytes_matched, 1000);
    }

    #[test]
    fn weighted_ecmp_splits_traffic_by_weight() {
        let mut m = Matcher::new("device-a");
        m.add_rule(ForwardingRule::new(
            RuleKey::new(0, 0, vec![]),
            vec![RuleAction::new(1, 100), RuleAction::new(2, 300)],
        ));

        let mut heavy = 0u64;
        let mut light = 0u64;
        for i in 0..1_000_000u32 {
            let ft = FiveTuple {
                ip_src: i,
                ip_dst: i.wrapping_mul(2_654_435_761),
                ip_proto: 17,
                src_port: 1000,
                dst_port: 2000,
            };
            match m.match_readonly(7, 0, &ft).map(|a| a.output_port) {
                Some(2) => heavy += 1,
                Some(1) => light += 1,
                _ => {}
            }
        }

        let ratio = heavy as f64 / light as f64;
        assert!((ratio - 3.0).abs() < 0.05, "ratio was {ratio}");
    }
}
