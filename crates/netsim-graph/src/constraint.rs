use crate::index::LinkIndex;

/// A predicate over a candidate link sequence, used to filter paths
/// produced by the search algorithms (e.g. "must avoid region X", "must
/// cross at least one of these links").
pub trait PathConstraint {
    fn satisfied_by(&self, links: &[LinkIndex]) -> bool;
}

/// Satisfied only if every child constraint is satisfied.
pub struct Conjunction {
    children: Vec<Box<dyn PathConstraint>>,
}

impl Conjunction {
    pub fn new(children: Vec<Box<dyn PathConstraint>>) -> Conjunction {
        Conjunction { children }
    }
}

impl PathConstraint for Conjunction {
    fn satisfied_by(&self, links: &[LinkIndex]) -> bool {
        self.children.iter().all(|c| c.satisfied_by(links))
    }
}

/// Satisfied if at least one child constraint is satisfied.
pub struct Disjunction {
    children: Vec<Box<dyn PathConstraint>>,
}

impl Disjunction {
    pub fn new(children: Vec<Box<dyn PathConstraint>>) -> Disjunction {
        Disjunction { children }
    }
}

impl PathConstraint for Disjunction {
    fn satisfied_by(&self, links: &[LinkIndex]) -> bool {
        self.children.iter().any(|c| c.satisfied_by(links))
    }
}

/// Always satisfied. Used as a default when a caller has no real
/// constraint to apply.
pub struct DummyConstraint;

impl PathConstraint for DummyConstraint {
    fn satisfied_by(&self, _links: &[LinkIndex]) -> bool {
        true
    }
}

/// Rejects any path that uses one of a fixed set of links.
pub struct AvoidLinks {
    avoided: Vec<LinkIndex>,
}

impl AvoidLinks {
    pub fn new(avoided: Vec<LinkIndex>) -> AvoidLinks {
        AvoidLinks { avoided }
    }
}

impl PathConstraint for AvoidLinks {
    fn satisfied_by(&self, links: &[LinkIndex]) -> bool {
        !links.iter().any(|l| self.avoided.contains(l))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_always_passes() {
        assert!(DummyConstraint.satisfied_by(&[]));
        assert!(DummyConstraint.satisfied_by(&[LinkIndex(0), LinkIndex(1)]));
    }

    #[test]
    fn conjunction_requires_all() {
        let c = Conjunction::new(vec![
            Box::new(DummyConstraint),
            Box::new(AvoidLinks::new(vec![LinkIndex(2)])),
        ]);
        assert!(c.satisfied_by(&[LinkIndex(0), LinkIndex(1)]));
        assert!(!c.satisfied_by(&[LinkIndex(0), LinkIndex(2)]));
    }

    #[test]
    fn disjunction_requires_any() {
        let d = Disjunction::new(vec![
            Box::new(AvoidLinks::new(vec![LinkIndex(0)])),
            Box::new(AvoidLinks::new(vec![LinkIndex(1)])),
        ]);
        // Path uses link 0 but not link 1, so the second constraint passes.
        assert!(d.satisfied_by(&[LinkIndex(0)]));
        // Path uses both, so neither constraint passes.
        assert!(!d.satisfied_by(&[LinkIndex(0), LinkIndex(1)]));
    }
}
