//! Choosing one node among the candidates.

use rand::seq::IndexedRandom;

use crate::models::Node;

/// Picks the node a workload lands on.
pub trait NodeSelector: Send + Sync {
    /// Returns one of `candidates`, or `None` if there are none.
    fn select<'a>(&self, candidates: &'a [Node]) -> Option<&'a Node>;
}

/// Uniformly random choice, spreading load without tracking it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSelector;

impl NodeSelector for RandomSelector {
    fn select<'a>(&self, candidates: &'a [Node]) -> Option<&'a Node> {
        candidates.choose(&mut rand::rng())
    }
}

/// Always the first candidate. Deterministic, for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstSelector;

impl NodeSelector for FirstSelector {
    fn select<'a>(&self, candidates: &'a [Node]) -> Option<&'a Node> {
        candidates.first()
    }
}
