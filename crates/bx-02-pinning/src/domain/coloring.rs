//! Tri-color marking over a CID arena.
//!
//! Every CID seen during marking gets a `u32` slot. White slots are
//! unvisited, gray slots are queued on the explicit stack, black slots have
//! had their links resolved. The reachable set is every non-white slot.

use std::collections::HashMap;

use shared_types::{Cid, DagError, LinkSource};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// How link failures below a root are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// The first failure aborts marking.
    Strict,
    /// Failures are logged and the subtree is skipped.
    BestEffort,
}

#[derive(Debug, Default)]
pub struct ColoredSet {
    index: HashMap<Cid, u32>,
    cids: Vec<Cid>,
    colors: Vec<Color>,
    gray: Vec<u32>,
}

impl ColoredSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, cid: &Cid) -> u32 {
        if let Some(&slot) = self.index.get(cid) {
            return slot;
        }
        let slot = self.cids.len() as u32;
        self.index.insert(*cid, slot);
        self.cids.push(*cid);
        self.colors.push(Color::White);
        slot
    }

    fn shade(&mut self, cid: &Cid) {
        let slot = self.slot(cid);
        if self.colors[slot as usize] == Color::White {
            self.colors[slot as usize] = Color::Gray;
            self.gray.push(slot);
        }
    }

    /// Mark `cid` reachable without following its links.
    pub fn add(&mut self, cid: &Cid) {
        let slot = self.slot(cid);
        if self.colors[slot as usize] == Color::White {
            self.colors[slot as usize] = Color::Black;
        }
    }

    /// Mark every root and all of its descendants.
    ///
    /// A node that is already black is not expanded again, so shared
    /// subgraphs are walked once across calls.
    pub async fn mark<L>(
        &mut self,
        roots: &[Cid],
        links: &L,
        strictness: Strictness,
    ) -> Result<(), (Cid, DagError)>
    where
        L: LinkSource + ?Sized,
    {
        for root in roots {
            self.shade(root);
        }

        while let Some(slot) = self.gray.pop() {
            let cid = self.cids[slot as usize];
            match links.get_links(&cid).await {
                Ok(children) => {
                    for child in &children {
                        self.shade(child);
                    }
                }
                Err(e) if strictness == Strictness::Strict => {
                    self.gray.clear();
                    return Err((cid, e));
                }
                Err(e) => {
                    debug!(cid = %cid, error = %e, "[gc] skipping unresolvable best-effort node");
                }
            }
            self.colors[slot as usize] = Color::Black;
        }
        Ok(())
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.index
            .get(cid)
            .is_some_and(|&slot| self.colors[slot as usize] != Color::White)
    }

    pub fn len(&self) -> usize {
        self.colors.iter().filter(|c| **c != Color::White).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cid> {
        self.cids
            .iter()
            .zip(&self.colors)
            .filter(|(_, color)| **color != Color::White)
            .map(|(cid, _)| cid)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use shared_types::test_utils::{dag_node, raw_block};
    use shared_types::{links, Block};

    struct MapLinks(HashMap<Cid, Block>);

    #[async_trait]
    impl LinkSource for MapLinks {
        async fn get_links(&self, cid: &Cid) -> Result<Vec<Cid>, DagError> {
            let block = self.0.get(cid).ok_or(DagError::NotFound { cid: *cid })?;
            links(block)
        }
    }

    fn source(blocks: &[&Block]) -> MapLinks {
        MapLinks(blocks.iter().map(|b| (*b.cid(), (*b).clone())).collect())
    }

    #[tokio::test]
    async fn test_marks_transitive_closure() {
        let l1 = raw_block("leaf 1");
        let l2 = raw_block("leaf 2");
        let mid = dag_node("mid", &[&l2]);
        let root = dag_node("root", &[&l1, &mid]);
        let src = source(&[&l1, &l2, &mid, &root]);

        let mut set = ColoredSet::new();
        set.mark(&[*root.cid()], &src, Strictness::Strict).await.unwrap();

        for b in [&l1, &l2, &mid, &root] {
            assert!(set.contains(b.cid()));
        }
        assert_eq!(set.len(), 4);
    }

    #[tokio::test]
    async fn test_strict_aborts_on_missing_child() {
        let missing = raw_block("missing");
        let root = dag_node("root", &[&missing]);
        let src = source(&[&root]);

        let mut set = ColoredSet::new();
        let err = set.mark(&[*root.cid()], &src, Strictness::Strict).await;

        assert_eq!(err.unwrap_err().0, *missing.cid());
    }

    #[tokio::test]
    async fn test_best_effort_tolerates_missing_child() {
        let present = raw_block("present");
        let missing = raw_block("missing");
        let root = dag_node("root", &[&present, &missing]);
        let src = source(&[&root, &present]);

        let mut set = ColoredSet::new();
        set.mark(&[*root.cid()], &src, Strictness::BestEffort)
            .await
            .unwrap();

        assert!(set.contains(present.cid()));
        assert!(set.contains(root.cid()));
    }

    #[test]
    fn test_unvisited_is_not_contained() {
        let set = ColoredSet::new();
        assert!(!set.contains(raw_block("x").cid()));
        assert!(set.is_empty());
    }
}
