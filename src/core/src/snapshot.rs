//! Snapshot identity over diff-ID chains.

use crate::digest::{chain_id, Digest};

/// A committed snapshot position in the diff chain.
///
/// The name is always the chain ID of the diff chain, so two snapshots
/// built from the same chain are interchangeable. Child derivation
/// copies the chain; the receiver is never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    name: Digest,
    diff_chain: Vec<Digest>,
}

impl Snapshot {
    pub fn new(diff_chain: &[Digest]) -> Self {
        Self {
            name: chain_id(diff_chain),
            diff_chain: diff_chain.to_vec(),
        }
    }

    /// A new snapshot whose chain is this chain plus `diff_id`.
    pub fn new_child(&self, diff_id: Digest) -> Snapshot {
        let mut diff_chain = Vec::with_capacity(self.diff_chain.len() + 1);
        diff_chain.extend_from_slice(&self.diff_chain);
        diff_chain.push(diff_id);
        Snapshot {
            name: chain_id(&diff_chain),
            diff_chain,
        }
    }

    /// The chain ID the snapshotter knows this snapshot by; empty for
    /// the root (no parent).
    pub fn name(&self) -> &Digest {
        &self.name
    }

    pub fn diff_chain(&self) -> &[Digest] {
        &self.diff_chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(n: u8) -> Digest {
        Digest::from_bytes(&[n])
    }

    #[test]
    fn test_name_is_chain_id() {
        let chain = vec![diff(1), diff(2)];
        let snapshot = Snapshot::new(&chain);
        assert_eq!(snapshot.name(), &chain_id(&chain));
    }

    #[test]
    fn test_root_snapshot_has_empty_name() {
        let snapshot = Snapshot::new(&[]);
        assert!(snapshot.name().is_empty());
        assert!(snapshot.diff_chain().is_empty());
    }

    #[test]
    fn test_new_child_extends_and_renames() {
        let parent = Snapshot::new(&[diff(1)]);
        let child = parent.new_child(diff(2));

        assert_eq!(child.diff_chain(), &[diff(1), diff(2)]);
        assert_eq!(child.name(), &chain_id(&[diff(1), diff(2)]));
    }

    #[test]
    fn test_new_child_does_not_mutate_parent() {
        let parent = Snapshot::new(&[diff(1)]);
        let before = parent.clone();
        let _child = parent.new_child(diff(2));
        assert_eq!(parent, before);
    }

    #[test]
    fn test_clone_is_deep() {
        let original = Snapshot::new(&[diff(1)]);
        let mut copied = original.clone();
        copied = copied.new_child(diff(2));
        assert_eq!(original.diff_chain().len(), 1);
        assert_eq!(copied.diff_chain().len(), 2);
    }

    #[test]
    fn test_new_deep_copies_chain() {
        let mut chain = vec![diff(1)];
        let snapshot = Snapshot::new(&chain);
        chain.push(diff(2));
        assert_eq!(snapshot.diff_chain().len(), 1);
    }
}
