//! Rewrite plans.
//!
//! A plan is an ordered action sequence over a window of a layer chain.
//! `pick` opens a new output group; `fixup` folds the layer into the
//! group opened by the preceding pick. The first action must always be
//! a pick.

use image_manip_core::{ManipError, Result};

/// One plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Open a new output group with this layer
    Pick,
    /// Fold this layer into the currently open group
    Fixup,
}

/// A validated action sequence, consumed left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    actions: Vec<Action>,
}

impl Plan {
    /// Validate an explicit action sequence.
    ///
    /// # Errors
    ///
    /// `FixupAtStart` when the first action is a fixup.
    pub fn new(actions: Vec<Action>) -> Result<Self> {
        if actions.first() == Some(&Action::Fixup) {
            return Err(ManipError::FixupAtStart);
        }
        Ok(Self { actions })
    }

    /// A plan that preserves every layer of the window as its own group.
    pub fn preserve(len: usize) -> Self {
        Self {
            actions: vec![Action::Pick; len],
        }
    }

    /// A plan that collapses the whole window into one group.
    pub fn squash_all(len: usize) -> Self {
        let actions = (0..len)
            .map(|i| if i == 0 { Action::Pick } else { Action::Fixup })
            .collect();
        Self { actions }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_leading_fixup() {
        let result = Plan::new(vec![Action::Fixup, Action::Pick]);
        assert!(matches!(result, Err(ManipError::FixupAtStart)));
    }

    #[test]
    fn test_new_accepts_empty() {
        assert!(Plan::new(vec![]).unwrap().is_empty());
    }

    #[test]
    fn test_preserve_is_all_picks() {
        let plan = Plan::preserve(3);
        assert_eq!(plan.actions(), &[Action::Pick, Action::Pick, Action::Pick]);
    }

    #[test]
    fn test_squash_all_opens_one_group() {
        let plan = Plan::squash_all(3);
        assert_eq!(
            plan.actions(),
            &[Action::Pick, Action::Fixup, Action::Fixup]
        );
    }

    #[test]
    fn test_squash_all_single_layer() {
        assert_eq!(Plan::squash_all(1).actions(), &[Action::Pick]);
    }
}
