//! Layer and layer-chain value types.
//!
//! A layer pairs the descriptor of its compressed blob with the digest
//! of its uncompressed tar bytes (the diff-ID). A layer chain keeps the
//! two sequences side by side in bottom-up application order; both grow
//! together, so their lengths always match.

use serde::{Deserialize, Serialize};

use crate::descriptor::Descriptor;
use crate::digest::Digest;
use crate::error::{ManipError, Result};

/// A single image layer. Fields never mutate after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    desc: Descriptor,
    diff_id: Digest,
}

impl Layer {
    pub fn new(desc: Descriptor, diff_id: Digest) -> Self {
        Self { desc, diff_id }
    }

    /// Descriptor of the compressed blob, as referenced by manifests.
    pub fn desc(&self) -> &Descriptor {
        &self.desc
    }

    /// Digest of the uncompressed tar bytes, as referenced by configs.
    pub fn diff_id(&self) -> &Digest {
        &self.diff_id
    }
}

/// An ordered chain of layers.
///
/// The descriptor and diff-ID sequences can be safely appended to and
/// cleared because constructors always deep-copy their inputs; the
/// items themselves are never modified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerChain {
    descriptors: Vec<Descriptor>,
    diff_ids: Vec<Digest>,
}

impl LayerChain {
    /// Build a chain from parallel descriptor and diff-ID sequences.
    ///
    /// # Errors
    ///
    /// Returns `InvalidImage` if the sequence lengths differ.
    pub fn new(descriptors: &[Descriptor], diff_ids: &[Digest]) -> Result<Self> {
        if descriptors.len() != diff_ids.len() {
            return Err(ManipError::InvalidImage(format!(
                "number of descriptors ({}) does not match number of diff IDs ({})",
                descriptors.len(),
                diff_ids.len()
            )));
        }
        Ok(Self {
            descriptors: descriptors.to_vec(),
            diff_ids: diff_ids.to_vec(),
        })
    }

    pub fn from_layer(layer: Layer) -> Self {
        Self {
            descriptors: vec![layer.desc.clone()],
            diff_ids: vec![layer.diff_id],
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn clear(&mut self) {
        self.descriptors.clear();
        self.diff_ids.clear();
    }

    /// Append a single layer, extending both sequences together.
    pub fn push(&mut self, layer: Layer) {
        self.descriptors.push(layer.desc);
        self.diff_ids.push(layer.diff_id);
    }

    /// Append every layer of another chain.
    pub fn extend(&mut self, other: &LayerChain) {
        self.descriptors.extend_from_slice(&other.descriptors);
        self.diff_ids.extend_from_slice(&other.diff_ids);
    }

    /// The layer at `index`, or `None` out of range.
    pub fn get(&self, index: usize) -> Option<Layer> {
        let desc = self.descriptors.get(index)?;
        let diff_id = self.diff_ids.get(index)?;
        Some(Layer::new(desc.clone(), diff_id.clone()))
    }

    /// A new chain holding the layers in `range`.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Self {
        Self {
            descriptors: self.descriptors[range.clone()].to_vec(),
            diff_ids: self.diff_ids[range].to_vec(),
        }
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn diff_ids(&self) -> &[Digest] {
        &self.diff_ids
    }

    /// Iterate layers in application order.
    pub fn iter(&self) -> impl Iterator<Item = Layer> + '_ {
        self.descriptors
            .iter()
            .zip(self.diff_ids.iter())
            .map(|(d, i)| Layer::new(d.clone(), i.clone()))
    }
}
