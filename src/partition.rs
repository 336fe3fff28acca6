/*
  Copyright© 2023 Raúl Wolters(1)

  This file is part of rustronomy-hwatershed.

  rustronomy is free software: you can redistribute it and/or modify it under
  the terms of the European Union Public License version 1.2 or later, as
  published by the European Commission.

  rustronomy is distributed in the hope that it will be useful, but WITHOUT ANY
  WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
  A PARTICULAR PURPOSE. See the European Union Public License for more details.

  You should have received a copy of the EUPL in an/all official language(s) of
  the European Union along with rustronomy.  If not, see
  <https://ec.europa.eu/info/european-union-public-licence_en/>.

  (1) Resident of the Kingdom of the Netherlands; agreement between licensor and
  licensee subject to Dutch law as per article 15 of the EUPL.
*/

//! Cutting the segment tree at a seed dynamics threshold.

use crate::{
  tree::{FeatureTable, SegmentTree},
  Result, WatershedError, BACKGROUND,
};

/// A flat partition of the segment tree: the label of every node under one
/// merge threshold.
///
/// Partitions are immutable snapshots. A new threshold produces a new
/// partition, it never updates an existing one.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
  merge_threshold: f32,
  //Indexed by node id, entry 0 is the background
  node_to_label: Vec<usize>,
  label_count: usize,
}

impl Partition {
  /// Cuts the tree described by `features` at `merge_threshold`.
  ///
  /// A node keeps a label of its own if it is a root, or if its dynamics are
  /// at least `merge_threshold`. Every other node takes the label of its
  /// parent. Labels are handed out in ascending node id order, starting at 1,
  /// so a label never changes because an unrelated part of the tree merged.
  ///
  /// # Errors
  /// `ParameterRangeError` if `merge_threshold` is negative or `NaN`.
  pub fn from_features(features: &FeatureTable, merge_threshold: f32) -> Result<Self> {
    if merge_threshold.is_nan() || merge_threshold < 0.0 {
      return Err(WatershedError::parameter(
        "merge_threshold",
        merge_threshold as f64,
        "[0, +inf]",
      ));
    }

    let mut node_to_label = vec![BACKGROUND; features.node_count() + 1];
    let mut label_count = 0;

    //Parents always have lower ids than their children, so they are labelled first
    for node in features.iter() {
      node_to_label[node.id] = match node.parent {
        Some(parent) if node.dynamics < merge_threshold => node_to_label[parent],
        _ => {
          label_count += 1;
          label_count
        }
      };
    }

    log::debug!(
      "partitioned {} nodes into {label_count} labels at merge threshold {merge_threshold}",
      features.node_count()
    );
    Ok(Partition { merge_threshold, node_to_label, label_count })
  }

  /// Label of `node`. The background (node 0) always has label 0.
  ///
  /// # Panics
  /// If `node` is not a node of the tree this partition was made for.
  pub fn label(&self, node: usize) -> usize {
    self.node_to_label[node]
  }

  /// Number of distinct non-zero labels
  pub fn label_count(&self) -> usize {
    self.label_count
  }

  pub fn merge_threshold(&self) -> f32 {
    self.merge_threshold
  }

  /// Number of nodes this partition covers (not counting the background)
  pub fn node_count(&self) -> usize {
    self.node_to_label.len() - 1
  }

  /// The full node id → label table, including the background at index 0
  pub fn as_slice(&self) -> &[usize] {
    &self.node_to_label
  }
}

/// Cuts `tree` at `merge_threshold` (seed dynamics). This is a pure function
/// of its arguments and runs in `O(node count)`, independent of the number of
/// samples in the image. See `Partition::from_features` for the rules.
pub fn partition(tree: &SegmentTree, merge_threshold: f32) -> Result<Partition> {
  Partition::from_features(tree.features(), merge_threshold)
}
