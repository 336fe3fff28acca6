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

//! Handle based interface for interactive front-ends.
//!
//! A front-end builds one `Pipeline` per image. Every time the seed dynamics
//! control moves it asks for a new `PartitionHandle`, and every time anything
//! changes it renders the slice it is showing. Handles are cheap to clone and
//! can be sent to other threads.

use std::sync::{
  atomic::{AtomicU64, Ordering},
  Arc,
};

use ndarray as nd;
use num_traits::ToPrimitive;

use crate::{
  label_map::{self, RenderParams, Slice},
  partition::Partition,
  tree::{Connectivity, SegmentTree, TreeBuilder},
  Result, WatershedError,
};

/// Handle to the segment tree of the pipeline's current input
#[derive(Debug, Clone)]
pub struct TreeHandle {
  generation: u64,
  tree: Arc<SegmentTree>,
}

impl TreeHandle {
  pub fn tree(&self) -> &SegmentTree {
    &self.tree
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }
}

/// Handle to one partition snapshot of a segment tree
#[derive(Debug, Clone)]
pub struct PartitionHandle {
  generation: u64,
  tree: Arc<SegmentTree>,
  partition: Arc<Partition>,
}

impl PartitionHandle {
  pub fn partition(&self) -> &Partition {
    &self.partition
  }

  pub fn tree(&self) -> &SegmentTree {
    &self.tree
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  /// Number of labels in this snapshot
  pub fn label_count(&self) -> usize {
    self.partition.label_count()
  }
}

/// The full segmentation pipeline of one input image.
///
/// The pipeline owns the segment tree of its current input. Replacing the input
/// increments the pipeline's *generation*; handles from an older generation are
/// rejected with `StaleHandleError`.
///
/// `render` calls coalesce: when a newer render is requested while an older one
/// is still running (from another thread), the older one stops early and returns
/// `Superseded`. `full_export` is never interrupted.
#[derive(Debug)]
pub struct Pipeline {
  builder: TreeBuilder,
  generation: u64,
  tree: Arc<SegmentTree>,
  latest_render: AtomicU64,
}

impl Pipeline {
  /// Builds the segment tree of `img`. This is the only expensive step of the
  /// pipeline and runs once per input image.
  pub fn initialize<T, D>(
    img: nd::ArrayView<T, D>,
    background_threshold: f32,
    connectivity: Connectivity,
  ) -> Result<Self>
  where
    T: ToPrimitive + Copy,
    D: nd::Dimension,
  {
    let builder = TreeBuilder::new()
      .set_background_threshold(background_threshold)
      .set_connectivity(connectivity);
    Self::with_builder(builder, img)
  }

  /// Builds the segment tree of `img` with a pre-configured builder
  pub fn with_builder<T, D>(builder: TreeBuilder, img: nd::ArrayView<T, D>) -> Result<Self>
  where
    T: ToPrimitive + Copy,
    D: nd::Dimension,
  {
    let tree = Arc::new(builder.build(img)?);
    Ok(Pipeline { builder, generation: 0, tree, latest_render: AtomicU64::new(0) })
  }

  /// Handle to the tree of the current input
  pub fn tree_handle(&self) -> TreeHandle {
    TreeHandle { generation: self.generation, tree: Arc::clone(&self.tree) }
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  pub fn builder(&self) -> &TreeBuilder {
    &self.builder
  }

  /// Replaces the input image, using the same builder configuration. All
  /// handles handed out before this call become stale. If building the new tree
  /// fails, the pipeline keeps its current input.
  pub fn replace_input<T, D>(&mut self, img: nd::ArrayView<T, D>) -> Result<TreeHandle>
  where
    T: ToPrimitive + Copy,
    D: nd::Dimension,
  {
    let tree = Arc::new(self.builder.build(img)?);
    self.tree = tree;
    self.generation += 1;
    log::info!("input replaced, pipeline is now at generation {}", self.generation);
    Ok(self.tree_handle())
  }

  fn check_generation(&self, generation: u64) -> Result<()> {
    if generation == self.generation {
      Ok(())
    } else {
      Err(WatershedError::StaleHandleError {
        handle_generation: generation,
        current_generation: self.generation,
      })
    }
  }

  /// Cuts the tree at a new seed dynamics value and returns a fresh snapshot
  pub fn set_merge_threshold(&self, tree: &TreeHandle, value: f32) -> Result<PartitionHandle> {
    self.check_generation(tree.generation)?;
    let partition = Arc::new(tree.tree.partition(value)?);
    log::info!("seed dynamics {value}: {} labels", partition.label_count());
    Ok(PartitionHandle { generation: tree.generation, tree: Arc::clone(&tree.tree), partition })
  }

  /// Renders the label image for display, optionally only one slice of it.
  /// Returns `Superseded` if another render was requested before this one finished.
  pub fn render(
    &self,
    partition: &PartitionHandle,
    params: RenderParams,
    slice: Option<Slice>,
  ) -> Result<nd::ArrayD<usize>> {
    self.check_generation(partition.generation)?;
    let ticket = self.latest_render.fetch_add(1, Ordering::SeqCst) + 1;

    let result = label_map::materialize_with_cancel(
      partition.tree.node_map(),
      partition.tree.features(),
      &partition.partition,
      partition.tree.samples(),
      params,
      slice,
      || self.latest_render.load(Ordering::Relaxed) != ticket,
    );
    if let Err(WatershedError::Superseded) = result {
      log::debug!("render request {ticket} superseded");
    }
    result
  }

  /// Renders the full label image, regardless of what is being displayed
  pub fn full_export(
    &self,
    partition: &PartitionHandle,
    params: RenderParams,
  ) -> Result<nd::ArrayD<usize>> {
    self.check_generation(partition.generation)?;
    partition.tree.materialize(&partition.partition, params, None)
  }
}

/// Logarithmic mapping between a control position and a parameter value.
///
/// Position `x` maps to `exp(x) + min - 1`, so position 0 is `min` and
/// `max_position()` is `max`. This gives fine control over small dynamics and
/// intensities while still reaching the largest ones.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogScale {
  min: f32,
  max: f32,
}

impl LogScale {
  pub fn new(min: f32, max: f32) -> Self {
    LogScale { min, max: max.max(min) }
  }

  /// Scale spanning the dynamics of all peaks of `tree`
  pub fn for_dynamics(tree: &SegmentTree) -> Self {
    let (min, max) = tree.features().dynamics_range();
    Self::new(min, max)
  }

  /// Scale spanning the intensities of the image of `tree`
  pub fn for_intensity(tree: &SegmentTree) -> Self {
    let (min, max) = tree.intensity_range();
    Self::new(min, max)
  }

  pub fn min(&self) -> f32 {
    self.min
  }

  pub fn max(&self) -> f32 {
    self.max
  }

  /// Largest meaningful control position
  pub fn max_position(&self) -> f32 {
    (self.max - self.min + 1.0).ln()
  }

  /// Parameter value at control position `position`
  pub fn value(&self, position: f32) -> f32 {
    position.exp() + self.min - 1.0
  }

  /// Control position of `value`. Values below `min` map to position 0.
  pub fn position(&self, value: f32) -> f32 {
    (value - self.min + 1.0).max(1.0).ln()
  }
}
