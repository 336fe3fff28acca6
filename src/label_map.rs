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

//! Turning a partition into a per-sample label image.

use ndarray as nd;
use rayon::prelude::*;

use crate::{
  check_same_shape, partition::Partition, tree::FeatureTable, Result, WatershedError, BACKGROUND,
};

/// A hyperplane of the grid: all samples whose coordinate along `axis` equals `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slice {
  pub axis: usize,
  pub index: usize,
}

impl Slice {
  pub fn new(axis: usize, index: usize) -> Self {
    Slice { axis, index }
  }

  fn check(&self, shape: &[usize]) -> Result<()> {
    match shape.get(self.axis) {
      None => Err(WatershedError::shape(format!(
        "slice axis {} does not exist in a grid of rank {}",
        self.axis,
        shape.len()
      ))),
      Some(&len) if self.index >= len => Err(WatershedError::shape(format!(
        "slice index {} is out of bounds for axis {} with length {len}",
        self.index, self.axis
      ))),
      Some(_) => Ok(()),
    }
  }
}

/// The two render-time parameters of the label image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParams {
  /// Samples darker than this are always background (absolute intensity)
  pub background_cutoff: f32,
  /// Percentage in `[0, 100]` of the way from `background_cutoff` up to a
  /// group's peak that the group is flooded down to. 100 floods all the way to
  /// the cutoff, 0 keeps only the peak itself.
  pub flood_fraction: f32,
}

impl RenderParams {
  pub fn new(background_cutoff: f32, flood_fraction: f32) -> Self {
    RenderParams { background_cutoff, flood_fraction }
  }

  /// Checks the parameters without clamping them
  pub fn validate(&self) -> Result<()> {
    if self.background_cutoff.is_nan() {
      return Err(WatershedError::parameter("background_cutoff", f64::NAN, "[-inf, +inf]"));
    }
    if !(0.0..=100.0).contains(&self.flood_fraction) {
      return Err(WatershedError::parameter(
        "flood_fraction",
        self.flood_fraction as f64,
        "[0, 100]",
      ));
    }
    Ok(())
  }
}

/// Level a sample must reach to be part of a group whose peak is `imax`.
/// `fraction` is the flood fraction divided by 100.
fn flood_level(cutoff: f64, imax: f64, fraction: f64) -> f64 {
  if fraction <= 0.0 {
    imax
  } else if fraction >= 1.0 || cutoff.is_infinite() {
    //An infinite cutoff would turn the interpolation into inf - inf
    cutoff
  } else {
    cutoff + (imax - cutoff) * (1.0 - fraction)
  }
}

/// Flood level of every node, looked up through the node's label root
fn flood_levels(features: &FeatureTable, params: RenderParams) -> Vec<f64> {
  let cutoff = params.background_cutoff as f64;
  let fraction = params.flood_fraction as f64 / 100.0;

  //The background can never be reached
  let mut levels = vec![f64::INFINITY; features.node_count() + 1];
  for node in features.iter() {
    let group_max = features.imax(node.label_root) as f64;
    levels[node.id] = flood_level(cutoff, group_max, fraction);
  }
  levels
}

#[inline(always)]
fn classify(node: usize, value: f32, cutoff: f64, levels: &[f64], labels: &[usize]) -> usize {
  let value = value as f64;
  //NaN samples fail both comparisons
  if node != BACKGROUND && value >= cutoff && value >= levels[node] {
    labels[node]
  } else {
    BACKGROUND
  }
}

/// Renders the label image of a segment tree.
///
/// Every sample gets the label of its node under `partition`, unless
/// - its node is the background, or
/// - it is darker than `params.background_cutoff`, or
/// - it is darker than the flood level of its group:
/// `cutoff + (Imax - cutoff) * (1 - flood_fraction / 100)`, where `Imax` is the
/// peak intensity of the node's label root.
///
/// If `slice` is given, only that hyperplane of the grid is visited and the
/// returned grid has one dimension less. The result is identical to slicing the
/// full label image.
///
/// # Errors
/// - `ParameterRangeError` if the parameters are out of range
/// - `ShapeError` if `node_map` and `samples` differ in shape, the partition
/// was made for a tree with a different node count, `slice` lies outside the
/// grid, or a visited entry of `node_map` is not a node id of `features`
pub fn materialize(
  node_map: nd::ArrayViewD<usize>,
  features: &FeatureTable,
  partition: &Partition,
  samples: nd::ArrayViewD<f32>,
  params: RenderParams,
  slice: Option<Slice>,
) -> Result<nd::ArrayD<usize>> {
  materialize_with_cancel(node_map, features, partition, samples, params, slice, || false)
}

/// Same as `materialize`, but gives up with `WatershedError::Superseded` as
/// soon as `is_cancelled` returns true. The check runs once per lane along the
/// first axis of the output.
pub fn materialize_with_cancel<F>(
  node_map: nd::ArrayViewD<usize>,
  features: &FeatureTable,
  partition: &Partition,
  samples: nd::ArrayViewD<f32>,
  params: RenderParams,
  slice: Option<Slice>,
  is_cancelled: F,
) -> Result<nd::ArrayD<usize>>
where
  F: Fn() -> bool + Sync,
{
  //(1) Validate everything before touching any sample
  params.validate()?;
  check_same_shape(&node_map, &samples, "node map and samples")?;
  if node_map.ndim() < 2 {
    return Err(WatershedError::shape(format!(
      "label maps need a grid of rank 2 or higher, got rank {}",
      node_map.ndim()
    )));
  }
  if partition.node_count() != features.node_count() {
    return Err(WatershedError::shape(format!(
      "partition covers {} nodes, but the tree has {} nodes",
      partition.node_count(),
      features.node_count()
    )));
  }
  log::debug!(
    "materializing labels (merge threshold {}, cutoff {}, flooding {}%, slice {slice:?})",
    partition.merge_threshold(),
    params.background_cutoff,
    params.flood_fraction
  );

  //(2) Restrict both grids to the requested hyperplane. These are views, nothing is copied.
  let (node_map, samples) = match slice {
    None => (node_map, samples),
    Some(slice) => {
      slice.check(node_map.shape())?;
      let axis = nd::Axis(slice.axis);
      (node_map.index_axis_move(axis, slice.index), samples.index_axis_move(axis, slice.index))
    }
  };

  //Node ids index the look-up tables below
  if let Some(&node) = node_map.iter().find(|&&node| node > features.node_count()) {
    return Err(WatershedError::shape(format!(
      "node map refers to node {node}, but the tree has {} nodes",
      features.node_count()
    )));
  }

  //(3) Look-up tables, shared read-only by all lanes
  let levels = flood_levels(features, params);
  let labels = partition.as_slice();
  let cutoff = params.background_cutoff as f64;

  /*(4) Classify all samples
    Each sample only depends on its own node map entry, its own intensity and
    the look-up tables. We split the output into lanes along the first axis and
    fill the lanes in parallel.
  */
  let mut output = nd::ArrayD::<usize>::zeros(node_map.raw_dim());
  nd::Zip::from(output.axis_iter_mut(nd::Axis(0)))
    .and(node_map.axis_iter(nd::Axis(0)))
    .and(samples.axis_iter(nd::Axis(0)))
    .into_par_iter()
    .try_for_each(|(mut out_lane, node_lane, sample_lane)| {
      if is_cancelled() {
        return Err(WatershedError::Superseded);
      }
      nd::Zip::from(&mut out_lane).and(&node_lane).and(&sample_lane).for_each(
        |out, &node, &value| {
          *out = classify(node, value, cutoff, &levels, labels);
        },
      );
      Ok(())
    })?;

  Ok(output)
}

/// Counts the number of samples per label. The returned vec has
/// `label_count + 1` entries, entry 0 counts the background. Labels larger than
/// `label_count` are ignored.
pub fn label_areas<D>(labels: nd::ArrayView<usize, D>, label_count: usize) -> Vec<usize>
where
  D: nd::Dimension,
{
  let mut areas = vec![0usize; label_count + 1];
  labels.iter().for_each(|&label| {
    if let Some(area) = areas.get_mut(label) {
      *area += 1;
    }
  });
  areas
}
