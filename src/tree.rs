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

//! Construction of the segment tree: regional maxima, the flooding that
//! assigns every sample to a peak, and the per-peak features.

use std::{
  cmp::Ordering,
  collections::{BinaryHeap, VecDeque},
  sync::Arc,
};

use ndarray as nd;
use num_traits::ToPrimitive;

use crate::{
  label_map::{self, RenderParams, Slice},
  partition::Partition,
  Result, Topology, WatershedError, BACKGROUND,
};

/// Which samples count as neighbours while flooding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
  /// Only samples that share a face: 4 neighbours in 2D, 6 in 3D
  #[default]
  Face,
  /// Samples that share a face, an edge or a corner: 8 neighbours in 2D, 26 in 3D
  Full,
}

/// Converts an array of any numeric data-type `T` into the `f32` samples that
/// the segment tree is built from. Values that cannot be represented as a
/// float are mapped to `NaN`, which is never part of any peak.
pub fn to_sample_grid<T, D>(img: nd::ArrayView<T, D>) -> nd::ArrayD<f32>
where
  T: ToPrimitive + Copy,
  D: nd::Dimension,
{
  img.mapv(|x| x.to_f32().unwrap_or(f32::NAN)).into_dyn()
}

////////////////////////////////////////////////////////////////////////////////
//                               TREE BUILDER                                 //
////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone)]
/// Builder for configuring the construction of a segment tree.
///
/// Use `new()` to start with the defaults (include every sample, face
/// connectivity), change options with the `set_*` associated functions and
/// call `build()` with an image to flood it.
pub struct TreeBuilder {
  background_threshold: f32,
  connectivity: Connectivity,
}

impl Default for TreeBuilder {
  fn default() -> Self {
    TreeBuilder { background_threshold: f32::NEG_INFINITY, connectivity: Connectivity::Face }
  }
}

impl TreeBuilder {
  /// creates a new `TreeBuilder` that includes every sample and uses face connectivity
  pub fn new() -> Self {
    Self::default()
  }

  /// Set the intensity below which samples are excluded from all peaks.
  /// Defaults to negative infinity (include everything).
  pub fn set_background_threshold(mut self, threshold: f32) -> Self {
    self.background_threshold = threshold;
    self
  }

  /// Set the neighbourhood used while flooding
  pub fn set_connectivity(mut self, connectivity: Connectivity) -> Self {
    self.connectivity = connectivity;
    self
  }

  pub fn background_threshold(&self) -> f32 {
    self.background_threshold
  }

  pub fn connectivity(&self) -> Connectivity {
    self.connectivity
  }

  /// Floods `img` and returns its segment tree. The image is converted to `f32`
  /// samples first (see `to_sample_grid`).
  ///
  /// # Errors
  /// - `ShapeError` if `img` is not 2D or 3D
  /// - `EmptyInputError` if no sample reaches the background threshold
  /// - `ParameterRangeError` if the background threshold is `NaN`
  pub fn build<T, D>(&self, img: nd::ArrayView<T, D>) -> Result<SegmentTree>
  where
    T: ToPrimitive + Copy,
    D: nd::Dimension,
  {
    self.build_shared(Arc::new(to_sample_grid(img)))
  }

  /// Same as `build`, but takes samples that may already be shared with other
  /// parts of the program. The tree keeps a reference to them.
  pub fn build_shared(&self, samples: Arc<nd::ArrayD<f32>>) -> Result<SegmentTree> {
    #[cfg(feature = "debug")]
    let mut perf = crate::performance_monitoring::PerfReport::default();
    #[cfg(feature = "debug")]
    let build_start = std::time::Instant::now();

    //(1) Validate input
    let rank = samples.ndim();
    if rank != 2 && rank != 3 {
      return Err(WatershedError::shape(format!(
        "only 2D and 3D grids can be segmented, got a grid of rank {rank} with shape {:?}",
        samples.shape()
      )));
    }
    let threshold = self.background_threshold;
    if threshold.is_nan() {
      return Err(WatershedError::parameter(
        "background_threshold",
        f64::NAN,
        "(-inf, +inf]",
      ));
    }

    //(2) Flatten the samples in row-major order
    let shape = samples.shape().to_vec();
    let flat: Vec<f32> = samples.iter().copied().collect();
    if !flat.iter().any(|&v| is_included(v, threshold)) {
      return Err(WatershedError::EmptyInputError { threshold });
    }
    let (global_min, global_max) = flat
      .iter()
      .filter(|v| !v.is_nan())
      .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let topo = Topology::new(&shape, self.connectivity);
    log::debug!(
      "building segment tree for grid {shape:?} (threshold {threshold}, {:?} connectivity)",
      self.connectivity
    );

    //(3) Every regional maximum seeds a node
    #[cfg(feature = "debug")]
    let peak_start = std::time::Instant::now();
    let peaks = find_regional_maxima(&flat, &topo, threshold);
    #[cfg(feature = "debug")]
    {
      perf.peak_search_ms = peak_start.elapsed().as_millis() as usize;
    }

    //(4) Flood the image from the peaks, recording where they merge
    #[cfg(feature = "debug")]
    let flood_start = std::time::Instant::now();
    let Flooding { mut nodes, node_of } = flood(&flat, &topo, threshold, &peaks);
    #[cfg(feature = "debug")]
    {
      perf.flooding_ms = flood_start.elapsed().as_millis() as usize;
      perf.merges = nodes.iter().filter(|n| n.parent.is_some()).count();
    }

    //(5) Finalise the roots and close the label root relation
    #[cfg(feature = "debug")]
    let closure_start = std::time::Instant::now();
    close_tree(&mut nodes, global_min);
    #[cfg(feature = "debug")]
    {
      perf.closure_mus = closure_start.elapsed().as_micros() as usize;
    }

    let node_map = nd::ArrayD::from_shape_vec(nd::IxDyn(&shape), node_of)
      .map_err(|err| WatershedError::shape(format!("could not shape node map: {err}")))?;

    let features = FeatureTable { nodes };
    log::info!(
      "segment tree built: {} peaks ({} roots) over {} samples",
      features.node_count(),
      features.roots().count(),
      flat.len()
    );

    #[cfg(feature = "debug")]
    {
      perf.samples = flat.len();
      perf.peaks = features.node_count();
      perf.total_ms = build_start.elapsed().as_millis() as usize;
      log::info!("{perf}");
    }

    Ok(SegmentTree {
      features,
      node_map,
      samples,
      intensity_range: (global_min, global_max),
      background_threshold: threshold,
      connectivity: self.connectivity,
    })
  }
}

#[inline(always)]
fn is_included(value: f32, threshold: f32) -> bool {
  //NaN compares false, so it is never included
  value >= threshold
}

////////////////////////////////////////////////////////////////////////////////
//                               CONSTRUCTION                                 //
////////////////////////////////////////////////////////////////////////////////

/// A connected plateau of equal-valued samples without any brighter neighbour
struct Plateau {
  level: f32,
  //Smallest linear index in the plateau
  first: usize,
  samples: Vec<usize>,
}

fn find_regional_maxima(flat: &[f32], topo: &Topology, threshold: f32) -> Vec<Plateau> {
  let mut visited = vec![false; flat.len()];
  let mut plateaus = Vec::new();
  let mut queue = VecDeque::new();
  let mut neighbours = Vec::with_capacity(topo.max_neighbours());

  /*
    We walk over all samples in index order. The first unvisited sample of a
    plateau is therefore also its smallest index. From there we collect the
    whole plateau with a BFS, and remember whether any neighbour is brighter.
    Only plateaus without brighter neighbours are regional maxima.
  */
  for start in 0..flat.len() {
    let level = flat[start];
    if visited[start] || !is_included(level, threshold) {
      continue;
    }

    visited[start] = true;
    queue.push_back(start);
    let mut members = Vec::new();
    let mut is_max = true;
    while let Some(idx) = queue.pop_front() {
      members.push(idx);
      topo.neighbours(idx, &mut neighbours);
      for &nb in &neighbours {
        let value = flat[nb];
        if value > level {
          is_max = false;
        } else if value == level && !visited[nb] {
          visited[nb] = true;
          queue.push_back(nb);
        }
      }
    }

    if is_max {
      plateaus.push(Plateau { level, first: start, samples: members });
    }
  }

  //Brightest peak first, ties broken by position. This order defines the node ids.
  plateaus.sort_by(|a, b| b.level.total_cmp(&a.level).then(a.first.cmp(&b.first)));
  plateaus
}

/// Entry of the flooding queue. The queue pops the brightest sample first. On
/// equal brightness it prefers samples closer to where the plateau was entered,
/// then samples flooded by a lower node id, then the lower linear index.
#[derive(Debug, Clone, Copy)]
struct FloodItem {
  level: f32,
  depth: usize,
  node: usize,
  idx: usize,
}

impl Ord for FloodItem {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .level
      .total_cmp(&other.level)
      .then_with(|| other.depth.cmp(&self.depth))
      .then_with(|| other.node.cmp(&self.node))
      .then_with(|| other.idx.cmp(&self.idx))
  }
}

impl PartialOrd for FloodItem {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl PartialEq for FloodItem {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for FloodItem {}

/// Disjoint sets of flooded samples. Every set remembers its dominant peak:
/// the node with the lowest id (and therefore highest `Imax`) it contains.
struct Components {
  parent: Vec<usize>,
  rank: Vec<u8>,
  peak: Vec<usize>,
}

impl Components {
  fn new(size: usize) -> Self {
    Components { parent: (0..size).collect(), rank: vec![0; size], peak: vec![BACKGROUND; size] }
  }

  fn find(&mut self, x: usize) -> usize {
    //Iterative path halving, plateaus can make the sets deep
    let mut x = x;
    while self.parent[x] != x {
      self.parent[x] = self.parent[self.parent[x]];
      x = self.parent[x];
    }
    x
  }

  /// Joins the sets of `a` and `b`. Returns `(dominant, absorbed)` if two sets
  /// with different dominant peaks were joined.
  fn union(&mut self, a: usize, b: usize) -> Option<(usize, usize)> {
    let (root_a, root_b) = (self.find(a), self.find(b));
    if root_a == root_b {
      return None;
    }
    let (peak_a, peak_b) = (self.peak[root_a], self.peak[root_b]);

    let root = match self.rank[root_a].cmp(&self.rank[root_b]) {
      Ordering::Less => {
        self.parent[root_a] = root_b;
        root_b
      }
      Ordering::Greater => {
        self.parent[root_b] = root_a;
        root_a
      }
      Ordering::Equal => {
        self.parent[root_b] = root_a;
        self.rank[root_a] += 1;
        root_a
      }
    };

    //A set without a peak simply joins the other one
    if peak_a == BACKGROUND || peak_b == BACKGROUND || peak_a == peak_b {
      self.peak[root] = peak_a.max(peak_b);
      return None;
    }
    let (dominant, absorbed) = if peak_a < peak_b { (peak_a, peak_b) } else { (peak_b, peak_a) };
    self.peak[root] = dominant;
    Some((dominant, absorbed))
  }
}

struct Flooding {
  nodes: Vec<Node>,
  node_of: Vec<usize>,
}

fn flood(flat: &[f32], topo: &Topology, threshold: f32, peaks: &[Plateau]) -> Flooding {
  //(1) Set up the nodes. Slot 0 is the background and never used as a node.
  let mut nodes = Vec::with_capacity(peaks.len() + 1);
  nodes.push(Node::background());
  for (i, peak) in peaks.iter().enumerate() {
    nodes.push(Node {
      id: i + 1,
      parent: None,
      imax: peak.level,
      //Provisional: height above the background. Sealed on merge or in `close_tree`.
      dynamics: peak.level - threshold,
      saddle: None,
      label_root: i + 1,
      seed: peak.first,
    });
  }

  //(2) Seed the queue with all peak samples
  let mut node_of = vec![BACKGROUND; flat.len()];
  let mut processed = vec![false; flat.len()];
  let mut sets = Components::new(flat.len());
  let mut queue = BinaryHeap::new();
  for (i, peak) in peaks.iter().enumerate() {
    for &idx in &peak.samples {
      node_of[idx] = i + 1;
      sets.peak[idx] = i + 1;
      queue.push(FloodItem { level: peak.level, depth: 0, node: i + 1, idx });
    }
  }

  #[cfg(feature = "progress")]
  let bar = crate::set_up_bar(flat.len());

  /*(3) Flood
    Samples leave the queue in order of non-increasing brightness. When a sample
    leaves the queue, it is joined with every neighbour that already left the
    queue. If that joins two components with different dominant peaks, the two
    peaks meet at the level of this sample: the weaker peak becomes a child of
    the stronger one and its dynamics are sealed.

    Unclaimed neighbours are claimed by the node that floods them and queued.
  */
  let mut neighbours = Vec::with_capacity(topo.max_neighbours());
  while let Some(item) = queue.pop() {
    processed[item.idx] = true;
    topo.neighbours(item.idx, &mut neighbours);

    for &nb in &neighbours {
      if processed[nb] {
        if let Some((dominant, absorbed)) = sets.union(item.idx, nb) {
          let node = &mut nodes[absorbed];
          node.parent = Some(dominant);
          node.dynamics = node.imax - item.level;
          node.saddle = Some(item.level);
          log::trace!(
            "peak {absorbed} merges into peak {dominant} at level {} (dynamics {})",
            item.level,
            node.dynamics
          );
        }
      } else if node_of[nb] == BACKGROUND && is_included(flat[nb], threshold) {
        node_of[nb] = item.node;
        let depth = if flat[nb] == item.level { item.depth + 1 } else { 0 };
        queue.push(FloodItem { level: flat[nb], depth, node: item.node, idx: nb });
      }
    }

    #[cfg(feature = "progress")]
    bar.inc(1);
  }

  #[cfg(feature = "progress")]
  bar.finish();

  Flooding { nodes, node_of }
}

/// Gives roots their fallback dynamics and fills in the label roots. Parents
/// always have a lower id than their children, so one ascending sweep suffices.
fn close_tree(nodes: &mut [Node], global_min: f32) {
  for id in 1..nodes.len() {
    match nodes[id].parent {
      None => {
        //Never merged: the drop is measured all the way down to the image minimum
        nodes[id].dynamics = nodes[id].imax - global_min;
        nodes[id].label_root = id;
      }
      Some(parent) => {
        nodes[id].label_root = nodes[parent].label_root;
      }
    }
  }
}

////////////////////////////////////////////////////////////////////////////////
//                              TREE & FEATURES                               //
////////////////////////////////////////////////////////////////////////////////

/// One peak of the segment tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
  /// Id of this node, starting at 1. Id 0 is reserved for the background.
  pub id: usize,
  /// The peak this one merged into, `None` for roots. Always a lower id.
  pub parent: Option<usize>,
  /// Brightest sample of the peak
  pub imax: f32,
  /// Prominence: drop from `imax` to the level where this peak merged into a
  /// brighter one. Roots use the drop to the darkest sample of the image.
  pub dynamics: f32,
  /// Level at which this peak merged, `None` for roots
  pub saddle: Option<f32>,
  /// The root this node ends up in when the tree is fully merged
  pub label_root: usize,
  /// Linear index of the first (row-major) sample of the peak plateau
  pub seed: usize,
}

impl Node {
  fn background() -> Self {
    Node {
      id: BACKGROUND,
      parent: None,
      imax: f32::NEG_INFINITY,
      dynamics: 0.0,
      saddle: None,
      label_root: BACKGROUND,
      seed: 0,
    }
  }
}

/// Per-node features of the segment tree. All lookups are `O(1)`.
///
/// # Panics
/// The lookup functions panic when called with an id that is not a node of
/// this tree, just like indexing a slice out of bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
  nodes: Vec<Node>,
}

impl FeatureTable {
  /// Number of nodes (peaks), not counting the background
  pub fn node_count(&self) -> usize {
    self.nodes.len() - 1
  }

  pub fn node(&self, id: usize) -> &Node {
    self.checked(id)
  }

  /// Maximum intensity of the peak
  pub fn imax(&self, id: usize) -> f32 {
    self.checked(id).imax
  }

  /// Prominence of the peak
  pub fn dynamics(&self, id: usize) -> f32 {
    self.checked(id).dynamics
  }

  /// Root of the peak group that `id` belongs to
  pub fn label_root(&self, id: usize) -> usize {
    self.checked(id).label_root
  }

  pub fn parent(&self, id: usize) -> Option<usize> {
    self.checked(id).parent
  }

  /// Level at which the peak merged into a brighter one
  pub fn saddle(&self, id: usize) -> Option<f32> {
    self.checked(id).saddle
  }

  /// Iterator over all nodes in ascending id order
  pub fn iter(&self) -> impl Iterator<Item = &Node> + '_ {
    self.nodes.iter().skip(1)
  }

  /// Ids of all nodes without a parent
  pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
    self.iter().filter(|node| node.parent.is_none()).map(|node| node.id)
  }

  /// Smallest and largest dynamics in the tree. Useful as bounds of a seed
  /// dynamics control.
  pub fn dynamics_range(&self) -> (f32, f32) {
    self
      .iter()
      .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), n| (lo.min(n.dynamics), hi.max(n.dynamics)))
  }

  #[inline(always)]
  fn checked(&self, id: usize) -> &Node {
    assert!(id != BACKGROUND, "node id 0 is reserved for the background");
    &self.nodes[id]
  }
}

/// The segment tree of an image: a forest of peaks, their features, and the
/// node map that assigns every sample to the peak that flooded it.
///
/// The tree is immutable once built and can be shared between threads. Cutting
/// it (`partition`) and rendering label images (`materialize`) never modify it.
#[derive(Debug, Clone)]
pub struct SegmentTree {
  features: FeatureTable,
  node_map: nd::ArrayD<usize>,
  samples: Arc<nd::ArrayD<f32>>,
  intensity_range: (f32, f32),
  background_threshold: f32,
  connectivity: Connectivity,
}

impl SegmentTree {
  pub fn features(&self) -> &FeatureTable {
    &self.features
  }

  /// Number of nodes (peaks) in the tree
  pub fn node_count(&self) -> usize {
    self.features.node_count()
  }

  /// Per-sample id of the peak that flooded it, 0 for excluded samples
  pub fn node_map(&self) -> nd::ArrayViewD<'_, usize> {
    self.node_map.view()
  }

  /// The samples this tree was built from
  pub fn samples(&self) -> nd::ArrayViewD<'_, f32> {
    self.samples.view()
  }

  pub fn shared_samples(&self) -> &Arc<nd::ArrayD<f32>> {
    &self.samples
  }

  pub fn shape(&self) -> &[usize] {
    self.node_map.shape()
  }

  pub fn rank(&self) -> usize {
    self.node_map.ndim()
  }

  /// Darkest and brightest (non-NaN) sample of the image
  pub fn intensity_range(&self) -> (f32, f32) {
    self.intensity_range
  }

  pub fn background_threshold(&self) -> f32 {
    self.background_threshold
  }

  pub fn connectivity(&self) -> Connectivity {
    self.connectivity
  }

  /// Cuts the tree at `merge_threshold`, see `partition::partition`
  pub fn partition(&self, merge_threshold: f32) -> Result<Partition> {
    crate::partition::partition(self, merge_threshold)
  }

  /// Renders the label image (or a slice of it) of this tree under `partition`,
  /// see `label_map::materialize`
  pub fn materialize(
    &self,
    partition: &Partition,
    params: RenderParams,
    slice: Option<Slice>,
  ) -> Result<nd::ArrayD<usize>> {
    label_map::materialize(
      self.node_map.view(),
      &self.features,
      partition,
      self.samples.view(),
      params,
      slice,
    )
  }
}
