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

#![doc(
  html_logo_url = "https://raw.githubusercontent.com/smups/rustronomy/main/logos/Rustronomy_ferris.png?raw=true"
)]
//! Rustronomy-hwatershed is a pure-rust implementation of a *hierarchical*,
//! peak-based watershed for 2D and 3D intensity images.
//!
//! # Features
//! Segmenting an image with the classic watershed transform requires choosing
//! the seeds up front. Changing your mind means running the full transform
//! again. This crate instead floods the image once and records how the bright
//! peaks of the image merge into each other as the water level drops. The
//! result is a *segment tree* that can be cut interactively with three cheap
//! parameters:
//! 1. the **seed dynamics** (merge threshold): peaks whose prominence is lower
//! than this value are merged into the peak they drain into;
//! 2. the **intensity threshold** (background cutoff): samples darker than this
//! value are background;
//! 3. the **peak flooding** percentage: how far down from its peak (towards the
//! intensity threshold) each region is allowed to grow.
//!
//! Re-cutting the tree costs `O(number of peaks)`, and rendering a label image
//! (or only a single slice of it) costs one parallel pass over the requested
//! samples. The tree itself is never rebuilt for a parameter change.
//!
//! # Quickstart
//! To use the latest release of rustronomy-hwatershed in a cargo project, add
//! the rustronomy-hwatershed crate as a dependency to your `Cargo.toml` file:
//! ```toml
//! [dependencies]
//! rustronomy-hwatershed = "0.1.0"
//! ```
//!
//! ## Short example: segmenting a random field
//! `rustronomy-hwatershed` uses the "builder pattern" to configure the segment
//! tree before it is built. Create a `TreeBuilder`, set its options and call
//! `build()` with the image to get a (`Sync`&`Send`) `SegmentTree`. The tree
//! can then be cut with `partition` and turned into a label image with
//! `materialize`.
//! ```rust
//! use rustronomy_hwatershed::prelude::*;
//! use ndarray_rand::{rand_distr::Uniform, RandomExt};
//!
//! //Create a random uniform field
//! let rf = nd::Array2::<f32>::random((64, 64), Uniform::new(0.0, 100.0));
//! //Flood the field once
//! let tree = TreeBuilder::new().build(rf.view()).unwrap();
//! //Merge every peak with a prominence below 10
//! let partition = tree.partition(10.0).unwrap();
//! //Everything above 20 is foreground, regions grow all the way down
//! let labels = tree.materialize(&partition, RenderParams::new(20.0, 100.0), None).unwrap();
//! assert_eq!(labels.shape(), &[64, 64]);
//! ```
//!
//! For interactive use, the `Pipeline` struct wraps all of this behind
//! handles, detects handles that outlived the image they were made for, and
//! coalesces rapid render requests.
//!
//! # Cargo feature gates
//! *By default, all features behind cargo feature gates are **disabled***
//! - `jemalloc`: this feature enables the [jemalloc allocator](https://jemalloc.net).
//! Jemalloc is enabled though usage of the `jemalloc` crate, which increases
//! compile times considerably. To compile `rustronomy-hwatershed` with the
//! `jemalloc` feature, jemalloc must be installed on the host system.
//! - `progress`: this feature enables a progress bar while the segment tree is
//! being flooded. Enabling this feature adds the `indicatif` crate as a dependency.
//! - `debug`: this feature enables performance monitoring of the tree
//! construction. The report is emitted through the `log` crate at the `info`
//! level. Enabling this feature does not add additional dependencies.
//!
//! # Logging
//! This crate logs through the [`log`](https://docs.rs/log) facade and never
//! installs a logger itself. Tree construction and partitioning are reported at
//! the `info` level, per-call parameters at `debug` and individual merge events
//! at `trace`.

//Unconditional imports
use ndarray as nd;

//Set Jemalloc as the global allocator for this crate
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

pub mod label_map;
pub mod partition;
pub mod pipeline;
pub mod tree;

pub use label_map::{label_areas, materialize, materialize_with_cancel, RenderParams, Slice};
pub use partition::{partition, Partition};
pub use pipeline::{LogScale, PartitionHandle, Pipeline, TreeHandle};
pub use tree::{to_sample_grid, Connectivity, FeatureTable, Node, SegmentTree, TreeBuilder};

/// Node id and label id reserved for samples that belong to no region
pub const BACKGROUND: usize = 0;

//Utility prelude for batch import
pub mod prelude {
  pub use crate::{
    Connectivity, LogScale, Partition, Pipeline, RenderParams, SegmentTree, Slice, TreeBuilder,
    WatershedError,
  };
  pub use ndarray as nd;
}

////////////////////////////////////////////////////////////////////////////////
//                                  ERRORS                                    //
////////////////////////////////////////////////////////////////////////////////

/// Errors returned by the segment tree, the partition engine and the label map
/// materializer. All of them are deterministic input-validation failures: retrying
/// a call with the same arguments yields the same error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WatershedError {
  /// The grid does not have rank 2 or 3, two grids that should share a shape
  /// do not, or a slice axis/index lies outside of the grid.
  #[error("Shape error: {0}")]
  ShapeError(String),

  /// No sample of the input reaches the background threshold
  #[error("No sample reaches the background threshold ({threshold})")]
  EmptyInputError { threshold: f32 },

  /// A parameter lies outside of its valid range. Parameters are never clamped.
  #[error("Parameter `{name}` = {value} is outside of its valid range {expected}")]
  ParameterRangeError { name: &'static str, value: f64, expected: &'static str },

  /// A handle was used after the input image it derives from was replaced
  #[error(
    "Handle of generation {handle_generation} used after the input was replaced \
     (current generation {current_generation})"
  )]
  StaleHandleError { handle_generation: u64, current_generation: u64 },

  /// A render request was cancelled because a newer request was issued
  #[error("Render request superseded by a newer request")]
  Superseded,
}

impl WatershedError {
  /// Creates a shape error.
  pub fn shape(message: impl Into<String>) -> Self {
    WatershedError::ShapeError(message.into())
  }

  /// Creates a parameter range error.
  pub fn parameter(name: &'static str, value: f64, expected: &'static str) -> Self {
    WatershedError::ParameterRangeError { name, value, expected }
  }
}

/// Result type used throughout this crate
pub type Result<T> = std::result::Result<T, WatershedError>;

////////////////////////////////////////////////////////////////////////////////
//                              HELPER FUNCTIONS                              //
////////////////////////////////////////////////////////////////////////////////

#[cfg(feature = "progress")]
fn set_up_bar(num_samples: usize) -> indicatif::ProgressBar {
  const TEMPLATE: &str = "{spinner}[{elapsed}/{duration}] flooded {pos}/{len}{bar:60}";
  let style = indicatif::ProgressStyle::with_template(TEMPLATE);
  let bar = indicatif::ProgressBar::new(num_samples as u64);
  if let Ok(style) = style {
    bar.set_style(style);
  }
  return bar;
}

/// Largest grid rank handled by this crate
const MAX_RANK: usize = 3;

/// Neighbourhood of a sample in a dense, row-major grid. Samples are addressed
/// by their linear (flat) index.
#[derive(Debug, Clone)]
pub(crate) struct Topology {
  shape: Vec<usize>,
  strides: Vec<usize>,
  offsets: Vec<[isize; MAX_RANK]>,
}

impl Topology {
  pub(crate) fn new(shape: &[usize], connectivity: Connectivity) -> Self {
    //Row-major strides: the last axis is contiguous
    let mut strides = vec![1usize; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
      strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    Topology {
      shape: shape.to_vec(),
      strides,
      offsets: neighbour_offsets(shape.len(), connectivity),
    }
  }

  pub(crate) fn max_neighbours(&self) -> usize {
    self.offsets.len()
  }

  /// Fills `out` with the linear indices of all in-bounds neighbours of `idx`,
  /// always in the same order.
  pub(crate) fn neighbours(&self, idx: usize, out: &mut Vec<usize>) {
    out.clear();
    let rank = self.shape.len();

    //Unravel the linear index
    let mut coord = [0isize; MAX_RANK];
    let mut rem = idx;
    for axis in 0..rank {
      coord[axis] = (rem / self.strides[axis]) as isize;
      rem %= self.strides[axis];
    }

    'offsets: for delta in &self.offsets {
      let mut neighbour = 0usize;
      for axis in 0..rank {
        let c = coord[axis] + delta[axis];
        if c < 0 || c >= self.shape[axis] as isize {
          continue 'offsets;
        }
        neighbour += c as usize * self.strides[axis];
      }
      out.push(neighbour);
    }
  }
}

/// Returns the coordinate offsets of all neighbours of a sample. `Face` keeps the
/// offsets that step along exactly one axis (4-con in 2D, 6-con in 3D), `Full`
/// keeps every non-zero offset (8-con in 2D, 26-con in 3D).
fn neighbour_offsets(rank: usize, connectivity: Connectivity) -> Vec<[isize; MAX_RANK]> {
  let total = 3usize.pow(rank as u32);
  (0..total)
    .filter_map(|mut code| {
      let mut delta = [0isize; MAX_RANK];
      for d in delta.iter_mut().take(rank) {
        *d = (code % 3) as isize - 1;
        code /= 3;
      }
      let steps = delta.iter().filter(|&&d| d != 0).count();
      let keep = match connectivity {
        Connectivity::Face => steps == 1,
        Connectivity::Full => steps > 0,
      };
      if keep {
        Some(delta)
      } else {
        None
      }
    })
    .collect()
}

/// Checks that two grids have the same shape
pub(crate) fn check_same_shape<A, B>(
  a: &nd::ArrayViewD<A>,
  b: &nd::ArrayViewD<B>,
  what: &str,
) -> Result<()> {
  if a.shape() == b.shape() {
    Ok(())
  } else {
    Err(WatershedError::shape(format!(
      "{what}: shapes {:?} and {:?} do not match",
      a.shape(),
      b.shape()
    )))
  }
}

////////////////////////////////////////////////////////////////////////////////
//                             OPTIONAL MODULES                               //
////////////////////////////////////////////////////////////////////////////////
#[cfg(feature = "debug")]
mod performance_monitoring {

  #[derive(Clone, Debug, Default)]
  pub struct PerfReport {
    pub samples: usize,
    pub peaks: usize,
    pub merges: usize,
    pub peak_search_ms: usize,
    pub flooding_ms: usize,
    pub closure_mus: usize,
    pub total_ms: usize,
  }

  impl std::fmt::Display for PerfReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      writeln!(f, ">---------[Performance Summary]---------")?;
      writeln!(f, ">  {} samples, {} peaks, {} merges", self.samples, self.peaks, self.merges)?;
      writeln!(f, ">  Peak search: {}ms", self.peak_search_ms)?;
      writeln!(f, ">  Flooding: {}ms", self.flooding_ms)?;
      writeln!(f, ">  Label root closure: {}µs", self.closure_mus)?;
      writeln!(f, ">--------------------------------+ total")?;
      writeln!(
        f,
        ">  {}ms with {:.1}ms overhead (Δt)",
        self.total_ms,
        self.total_ms as f64
          - self.peak_search_ms as f64
          - self.flooding_ms as f64
          - self.closure_mus as f64 / 1000.0
      )
    }
  }
}
