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

use std::collections::HashMap;

use ndarray_rand::{rand_distr::Uniform, RandomExt};
use rustronomy_hwatershed::{label_areas, materialize, materialize_with_cancel, prelude::*};

//Sizes of the randomly generated test fields
const RF_SIZE_2D: (usize, usize) = (48, 40);
const RF_SIZE_3D: (usize, usize, usize) = (9, 7, 6);

fn random_2d() -> nd::Array2<f32> {
  nd::Array2::<f32>::random(RF_SIZE_2D, Uniform::new(0.0, 100.0))
}

fn random_3d() -> nd::Array3<f32> {
  nd::Array3::<f32>::random(RF_SIZE_3D, Uniform::new(0.0, 100.0))
}

/// A single row with three peaks (8, 6 and 5) and known merge levels
fn ridge() -> nd::Array2<f32> {
  nd::array![[1.0, 5.0, 2.0, 8.0, 4.0, 6.0, 0.0]]
}

////////////////////////////////////////////////////////////////////////////////
//                                 SCENARIOS                                  //
////////////////////////////////////////////////////////////////////////////////

#[test]
fn diagonal_peaks() {
  let img = nd::array![[10.0f32, 1.0], [1.0, 10.0]];
  let tree = TreeBuilder::new().build(img.view()).unwrap();

  //Two single-sample peaks of equal height
  assert_eq!(tree.node_count(), 2);
  let features = tree.features();
  assert_eq!(features.imax(1), 10.0);
  assert_eq!(features.imax(2), 10.0);
  assert_eq!(tree.node_map()[[0, 0]], 1);
  assert_eq!(tree.node_map()[[1, 1]], 2);

  //Both corners are reached by both peaks at once, the lower id claims them
  assert_eq!(tree.node_map()[[0, 1]], 1);
  assert_eq!(tree.node_map()[[1, 0]], 1);

  //They meet at the value-1 corners, the lower id dominates
  assert_eq!(features.parent(2), Some(1));
  assert_eq!(features.saddle(2), Some(1.0));
  assert_eq!(features.dynamics(2), 9.0);
  assert_eq!(features.label_root(2), 1);

  //No merging: two labels
  let partition = tree.partition(0.0).unwrap();
  assert_eq!(partition.label_count(), 2);

  //Only the peaks survive a cutoff of 5 without flooding
  let labels = tree.materialize(&partition, RenderParams::new(5.0, 0.0), None).unwrap();
  let expected = nd::array![[1usize, 0], [0, 2]].into_dyn();
  assert_eq!(labels, expected);
}

#[test]
fn plateau_between_equal_peaks() {
  let img = nd::array![[10.0f32, 5.0, 5.0, 5.0, 10.0]];
  let tree = TreeBuilder::new().build(img.view()).unwrap();

  //Each peak enters the plateau from its own side. The middle sample is one
  //step from both entry points and goes to the lower id.
  assert_eq!(tree.node_count(), 2);
  let expected = nd::array![[1usize, 1, 1, 2, 2]].into_dyn();
  assert_eq!(tree.node_map(), expected);
  assert_eq!(tree.features().parent(2), Some(1));
  assert_eq!(tree.features().saddle(2), Some(5.0));
}

#[test]
fn diagonal_peaks_touch_with_full_connectivity() {
  let img = nd::array![[10.0f32, 1.0], [1.0, 10.0]];
  let tree = TreeBuilder::new().set_connectivity(Connectivity::Full).build(img.view()).unwrap();

  //The two 10's are now neighbours and form one plateau
  assert_eq!(tree.node_count(), 1);
  assert_eq!(tree.node_map()[[1, 1]], 1);
}

#[test]
fn flat_image() {
  let img = nd::Array2::<f32>::from_elem((3, 3), 5.0);
  let tree = TreeBuilder::new().build(img.view()).unwrap();

  //One node, which never merges: its drop to the image minimum is zero
  assert_eq!(tree.node_count(), 1);
  assert_eq!(tree.features().imax(1), 5.0);
  assert_eq!(tree.features().dynamics(1), 0.0);

  for merge_threshold in [0.0, 0.5, 3.0, 1e6] {
    let partition = tree.partition(merge_threshold).unwrap();
    assert_eq!(partition.label_count(), 1);
    for cutoff in [-1.0, 0.0, 5.0] {
      for flooding in [0.0, 50.0, 100.0] {
        let labels = tree.materialize(&partition, RenderParams::new(cutoff, flooding), None).unwrap();
        assert!(labels.iter().all(|&label| label == 1));
        assert_eq!(labels.len(), 9);
      }
    }
  }
}

#[test]
fn slice_of_a_cube() {
  let img = nd::Array3::<f32>::random((4, 4, 4), Uniform::new(0.0, 10.0));
  let pipeline = Pipeline::initialize(img.view(), f32::NEG_INFINITY, Connectivity::Face).unwrap();
  let partition = pipeline.set_merge_threshold(&pipeline.tree_handle(), 1.0).unwrap();
  let params = RenderParams::new(2.0, 60.0);

  let slice = pipeline.render(&partition, params, Some(Slice::new(2, 1))).unwrap();
  let full = pipeline.full_export(&partition, params).unwrap();

  assert_eq!(slice.shape(), &[4, 4]);
  assert_eq!(slice, full.index_axis(nd::Axis(2), 1));
}

#[test]
fn ridge_features() {
  let tree = TreeBuilder::new().build(ridge().view()).unwrap();
  let features = tree.features();

  //Peaks are numbered from bright to dark
  assert_eq!(tree.node_count(), 3);
  assert_eq!(
    (features.imax(1), features.imax(2), features.imax(3)),
    (8.0, 6.0, 5.0)
  );

  //6 meets 8 at the 4, 5 meets 8 at the 2
  assert_eq!(features.parent(2), Some(1));
  assert_eq!(features.dynamics(2), 2.0);
  assert_eq!(features.parent(3), Some(1));
  assert_eq!(features.dynamics(3), 3.0);

  //8 never merges: it drops all the way to the 0
  assert_eq!(features.parent(1), None);
  assert_eq!(features.dynamics(1), 8.0);
  assert_eq!(features.dynamics_range(), (2.0, 8.0));

  let node_map = tree.node_map().iter().copied().collect::<Vec<_>>();
  assert_eq!(node_map, vec![3, 3, 1, 1, 1, 2, 2]);
}

#[test]
fn ridge_partitions() {
  let tree = TreeBuilder::new().build(ridge().view()).unwrap();

  let partition = tree.partition(2.5).unwrap();
  assert_eq!(partition.as_slice(), &[0, 1, 1, 2]);
  assert_eq!(partition.label_count(), 2);

  //Thresholds equal to a node's dynamics keep it
  assert_eq!(tree.partition(2.0).unwrap().label_count(), 3);
  assert_eq!(tree.partition(3.0).unwrap().label_count(), 2);
  assert_eq!(tree.partition(3.5).unwrap().label_count(), 1);
  //The root always keeps its label
  assert_eq!(tree.partition(f32::INFINITY).unwrap().label_count(), 1);

  let labels = |cutoff, flooding| {
    tree
      .materialize(&partition, RenderParams::new(cutoff, flooding), None)
      .unwrap()
      .iter()
      .copied()
      .collect::<Vec<_>>()
  };
  assert_eq!(labels(0.0, 100.0), vec![2, 2, 1, 1, 1, 1, 1]);
  assert_eq!(labels(0.5, 100.0), vec![2, 2, 1, 1, 1, 1, 0]);
  //Flood level 0 + (8 - 0) * 0.5 = 4
  assert_eq!(labels(0.0, 50.0), vec![0, 2, 0, 1, 1, 1, 0]);
}

#[test]
fn flooding_uses_the_group_peak() {
  let tree = TreeBuilder::new().build(ridge().view()).unwrap();
  let partition = tree.partition(0.0).unwrap();

  //The flood level of every group member is 0 + (8 - 0) * 0.75 = 6, also for
  //the peak of 5 that has a label of its own.
  let labels = tree.materialize(&partition, RenderParams::new(0.0, 25.0), None).unwrap();
  let labels = labels.iter().copied().collect::<Vec<_>>();
  assert_eq!(labels, vec![0, 0, 0, 1, 0, 2, 0]);
}

#[test]
fn background_threshold_splits_the_forest() {
  //Two bright blobs separated by a dark valley
  let img = nd::array![[9.0f32, 7.0, 0.0, 6.0], [8.0, 7.0, 0.0, 5.0]];
  let tree = TreeBuilder::new().set_background_threshold(1.0).build(img.view()).unwrap();

  //The valley never floods, so both blobs are roots
  assert_eq!(tree.node_count(), 2);
  assert_eq!(tree.features().roots().count(), 2);
  assert_eq!(tree.node_map()[[0, 2]], 0);
  assert_eq!(tree.node_map()[[1, 2]], 0);

  //Roots drop down to the darkest sample of the whole image
  assert_eq!(tree.features().dynamics(1), 9.0);
  assert_eq!(tree.features().dynamics(2), 6.0);

  let partition = tree.partition(100.0).unwrap();
  assert_eq!(partition.label_count(), 2);
  let labels = tree.materialize(&partition, RenderParams::new(f32::NEG_INFINITY, 100.0), None).unwrap();
  let expected = nd::array![[1usize, 1, 0, 2], [1, 1, 0, 2]].into_dyn();
  assert_eq!(labels, expected);
}

#[test]
fn integer_input() {
  let img = nd::array![[0u8, 3, 0], [0, 0, 0], [2, 0, 4]];
  let tree = TreeBuilder::new().build(img.view()).unwrap();
  assert_eq!(tree.node_count(), 3);
  assert_eq!(tree.features().imax(1), 4.0);
  assert_eq!(tree.intensity_range(), (0.0, 4.0));
}

////////////////////////////////////////////////////////////////////////////////
//                                PROPERTIES                                  //
////////////////////////////////////////////////////////////////////////////////

#[test]
fn tree_invariants() {
  let img = random_2d();
  let tree = TreeBuilder::new().build(img.view()).unwrap();
  let features = tree.features();

  for node in features.iter() {
    assert!(node.dynamics >= 0.0);
    let root = features.label_root(node.id);
    assert_eq!(features.parent(root), None);
    if let Some(parent) = node.parent {
      //Parents come first, are at least as bright and at least as prominent
      assert!(parent < node.id);
      assert!(features.imax(parent) >= node.imax);
      assert!(features.dynamics(parent) >= node.dynamics);
      assert_eq!(features.label_root(parent), root);
      assert_eq!(node.dynamics, node.imax - node.saddle.unwrap());
    }
  }

  //Every sample is flooded and no sample is brighter than the peak that flooded it
  let mut region_max = vec![f32::NEG_INFINITY; tree.node_count() + 1];
  for (&node, &value) in tree.node_map().iter().zip(img.iter()) {
    assert_ne!(node, 0);
    region_max[node] = region_max[node].max(value);
  }
  for node in features.iter() {
    assert_eq!(region_max[node.id], node.imax);
  }
}

#[test]
fn partition_is_monotonic() {
  let img = random_2d();
  let tree = TreeBuilder::new().build(img.view()).unwrap();
  let (_, max_dynamics) = tree.features().dynamics_range();

  let thresholds: Vec<f32> = (0..=40).map(|step| max_dynamics * step as f32 / 40.0).collect();
  let partitions: Vec<Partition> =
    thresholds.iter().map(|&threshold| tree.partition(threshold).unwrap()).collect();

  //With no threshold every node is its own label
  assert_eq!(partitions[0].label_count(), tree.node_count());

  for pair in partitions.windows(2) {
    let (fine, coarse) = (&pair[0], &pair[1]);
    assert!(coarse.label_count() <= fine.label_count());

    //Nodes sharing a label in the fine partition still do in the coarse one
    let mut coarsening = HashMap::new();
    for node in 1..=tree.node_count() {
      let coarse_label = *coarsening.entry(fine.label(node)).or_insert(coarse.label(node));
      assert_eq!(coarse_label, coarse.label(node));
    }
  }
}

#[test]
fn labels_are_dense_and_ordered() {
  let img = random_2d();
  let tree = TreeBuilder::new().build(img.view()).unwrap();
  let partition = tree.partition(10.0).unwrap();

  //New labels appear in ascending node order: 1, 2, 3, ...
  let mut next = 1;
  for node in 1..=tree.node_count() {
    let label = partition.label(node);
    assert!(label >= 1 && label <= next);
    if label == next {
      next += 1;
    }
  }
  assert_eq!(next - 1, partition.label_count());
}

#[test]
fn render_is_idempotent() {
  let img = random_3d();
  let pipeline = Pipeline::initialize(img.view(), f32::NEG_INFINITY, Connectivity::Face).unwrap();
  let partition = pipeline.set_merge_threshold(&pipeline.tree_handle(), 5.0).unwrap();
  let params = RenderParams::new(20.0, 70.0);

  let first = pipeline.render(&partition, params, Some(Slice::new(1, 3))).unwrap();
  let second = pipeline.render(&partition, params, Some(Slice::new(1, 3))).unwrap();
  assert_eq!(first, second);

  let first = pipeline.full_export(&partition, params).unwrap();
  let second = pipeline.full_export(&partition, params).unwrap();
  assert_eq!(first, second);
}

#[test]
fn every_slice_matches_the_full_export() {
  let img = random_3d();
  let tree = TreeBuilder::new().build(img.view()).unwrap();
  let partition = tree.partition(3.0).unwrap();
  let params = RenderParams::new(15.0, 40.0);
  let full = tree.materialize(&partition, params, None).unwrap();

  for axis in 0..3 {
    for index in 0..full.shape()[axis] {
      let slice = tree.materialize(&partition, params, Some(Slice::new(axis, index))).unwrap();
      assert_eq!(slice, full.index_axis(nd::Axis(axis), index));
    }
  }
}

#[test]
fn slicing_a_2d_image_gives_lines() {
  let img = random_2d();
  let tree = TreeBuilder::new().build(img.view()).unwrap();
  let partition = tree.partition(3.0).unwrap();
  let params = RenderParams::new(10.0, 80.0);
  let full = tree.materialize(&partition, params, None).unwrap();

  let row = tree.materialize(&partition, params, Some(Slice::new(0, 7))).unwrap();
  assert_eq!(row.shape(), &[RF_SIZE_2D.1]);
  assert_eq!(row, full.index_axis(nd::Axis(0), 7));

  let column = tree.materialize(&partition, params, Some(Slice::new(1, 0))).unwrap();
  assert_eq!(column, full.index_axis(nd::Axis(1), 0));
}

#[test]
fn flooding_only_grows_regions() {
  let img = random_2d();
  let tree = TreeBuilder::new().build(img.view()).unwrap();
  let partition = tree.partition(8.0).unwrap();

  let renders: Vec<nd::ArrayD<usize>> = [0.0, 10.0, 35.0, 50.0, 90.0, 100.0]
    .iter()
    .map(|&flooding| tree.materialize(&partition, RenderParams::new(25.0, flooding), None).unwrap())
    .collect();

  for pair in renders.windows(2) {
    for (&less, &more) in pair[0].iter().zip(pair[1].iter()) {
      if less != 0 {
        assert_eq!(less, more);
      }
    }
  }
}

#[test]
fn background_floor() {
  let img = random_2d();
  let tree = TreeBuilder::new().build(img.view()).unwrap();

  for merge_threshold in [0.0, 10.0, 50.0] {
    let partition = tree.partition(merge_threshold).unwrap();
    for cutoff in [0.0, 30.0, 75.0] {
      for flooding in [0.0, 50.0, 100.0] {
        let labels = tree.materialize(&partition, RenderParams::new(cutoff, flooding), None).unwrap();
        for (&label, &value) in labels.iter().zip(img.iter()) {
          if value < cutoff {
            assert_eq!(label, 0);
          }
        }
      }
    }
  }
}

#[test]
fn full_flooding_labels_everything_above_the_cutoff() {
  let img = random_2d();
  let tree = TreeBuilder::new().build(img.view()).unwrap();
  let partition = tree.partition(12.0).unwrap();
  let labels = tree.materialize(&partition, RenderParams::new(40.0, 100.0), None).unwrap();

  for (&label, &value) in labels.iter().zip(img.iter()) {
    assert_eq!(label == 0, value < 40.0);
  }

  //Areas add up to the number of samples
  let areas = label_areas(labels.view(), partition.label_count());
  assert_eq!(areas.iter().sum::<usize>(), labels.len());
}

////////////////////////////////////////////////////////////////////////////////
//                                  ERRORS                                    //
////////////////////////////////////////////////////////////////////////////////

#[test]
fn only_2d_and_3d() {
  let line = nd::Array1::<f32>::zeros(5);
  let hyper = nd::Array4::<f32>::zeros((2, 2, 2, 2));
  assert!(matches!(
    TreeBuilder::new().build(line.view()),
    Err(WatershedError::ShapeError(_))
  ));
  assert!(matches!(
    TreeBuilder::new().build(hyper.view()),
    Err(WatershedError::ShapeError(_))
  ));
}

#[test]
fn empty_input() {
  let img = nd::Array2::<f32>::from_elem((4, 4), 1.0);
  let result = TreeBuilder::new().set_background_threshold(2.0).build(img.view());
  assert_eq!(result.unwrap_err(), WatershedError::EmptyInputError { threshold: 2.0 });

  let nans = nd::Array2::<f32>::from_elem((4, 4), f32::NAN);
  assert!(matches!(
    TreeBuilder::new().build(nans.view()),
    Err(WatershedError::EmptyInputError { .. })
  ));
}

#[test]
fn parameter_ranges() {
  let tree = TreeBuilder::new().build(ridge().view()).unwrap();
  assert!(matches!(tree.partition(-0.5), Err(WatershedError::ParameterRangeError { .. })));
  assert!(matches!(tree.partition(f32::NAN), Err(WatershedError::ParameterRangeError { .. })));

  let partition = tree.partition(0.0).unwrap();
  for params in [RenderParams::new(0.0, 100.1), RenderParams::new(0.0, -1.0)] {
    assert!(matches!(
      tree.materialize(&partition, params, None),
      Err(WatershedError::ParameterRangeError { name: "flood_fraction", .. })
    ));
  }
}

#[test]
fn slices_out_of_bounds() {
  let img = random_3d();
  let tree = TreeBuilder::new().build(img.view()).unwrap();
  let partition = tree.partition(0.0).unwrap();
  let params = RenderParams::new(0.0, 100.0);

  assert!(matches!(
    tree.materialize(&partition, params, Some(Slice::new(3, 0))),
    Err(WatershedError::ShapeError(_))
  ));
  assert!(matches!(
    tree.materialize(&partition, params, Some(Slice::new(0, RF_SIZE_3D.0))),
    Err(WatershedError::ShapeError(_))
  ));
}

#[test]
fn partition_from_another_tree() {
  let tree = TreeBuilder::new().build(ridge().view()).unwrap();
  let other = TreeBuilder::new().build(nd::array![[1.0f32, 2.0], [3.0, 4.0]].view()).unwrap();
  let partition = other.partition(0.0).unwrap();
  assert!(matches!(
    tree.materialize(&partition, RenderParams::new(0.0, 100.0), None),
    Err(WatershedError::ShapeError(_))
  ));
}

#[test]
fn stale_handles() {
  let mut pipeline =
    Pipeline::initialize(ridge().view(), f32::NEG_INFINITY, Connectivity::Face).unwrap();
  let old_tree = pipeline.tree_handle();
  let old_partition = pipeline.set_merge_threshold(&old_tree, 0.0).unwrap();
  assert_eq!(old_partition.label_count(), 3);

  let new_tree = pipeline.replace_input(random_2d().view()).unwrap();
  assert_eq!(pipeline.generation(), 1);
  assert_eq!(new_tree.generation(), 1);

  let params = RenderParams::new(0.0, 100.0);
  assert_eq!(
    pipeline.set_merge_threshold(&old_tree, 1.0).unwrap_err(),
    WatershedError::StaleHandleError { handle_generation: 0, current_generation: 1 }
  );
  assert!(matches!(
    pipeline.render(&old_partition, params, None),
    Err(WatershedError::StaleHandleError { .. })
  ));
  assert!(matches!(
    pipeline.full_export(&old_partition, params),
    Err(WatershedError::StaleHandleError { .. })
  ));

  //Fresh handles work
  let partition = pipeline.set_merge_threshold(&new_tree, 1.0).unwrap();
  let labels = pipeline.full_export(&partition, params).unwrap();
  assert_eq!(labels.shape(), &[RF_SIZE_2D.0, RF_SIZE_2D.1]);
}

#[test]
fn failed_replacement_keeps_the_input() {
  let mut pipeline =
    Pipeline::initialize(ridge().view(), f32::NEG_INFINITY, Connectivity::Face).unwrap();
  let handle = pipeline.tree_handle();
  assert!(pipeline.replace_input(nd::Array1::<f32>::zeros(3).view()).is_err());
  assert_eq!(pipeline.generation(), 0);
  assert!(pipeline.set_merge_threshold(&handle, 0.0).is_ok());
}

#[test]
fn cancelled_render() {
  let tree = TreeBuilder::new().build(random_2d().view()).unwrap();
  let partition = tree.partition(0.0).unwrap();
  let result = materialize_with_cancel(
    tree.node_map(),
    tree.features(),
    &partition,
    tree.samples(),
    RenderParams::new(0.0, 100.0),
    None,
    || true,
  );
  assert_eq!(result.unwrap_err(), WatershedError::Superseded);
}

#[test]
fn newer_render_supersedes_older_one() {
  let img = nd::Array3::<f32>::random((64, 64, 64), Uniform::new(0.0, 100.0));
  let pipeline = Pipeline::initialize(img.view(), f32::NEG_INFINITY, Connectivity::Face).unwrap();
  let partition = pipeline.set_merge_threshold(&pipeline.tree_handle(), 2.0).unwrap();
  let params = RenderParams::new(10.0, 80.0);
  let reference = pipeline.full_export(&partition, params).unwrap();

  //Whether the first render is overtaken depends on timing, so try a few times
  let mut superseded = 0;
  for _ in 0..20 {
    let start = std::sync::Barrier::new(2);
    let (first, second, export) = std::thread::scope(|scope| {
      let first = scope.spawn(|| {
        start.wait();
        pipeline.render(&partition, params, None)
      });
      let export = scope.spawn(|| pipeline.full_export(&partition, params));
      start.wait();
      std::thread::sleep(std::time::Duration::from_micros(200));
      let second = pipeline.render(&partition, params, None);
      (first.join().unwrap(), second, export.join().unwrap())
    });

    //Exports are never cancelled
    assert_eq!(export.unwrap(), reference);

    //The render that started last always completes
    match (first, second) {
      (Err(WatershedError::Superseded), Ok(labels)) => {
        superseded += 1;
        assert_eq!(labels, reference);
      }
      (Ok(a), Ok(b)) => {
        assert_eq!(a, reference);
        assert_eq!(b, reference);
      }
      //The spawned thread was scheduled late and started second
      (Ok(labels), Err(WatershedError::Superseded)) => assert_eq!(labels, reference),
      (first, second) => panic!("unexpected render results: {first:?} and {second:?}"),
    }
  }
  assert!(superseded > 0, "no render was ever superseded");

  //Without competition a render is never cancelled
  assert!(pipeline.render(&partition, params, Some(Slice::new(0, 3))).is_ok());
}

#[test]
fn node_map_with_foreign_ids() {
  let tree = TreeBuilder::new().build(ridge().view()).unwrap();
  let partition = tree.partition(0.0).unwrap();
  let node_map = nd::array![[3usize, 3, 1, 1, 1, 2, 7]].into_dyn();
  let result = materialize(
    node_map.view(),
    tree.features(),
    &partition,
    tree.samples(),
    RenderParams::new(0.0, 100.0),
    None,
  );
  assert!(matches!(result, Err(WatershedError::ShapeError(_))));
}

#[test]
fn log_scaled_controls() {
  let tree = TreeBuilder::new().build(ridge().view()).unwrap();
  let dynamics = LogScale::for_dynamics(&tree);
  assert_eq!((dynamics.min(), dynamics.max()), (2.0, 8.0));
  assert!((dynamics.value(dynamics.max_position()) - 8.0).abs() < 1e-4);

  let intensity = LogScale::for_intensity(&tree);
  assert_eq!((intensity.min(), intensity.max()), (0.0, 8.0));
  assert!((intensity.value(0.0) - 0.0).abs() < 1e-6);
}
