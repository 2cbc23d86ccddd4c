// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/properties.rs - IoU、抑制与解码的性质测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use proptest::prelude::*;

use shanan_live::frame::Tensor;
use shanan_live::model::{
  BoundingBox, Detection, Labels, OutputDecoder, iou, negotiate_layout, suppress,
};

fn arb_box() -> impl Strategy<Value = BoundingBox> {
  (0.0f32..100.0, 0.0f32..100.0, 0.0f32..50.0, 0.0f32..50.0)
    .prop_map(|(left, top, w, h)| BoundingBox::new(left, top, left + w, top + h))
}

fn arb_detection() -> impl Strategy<Value = Detection> {
  (arb_box(), 0usize..5, 0.0f32..=1.0).prop_map(|(bbox, class_id, confidence)| Detection {
    bbox,
    label: format!("c{}", class_id),
    class_id,
    confidence,
  })
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(128))]

  #[test]
  fn iou_is_symmetric_and_bounded(a in arb_box(), b in arb_box()) {
    let ab = iou(&a, &b);
    prop_assert_eq!(ab, iou(&b, &a));
    prop_assert!((0.0..=1.0 + 1e-6).contains(&ab));
  }

  #[test]
  fn iou_with_itself_is_one_for_nonempty_boxes(a in arb_box()) {
    prop_assume!(a.area() > 1e-3);
    prop_assert!((iou(&a, &a) - 1.0).abs() < 1e-5);
  }

  #[test]
  fn suppression_output_is_sorted_and_non_overlapping(
    detections in prop::collection::vec(arb_detection(), 0..40),
    threshold in 0.05f32..0.95,
  ) {
    let input_len = detections.len();
    let set = suppress(detections, threshold);
    prop_assert!(set.len() <= input_len);

    let kept = set.as_slice();
    for pair in kept.windows(2) {
      prop_assert!(pair[0].confidence >= pair[1].confidence);
    }
    for (i, a) in kept.iter().enumerate() {
      for b in &kept[i + 1..] {
        prop_assert!(iou(&a.bbox, &b.bbox) <= threshold);
      }
    }
  }

  #[test]
  fn decoder_never_emits_below_threshold(
    data in prop::collection::vec(-1.0f32..2.0, 9 * 16),
    threshold in 0.05f32..0.95,
  ) {
    let layout = negotiate_layout(&[1, 9, 16]).unwrap();
    let decoder = OutputDecoder::new(layout, Labels::new(["a", "b", "c", "d", "e"]));
    let tensor = Tensor::from_vec(&[1, 9, 16], data).unwrap();

    let detections = decoder.decode(&tensor, threshold).unwrap();
    prop_assert!(detections.len() <= 16);
    for det in &detections {
      prop_assert!(det.confidence >= threshold);
      prop_assert!(det.class_id < 5);
    }
  }
}
