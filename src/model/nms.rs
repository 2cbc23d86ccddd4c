// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use tracing::debug;

use super::{BoundingBox, Detection, DetectionSet};

/// 计算两个角点形式边界框的 IoU，并集面积为 0 时返回 0
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
  let x1 = a.left.max(b.left);
  let y1 = a.top.max(b.top);
  let x2 = a.right.min(b.right);
  let y2 = a.bottom.min(b.bottom);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.area() + b.area() - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 与类别无关的贪心 NMS。
///
/// 按置信度稳定降序排序（相同置信度保持解码顺序），依次保留当前最高者，
/// 并抑制与其 IoU 严格大于 `iou_threshold` 的其余候选。
pub fn suppress(mut detections: Vec<Detection>, iou_threshold: f32) -> DetectionSet {
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let total = detections.len();
  let mut active = vec![true; total];

  for i in 0..total {
    if !active[i] {
      continue;
    }
    for j in (i + 1)..total {
      if active[j] && iou(&detections[i].bbox, &detections[j].bbox) > iou_threshold {
        active[j] = false;
      }
    }
  }

  debug!(
    "NMS: {} -> {}",
    total,
    active.iter().filter(|&&keep| keep).count()
  );

  let mut keep = active.into_iter();
  let items = detections
    .into_iter()
    .filter(|_| keep.next().unwrap_or(false))
    .collect();
  DetectionSet::from_sorted(items)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(bbox: BoundingBox, confidence: f32, label: &str) -> Detection {
    Detection {
      bbox,
      label: label.to_string(),
      class_id: 0,
      confidence,
    }
  }

  #[test]
  fn iou_identity_disjoint_and_degenerate() {
    let a = BoundingBox::new(0.0, 0.0, 2.0, 2.0);
    assert_eq!(iou(&a, &a), 1.0);

    let b = BoundingBox::new(3.0, 3.0, 4.0, 4.0);
    assert_eq!(iou(&a, &b), 0.0);

    let point = BoundingBox::new(1.0, 1.0, 1.0, 1.0);
    assert_eq!(iou(&point, &point), 0.0);
  }

  #[test]
  fn iou_partial_overlap() {
    let a = BoundingBox::new(0.0, 0.0, 2.0, 2.0);
    let b = BoundingBox::new(1.0, 0.0, 3.0, 2.0);
    // 交 2, 并 6
    assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    assert_eq!(iou(&a, &b), iou(&b, &a));
  }

  #[test]
  fn heavy_overlap_keeps_only_higher_confidence() {
    // 宽 10 的两个框，偏移 x 使 IoU = 0.7: 交 = 10 * w, 并 = 200 - 10w -> w = 140/17
    let shift = 10.0 - 140.0 / 17.0;
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::new(shift, 0.0, 10.0 + shift, 10.0);
    assert!((iou(&a, &b) - 0.7).abs() < 1e-4);

    let set = suppress(vec![det(b, 0.8, "low"), det(a, 0.9, "high")], 0.5);
    assert_eq!(set.len(), 1);
    assert_eq!(set.as_slice()[0].label, "high");
  }

  #[test]
  fn light_overlap_keeps_both() {
    // IoU = 0.3: 交 = 10w, 并 = 200 - 10w -> w = 60/13
    let shift = 10.0 - 60.0 / 13.0;
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::new(shift, 0.0, 10.0 + shift, 10.0);
    assert!((iou(&a, &b) - 0.3).abs() < 1e-4);

    let set = suppress(vec![det(b, 0.8, "low"), det(a, 0.9, "high")], 0.5);
    let labels: Vec<_> = set.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, ["high", "low"]);
  }

  #[test]
  fn equal_confidence_keeps_decode_order() {
    let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    let b = BoundingBox::new(5.0, 5.0, 6.0, 6.0);
    let c = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    let set = suppress(
      vec![det(a, 0.7, "first"), det(b, 0.7, "second"), det(c, 0.7, "third")],
      0.5,
    );
    let labels: Vec<_> = set.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, ["first", "second"]);
  }

  #[test]
  fn iou_equal_to_threshold_is_kept() {
    let a = BoundingBox::new(0.0, 0.0, 2.0, 2.0);
    let b = BoundingBox::new(1.0, 0.0, 3.0, 2.0);
    let set = suppress(vec![det(a, 0.9, "a"), det(b, 0.8, "b")], iou(&a, &b));
    assert_eq!(set.len(), 2);
  }

  #[test]
  fn chain_suppression_is_greedy() {
    // a 抑制 b; c 与 a 的 IoU 只有 0.43，被抑制的 b 不再参与比较，c 保留
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::new(2.0, 0.0, 12.0, 10.0);
    let c = BoundingBox::new(4.0, 0.0, 14.0, 10.0);
    let set = suppress(vec![det(a, 0.9, "a"), det(b, 0.8, "b"), det(c, 0.7, "c")], 0.5);
    let labels: Vec<_> = set.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, ["a", "c"]);
  }

  #[test]
  fn empty_input_gives_empty_set() {
    assert!(suppress(Vec::new(), 0.5).is_empty());
  }
}
