// 该文件是 Tianyan （天眼） 项目的一部分。
// src/model/decode.rs - 检测结果解码
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

use thiserror::Error;
use tracing::debug;

use crate::model::{Detection, Prediction};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
  #[error("boxes 长度不匹配: 期望 {expected}, 实际 {actual}")]
  BoxesLength { expected: usize, actual: usize },
  #[error("classes 长度不匹配: 期望 {expected}, 实际 {actual}")]
  ClassesLength { expected: usize, actual: usize },
}

/// 按阈值筛选候选框。
///
/// 不做 NMS、不归一化、不裁剪，输出保持模型原有顺序。
/// 模型输出为 (y1, x1, y2, x2)，这里交换成 (x1, y1, x2, y2)。
pub fn decode(prediction: &Prediction, score_threshold: f32) -> Result<Vec<Detection>, DecodeError> {
  let n = prediction.len();
  if prediction.boxes.len() != 4 * n {
    return Err(DecodeError::BoxesLength {
      expected: 4 * n,
      actual: prediction.boxes.len(),
    });
  }
  if prediction.classes.len() != n {
    return Err(DecodeError::ClassesLength {
      expected: n,
      actual: prediction.classes.len(),
    });
  }

  let items = prediction
    .boxes
    .chunks_exact(4)
    .zip(&prediction.scores)
    .zip(&prediction.classes)
    .filter(|((_, score), _)| **score > score_threshold)
    .map(|((bbox, &score), &class_id)| Detection {
      class_id,
      score,
      y1: bbox[0],
      x1: bbox[1],
      y2: bbox[2],
      x2: bbox[3],
    })
    .collect::<Vec<_>>();

  debug!("{} 个候选框中 {} 个超过阈值 {}", n, items.len(), score_threshold);
  Ok(items)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::PUBLICATION_THRESHOLD;

  fn three_box_prediction() -> Prediction {
    Prediction {
      boxes: vec![
        10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0, 110.0, 120.0,
      ],
      scores: vec![0.95, 0.85, 0.99],
      classes: vec![5, 7, 2],
    }
  }

  #[test]
  fn keeps_boxes_above_threshold_in_order() {
    let items = decode(&three_box_prediction(), PUBLICATION_THRESHOLD).unwrap();
    assert_eq!(
      items,
      vec![
        Detection {
          class_id: 5,
          score: 0.95,
          x1: 20.0,
          y1: 10.0,
          x2: 40.0,
          y2: 30.0,
        },
        Detection {
          class_id: 2,
          score: 0.99,
          x1: 100.0,
          y1: 90.0,
          x2: 120.0,
          y2: 110.0,
        },
      ]
    );
  }

  #[test]
  fn threshold_is_strict() {
    let prediction = Prediction {
      boxes: vec![0.0; 8],
      scores: vec![0.9, 0.3],
      classes: vec![1, 1],
    };
    assert!(decode(&prediction, 0.9).unwrap().is_empty());
  }

  #[test]
  fn nan_scores_never_pass() {
    let prediction = Prediction {
      boxes: vec![0.0; 4],
      scores: vec![f32::NAN],
      classes: vec![0],
    };
    assert!(decode(&prediction, 0.0).unwrap().is_empty());
  }

  #[test]
  fn coordinates_swap_y_and_x() {
    let prediction = three_box_prediction();
    let items = decode(&prediction, 0.0).unwrap();
    assert_eq!(items.len(), prediction.len());
    for (i, item) in items.iter().enumerate() {
      let b = &prediction.boxes[4 * i..4 * i + 4];
      assert_eq!((item.x1, item.y1, item.x2, item.y2), (b[1], b[0], b[3], b[2]));
    }
  }

  #[test]
  fn decoding_is_pure() {
    let prediction = three_box_prediction();
    assert_eq!(
      decode(&prediction, PUBLICATION_THRESHOLD),
      decode(&prediction, PUBLICATION_THRESHOLD)
    );
  }

  #[test]
  fn empty_prediction_gives_empty_batch() {
    assert!(decode(&Prediction::default(), PUBLICATION_THRESHOLD).unwrap().is_empty());
  }

  #[test]
  fn length_mismatch_is_an_error() {
    let mut prediction = three_box_prediction();
    prediction.boxes.pop();
    assert_eq!(
      decode(&prediction, 0.5),
      Err(DecodeError::BoxesLength {
        expected: 12,
        actual: 11
      })
    );

    let mut prediction = three_box_prediction();
    prediction.classes.push(9);
    assert_eq!(
      decode(&prediction, 0.5),
      Err(DecodeError::ClassesLength {
        expected: 3,
        actual: 4
      })
    );
  }
}
