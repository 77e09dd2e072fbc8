// 该文件是 Tianyan （天眼） 项目的一部分。
// src/model.rs - 模型
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

use serde::{Deserialize, Serialize};

use crate::frame::{InputTensor, Tensor};

/// 发布阈值：分数严格大于该值的候选框才会成为检测结果
pub const PUBLICATION_THRESHOLD: f32 = 0.9;
/// 显示阈值：界面叠加层对实时检测结果的二次过滤
pub const DISPLAY_THRESHOLD: f32 = 0.7;

/// 单输入、多输出的异步检测模型
#[allow(async_fn_in_trait)]
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  async fn execute(&self, input: &InputTensor) -> Result<Vec<Tensor<f32>>, Self::Error>;
}

/// 模型原始输出：boxes 为 4N 个 (y1, x1, y2, x2)，scores 与 classes 各 N 个
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
  pub boxes: Vec<f32>,
  pub scores: Vec<f32>,
  pub classes: Vec<i32>,
}

impl Prediction {
  /// 候选框数量 N
  pub fn len(&self) -> usize {
    self.scores.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scores.is_empty()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub class_id: i32,
  pub score: f32,
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl Detection {
  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }
}

/// 一帧的检测结果，保持模型输出顺序，可以为空
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionBatch {
  pub frame_index: u64,
  pub items: Box<[Detection]>,
}

impl DetectionBatch {
  pub fn new(frame_index: u64, items: impl Into<Box<[Detection]>>) -> Self {
    Self {
      frame_index,
      items: items.into(),
    }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
  pub publication: f32,
  pub display: f32,
}

impl Default for Thresholds {
  fn default() -> Self {
    Self {
      publication: PUBLICATION_THRESHOLD,
      display: DISPLAY_THRESHOLD,
    }
  }
}

pub mod decode;
mod driver;
pub mod loader;
pub mod replay;

pub use self::decode::{DecodeError, decode};
pub use self::driver::{InferenceDriver, InferenceError};
pub use self::loader::{ModelBundle, ModelHandle, ModelLoadError, ModelLoader, Runtime};
pub use self::replay::{ReplayError, ReplayModel, ReplayRuntime};
