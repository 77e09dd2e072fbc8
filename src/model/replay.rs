// 该文件是 Tianyan （天眼） 项目的一部分。
// src/model/replay.rs - 回放录制的模型输出
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

use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{InputTensor, ShapeError, Tensor},
  model::{Model, ModelBundle, Prediction, Runtime},
  url_to_path,
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("录制文件格式错误: {0}")]
  Format(#[from] serde_json::Error),
  #[error("录制文件中没有预测结果")]
  Empty,
  #[error("张量错误: {0}")]
  Shape(#[from] ShapeError),
}

/// 离线运行时：忽略权重，循环回放 JSON 文件中录制的预测结果。
///
/// 文件内容为 `[{ "boxes": [...], "scores": [...], "classes": [...] }, ...]`。
#[derive(Debug, Clone)]
pub struct ReplayRuntime {
  predictions: Arc<[Prediction]>,
}

impl FromUrlWithScheme for ReplayRuntime {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayRuntime {
  type Error = ReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: url.scheme().to_string(),
      });
    }

    let path = url_to_path(url);
    info!("读取录制的预测结果: {}", path.display());
    let predictions: Vec<Prediction> = serde_json::from_slice(&std::fs::read(&path)?)?;
    Ok(Self::new(predictions))
  }
}

impl ReplayRuntime {
  pub fn new(predictions: Vec<Prediction>) -> Self {
    Self {
      predictions: predictions.into(),
    }
  }
}

impl Runtime for ReplayRuntime {
  type Model = ReplayModel;
  type Error = ReplayError;

  fn is_ready(&self) -> bool {
    !self.predictions.is_empty()
  }

  fn instantiate(&self, bundle: ModelBundle) -> Result<Self::Model, Self::Error> {
    if self.predictions.is_empty() {
      return Err(ReplayError::Empty);
    }
    debug!("回放运行时忽略 {} 字节权重", bundle.weights.len());
    Ok(ReplayModel {
      predictions: Arc::clone(&self.predictions),
      cursor: AtomicUsize::new(0),
    })
  }
}

pub struct ReplayModel {
  predictions: Arc<[Prediction]>,
  cursor: AtomicUsize,
}

impl Model for ReplayModel {
  type Error = ReplayError;

  async fn execute(&self, _input: &InputTensor) -> Result<Vec<Tensor<f32>>, Self::Error> {
    let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.predictions.len();
    let prediction = &self.predictions[index];
    let n = prediction.len();

    Ok(vec![
      Tensor::from_shape_vec(&[1, n, 4], prediction.boxes.clone())?,
      Tensor::from_shape_vec(&[1, n], prediction.scores.clone())?,
      Tensor::from_shape_vec(
        &[1, n],
        prediction.classes.iter().map(|&c| c as f32).collect(),
      )?,
    ])
  }
}
