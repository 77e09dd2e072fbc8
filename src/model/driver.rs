// 该文件是 Tianyan （天眼） 项目的一部分。
// src/model/driver.rs - 推理驱动
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

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};

use crate::{
  frame::InputTensor,
  model::{Model, ModelHandle, Prediction},
};

const NUM_OUTPUTS: usize = 3;

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("模型执行失败: {0}")]
  Model(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("预期模型输出数量为 {expected}, 实际为 {actual}")]
  OutputCount { expected: usize, actual: usize },
  #[error("类别输出中存在非有限值: {0}")]
  InvalidClass(f32),
}

/// 包装模型句柄，把多输出结果整理成 (boxes, scores, classes)
pub struct InferenceDriver<M> {
  handle: Arc<ModelHandle<M>>,
}

impl<M> Clone for InferenceDriver<M> {
  fn clone(&self) -> Self {
    Self {
      handle: Arc::clone(&self.handle),
    }
  }
}

impl<M: Model> InferenceDriver<M> {
  pub fn new(handle: Arc<ModelHandle<M>>) -> Self {
    Self { handle }
  }

  pub async fn infer(&self, input: &InputTensor) -> Result<Prediction, InferenceError> {
    debug!("执行模型推理");
    let outputs = self
      .handle
      .execute(input)
      .await
      .map_err(|e| InferenceError::Model(Box::new(e)))?;

    if outputs.len() != NUM_OUTPUTS {
      error!(
        "预期模型输出数量为 {}, 实际为 {}",
        NUM_OUTPUTS,
        outputs.len()
      );
      return Err(InferenceError::OutputCount {
        expected: NUM_OUTPUTS,
        actual: outputs.len(),
      });
    }

    let classes = outputs[2]
      .data()
      .iter()
      .map(|&c| {
        if c.is_finite() {
          Ok(c.round() as i32)
        } else {
          Err(InferenceError::InvalidClass(c))
        }
      })
      .collect::<Result<Vec<_>, _>>()?;

    Ok(Prediction {
      boxes: outputs[0].data().to_vec(),
      scores: outputs[1].data().to_vec(),
      classes,
    })
  }
}
