// 该文件是 Tianyan （天眼） 项目的一部分。
// src/preprocess.rs - 模型输入预处理
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

use crate::{
  frame::{FrameArena, InputTensor, ShapeError},
  input::CameraConfig,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
  #[error("图像形状不符: 期望 {expected:?}, 实际 {actual:?}")]
  UnexpectedShape {
    expected: [usize; 3],
    actual: Vec<usize>,
  },
  #[error("张量错误: {0}")]
  Shape(#[from] ShapeError),
}

/// 将 H x W x 3 图像转为 1 x H x W x 3 浮点输入。
///
/// 缩放由帧源完成，这里只做类型转换和加批次维度，不做归一化，
/// 模型直接接受 0-255 的取值范围。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preprocessor {
  height: usize,
  width: usize,
  depth: usize,
}

impl Preprocessor {
  pub fn new(config: &CameraConfig) -> Self {
    Self {
      height: config.resize_height as usize,
      width: config.resize_width as usize,
      depth: config.resize_depth as usize,
    }
  }

  pub fn input_shape(&self) -> [usize; 4] {
    [1, self.height, self.width, self.depth]
  }

  /// 两个中间张量都记录在 `arena` 中，随本帧一起释放
  pub fn run<'a>(&self, arena: &'a mut FrameArena) -> Result<&'a InputTensor, PreprocessError> {
    let expected = [self.height, self.width, self.depth];
    if arena.image().shape() != expected {
      return Err(PreprocessError::UnexpectedShape {
        expected,
        actual: arena.image().shape().to_vec(),
      });
    }

    let float = arena.image().to_f32();
    let batched = arena.hold_float(float).expand_dims(0)?;
    let input = arena.hold_input(batched);
    debug!("模型输入形状: {:?}", input.shape());
    Ok(input)
  }
}
