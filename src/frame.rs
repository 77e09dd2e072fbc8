// 该文件是 Tianyan （天眼） 项目的一部分。
// src/frame.rs - 张量定义与逐帧张量回收
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
  atomic::{AtomicU64, Ordering},
};

use thiserror::Error;
use tracing::debug;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("扩展维度越界: 轴 {axis}, 张量维数 {rank}")]
  AxisOutOfRange { axis: usize, rank: usize },
}

/// 行优先存储的多维张量，数据可在多个视图之间共享
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
  shape: Box<[usize]>,
  data: Arc<[T]>,
}

/// 摄像头产生的 H x W x 3 整数图像
pub type ImageTensor = Tensor<u8>;

/// 模型输入，1 x H' x W' x 3 浮点张量
pub type InputTensor = Tensor<f32>;

impl<T> Tensor<T> {
  pub fn from_shape_vec(shape: &[usize], data: Vec<T>) -> Result<Self, ShapeError> {
    let expected = shape.iter().product::<usize>();
    if data.len() != expected {
      return Err(ShapeError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      shape: shape.into(),
      data: data.into(),
    })
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn rank(&self) -> usize {
    self.shape.len()
  }

  pub fn data(&self) -> &[T] {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// 在 `axis` 处插入长度为 1 的维度，与原张量共享数据
  pub fn expand_dims(&self, axis: usize) -> Result<Self, ShapeError> {
    if axis > self.rank() {
      return Err(ShapeError::AxisOutOfRange {
        axis,
        rank: self.rank(),
      });
    }

    let mut shape = self.shape.to_vec();
    shape.insert(axis, 1);
    Ok(Self {
      shape: shape.into_boxed_slice(),
      data: Arc::clone(&self.data),
    })
  }
}

impl<T: Copy + Into<f32>> Tensor<T> {
  /// 仅做类型转换，不做归一化
  pub fn to_f32(&self) -> Tensor<f32> {
    Tensor {
      shape: self.shape.clone(),
      data: self.data.iter().map(|&v| v.into()).collect(),
    }
  }
}

impl ImageTensor {
  pub fn from_hwc(height: usize, width: usize, data: Vec<u8>) -> Result<Self, ShapeError> {
    Self::from_shape_vec(&[height, width, RGB_CHANNELS], data)
  }

  pub fn height(&self) -> usize {
    self.shape.first().copied().unwrap_or(0)
  }

  pub fn width(&self) -> usize {
    self.shape.get(1).copied().unwrap_or(0)
  }

  pub fn channels(&self) -> usize {
    self.shape.get(2).copied().unwrap_or(0)
  }
}

/// 张量分配与释放计数
#[derive(Debug, Default)]
pub struct TensorLedger {
  allocated: AtomicU64,
  released: AtomicU64,
}

impl TensorLedger {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  fn record_alloc(&self) {
    self.allocated.fetch_add(1, Ordering::Relaxed);
  }

  fn record_release(&self, count: u64) {
    self.released.fetch_add(count, Ordering::Relaxed);
  }

  pub fn allocated(&self) -> u64 {
    self.allocated.load(Ordering::Relaxed)
  }

  pub fn released(&self) -> u64 {
    self.released.load(Ordering::Relaxed)
  }

  /// 尚未释放的张量数量
  pub fn live(&self) -> u64 {
    self.allocated().saturating_sub(self.released())
  }
}

/// 单次迭代的张量组。
///
/// 管线接收图像后，图像、浮点转换结果和批量输入都挂在同一个 arena 上，
/// arena 被丢弃时整组释放，无论迭代成功与否。
pub struct FrameArena {
  ledger: Arc<TensorLedger>,
  image: ImageTensor,
  float: Option<Tensor<f32>>,
  input: Option<InputTensor>,
}

impl FrameArena {
  /// 从帧源接管一张图像
  pub fn accept(ledger: &Arc<TensorLedger>, image: ImageTensor) -> Self {
    ledger.record_alloc();
    Self {
      ledger: Arc::clone(ledger),
      image,
      float: None,
      input: None,
    }
  }

  pub fn image(&self) -> &ImageTensor {
    &self.image
  }

  pub fn hold_float(&mut self, tensor: Tensor<f32>) -> &Tensor<f32> {
    self.ledger.record_alloc();
    if self.float.is_some() {
      self.ledger.record_release(1);
    }
    self.float.insert(tensor)
  }

  pub fn hold_input(&mut self, tensor: InputTensor) -> &InputTensor {
    self.ledger.record_alloc();
    if self.input.is_some() {
      self.ledger.record_release(1);
    }
    self.input.insert(tensor)
  }

  pub fn input(&self) -> Option<&InputTensor> {
    self.input.as_ref()
  }

  /// 当前持有的张量数量
  pub fn held(&self) -> u64 {
    1 + self.float.is_some() as u64 + self.input.is_some() as u64
  }
}

impl Drop for FrameArena {
  fn drop(&mut self) {
    let held = self.held();
    debug!("释放本帧 {} 个张量", held);
    self.ledger.record_release(held);
  }
}
