// 该文件是 Tianyan （天眼） 项目的一部分。
// src/input.rs - 帧源定义与摄像头配置
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

use crate::frame::ImageTensor;

/// 帧源。
///
/// `None` 表示“暂时没有新帧”，调用方应在下一个调度节拍重试；
/// 帧源被关闭后永远返回 `None`。
pub trait FrameSource {
  fn next_frame(&mut self) -> Option<ImageTensor>;
}

impl<F: FnMut() -> Option<ImageTensor>> FrameSource for F {
  fn next_frame(&mut self) -> Option<ImageTensor> {
    self()
  }
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileSource, ImageFileSourceError};

/// 运行平台，决定摄像头纹理尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Platform {
  Ios,
  Android,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
  Float32,
  Int32,
}

/// 摄像头预览流的配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConfig {
  pub camera_texture_height: u32,
  pub camera_texture_width: u32,
  pub auto_render: bool,
  pub resize_depth: u32,
  pub resize_height: u32,
  pub resize_width: u32,
  pub dtype: DType,
}

pub const MODEL_INPUT_SIZE: u32 = 640;

impl Platform {
  /// (高, 宽)
  pub fn texture_dims(self) -> (u32, u32) {
    match self {
      Platform::Ios => (1920, 1080),
      Platform::Android => (1200, 1600),
    }
  }
}

impl CameraConfig {
  pub fn for_platform(platform: Platform) -> Self {
    let (camera_texture_height, camera_texture_width) = platform.texture_dims();
    Self {
      camera_texture_height,
      camera_texture_width,
      auto_render: false,
      resize_depth: 3,
      resize_height: MODEL_INPUT_SIZE,
      resize_width: MODEL_INPUT_SIZE,
      dtype: DType::Float32,
    }
  }
}
