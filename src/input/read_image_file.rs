// 该文件是 Tianyan （天眼） 项目的一部分。
// src/input/read_image_file.rs - 读取图像文件作为帧源
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

use std::{
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::{ImageReader, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::ImageTensor,
  input::{CameraConfig, FrameSource, MODEL_INPUT_SIZE},
  task::StopHandle,
  url_to_path,
};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Error, Debug)]
pub enum ImageFileSourceError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("没有可读取的图像文件: {0}")]
  NoImages(PathBuf),
}

/// 逐张读取图像文件，缩放到模型输入尺寸后作为帧输出
pub struct ImageFileSource {
  paths: Vec<PathBuf>,
  pending: VecDeque<PathBuf>,
  width: u32,
  height: u32,
  repeat: bool,
  stop: Option<StopHandle>,
}

impl FromUrlWithScheme for ImageFileSource {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileSource {
  type Error = ImageFileSourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileSourceError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: url.scheme().to_string(),
      });
    }

    let path = url_to_path(url);
    let paths = if path.is_dir() {
      let mut paths = std::fs::read_dir(&path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_image_file(p))
        .collect::<Vec<_>>();
      paths.sort();
      paths
    } else if path.is_file() {
      vec![path.clone()]
    } else {
      Vec::new()
    };

    if paths.is_empty() {
      return Err(ImageFileSourceError::NoImages(path));
    }

    Ok(Self::new(paths))
  }
}

fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
    .unwrap_or(false)
}

impl ImageFileSource {
  pub fn new(paths: Vec<PathBuf>) -> Self {
    Self {
      pending: paths.iter().cloned().collect(),
      paths,
      width: MODEL_INPUT_SIZE,
      height: MODEL_INPUT_SIZE,
      repeat: false,
      stop: None,
    }
  }

  /// 使用摄像头配置中的缩放尺寸
  pub fn with_config(mut self, config: &CameraConfig) -> Self {
    self.width = config.resize_width;
    self.height = config.resize_height;
    self
  }

  /// 读完后从头循环
  pub fn with_repeat(mut self, repeat: bool) -> Self {
    self.repeat = repeat;
    self
  }

  /// 不循环时，图像读完后置位停止标志
  pub fn with_stop(mut self, stop: StopHandle) -> Self {
    self.stop = Some(stop);
    self
  }

  /// 不循环且所有图像都已取出
  pub fn is_exhausted(&self) -> bool {
    self.pending.is_empty() && !self.repeat
  }

  pub fn len(&self) -> usize {
    self.paths.len()
  }

  pub fn is_empty(&self) -> bool {
    self.paths.is_empty()
  }

  fn read_frame(&self, path: &Path) -> Result<ImageTensor, String> {
    let image = ImageReader::open(path)
      .map_err(|e| e.to_string())?
      .decode()
      .map_err(|e| e.to_string())?
      .to_rgb8();
    debug!(
      "读取图像 {}: {}x{}",
      path.display(),
      image.width(),
      image.height()
    );

    let resized = image::imageops::resize(&image, self.width, self.height, FilterType::Triangle);
    ImageTensor::from_hwc(self.height as usize, self.width as usize, resized.into_raw())
      .map_err(|e| e.to_string())
  }
}

impl FrameSource for ImageFileSource {
  fn next_frame(&mut self) -> Option<ImageTensor> {
    if self.pending.is_empty() && self.repeat {
      self.pending.extend(self.paths.iter().cloned());
    }

    let Some(path) = self.pending.pop_front() else {
      if let Some(stop) = &self.stop {
        debug!("图像已全部读取，停止任务");
        stop.stop();
      }
      return None;
    };
    match self.read_frame(&path) {
      Ok(frame) => Some(frame),
      Err(e) => {
        warn!("无法读取图像 {}: {}", path.display(), e);
        None
      }
    }
  }
}
