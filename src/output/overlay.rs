// 该文件是 Tianyan （天眼） 项目的一部分。
// src/output/overlay.rs - 叠加层布局
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

use crate::{model::Detection, output::SinkReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxColor {
  /// 实时检测
  Red,
  /// 参考框
  Blue,
}

impl BoxColor {
  pub fn as_str(self) -> &'static str {
    match self {
      BoxColor::Red => "red",
      BoxColor::Blue => "blue",
    }
  }
}

/// 以预览画面像素为单位、绝对定位的矩形
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayBox {
  pub left: f32,
  pub top: f32,
  pub width: f32,
  pub height: f32,
  pub color: BoxColor,
  pub label: String,
}

impl OverlayBox {
  pub fn live(detection: &Detection) -> Self {
    Self::with_label(
      detection,
      BoxColor::Red,
      format!(
        "Class: {}, Score: {:.2}",
        detection.class_id, detection.score
      ),
    )
  }

  pub fn reference(detection: &Detection) -> Self {
    Self::with_label(
      detection,
      BoxColor::Blue,
      format!(
        "Dummy Class: {}, Score: {:.2}",
        detection.class_id, detection.score
      ),
    )
  }

  fn with_label(detection: &Detection, color: BoxColor, label: String) -> Self {
    Self {
      left: detection.x1,
      top: detection.y1,
      width: detection.width(),
      height: detection.height(),
      color,
      label,
    }
  }
}

/// 组合当前帧的叠加层：先是超过显示阈值的实时框，再是参考框。
///
/// 已发布的框都超过发布阈值，所以只有显示阈值高于发布阈值
/// （`--display-threshold` 大于 `--score-threshold`）时这里才会再过滤掉实时框。
pub fn compose(reader: &SinkReader, display_threshold: f32) -> Vec<OverlayBox> {
  let live = reader.latest();
  live
    .items
    .iter()
    .filter(|d| d.score > display_threshold)
    .map(OverlayBox::live)
    .chain(reader.reference().iter().map(OverlayBox::reference))
    .collect()
}
