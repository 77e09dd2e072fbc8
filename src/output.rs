// 该文件是 Tianyan （天眼） 项目的一部分。
// src/output.rs - 检测结果发布
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

use tokio::sync::watch;
use tracing::debug;

use crate::model::{Detection, DetectionBatch};

pub mod overlay;

/// 用于校准画面的两个固定参考框
pub const REFERENCE_BATCH: [Detection; 2] = [
  Detection {
    class_id: 0,
    score: 0.9,
    x1: 100.0,
    y1: 100.0,
    x2: 200.0,
    y2: 200.0,
  },
  Detection {
    class_id: 1,
    score: 0.8,
    x1: 220.0,
    y1: 220.0,
    x2: 300.0,
    y2: 300.0,
  },
];

/// 单写多读的检测结果槽位。
///
/// 每次发布整体替换上一帧的结果，读者只会看到旧值或新值。
pub struct DetectionSink {
  tx: watch::Sender<Arc<DetectionBatch>>,
  published: u64,
}

impl Default for DetectionSink {
  fn default() -> Self {
    Self::new()
  }
}

impl DetectionSink {
  pub fn new() -> Self {
    let (tx, _) = watch::channel(Arc::new(DetectionBatch::default()));
    Self { tx, published: 0 }
  }

  pub fn publish(&mut self, batch: DetectionBatch) {
    debug!(
      "发布第 {} 帧检测结果: {} 个目标",
      batch.frame_index,
      batch.len()
    );
    self.tx.send_replace(Arc::new(batch));
    self.published += 1;
  }

  /// 已发布的批次数
  pub fn publications(&self) -> u64 {
    self.published
  }

  pub fn latest(&self) -> Arc<DetectionBatch> {
    Arc::clone(&self.tx.borrow())
  }

  pub fn subscribe(&self) -> SinkReader {
    SinkReader {
      rx: self.tx.subscribe(),
    }
  }
}

/// 界面一侧的读取端
#[derive(Clone)]
pub struct SinkReader {
  rx: watch::Receiver<Arc<DetectionBatch>>,
}

impl SinkReader {
  pub fn latest(&self) -> Arc<DetectionBatch> {
    Arc::clone(&self.rx.borrow())
  }

  pub fn reference(&self) -> &'static [Detection] {
    &REFERENCE_BATCH
  }

  /// 等待下一次发布；发布端被丢弃后返回 `None`
  pub async fn changed(&mut self) -> Option<Arc<DetectionBatch>> {
    self.rx.changed().await.ok()?;
    Some(Arc::clone(&self.rx.borrow_and_update()))
  }
}
