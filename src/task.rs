// 该文件是 Tianyan （天眼） 项目的一部分。
// src/task.rs - 逐帧检测任务循环
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
  frame::{FrameArena, ImageTensor, TensorLedger},
  input::FrameSource,
  model::{
    DecodeError, DetectionBatch, InferenceDriver, InferenceError, Model, ModelHandle, Thresholds,
    decode,
  },
  output::DetectionSink,
  preprocess::{PreprocessError, Preprocessor},
};

/// 模型句柄通过该通道交给任务，`None` 表示仍在加载
pub type ModelReceiver<M> = watch::Receiver<Option<Arc<ModelHandle<M>>>>;

/// 单帧失败，记录后继续处理下一帧
#[derive(Error, Debug)]
pub enum FrameError {
  #[error("预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理失败: {0}")]
  Inference(#[from] InferenceError),
  #[error("解码失败: {0}")]
  Decode(#[from] DecodeError),
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("模型加载未完成即被放弃，任务无法启动")]
  ModelUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Init,
  WaitingModel,
  Running,
  ErrorRecover,
  Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
  /// 从帧源取到的帧数
  pub frames: u64,
  pub published: u64,
  pub failed: u64,
  /// 帧源暂无新帧的次数
  pub misses: u64,
}

/// 渲染节拍。每次迭代结束或帧源暂无新帧时等待一次。
#[allow(async_fn_in_trait)]
pub trait Scheduler {
  async fn tick(&mut self);
}

/// 让出执行权，下一轮调度时继续
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldScheduler;

impl Scheduler for YieldScheduler {
  async fn tick(&mut self) {
    tokio::task::yield_now().await;
  }
}

/// 以固定频率（如预览帧率）推进，错过的节拍直接跳过
#[derive(Debug)]
pub struct IntervalScheduler {
  period: Duration,
  interval: Option<tokio::time::Interval>,
}

impl IntervalScheduler {
  pub fn from_hz(hz: u32) -> Self {
    Self {
      period: Duration::from_secs_f64(1.0 / hz.max(1) as f64),
      interval: None,
    }
  }

  pub fn period(&self) -> Duration {
    self.period
  }
}

impl Scheduler for IntervalScheduler {
  async fn tick(&mut self) {
    let period = self.period;
    let interval = self.interval.get_or_insert_with(|| {
      let mut interval = tokio::time::interval(period);
      interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
      interval
    });
    interval.tick().await;
  }
}

impl<K: Scheduler> Scheduler for &mut K {
  async fn tick(&mut self) {
    (**self).tick().await;
  }
}

/// 停止标志，在每次迭代开始时检查
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn stop(&self) {
    self.0.store(true, Ordering::Relaxed);
  }

  pub fn is_stopped(&self) -> bool {
    self.0.load(Ordering::Relaxed)
  }
}

/// 连续检测任务：取帧、预处理、推理、解码、发布，严格串行。
///
/// 上一帧推理完成前不会取新帧，中间的摄像头帧由帧源自行丢弃。
pub struct DetectionTask<K = YieldScheduler> {
  preprocessor: Preprocessor,
  thresholds: Thresholds,
  scheduler: K,
  ledger: Arc<TensorLedger>,
  stop: StopHandle,
  frame_number: Option<u64>,
  state: PipelineState,
}

impl DetectionTask<YieldScheduler> {
  pub fn new(preprocessor: Preprocessor) -> Self {
    Self {
      preprocessor,
      thresholds: Thresholds::default(),
      scheduler: YieldScheduler,
      ledger: TensorLedger::new(),
      stop: StopHandle::new(),
      frame_number: None,
      state: PipelineState::Init,
    }
  }
}

impl<K: Scheduler> DetectionTask<K> {
  pub fn with_scheduler<S: Scheduler>(self, scheduler: S) -> DetectionTask<S> {
    DetectionTask {
      preprocessor: self.preprocessor,
      thresholds: self.thresholds,
      scheduler,
      ledger: self.ledger,
      stop: self.stop,
      frame_number: self.frame_number,
      state: self.state,
    }
  }

  pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
    self.thresholds = thresholds;
    self
  }

  /// 处理指定帧数后退出，`None` 表示不限
  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_stop(mut self, stop: StopHandle) -> Self {
    self.stop = stop;
    self
  }

  pub fn stop_handle(&self) -> StopHandle {
    self.stop.clone()
  }

  pub fn ledger(&self) -> Arc<TensorLedger> {
    Arc::clone(&self.ledger)
  }

  pub fn state(&self) -> PipelineState {
    self.state
  }

  pub fn thresholds(&self) -> Thresholds {
    self.thresholds
  }

  fn set_state(&mut self, state: PipelineState) {
    if self.state != state {
      debug!("任务状态: {:?} -> {:?}", self.state, state);
      self.state = state;
    }
  }

  /// 单帧处理。张量全部挂在 arena 上，任何一步失败都会随 arena 一起释放。
  async fn process_frame<M: Model>(
    &self,
    image: ImageTensor,
    driver: &InferenceDriver<M>,
    frame_index: u64,
  ) -> Result<DetectionBatch, FrameError> {
    let mut arena = FrameArena::accept(&self.ledger, image);
    let input = self.preprocessor.run(&mut arena)?;
    let prediction = driver.infer(input).await?;
    let items = decode(&prediction, self.thresholds.publication)?;
    Ok(DetectionBatch::new(frame_index, items))
  }

  /// 等待模型就绪后持续处理帧，直到停止标志置位或达到帧数上限
  pub async fn run<S: FrameSource, M: Model>(
    &mut self,
    mut source: S,
    mut models: ModelReceiver<M>,
    sink: &mut DetectionSink,
  ) -> Result<PipelineReport, TaskError> {
    info!("开始任务...");
    self.set_state(PipelineState::WaitingModel);
    let handle = {
      let model = models
        .wait_for(Option::is_some)
        .await
        .map_err(|_| TaskError::ModelUnavailable)?;
      model.clone().ok_or(TaskError::ModelUnavailable)?
    };
    let driver = InferenceDriver::new(handle);
    info!("模型就绪，开始处理帧");
    self.set_state(PipelineState::Running);

    let mut report = PipelineReport::default();
    loop {
      if self.stop.is_stopped() {
        warn!("停止信号接收，退出任务循环");
        break;
      }
      if self.frame_number.is_some_and(|n| report.frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", report.frames);
        break;
      }

      let Some(image) = source.next_frame() else {
        report.misses += 1;
        self.scheduler.tick().await;
        continue;
      };

      report.frames += 1;
      let frame_index = report.frames;
      let now = Instant::now();
      match self.process_frame(image, &driver, frame_index).await {
        Ok(batch) => {
          debug!(
            "第 {} 帧处理完成，耗时: {:.2?}, 检测到 {} 个目标",
            frame_index,
            now.elapsed(),
            batch.len()
          );
          sink.publish(batch);
          report.published += 1;
          self.set_state(PipelineState::Running);
        }
        Err(e) => {
          self.set_state(PipelineState::ErrorRecover);
          warn!("第 {} 帧处理失败: {}", frame_index, e);
          report.failed += 1;
        }
      }

      self.scheduler.tick().await;
    }

    self.set_state(PipelineState::Stopped);
    info!(
      "任务完成: {} 帧, 发布 {} 次, 失败 {} 次, 空帧 {} 次",
      report.frames, report.published, report.failed, report.misses
    );
    Ok(report)
  }
}
