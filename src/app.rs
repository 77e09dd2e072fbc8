// 该文件是 Tianyan （天眼） 项目的一部分。
// src/app.rs - 应用生命周期：权限、模型加载与任务启动
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

use std::{future::Future, sync::Arc};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

use crate::{
  input::FrameSource,
  model::{ModelLoadError, ModelLoader, Runtime},
  output::DetectionSink,
  task::{DetectionTask, PipelineReport, Scheduler, TaskError},
};

pub const NO_ACCESS_MESSAGE: &str = "No access to camera";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
  Granted,
  Denied,
}

/// 摄像头权限申请
#[allow(async_fn_in_trait)]
pub trait PermissionGate {
  async fn request_camera(&mut self) -> PermissionStatus;
}

/// 桌面环境没有权限弹窗，直接授予
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

impl PermissionGate for AlwaysGranted {
  async fn request_camera(&mut self) -> PermissionStatus {
    PermissionStatus::Granted
  }
}

/// 界面状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
  /// 权限申请中，显示空白
  Blank,
  /// 权限被拒绝，终止
  NoAccess,
  Preview,
  /// 模型加载失败，本次会话终止
  ModelFailed(String),
}

impl ViewState {
  pub fn message(&self) -> Option<&str> {
    match self {
      ViewState::NoAccess => Some(NO_ACCESS_MESSAGE),
      ViewState::ModelFailed(reason) => Some(reason),
      ViewState::Blank | ViewState::Preview => None,
    }
  }
}

#[derive(Error, Debug)]
pub enum AppError {
  #[error("摄像头权限被拒绝")]
  PermissionDenied,
  #[error("模型加载失败: {0}")]
  ModelLoad(#[from] ModelLoadError),
  #[error("任务错误: {0}")]
  Task(#[from] TaskError),
}

/// 一次应用会话：申请权限，加载模型，摄像头就绪后运行检测任务
pub struct App<R> {
  loader: ModelLoader,
  runtime: R,
  view: watch::Sender<ViewState>,
}

impl<R: Runtime> App<R> {
  pub fn new(loader: ModelLoader, runtime: R) -> Self {
    let (view, _) = watch::channel(ViewState::Blank);
    Self {
      loader,
      runtime,
      view,
    }
  }

  pub fn view(&self) -> watch::Receiver<ViewState> {
    self.view.subscribe()
  }

  fn show(&self, state: ViewState) {
    info!("界面状态: {:?}", state);
    self.view.send_replace(state);
  }

  /// 错误不会越过这里：权限与模型错误转为终止界面状态后返回。
  ///
  /// 读取模型文件是阻塞 I/O，放在阻塞线程池中执行，不会拖住摄像头就绪与其他任务。
  pub async fn launch<G, S, K, C>(
    self,
    gate: &mut G,
    camera_ready: C,
    task: &mut DetectionTask<K>,
    sink: &mut DetectionSink,
  ) -> Result<PipelineReport, AppError>
  where
    G: PermissionGate,
    S: FrameSource,
    K: Scheduler,
    C: Future<Output = S>,
    R: Send + 'static,
    R::Model: Send + 'static,
  {
    self.show(ViewState::Blank);
    if gate.request_camera().await == PermissionStatus::Denied {
      error!("摄像头权限被拒绝");
      self.show(ViewState::NoAccess);
      return Err(AppError::PermissionDenied);
    }
    self.show(ViewState::Preview);

    let Self {
      loader,
      runtime,
      view,
    } = self;
    let (models_tx, models_rx) = watch::channel(None);

    let loading = async move {
      let loaded = tokio::task::spawn_blocking(move || loader.load(&runtime))
        .await
        .unwrap_or_else(|e| Err(ModelLoadError::Runtime(Box::new(e))));
      match loaded {
        Ok(handle) => {
          models_tx.send_replace(Some(Arc::new(handle)));
          Ok(())
        }
        Err(e) => {
          error!("模型加载失败: {}", e);
          Err(e)
        }
      }
    };
    let running = async {
      let source = camera_ready.await;
      info!("摄像头预览就绪");
      task.run(source, models_rx, sink).await
    };

    let (loaded, report) = tokio::join!(loading, running);
    if let Err(e) = loaded {
      view.send_replace(ViewState::ModelFailed(e.to_string()));
      return Err(AppError::ModelLoad(e));
    }
    Ok(report?)
  }
}
