// 该文件是 Tianyan （天眼） 项目的一部分。
// src/bin/simple_camera.rs - 简单的逐帧检测程序
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

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use tianyan::{
  FromUrl,
  app::{AlwaysGranted, App},
  input::{CameraConfig, ImageFileSource, Platform},
  model::{DISPLAY_THRESHOLD, ModelLoader, PUBLICATION_THRESHOLD, ReplayRuntime, Thresholds},
  output::{DetectionSink, overlay},
  preprocess::Preprocessor,
  task::{DetectionTask, IntervalScheduler, YieldScheduler},
};

/// Tianyan 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型资源目录，例如 tfjs:///opt/assets
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 image:///data/frames
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 推理运行时，例如 replay:///data/predictions.json
  #[arg(long, value_name = "RUNTIME")]
  pub runtime: Url,
  /// 运行平台，决定摄像头纹理尺寸
  #[arg(long, value_enum, default_value = "android")]
  pub platform: Platform,
  /// 发布阈值
  #[arg(long, default_value_t = PUBLICATION_THRESHOLD, value_name = "THRESHOLD")]
  pub score_threshold: f32,
  /// 显示阈值
  #[arg(long, default_value_t = DISPLAY_THRESHOLD, value_name = "THRESHOLD")]
  pub display_threshold: f32,
  /// 最大处理帧数，0 表示不限制
  #[arg(long, value_name = "FRAME_NUMBER", default_value_t = 0)]
  pub frame_number: u64,
  /// 图像读完后从头循环，否则读完即退出
  #[arg(long)]
  pub repeat: bool,
  /// 调度频率，0 表示不限速
  #[arg(long, value_name = "HZ", default_value_t = 30)]
  pub tick_hz: u32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let args = Args::parse();

  info!("模型资源: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("推理运行时: {}", args.runtime);

  let camera = CameraConfig::for_platform(args.platform);
  info!(
    "摄像头纹理: {}x{}, 模型输入: {}x{}x{}",
    camera.camera_texture_height,
    camera.camera_texture_width,
    camera.resize_height,
    camera.resize_width,
    camera.resize_depth
  );

  let app = App::new(
    ModelLoader::from_url(&args.model)?,
    ReplayRuntime::from_url(&args.runtime)?,
  );
  let thresholds = Thresholds {
    publication: args.score_threshold,
    display: args.display_threshold,
  };
  let task = DetectionTask::new(Preprocessor::new(&camera))
    .with_thresholds(thresholds)
    .with_frame_number((args.frame_number > 0).then_some(args.frame_number));
  let source = ImageFileSource::from_url(&args.input)?
    .with_config(&camera)
    .with_repeat(args.repeat)
    .with_stop(task.stop_handle());
  info!("输入图像 {} 张", source.len());

  let stop = task.stop_handle();
  ctrlc::set_handler(move || {
    warn!("收到中断信号，准备退出...");
    stop.stop();
  })?;

  let mut sink = DetectionSink::new();
  let reader = sink.subscribe();
  let camera_ready = async { source };

  let report = if args.tick_hz == 0 {
    let mut task = task.with_scheduler(YieldScheduler);
    app
      .launch(&mut AlwaysGranted, camera_ready, &mut task, &mut sink)
      .await?
  } else {
    let mut task = task.with_scheduler(IntervalScheduler::from_hz(args.tick_hz));
    app
      .launch(&mut AlwaysGranted, camera_ready, &mut task, &mut sink)
      .await?
  };

  for overlay_box in overlay::compose(&reader, thresholds.display) {
    info!(
      "[{}] {} at ({:.0}, {:.0}, {:.0}x{:.0})",
      overlay_box.color.as_str(),
      overlay_box.label,
      overlay_box.left,
      overlay_box.top,
      overlay_box.width,
      overlay_box.height
    );
  }

  info!(
    "处理完成: {} 帧, 发布 {} 次, 失败 {} 次",
    report.frames, report.published, report.failed
  );
  Ok(())
}
