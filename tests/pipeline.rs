// 该文件是 Tianyan （天眼） 项目的一部分。
// tests/pipeline.rs - 检测任务端到端测试
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
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use tokio::sync::watch;

use tianyan::{
  frame::{ImageTensor, InputTensor, Tensor},
  input::{CameraConfig, FrameSource, Platform},
  model::{
    Detection, Model, ModelHandle, PUBLICATION_THRESHOLD, Prediction, decode,
    loader::BundleInfo,
  },
  output::{
    DetectionSink, REFERENCE_BATCH, SinkReader,
    overlay::{self, BoxColor},
  },
  preprocess::Preprocessor,
  task::{DetectionTask, ModelReceiver, PipelineReport, PipelineState, Scheduler, StopHandle},
};

const SIDE: usize = 2;

#[derive(Debug, thiserror::Error)]
#[error("injected failure")]
struct Injected;

#[derive(Clone)]
enum Outcome {
  Predict(Prediction),
  Fail,
}

struct ScriptedModel {
  outcomes: Vec<Outcome>,
  calls: AtomicUsize,
}

impl ScriptedModel {
  fn new(outcomes: Vec<Outcome>) -> Self {
    Self {
      outcomes,
      calls: AtomicUsize::new(0),
    }
  }
}

fn flat(values: Vec<f32>) -> Tensor<f32> {
  Tensor::from_shape_vec(&[values.len()], values).unwrap()
}

impl Model for ScriptedModel {
  type Error = Injected;

  async fn execute(&self, input: &InputTensor) -> Result<Vec<Tensor<f32>>, Self::Error> {
    assert_eq!(input.shape(), &[1, SIDE, SIDE, 3]);
    let call = self.calls.fetch_add(1, Ordering::Relaxed);
    match &self.outcomes[call % self.outcomes.len()] {
      Outcome::Predict(p) => Ok(vec![
        flat(p.boxes.clone()),
        flat(p.scores.clone()),
        flat(p.classes.iter().map(|&c| c as f32).collect()),
      ]),
      Outcome::Fail => Err(Injected),
    }
  }
}

enum Step {
  Frame,
  /// 尺寸不对的帧，预处理阶段失败
  BadFrame,
  Miss,
}

/// 按脚本产出帧，脚本结束后置位停止标志
struct ScriptedSource {
  steps: VecDeque<Step>,
  stop: StopHandle,
}

impl FrameSource for ScriptedSource {
  fn next_frame(&mut self) -> Option<ImageTensor> {
    match self.steps.pop_front() {
      Some(Step::Frame) => Some(ImageTensor::from_hwc(SIDE, SIDE, vec![128; SIDE * SIDE * 3]).unwrap()),
      Some(Step::BadFrame) => Some(ImageTensor::from_hwc(1, 1, vec![0; 3]).unwrap()),
      Some(Step::Miss) => None,
      None => {
        self.stop.stop();
        None
      }
    }
  }
}

/// 每个节拍记录界面此刻能看到的帧号
struct RenderScheduler {
  reader: SinkReader,
  seen: Vec<u64>,
}

impl Scheduler for RenderScheduler {
  async fn tick(&mut self) {
    self.seen.push(self.reader.latest().frame_index);
    tokio::task::yield_now().await;
  }
}

fn s1_prediction() -> Prediction {
  Prediction {
    boxes: vec![
      10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0, 110.0, 120.0,
    ],
    scores: vec![0.95, 0.85, 0.99],
    classes: vec![5, 7, 2],
  }
}

fn rejected_prediction() -> Prediction {
  Prediction {
    boxes: vec![0.0, 0.0, 1.0, 1.0],
    scores: vec![0.9],
    classes: vec![3],
  }
}

fn model_channel(outcomes: Vec<Outcome>) -> ModelReceiver<ScriptedModel> {
  let handle = ModelHandle::new(ScriptedModel::new(outcomes), BundleInfo::default());
  let (_tx, rx) = watch::channel(Some(Arc::new(handle)));
  rx
}

struct Run {
  report: PipelineReport,
  seen: Vec<u64>,
  sink: DetectionSink,
  allocated: u64,
  released: u64,
  state: PipelineState,
}

async fn run(steps: Vec<Step>, outcomes: Vec<Outcome>) -> Run {
  let config = CameraConfig {
    resize_height: SIDE as u32,
    resize_width: SIDE as u32,
    ..CameraConfig::for_platform(Platform::Ios)
  };
  let mut sink = DetectionSink::new();
  let mut recorder = RenderScheduler {
    reader: sink.subscribe(),
    seen: Vec::new(),
  };

  let mut task = DetectionTask::new(Preprocessor::new(&config)).with_scheduler(&mut recorder);
  let source = ScriptedSource {
    steps: steps.into(),
    stop: task.stop_handle(),
  };
  let report = task
    .run(source, model_channel(outcomes), &mut sink)
    .await
    .unwrap();
  let ledger = task.ledger();
  let state = task.state();
  drop(task);

  Run {
    report,
    seen: recorder.seen,
    sink,
    allocated: ledger.allocated(),
    released: ledger.released(),
    state,
  }
}

#[tokio::test]
async fn two_boxes_are_accepted() {
  let run = run(vec![Step::Frame], vec![Outcome::Predict(s1_prediction())]).await;

  let latest = run.sink.latest();
  assert_eq!(latest.frame_index, 1);
  assert_eq!(
    &*latest.items,
    &[
      Detection {
        class_id: 5,
        score: 0.95,
        x1: 20.0,
        y1: 10.0,
        x2: 40.0,
        y2: 30.0,
      },
      Detection {
        class_id: 2,
        score: 0.99,
        x1: 100.0,
        y1: 90.0,
        x2: 120.0,
        y2: 110.0,
      },
    ]
  );
  assert_eq!(run.state, PipelineState::Stopped);
}

#[tokio::test]
async fn all_rejected_still_replaces_previous_batch() {
  let run = run(
    vec![Step::Frame, Step::Frame],
    vec![
      Outcome::Predict(s1_prediction()),
      Outcome::Predict(rejected_prediction()),
    ],
  )
  .await;

  assert_eq!(run.sink.publications(), 2);
  let latest = run.sink.latest();
  assert_eq!(latest.frame_index, 2);
  assert!(latest.is_empty());
}

#[test]
fn decoder_is_pure() {
  let prediction = s1_prediction();
  let first = decode(&prediction, PUBLICATION_THRESHOLD).unwrap();
  let second = decode(&prediction, PUBLICATION_THRESHOLD).unwrap();
  assert_eq!(first, second);
}

#[test]
fn decoder_keeps_exactly_the_scores_above_threshold() {
  let scores = [0.1, 0.91, 0.9, 1.0, 0.95, 0.5, 0.901];
  let n = scores.len();
  let prediction = Prediction {
    boxes: (0..4 * n).map(|v| v as f32).collect(),
    scores: scores.to_vec(),
    classes: (0..n as i32).collect(),
  };

  let items = decode(&prediction, PUBLICATION_THRESHOLD).unwrap();
  let kept = items.iter().map(|d| d.class_id).collect::<Vec<_>>();
  assert_eq!(kept, vec![1, 3, 4, 6]);
  for d in &items {
    let i = d.class_id as usize;
    assert_eq!(
      (d.x1, d.y1, d.x2, d.y2),
      (
        prediction.boxes[4 * i + 1],
        prediction.boxes[4 * i],
        prediction.boxes[4 * i + 3],
        prediction.boxes[4 * i + 2]
      )
    );
  }
}

#[tokio::test]
async fn one_failed_inference_does_not_stop_the_loop() {
  let mut outcomes = vec![Outcome::Predict(s1_prediction()); 10];
  outcomes[4] = Outcome::Fail;
  let run = run((0..10).map(|_| Step::Frame).collect(), outcomes).await;

  assert_eq!(
    run.report,
    PipelineReport {
      frames: 10,
      published: 9,
      failed: 1,
      misses: 1,
    }
  );
  // 第 5 帧失败后界面仍显示第 4 帧的结果
  assert_eq!(&run.seen[..10], &[1, 2, 3, 4, 4, 6, 7, 8, 9, 10]);
  assert_eq!(run.allocated, 30);
  assert_eq!(run.released, run.allocated);
}

#[tokio::test]
async fn batches_are_published_in_frame_order() {
  let run = run(
    vec![Step::Frame, Step::Miss, Step::Frame, Step::Frame],
    vec![Outcome::Predict(s1_prediction())],
  )
  .await;

  assert_eq!(run.seen, vec![1, 1, 2, 3, 3]);
  assert!(run.seen.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn tensors_are_released_on_every_failure_path() {
  let broken = Prediction {
    boxes: vec![1.0, 2.0],
    scores: vec![0.99],
    classes: vec![1],
  };
  let run = run(
    vec![
      Step::Frame,
      Step::BadFrame,
      Step::Frame,
      Step::Miss,
      Step::Frame,
      Step::Frame,
    ],
    vec![
      Outcome::Predict(s1_prediction()),
      Outcome::Fail,
      Outcome::Predict(broken),
      Outcome::Predict(rejected_prediction()),
    ],
  )
  .await;

  assert_eq!(run.report.frames, 5);
  assert_eq!(run.report.published, 2);
  assert_eq!(run.report.failed, 3);
  // 预处理失败的帧只分配了图像本身
  assert_eq!(run.allocated, 3 + 1 + 3 + 3 + 3);
  assert_eq!(run.released, run.allocated);
}

#[tokio::test]
async fn null_frames_publish_nothing_and_allocate_nothing() {
  const K: usize = 25;
  let run = run(
    (0..K).map(|_| Step::Miss).collect(),
    vec![Outcome::Predict(s1_prediction())],
  )
  .await;

  assert_eq!(run.report.misses, K as u64 + 1);
  assert_eq!(run.report.frames, 0);
  assert_eq!(run.sink.publications(), 0);
  assert_eq!(run.allocated, 0);
  assert!(run.seen.iter().all(|&frame| frame == 0));
}

#[tokio::test]
async fn reference_boxes_coexist_with_empty_live_batch() {
  let run = run(vec![Step::Frame], vec![Outcome::Predict(rejected_prediction())]).await;
  let reader = run.sink.subscribe();
  assert!(reader.latest().is_empty());

  let boxes = overlay::compose(&reader, tianyan::model::DISPLAY_THRESHOLD);
  assert_eq!(boxes.len(), 2);
  assert!(boxes.iter().all(|b| b.color == BoxColor::Blue));
  let rects = boxes
    .iter()
    .map(|b| (b.left, b.top, b.left + b.width, b.top + b.height))
    .collect::<Vec<_>>();
  assert_eq!(
    rects,
    vec![(100.0, 100.0, 200.0, 200.0), (220.0, 220.0, 300.0, 300.0)]
  );
  assert_eq!(reader.reference(), &REFERENCE_BATCH);
  assert_eq!(reader.reference()[0].class_id, 0);
  assert_eq!(reader.reference()[1].class_id, 1);
}

#[test]
fn texture_size_is_selected_by_platform() {
  for _ in 0..3 {
    let ios = CameraConfig::for_platform(Platform::Ios);
    let android = CameraConfig::for_platform(Platform::Android);
    assert_eq!((ios.camera_texture_height, ios.camera_texture_width), (1920, 1080));
    assert_eq!(
      (android.camera_texture_height, android.camera_texture_width),
      (1200, 1600)
    );
  }
}

#[cfg(feature = "read_image_file")]
#[tokio::test]
async fn image_directory_run_ends_when_images_run_out() {
  use image::{Rgb, RgbImage};
  use tianyan::{FromUrl, input::ImageFileSource};

  let dir = tempfile::tempdir().unwrap();
  RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]))
    .save(dir.path().join("a.png"))
    .unwrap();
  std::fs::write(dir.path().join("b.png"), b"not a png").unwrap();

  let config = CameraConfig {
    resize_height: SIDE as u32,
    resize_width: SIDE as u32,
    ..CameraConfig::for_platform(Platform::Ios)
  };
  let mut task = DetectionTask::new(Preprocessor::new(&config));
  let url = url::Url::parse(&format!("image://{}", dir.path().display())).unwrap();
  let source = ImageFileSource::from_url(&url)
    .unwrap()
    .with_config(&config)
    .with_stop(task.stop_handle());
  assert_eq!(source.len(), 2);

  let mut sink = DetectionSink::new();
  let report = tokio::time::timeout(
    std::time::Duration::from_secs(3),
    task.run(
      source,
      model_channel(vec![Outcome::Predict(s1_prediction())]),
      &mut sink,
    ),
  )
  .await
  .expect("任务应在图像读完后结束")
  .unwrap();

  assert_eq!(report.frames, 1);
  assert_eq!(report.published, 1);
  // 坏图与读完各算一次空帧
  assert_eq!(report.misses, 2);
  assert_eq!(sink.publications(), 1);
  assert_eq!(task.state(), PipelineState::Stopped);
}
