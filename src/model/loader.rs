// 该文件是 Tianyan （天眼） 项目的一部分。
// src/model/loader.rs - 模型资源加载
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

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{InputTensor, Tensor},
  model::Model,
  url_to_path,
};

pub const MODEL_DESCRIPTOR: &str = "model.json";
pub const WEIGHT_SHARD_COUNT: usize = 12;

/// 第 `index` 个权重分片的文件名，从 1 开始
pub fn shard_file_name(index: usize) -> String {
  format!("group1-shard{}of{}.bin", index, WEIGHT_SHARD_COUNT)
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("模型资源缺失: {0}")]
  AssetMissing(PathBuf),
  #[error("读取模型资源 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("模型描述文件无效: {0}")]
  Descriptor(#[from] serde_json::Error),
  #[error("模型描述与权重分片不一致: {0}")]
  ManifestMismatch(String),
  #[error("不支持的权重类型: {0}")]
  UnsupportedDtype(String),
  #[error("权重大小不匹配: 描述文件需要 {expected} 字节, 分片共 {actual} 字节")]
  WeightSizeMismatch { expected: usize, actual: usize },
  #[error("推理运行时尚未初始化")]
  RuntimeNotReady,
  #[error("推理运行时无法创建模型: {0}")]
  Runtime(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// `model.json` 中本程序关心的部分
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
  #[serde(default)]
  pub format: Option<String>,
  #[serde(default)]
  pub generated_by: Option<String>,
  #[serde(default)]
  pub model_topology: serde_json::Value,
  pub weights_manifest: Vec<WeightGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeightGroup {
  pub paths: Vec<String>,
  pub weights: Vec<WeightSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeightSpec {
  pub name: String,
  pub shape: Vec<usize>,
  pub dtype: String,
  #[serde(default)]
  pub quantization: Option<Quantization>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Quantization {
  pub dtype: String,
}

fn dtype_size(dtype: &str) -> Result<usize, ModelLoadError> {
  match dtype {
    "float32" | "int32" => Ok(4),
    "float16" | "uint16" => Ok(2),
    "bool" | "uint8" => Ok(1),
    "complex64" => Ok(8),
    other => Err(ModelLoadError::UnsupportedDtype(other.to_string())),
  }
}

impl WeightSpec {
  /// 该权重在分片中占用的字节数，量化权重按量化类型计算
  pub fn byte_len(&self) -> Result<usize, ModelLoadError> {
    let dtype = self
      .quantization
      .as_ref()
      .map(|q| q.dtype.as_str())
      .unwrap_or(self.dtype.as_str());
    let size = dtype_size(dtype)?;
    self
      .shape
      .iter()
      .try_fold(size, |acc, &dim| acc.checked_mul(dim))
      .ok_or_else(|| {
        ModelLoadError::ManifestMismatch(format!(
          "权重 {} 的形状 {:?} 超出范围",
          self.name, self.shape
        ))
      })
  }
}

/// 校验通过的模型资源：描述文件与按顺序拼接的权重
#[derive(Debug, Clone)]
pub struct ModelBundle {
  pub descriptor: ModelDescriptor,
  pub weights: Vec<u8>,
}

impl ModelBundle {
  pub fn info(&self) -> BundleInfo {
    BundleInfo {
      format: self.descriptor.format.clone(),
      weight_count: self
        .descriptor
        .weights_manifest
        .iter()
        .map(|g| g.weights.len())
        .sum(),
      weight_bytes: self.weights.len(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleInfo {
  pub format: Option<String>,
  pub weight_count: usize,
  pub weight_bytes: usize,
}

/// 推理运行时：把模型资源实例化为可执行的模型
pub trait Runtime {
  type Model: Model;
  type Error: std::error::Error + Send + Sync + 'static;

  fn is_ready(&self) -> bool;
  fn instantiate(&self, bundle: ModelBundle) -> Result<Self::Model, Self::Error>;
}

/// 已加载的检测模型，创建后不可变，整个会话期间共享
pub struct ModelHandle<M> {
  model: M,
  info: BundleInfo,
}

impl<M> ModelHandle<M> {
  pub fn new(model: M, info: BundleInfo) -> Self {
    Self { model, info }
  }

  pub fn info(&self) -> &BundleInfo {
    &self.info
  }
}

impl<M: Model> Model for ModelHandle<M> {
  type Error = M::Error;

  async fn execute(&self, input: &InputTensor) -> Result<Vec<Tensor<f32>>, Self::Error> {
    self.model.execute(input).await
  }
}

/// 从资源目录加载 `model.json` 和 12 个权重分片
pub struct ModelLoader {
  assets_dir: PathBuf,
}

impl FromUrlWithScheme for ModelLoader {
  const SCHEME: &'static str = "tfjs";
}

impl FromUrl for ModelLoader {
  type Error = ModelLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelLoadError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: url.scheme().to_string(),
      });
    }

    Ok(Self::new(url_to_path(url)))
  }
}

impl ModelLoader {
  pub fn new(assets_dir: impl Into<PathBuf>) -> Self {
    Self {
      assets_dir: assets_dir.into(),
    }
  }

  pub fn assets_dir(&self) -> &Path {
    &self.assets_dir
  }

  fn read_asset(&self, name: &str) -> Result<Vec<u8>, ModelLoadError> {
    let path = self.assets_dir.join(name);
    if !path.is_file() {
      error!("模型资源缺失: {}", path.display());
      return Err(ModelLoadError::AssetMissing(path));
    }
    std::fs::read(&path).map_err(|source| ModelLoadError::Io { path, source })
  }

  /// 读取并校验全部资源，不做部分加载
  pub fn read_bundle(&self) -> Result<ModelBundle, ModelLoadError> {
    info!("加载模型描述文件: {}", self.assets_dir.join(MODEL_DESCRIPTOR).display());
    let descriptor: ModelDescriptor = serde_json::from_slice(&self.read_asset(MODEL_DESCRIPTOR)?)?;

    let expected_paths = (1..=WEIGHT_SHARD_COUNT)
      .map(shard_file_name)
      .collect::<Vec<_>>();
    let manifest_paths = descriptor
      .weights_manifest
      .iter()
      .flat_map(|g| g.paths.iter().cloned())
      .collect::<Vec<_>>();
    if manifest_paths != expected_paths {
      return Err(ModelLoadError::ManifestMismatch(format!(
        "期望分片 {:?}, 描述文件列出 {:?}",
        expected_paths, manifest_paths
      )));
    }

    let mut weights = Vec::new();
    for name in &expected_paths {
      let shard = self.read_asset(name)?;
      debug!("权重分片 {}: {} 字节", name, shard.len());
      weights.extend_from_slice(&shard);
    }

    let mut expected = 0usize;
    for spec in descriptor.weights_manifest.iter().flat_map(|g| &g.weights) {
      expected = expected
        .checked_add(spec.byte_len()?)
        .ok_or_else(|| ModelLoadError::ManifestMismatch("权重总大小超出范围".to_string()))?;
    }
    if expected != weights.len() {
      error!(
        "权重大小不匹配: 描述文件需要 {} 字节, 分片共 {} 字节",
        expected,
        weights.len()
      );
      return Err(ModelLoadError::WeightSizeMismatch {
        expected,
        actual: weights.len(),
      });
    }

    debug!(
      "模型权重大小: {:.2} MB",
      weights.len() as f64 / (1024.0 * 1024.0)
    );
    Ok(ModelBundle { descriptor, weights })
  }

  /// 只调用一次：消费加载器，返回可共享的模型句柄
  pub fn load<R: Runtime>(self, runtime: &R) -> Result<ModelHandle<R::Model>, ModelLoadError> {
    if !runtime.is_ready() {
      error!("推理运行时尚未初始化");
      return Err(ModelLoadError::RuntimeNotReady);
    }

    let bundle = self.read_bundle()?;
    let info = bundle.info();
    let model = runtime
      .instantiate(bundle)
      .map_err(|e| ModelLoadError::Runtime(Box::new(e)))?;
    info!(
      "模型加载完成: {} 个权重, {} 字节",
      info.weight_count, info.weight_bytes
    );
    Ok(ModelHandle::new(model, info))
  }
}
