// 该文件是 Lubiao （路标） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, frame::RgbFrame};

mod labels;
pub mod yolov8;

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_rknn")]
mod rknn;

pub use self::labels::{ClassNameTable, LabelError, UNKNOWN_LABEL};
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxYolo, OnnxYoloBuilder};
#[cfg(feature = "model_rknn")]
pub use self::rknn::{RknnYolo, RknnYoloBuilder};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;

  /// 模型自带的类别名称表，加载后不再变化
  fn labels(&self) -> &ClassNameTable;

  /// 将类别编号解析为可读名称
  fn resolve(&self, class_id: u32) -> &str {
    self.labels().resolve(class_id)
  }
}

impl<M: Model + ?Sized> Model for &M {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }

  fn labels(&self) -> &ClassNameTable {
    (**self).labels()
  }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    DetectResult {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("推理错误: {0}")]
  InferenceError(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("类别表错误: {0}")]
  LabelError(#[from] LabelError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 后处理参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
  pub confidence: f32,
  pub iou: f32,
  pub max_detections: usize,
}

impl Default for DetectParams {
  fn default() -> Self {
    DetectParams {
      confidence: 0.25,
      iou: 0.45,
      max_detections: 300,
    }
  }
}

pub enum ModelWrapper {
  #[cfg(feature = "model_onnx")]
  Onnx(OnnxYolo),
  #[cfg(feature = "model_rknn")]
  Rknn(RknnYolo),
}

impl ModelWrapper {
  /// 根据 URL 方案选择后端并加载模型
  pub fn load(
    url: &Url,
    labels: ClassNameTable,
    params: DetectParams,
  ) -> Result<Self, ModelError> {
    #[cfg(feature = "model_onnx")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == OnnxYoloBuilder::SCHEME {
        let model = OnnxYoloBuilder::from_url(url)?
          .labels(labels)
          .params(params)
          .build()?;
        return Ok(ModelWrapper::Onnx(model));
      }
    }
    #[cfg(feature = "model_rknn")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == RknnYoloBuilder::SCHEME {
        let model = RknnYoloBuilder::from_url(url)?
          .labels(labels)
          .params(params)
          .build()?;
        return Ok(ModelWrapper::Rknn(model));
      }
    }
    let _ = (labels, params);
    Err(ModelError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Model for ModelWrapper {
  type Input = RgbFrame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(model) => model.infer(input),
      #[cfg(feature = "model_rknn")]
      ModelWrapper::Rknn(model) => model.infer(input),
      #[allow(unreachable_patterns)]
      _ => {
        let _ = input;
        Err(ModelError::ModelInvalid("没有可用的推理后端".to_string()))
      }
    }
  }

  fn labels(&self) -> &ClassNameTable {
    match self {
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(model) => model.labels(),
      #[cfg(feature = "model_rknn")]
      ModelWrapper::Rknn(model) => model.labels(),
      #[allow(unreachable_patterns)]
      _ => ClassNameTable::empty(),
    }
  }
}
