// 该文件是 Lubiao （路标） 项目的一部分。
// src/model/onnx.rs - ONNX 模型（tract 推理）
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

use std::path::PathBuf;

use tract_onnx::prelude::*;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::{
    ClassNameTable, DetectParams, DetectResult, Model, ModelError,
    yolov8::{self, HeadLayout, YOLOV8_INPUT_SIZE},
  },
};

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

pub struct OnnxYolo {
  plan: OnnxPlan,
  input_size: u32,
  labels: ClassNameTable,
  params: DetectParams,
}

pub struct OnnxYoloBuilder {
  model_path: PathBuf,
  input_size: u32,
  labels: ClassNameTable,
  params: DetectParams,
}

impl FromUrlWithScheme for OnnxYoloBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxYoloBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    // 输入边长必须是 32（最大下采样步长）的正整数倍
    let input_size = match url.query_pairs().find(|(k, _)| k == "imgsz") {
      None => YOLOV8_INPUT_SIZE,
      Some((_, v)) => v
        .parse::<u32>()
        .ok()
        .filter(|size| *size > 0 && size % 32 == 0)
        .ok_or_else(|| ModelError::ModelPathError(format!("imgsz 必须是 32 的正整数倍: {}", v)))?,
    };

    Ok(OnnxYoloBuilder {
      model_path: PathBuf::from(url.path()),
      input_size,
      labels: ClassNameTable::traffic_signs(),
      params: DetectParams::default(),
    })
  }
}

impl OnnxYoloBuilder {
  pub fn labels(mut self, labels: ClassNameTable) -> Self {
    self.labels = labels;
    self
  }

  pub fn params(mut self, params: DetectParams) -> Self {
    self.params = params;
    self
  }

  pub fn build(self) -> Result<OnnxYolo, ModelError> {
    info!("加载模型文件: {}", self.model_path.display());
    if !self.model_path.is_file() {
      return Err(ModelError::ModelLoadError(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("模型文件不存在: {}", self.model_path.display()),
      )));
    }

    let size = self.input_size as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .map_err(|e| ModelError::ModelInvalid(format!("无法解析 ONNX 模型: {}", e)))?
      .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)))
      .map_err(|e| ModelError::ModelInvalid(format!("无法设置输入形状: {}", e)))?
      .into_optimized()
      .map_err(|e| ModelError::ModelInvalid(format!("无法优化模型: {}", e)))?
      .into_runnable()
      .map_err(|e| ModelError::ModelInvalid(format!("无法创建推理计划: {}", e)))?;
    info!("模型加载完成");

    if let Ok(fact) = plan.model().output_fact(0)
      && let Some(shape) = fact.shape.as_concrete()
    {
      debug!("模型输出形状: {:?}", shape);
      match HeadLayout::from_shape(shape) {
        Some(layout) if layout.num_classes() != self.labels.len() => warn!(
          "模型类别数 {} 与类别表 {} 不一致",
          layout.num_classes(),
          self.labels.len()
        ),
        Some(_) => {}
        None => {
          return Err(ModelError::ModelInvalid(format!(
            "不是 YOLOv8 检测头输出: {:?}",
            shape
          )));
        }
      }
    }

    Ok(OnnxYolo {
      plan,
      input_size: self.input_size,
      labels: self.labels,
      params: self.params,
    })
  }
}

impl Model for OnnxYolo {
  type Input = RgbFrame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (canvas, letterbox) = input.letterbox(self.input_size);
    let size = self.input_size as usize;

    // HWC u8 -> NCHW f32 [0, 1]
    let tensor: Tensor =
      tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
      })
      .into();

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| ModelError::InferenceError(e.to_string()))?;

    let output = outputs
      .first()
      .ok_or_else(|| ModelError::InferenceError("模型没有输出".to_string()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(|e| ModelError::InferenceError(e.to_string()))?;
    let layout = HeadLayout::from_shape(view.shape())
      .ok_or_else(|| ModelError::InferenceError(format!("无法识别输出形状 {:?}", view.shape())))?;

    let data: Vec<f32> = view.iter().copied().collect();
    let items = yolov8::decode(&data, layout, &letterbox, &self.params);
    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult::from(items))
  }

  fn labels(&self) -> &ClassNameTable {
    &self.labels
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn builder(url: &str) -> Result<OnnxYoloBuilder, ModelError> {
    OnnxYoloBuilder::from_url(&Url::parse(url).unwrap())
  }

  #[test]
  fn input_size_defaults_without_query() {
    let builder = builder("onnx:///models/best.onnx").unwrap();
    assert_eq!(builder.input_size, YOLOV8_INPUT_SIZE);
    assert_eq!(builder.model_path, PathBuf::from("/models/best.onnx"));
  }

  #[test]
  fn input_size_must_be_positive_stride_multiple() {
    for bad in ["0", "100", "-32", "big"] {
      let result = builder(&format!("onnx:///m.onnx?imgsz={}", bad));
      assert!(matches!(result, Err(ModelError::ModelPathError(_))), "imgsz={}", bad);
    }
    assert_eq!(builder("onnx:///m.onnx?imgsz=320").unwrap().input_size, 320);
  }

  #[test]
  fn other_schemes_are_rejected() {
    assert!(matches!(builder("rknn:///m.rknn"), Err(ModelError::ModelPathError(_))));
  }
}
