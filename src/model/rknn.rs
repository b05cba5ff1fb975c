// 该文件是 Lubiao （路标） 项目的一部分。
// src/model/rknn.rs - RKNN 模型（Rockchip NPU 推理）
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::{
    ClassNameTable, DetectParams, DetectResult, Model, ModelError,
    yolov8::{self, HeadLayout, YOLOV8_INPUT_SIZE, anchors_for},
  },
};

const RKNN_NUM_INPUTS: u32 = 1;
const RKNN_NUM_OUTPUTS: u32 = 1;

pub struct RknnYolo {
  context: Context,
  labels: ClassNameTable,
  params: DetectParams,
}

impl From<rknpu::Error> for ModelError {
  fn from(err: rknpu::Error) -> Self {
    ModelError::InferenceError(format!("RKNN 错误: {}", err))
  }
}

pub struct RknnYoloBuilder {
  model_path: String,
  flags: InitFlags,
  labels: ClassNameTable,
  params: DetectParams,
}

impl FromUrlWithScheme for RknnYoloBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnYoloBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(RknnYoloBuilder {
      model_path: url.path().to_string(),
      flags: InitFlags::default(),
      labels: ClassNameTable::traffic_signs(),
      params: DetectParams::default(),
    })
  }
}

impl RknnYoloBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn labels(mut self, labels: ClassNameTable) -> Self {
    self.labels = labels;
    self
  }

  pub fn params(mut self, params: DetectParams) -> Self {
    self.params = params;
    self
  }

  pub fn build(self) -> Result<RknnYolo, ModelError> {
    info!("加载模型文件: {}", self.model_path);
    let mode_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      mode_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&mode_data, self.flags)
      .map_err(|e| ModelError::ModelInvalid(format!("无法创建推理上下文: {}", e)))?;

    let num_inputs = context
      .num_inputs()
      .map_err(|e| ModelError::ModelInvalid(format!("无法获取输入数量: {}", e)))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| ModelError::ModelInvalid(format!("无法获取输出数量: {}", e)))?;

    if num_inputs != RKNN_NUM_INPUTS || num_outputs != RKNN_NUM_OUTPUTS {
      error!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        RKNN_NUM_INPUTS, RKNN_NUM_OUTPUTS, num_inputs, num_outputs
      );
      return Err(ModelError::ModelInvalid(format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        RKNN_NUM_INPUTS, RKNN_NUM_OUTPUTS, num_inputs, num_outputs
      )));
    }
    info!("模型加载完成");

    Ok(RknnYolo {
      context,
      labels: self.labels,
      params: self.params,
    })
  }
}

impl Model for RknnYolo {
  type Input = RgbFrame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (canvas, letterbox) = input.letterbox(YOLOV8_INPUT_SIZE);

    debug!("设置模型输入");
    self
      .context
      .set_input(0, canvas.as_raw(), TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    self.context.run()?;

    let output = self.context.get_outputs()?;
    let data = output.get_f32(0)?;

    let layout = HeadLayout::from_len(data.len(), anchors_for(YOLOV8_INPUT_SIZE))
      .ok_or_else(|| ModelError::InferenceError(format!("无法识别输出长度 {}", data.len())))?;
    if layout.num_classes() != self.labels.len() {
      warn!(
        "模型类别数 {} 与类别表 {} 不一致",
        layout.num_classes(),
        self.labels.len()
      );
    }

    let items = yolov8::decode(data, layout, &letterbox, &self.params);
    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult::from(items))
  }

  fn labels(&self) -> &ClassNameTable {
    &self.labels
  }
}
