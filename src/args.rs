// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::time::Duration;

use clap::Parser;
use url::Url;

use lispa::{
  advisory::{
    DEFAULT_APP_NAME, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL, DEFAULT_SESSION_ID,
    DEFAULT_USER_ID, GeminiConfig, SessionKey, default_instruction,
  },
  fusion::ConfidenceThreshold,
  pipeline::PipelineConfig,
  summary::{DEFAULT_CROP, PromptTemplate},
};

/// Lispa 叶片病虫害识别与农艺建议
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型，可重复指定，按顺序注册
  /// 例如 onnx:models/agro.onnx?name=Praga&labels=models/agro.toml
  #[arg(
    long = "detector",
    value_name = "MODEL",
    default_values = ["onnx:agro.onnx?name=Praga", "onnx:tesla.onnx?name=Doen%C3%A7a"]
  )]
  pub detectors: Vec<Url>,

  /// 输入图像，可重复指定；支持 image:<路径> 或直接给出路径
  #[arg(long = "input", value_name = "SOURCE", required = true)]
  pub inputs: Vec<String>,

  /// 输出：image:<路径.png> 或 folder:<目录>
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = ConfidenceThreshold::default(), value_name = "THRESHOLD")]
  pub threshold: ConfidenceThreshold,

  /// Gemini 模型名称
  #[arg(long, default_value = DEFAULT_GEMINI_MODEL, value_name = "MODEL")]
  pub model: String,

  /// Gemini API 地址
  #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_GEMINI_BASE_URL, value_name = "URL")]
  pub base_url: String,

  /// Gemini API 密钥
  #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true, value_name = "KEY")]
  pub api_key: String,

  /// 采样温度
  #[arg(long, value_name = "TEMPERATURE")]
  pub temperature: Option<f32>,

  #[arg(long, default_value = DEFAULT_APP_NAME)]
  pub app_name: String,

  #[arg(long, env = "LISPA_USER_ID", default_value = DEFAULT_USER_ID)]
  pub user_id: String,

  #[arg(long, env = "LISPA_SESSION_ID", default_value = DEFAULT_SESSION_ID)]
  pub session_id: String,

  /// 会话存储：memory: 或 folder:<目录>
  #[arg(long, default_value = "memory:", value_name = "STORE")]
  pub sessions: Url,

  /// 单个检测器的超时时间（秒）
  #[arg(long, default_value_t = 30, value_name = "SECONDS")]
  pub detector_timeout: u64,

  /// 建议调用的超时时间（秒）
  #[arg(long, default_value_t = 120, value_name = "SECONDS")]
  pub advisory_timeout: u64,

  /// 建议中治疗方案的最大数量
  #[arg(long, default_value_t = 3, value_name = "COUNT")]
  pub max_treatments: usize,

  /// 作物名称
  #[arg(long, default_value = DEFAULT_CROP)]
  pub crop: String,

  /// 最多处理的图像数量，0 表示全部
  #[arg(long, default_value_t = 0, value_name = "COUNT")]
  pub max_images: usize,
}

impl Args {
  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig {
      threshold: self.threshold,
      detector_timeout: Duration::from_secs(self.detector_timeout),
      advisory_timeout: Duration::from_secs(self.advisory_timeout),
      prompt: PromptTemplate {
        crop: self.crop.clone(),
        max_treatments: self.max_treatments,
      },
      session: SessionKey::new(&self.app_name, &self.user_id, &self.session_id),
    }
  }

  pub fn gemini_config(&self) -> GeminiConfig {
    GeminiConfig {
      model: self.model.clone(),
      base_url: self.base_url.clone(),
      api_key: self.api_key.clone(),
      temperature: self.temperature,
      instruction: default_instruction(&self.crop, self.max_treatments),
    }
  }

  pub fn image_limit(&self) -> Option<usize> {
    (self.max_images > 0).then_some(self.max_images)
  }
}
