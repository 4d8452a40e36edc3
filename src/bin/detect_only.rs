// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/bin/detect_only.rs - 仅运行检测与融合，不调用建议代理
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use lispa::{
  FromUrl,
  fusion::{ConfidenceThreshold, aggregate, filter},
  input::{InputWrapper, input_url},
  model::DetectorRegistry,
  pipeline::detect_all,
  summary::summarize,
};

/// 对图像运行全部检测模型并输出证据摘要
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型，可重复指定
  #[arg(long = "detector", value_name = "MODEL", required = true)]
  pub detectors: Vec<Url>,
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  pub input: String,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = ConfidenceThreshold::default(), value_name = "THRESHOLD")]
  pub threshold: ConfidenceThreshold,
  /// 单个检测器的超时时间（秒）
  #[arg(long, default_value_t = 30, value_name = "SECONDS")]
  pub detector_timeout: u64,
  /// 以 JSON 输出全部检测结果
  #[arg(long)]
  pub json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("输入来源: {}", args.input);

  let registry = DetectorRegistry::load(&args.detectors);
  anyhow::ensure!(!registry.is_empty(), "分析不可用: 没有成功加载的检测模型");

  let url = input_url(&args.input)?;
  let frame = InputWrapper::from_url(&url)?
    .next()
    .context("没有输入图像")?;

  let now = std::time::Instant::now();
  let detections = detect_all(&registry, &frame, Duration::from_secs(args.detector_timeout)).await?;
  info!("检测完成, 耗时: {:.2?}", now.elapsed());

  let findings = aggregate(detections.batches);
  let actionable = filter(&findings, args.threshold);

  if args.json {
    println!("{}", serde_json::to_string_pretty(&findings)?);
    return Ok(());
  }

  for line in summarize(&findings).lines() {
    println!("{}", line);
  }
  println!(
    "{} / {} resultados com confiança >= {}",
    actionable.len(),
    findings.len(),
    args.threshold
  );
  Ok(())
}
