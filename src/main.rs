// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lispa::{
  FromUrl,
  advisory::{GeminiAgent, session_service_from_url},
  fusion::AggregatedFindings,
  history::MessageHistory,
  input::{InputWrapper, input_url},
  model::DetectorRegistry,
  output::OutputWrapper,
  pipeline::{AnalysisOutcome, Pipeline, PipelineError},
  task::{Interaction, SequenceTask, Task},
};

fn init_tracing() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();
}

fn print_detector_status(registry: &DetectorRegistry) {
  println!("🌱 LISPA - Sistema Inteligente");
  println!("==============================");
  for detector in registry.detectors() {
    println!("✅ Modelo {} carregado com sucesso.", detector.name());
  }
  for failure in registry.unavailable() {
    println!("❌ Erro ao carregar o modelo {}: {}", failure.name(), failure);
  }
  println!();
}

fn print_findings_table(findings: &AggregatedFindings) {
  let rows: Vec<[String; 3]> = findings
    .iter()
    .map(|f| {
      [
        f.origin().unwrap_or("-").to_string(),
        f.label().to_string(),
        f.confidence().to_string(),
      ]
    })
    .collect();
  let header = ["Origem", "Nome", "Confiança"];
  let mut widths = header.map(|h| h.chars().count());
  for row in &rows {
    for (width, cell) in widths.iter_mut().zip(row) {
      *width = (*width).max(cell.chars().count());
    }
  }

  let line = |cells: [&str; 3]| {
    cells
      .iter()
      .zip(widths)
      .map(|(cell, width)| format!("{}{}", cell, " ".repeat(width - cell.chars().count())))
      .collect::<Vec<_>>()
      .join(" | ")
  };
  println!("{}", line(header));
  println!("{}", widths.map(|w| "-".repeat(w)).join("-+-"));
  for row in &rows {
    println!("{}", line([row[0].as_str(), row[1].as_str(), row[2].as_str()]));
  }
}

fn print_interaction(interaction: &Interaction) {
  println!("📷 {}", interaction.source);
  match &interaction.result {
    Err(e) => println!("❌ Um erro ocorreu durante a análise: {}", e),
    Ok(analysis) => {
      for failure in &analysis.failures {
        println!("⚠️ {}", failure);
      }
      if analysis.findings.is_empty() {
        println!("⚠️ Nenhuma doença ou praga detectada nesta imagem pelos modelos.");
      } else {
        println!("✅ Detecções (Pragas e/ou Doenças) realizadas com sucesso!");
        print_findings_table(&analysis.findings);
      }
      match &analysis.outcome {
        AnalysisOutcome::NoActionableFindings => println!(
          "O Agente LISPA não fará recomendações neste momento, pois a imagem parece saudável \
           ou sem detecções claras."
        ),
        AnalysisOutcome::Advised { recommendation, .. } => {
          println!();
          println!("🤖 Recomendações do Agente LISPA:");
          println!("{}", recommendation);
        }
      }
    }
  }
  println!();
}

#[tokio::main]
async fn main() -> Result<()> {
  // .env 不存在时忽略
  let _ = dotenvy::dotenv();
  init_tracing();

  let args = args::Args::parse();
  info!("检测模型: {:?}", args.detectors.iter().map(|u| u.as_str()).collect::<Vec<_>>());
  info!("会话存储: {}", args.sessions);

  let detector_urls = args.detectors.clone();
  let registry = tokio::task::spawn_blocking(move || DetectorRegistry::load(&detector_urls))
    .await
    .context("加载检测模型失败")?;
  print_detector_status(&registry);
  if registry.is_empty() {
    println!("❌ Análise indisponível: nenhum modelo de detecção foi carregado.");
    return Err(PipelineError::AnalysisUnavailable.into());
  }

  let agent = Arc::new(GeminiAgent::new(args.gemini_config()).context("初始化建议代理失败")?);
  let sessions = session_service_from_url(&args.sessions).context("初始化会话存储失败")?;
  let pipeline = Pipeline::new(registry, agent, sessions, args.pipeline_config())?;

  let output = args
    .output
    .as_ref()
    .map(OutputWrapper::from_url)
    .transpose()
    .context("创建输出失败")?;

  let frames = args
    .inputs
    .iter()
    .filter_map(|arg| {
      match input_url(arg).and_then(|url| InputWrapper::from_url(&url)) {
        Ok(input) => Some(input),
        Err(e) => {
          error!("无法打开输入 {}: {}", arg, e);
          println!("❌ Erro ao abrir a imagem {}: {}", arg, e);
          None
        }
      }
    })
    .flatten();

  let mut history = MessageHistory::new();
  let interactions = SequenceTask::default()
    .with_limit(args.image_limit())
    .run_task(frames, &pipeline, &output, &mut history)
    .await?;

  for interaction in &interactions {
    print_interaction(interaction);
  }
  info!("消息记录共 {} 条", history.len());

  if !interactions.is_empty() && interactions.iter().all(|i| i.result.is_err()) {
    anyhow::bail!("所有分析均失败");
  }
  Ok(())
}
