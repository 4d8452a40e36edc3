// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/advisory/gemini.rs - Gemini generateContent 代理
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

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
  advisory::{
    AdvisoryError, AgentEvent, Content,
    agent::{Agent, EventStream, default_instruction},
  },
  summary::{DEFAULT_CROP, DEFAULT_MAX_TREATMENTS},
};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_AGENT_NAME: &str = "lispa";

const FINISH_REASON_STOP: &str = "STOP";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
  pub model: String,
  pub base_url: String,
  pub api_key: String,
  pub temperature: Option<f32>,
  pub instruction: String,
}

impl Default for GeminiConfig {
  fn default() -> Self {
    Self {
      model: DEFAULT_GEMINI_MODEL.to_string(),
      base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
      api_key: String::new(),
      temperature: None,
      instruction: default_instruction(DEFAULT_CROP, DEFAULT_MAX_TREATMENTS),
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
  #[serde(default)]
  candidates: Vec<ResponseCandidate>,
  prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseCandidate {
  content: Option<ResponseContent>,
  finish_reason: Option<String>,
  grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
  #[serde(default)]
  parts: Vec<ResponsePart>,
}

// 非文本片段（例如函数调用）只保留空文本
#[derive(Debug, Deserialize)]
struct ResponsePart {
  text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
  #[serde(default)]
  web_search_queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
  block_reason: Option<String>,
}

pub struct GeminiAgent {
  name: String,
  client: Client,
  config: GeminiConfig,
}

impl GeminiAgent {
  pub fn new(config: GeminiConfig) -> Result<Self, AdvisoryError> {
    if config.api_key.trim().is_empty() {
      return Err(AdvisoryError::MissingApiKey);
    }
    info!("初始化 Gemini 代理, 模型: {}", config.model);
    Ok(Self {
      name: DEFAULT_AGENT_NAME.to_string(),
      client: Client::new(),
      config,
    })
  }

  fn endpoint(&self) -> String {
    format!(
      "{}/v1beta/models/{}:generateContent",
      self.config.base_url.trim_end_matches('/'),
      urlencoding::encode(&self.config.model)
    )
  }

  fn request_body(&self, history: &[Content], message: &Content) -> serde_json::Value {
    let contents: Vec<&Content> = history.iter().chain(std::iter::once(message)).collect();
    let mut body = json!({
      "system_instruction": { "parts": [{ "text": self.config.instruction }] },
      "contents": contents,
      "tools": [{ "google_search": {} }],
    });
    if let Some(temperature) = self.config.temperature {
      body["generationConfig"] = json!({ "temperature": temperature.clamp(0.0, 2.0) });
    }
    body
  }

  fn events_from_response(&self, response: GenerateContentResponse) -> Vec<AgentEvent> {
    let mut events = Vec::new();

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
      warn!("Gemini 拒绝了请求: {}", reason);
      events.push(AgentEvent::escalation(
        &self.name,
        Some(format!("Solicitação bloqueada ({})", reason)),
      ));
      return events;
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
      debug!("Gemini 响应中没有候选结果");
      return events;
    };

    if let Some(grounding) = candidate.grounding_metadata
      && !grounding.web_search_queries.is_empty()
    {
      events.push(AgentEvent::partial(
        &self.name,
        Content::model(format!(
          "google_search: {}",
          grounding.web_search_queries.join("; ")
        )),
      ));
    }

    let text: String = candidate
      .content
      .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
      .unwrap_or_default();

    if !text.trim().is_empty() {
      events.push(AgentEvent::final_text(&self.name, text));
    } else if let Some(reason) = candidate.finish_reason
      && reason != FINISH_REASON_STOP
    {
      events.push(AgentEvent::escalation(
        &self.name,
        Some(format!("Resposta interrompida ({})", reason)),
      ));
    }

    events
  }
}

#[async_trait]
impl Agent for GeminiAgent {
  fn name(&self) -> &str {
    &self.name
  }

  async fn run(&self, history: &[Content], message: &Content) -> Result<EventStream, AdvisoryError> {
    let body = self.request_body(history, message);
    debug!("发送 Gemini 请求, 历史消息 {} 条", history.len());

    let response = self
      .client
      .post(self.endpoint())
      .header("x-goog-api-key", &self.config.api_key)
      .json(&body)
      .send()
      .await?;

    let status = response.status();
    let text = response.text().await?;
    match status {
      s if s.is_success() => {}
      StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
        return Err(AdvisoryError::Authentication(text));
      }
      StatusCode::TOO_MANY_REQUESTS => return Err(AdvisoryError::RateLimited(text)),
      s => {
        return Err(AdvisoryError::Status {
          status: s.as_u16(),
          body: text,
        });
      }
    }

    let parsed: GenerateContentResponse = serde_json::from_str(&text)?;
    let events = self.events_from_response(parsed);
    Ok(stream::iter(events.into_iter().map(Ok)).boxed())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn agent() -> GeminiAgent {
    GeminiAgent::new(GeminiConfig {
      api_key: "test-key".to_string(),
      ..GeminiConfig::default()
    })
    .unwrap()
  }

  fn events(json: &str) -> Vec<AgentEvent> {
    agent().events_from_response(serde_json::from_str(json).unwrap())
  }

  #[test]
  fn missing_key_is_rejected() {
    assert!(matches!(
      GeminiAgent::new(GeminiConfig::default()),
      Err(AdvisoryError::MissingApiKey)
    ));
  }

  #[test]
  fn model_name_is_encoded_in_endpoint() {
    let agent = GeminiAgent::new(GeminiConfig {
      api_key: "k".to_string(),
      model: "gemini 2.5".to_string(),
      base_url: "http://localhost:1234/".to_string(),
      ..GeminiConfig::default()
    })
    .unwrap();
    assert_eq!(
      agent.endpoint(),
      "http://localhost:1234/v1beta/models/gemini%202.5:generateContent"
    );
  }

  #[test]
  fn request_body_carries_history_and_search_tool() {
    let body = agent().request_body(&[Content::user("a"), Content::model("b")], &Content::user("c"));
    assert_eq!(body["contents"].as_array().unwrap().len(), 3);
    assert_eq!(body["contents"][2]["parts"][0]["text"], "c");
    assert!(body["tools"][0].get("google_search").is_some());
    assert!(body.get("generationConfig").is_none());
  }

  #[test]
  fn grounded_answer_yields_tool_then_final_event() {
    let events = events(
      r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Use "},{"text":"cobre."}]},
          "finishReason":"STOP",
          "groundingMetadata":{"webSearchQueries":["requeima tomate tratamento"]}}]}"#,
    );
    assert_eq!(events.len(), 2);
    assert!(!events[0].is_final_response());
    assert!(events[1].is_final_response());
    assert_eq!(
      events[1].content.as_ref().and_then(Content::text).as_deref(),
      Some("Use cobre.")
    );
  }

  #[test]
  fn safety_stop_becomes_escalation() {
    let events = events(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#);
    assert_eq!(events.len(), 1);
    assert!(events[0].actions.escalate);
    assert!(events[0].error_message.as_deref().unwrap().contains("SAFETY"));
  }

  #[test]
  fn blocked_prompt_becomes_escalation() {
    let events = events(r#"{"promptFeedback":{"blockReason":"OTHER"}}"#);
    assert!(events[0].actions.escalate);
  }

  #[test]
  fn empty_response_has_no_final_event() {
    assert!(events(r#"{"candidates":[]}"#).is_empty());
    assert!(events(r#"{"candidates":[{"finishReason":"STOP"}]}"#).is_empty());
  }
}
