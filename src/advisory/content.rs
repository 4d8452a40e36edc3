// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/advisory/content.rs - 对话消息与代理事件
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

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  User,
  Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
  pub text: String,
}

/// 一条对话消息，字段布局与 Gemini `Content` 一致
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
  pub role: Role,
  pub parts: Vec<Part>,
}

impl Content {
  pub fn user(text: impl Into<String>) -> Self {
    Self {
      role: Role::User,
      parts: vec![Part { text: text.into() }],
    }
  }

  pub fn model(text: impl Into<String>) -> Self {
    Self {
      role: Role::Model,
      parts: vec![Part { text: text.into() }],
    }
  }

  /// 拼接全部文本片段；没有文本时返回 `None`
  pub fn text(&self) -> Option<String> {
    let text = self
      .parts
      .iter()
      .map(|p| p.text.as_str())
      .collect::<Vec<_>>()
      .join("");
    if text.trim().is_empty() { None } else { Some(text) }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventActions {
  pub escalate: bool,
}

/// 代理事件流中的一个事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEvent {
  pub author: String,
  pub content: Option<Content>,
  pub actions: EventActions,
  pub error_message: Option<String>,
  pub is_final: bool,
}

impl AgentEvent {
  /// 中间事件，例如工具调用
  pub fn partial(author: impl Into<String>, content: Content) -> Self {
    Self {
      author: author.into(),
      content: Some(content),
      actions: EventActions::default(),
      error_message: None,
      is_final: false,
    }
  }

  pub fn final_text(author: impl Into<String>, text: impl Into<String>) -> Self {
    Self {
      author: author.into(),
      content: Some(Content::model(text)),
      actions: EventActions::default(),
      error_message: None,
      is_final: true,
    }
  }

  pub fn escalation(author: impl Into<String>, message: Option<String>) -> Self {
    Self {
      author: author.into(),
      content: None,
      actions: EventActions { escalate: true },
      error_message: message,
      is_final: true,
    }
  }

  pub fn is_final_response(&self) -> bool {
    self.is_final
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn content_serializes_like_gemini() {
    let json = serde_json::to_value(Content::user("olá")).unwrap();
    assert_eq!(
      json,
      serde_json::json!({"role": "user", "parts": [{"text": "olá"}]})
    );
  }

  #[test]
  fn blank_text_is_none() {
    assert_eq!(Content::model("  ").text(), None);
    assert_eq!(Content::model("ok").text().as_deref(), Some("ok"));
  }
}
