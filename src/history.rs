// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/history.rs - 进程内消息记录
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

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::advisory::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
  pub role: Role,
  pub content: String,
  pub at: DateTime<Utc>,
}

/// 只追加的消息记录，按时间顺序
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct MessageHistory {
  messages: Vec<ChatMessage>,
}

impl MessageHistory {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, role: Role, content: impl Into<String>) {
    self.messages.push(ChatMessage {
      role,
      content: content.into(),
      at: Utc::now(),
    });
  }

  pub fn messages(&self) -> &[ChatMessage] {
    &self.messages
  }

  pub fn len(&self) -> usize {
    self.messages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.messages.is_empty()
  }
}
