// 该文件是 Lispa （叶片病虫害识别） 项目的一部分。
// src/advisory/agent.rs - 建议代理接口
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
use futures_util::stream::BoxStream;

use crate::advisory::{AdvisoryError, AgentEvent, Content};

pub type EventStream = BoxStream<'static, Result<AgentEvent, AdvisoryError>>;

/// 默认的代理指令
pub fn default_instruction(crop: &str, max_treatments: usize) -> String {
  format!(
    "Você é um **assistente inteligente de recomendação de tratamentos de pragas e doenças em \
     cultivos de {crop}**. Você é um especialista com anos de experiência no tratamento de \
     cultivos de {crop}. Sua principal função é ajudar os usuários recomendando tratamentos com \
     base nos tipos de doenças e pragas que o usuário fornecer.\n\
     Você pode usar a seguinte ferramenta:\n\
     - **google_search**: para pesquisar tratamentos de pragas e doenças de {crop}.\n\
     Seja sempre claro e objetivo, sem respostas muito longas. Quando necessário, recomende \
     marcas de produtos. Nunca saia do personagem e liste sempre **no máximo {max_treatments} \
     tratamentos**, considerando opções populares e alternativas."
  )
}

/// 对话代理
///
/// `history` 为该会话此前的消息，`message` 为本轮用户消息。
/// 返回的事件流中至多只有第一个最终事件会被使用。
#[async_trait]
pub trait Agent: Send + Sync {
  fn name(&self) -> &str;

  async fn run(&self, history: &[Content], message: &Content) -> Result<EventStream, AdvisoryError>;
}
