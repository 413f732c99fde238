//! Owl - Rust 多步推理编排引擎
//!
//! 模块划分：
//! - **agent**: 编排器 facade（构建器、run()/stream() 入口、事件订阅）
//! - **config**: 配置加载（TOML + 环境变量 OWL__*）
//! - **core**: 错误类型、响应缓存、速率限制、执行工具集
//! - **engine**: 五阶段状态机（plan/act/reflect/validate/converge）与策略化模型调用
//! - **events**: 过程事件总线（发布/订阅）
//! - **llm**: 模型客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 按 run 分键的对话记忆
//! - **tools**: 工具箱（Tool trait、注册表、参数校验）

pub mod agent;
pub mod config;
pub mod core;
pub mod engine;
pub mod events;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;

pub use crate::agent::{Orchestrator, OrchestratorBuilder, RunOptions, RunStream, StreamItem};
pub use crate::config::{load_config, OrchestratorConfig};
pub use crate::core::{OrchestratorError, Result};
pub use crate::engine::{Phase, RunMeta, RunOutcome, TaskInput};
pub use crate::events::{Event, EventBus, EventKind, Subscription};
pub use crate::llm::{MockModel, ModelClient, OpenAiClient};
pub use crate::memory::{MemoryAdapter, Message, Role, VolatileMemory};
pub use crate::tools::{EchoTool, Tool, ToolDecl, ToolRegistry};
