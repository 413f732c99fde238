//! 编排器 facade：构造期装配依赖，run()/stream() 为调用入口
//!
//! Orchestrator 持有进程级资源（模型客户端、记忆、工具表、缓存、限流器、事件总线），
//! 可被并发复用；每次 run/stream 创建独立的 RunState，run 之间互不可见。

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::core::{OrchestratorError, RateLimiter, ResponseCache, Result};
use crate::engine::invoke::{ModelResponse, RunContext};
use crate::engine::loop_::{act_tools, assemble, drive, plan_phase, validate_structured};
use crate::engine::state::{RetryPolicy, RunMeta, RunOutcome, RunParams, RunState, TaskInput};
use crate::events::{Event, EventBus, EventKind, Subscription};
use crate::llm::{ModelClient, OpenAiClient};
use crate::memory::{MemoryAdapter, Message, VolatileMemory};
use crate::tools::{Tool, ToolRegistry};

/// 单次调用的可选项（未设置的项取配置值）
#[derive(Default)]
pub struct RunOptions {
    pub max_steps: Option<u32>,
    pub system_prompt: Option<String>,
    /// 外部取消令牌；未提供时该 run 不可取消
    pub cancel: Option<CancellationToken>,
    /// run() 时把本 run 的事件快照附到 meta.events；stream() 时把事件并入输出流
    pub capture_events: bool,
}

/// stream() 输出流的元素
#[derive(Debug)]
pub enum StreamItem {
    /// 最终答案的文本增量
    Delta(String),
    /// 过程事件（capture_events 开启时）
    Event(Event),
    /// 终止元素：运行元数据，之后流结束
    Done(RunMeta),
}

/// stream() 的返回类型
pub type RunStream = Pin<Box<dyn Stream<Item = Result<StreamItem>> + Send>>;

/// 编排器构建器：配置 + 可注入的模型客户端 / 记忆适配器 / 工具
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    client: Option<Arc<dyn ModelClient>>,
    memory: Option<Arc<dyn MemoryAdapter>>,
    tools: ToolRegistry,
}

impl OrchestratorBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            client: None,
            memory: None,
            tools: ToolRegistry::new(),
        }
    }

    /// 替换整份配置（构建前最后一次生效）
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// 注入模型客户端（测试注入 Mock，生产默认 OpenAI 兼容客户端）
    pub fn with_model_client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// 注入记忆适配器，默认进程内易失记忆
    pub fn with_memory(mut self, memory: Arc<dyn MemoryAdapter>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn register_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.register(tool);
        self
    }

    /// 装配编排器；配置校验与凭证检查在此同步完成
    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;

        let client = match self.client {
            Some(c) => c,
            None => Arc::new(
                OpenAiClient::new(
                    self.config.model.base_url.as_deref(),
                    &self.config.model.name,
                    self.config.model.api_key.as_deref(),
                    self.config.model.temperature,
                )
                .map_err(OrchestratorError::Config)?,
            ),
        };

        let memory: Arc<dyn MemoryAdapter> = self
            .memory
            .unwrap_or_else(|| Arc::new(VolatileMemory::new(self.config.memory.max_messages)));

        let cache = Arc::new(ResponseCache::new(
            self.config.cache.enabled,
            Duration::from_secs(self.config.cache.ttl_secs),
            self.config.cache.max_entries,
        ));
        let limiter = Arc::new(RateLimiter::new(
            self.config.rate_limit.enabled,
            self.config.rate_limit.requests_per_minute,
            self.config.rate_limit.max_concurrent,
        ));

        Ok(Orchestrator {
            config: self.config,
            client,
            memory,
            tools: Arc::new(self.tools),
            cache,
            limiter,
            bus: Arc::new(EventBus::new()),
        })
    }
}

/// 多步推理编排器
pub struct Orchestrator {
    config: OrchestratorConfig,
    client: Arc<dyn ModelClient>,
    memory: Arc<dyn MemoryAdapter>,
    tools: Arc<ToolRegistry>,
    cache: Arc<ResponseCache<ModelResponse>>,
    limiter: Arc<RateLimiter>,
    bus: Arc<EventBus>,
}

impl Orchestrator {
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// 注册事件订阅者（句柄 drop 不退订，需显式 unsubscribe）
    pub fn on_event(&self, handler: impl Fn(&Event) + Send + Sync + 'static) -> Subscription {
        self.bus.subscribe(handler)
    }

    fn resolve_params(&self, opts: &RunOptions) -> RunParams {
        RunParams {
            temperature: self.config.model.temperature,
            system_prompt: opts
                .system_prompt
                .clone()
                .unwrap_or_else(|| self.config.run.system_prompt.clone()),
            step_timeout: self
                .config
                .timeouts
                .step_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
            total_timeout: self
                .config
                .timeouts
                .total_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
            tool_timeout: Duration::from_secs(self.config.timeouts.tool_secs.max(1)),
            retry: RetryPolicy {
                max_attempts: self.config.retry.max_attempts,
                initial_delay: Duration::from_millis(self.config.retry.initial_delay_ms),
                factor: self.config.retry.factor,
                max_delay: Duration::from_millis(self.config.retry.max_delay_ms),
            },
        }
    }

    fn make_context(&self, opts: &RunOptions) -> RunContext {
        RunContext {
            client: self.client.clone(),
            memory: self.memory.clone(),
            tools: self.tools.clone(),
            cache: self.cache.clone(),
            limiter: self.limiter.clone(),
            bus: self.bus.clone(),
            cancel: opts.cancel.clone().unwrap_or_default(),
            params: self.resolve_params(opts),
        }
    }

    /// 执行完整推理循环，返回最终结果与运行元数据
    pub async fn run(&self, input: impl Into<TaskInput>, opts: RunOptions) -> Result<RunOutcome> {
        let ctx = self.make_context(&opts);
        let max_steps = opts.max_steps.unwrap_or(self.config.run.max_steps).max(1);
        let mut state = RunState::new(input.into(), max_steps);

        // 事件快照：只收本 run 的事件，订阅先于 run:start
        let captured: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let capture_sub = if opts.capture_events {
            let sink = captured.clone();
            let run_id = state.run_id.clone();
            Some(self.bus.subscribe(move |event| {
                if event.run_id == run_id {
                    sink.lock().expect("event capture lock poisoned").push(event.clone());
                }
            }))
        } else {
            None
        };

        ctx.emit(
            &state.run_id,
            EventKind::RunStart,
            json!({ "task": state.input.task, "max_steps": state.max_steps }),
        );

        let outcome = match ctx.params.total_timeout {
            Some(limit) => match tokio::time::timeout(limit, drive(&ctx, &mut state)).await {
                Ok(result) => result,
                Err(_) => Err(OrchestratorError::Timeout("total run".to_string())),
            },
            None => drive(&ctx, &mut state).await,
        };

        if state.ended_at.is_none() {
            state.ended_at = Some(chrono::Utc::now());
        }
        ctx.emit(
            &state.run_id,
            EventKind::RunEnd,
            json!({
                "ok": outcome.is_ok(),
                "steps": state.step,
                "duration_ms": state.duration_ms(),
            }),
        );

        if let Some(sub) = capture_sub {
            sub.unsubscribe();
        }
        outcome?;

        let events = if opts.capture_events {
            Some(std::mem::take(
                &mut *captured.lock().expect("event capture lock poisoned"),
            ))
        } else {
            None
        };
        let meta = RunMeta::from_state(
            &state,
            self.client.model_id(),
            self.client.token_usage(),
            events,
        );
        Ok(RunOutcome {
            text: state.final_text,
            object: state.final_object,
            meta,
        })
    }

    /// 流式执行：plan 与工具步照常，最终答案以文本增量产出
    ///
    /// 流式输出不缓存、不重试；取消只在增量边界生效，已收到的增量不回收。
    /// 声明了 schema 时没有文本增量，流只产出一个 Done；
    /// 需要拿到结构化对象时应使用 run()。
    pub fn stream(&self, input: impl Into<TaskInput>, opts: RunOptions) -> RunStream {
        let ctx = self.make_context(&opts);
        let max_steps = opts.max_steps.unwrap_or(self.config.run.max_steps).max(1);
        let mut state = RunState::new(input.into(), max_steps);
        let client = self.client.clone();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<StreamItem>>();

        // 事件并入输出流（只转发本 run 的事件）
        let forward_sub = if opts.capture_events {
            let forward = tx.clone();
            let run_id = state.run_id.clone();
            Some(self.bus.subscribe(move |event| {
                if event.run_id == run_id {
                    let _ = forward.send(Ok(StreamItem::Event(event.clone())));
                }
            }))
        } else {
            None
        };

        tokio::spawn(async move {
            ctx.emit(
                &state.run_id,
                EventKind::RunStart,
                json!({ "task": state.input.task, "max_steps": state.max_steps }),
            );

            let worker = stream_run(&ctx, &mut state, &tx);
            let outcome = match ctx.params.total_timeout {
                Some(limit) => match tokio::time::timeout(limit, worker).await {
                    Ok(result) => result,
                    Err(_) => Err(OrchestratorError::Timeout("total run".to_string())),
                },
                None => worker.await,
            };

            if state.ended_at.is_none() {
                state.ended_at = Some(chrono::Utc::now());
            }
            ctx.emit(
                &state.run_id,
                EventKind::RunEnd,
                json!({
                    "ok": outcome.is_ok(),
                    "steps": state.step,
                    "duration_ms": state.duration_ms(),
                }),
            );
            if let Some(sub) = forward_sub {
                sub.unsubscribe();
            }

            match outcome {
                Ok(()) => {
                    let meta =
                        RunMeta::from_state(&state, client.model_id(), client.token_usage(), None);
                    let _ = tx.send(Ok(StreamItem::Done(meta)));
                }
                Err(err) => {
                    let _ = tx.send(Err(err));
                }
            }
        });

        Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }
}

/// stream() 的主体：plan + 一轮工具步，然后结构化产出或流式文本产出
async fn stream_run(
    ctx: &RunContext,
    state: &mut RunState,
    tx: &tokio::sync::mpsc::UnboundedSender<Result<StreamItem>>,
) -> Result<()> {
    plan_phase(ctx, state).await?;
    act_tools(ctx, state).await?;

    if let Some(schema) = state.input.schema.clone() {
        validate_structured(ctx, state, &schema).await?;
        state.ended_at = Some(chrono::Utc::now());
        return Ok(());
    }

    let mut messages = assemble(ctx, state).await;
    messages.push(Message::user(
        "Using the conversation so far, including any tool results, produce your best \
         final answer to the task. Answer directly.",
    ));

    let mut chunks = ctx
        .client
        .complete_stream(&messages)
        .await
        .map_err(OrchestratorError::Model)?;

    let mut full = String::new();
    while let Some(chunk) = chunks.next().await {
        // 取消在增量边界生效：停止产出，已发出的增量保持不变
        if ctx.cancel.is_cancelled() {
            break;
        }
        let delta = chunk.map_err(OrchestratorError::Model)?;
        if delta.is_empty() {
            continue;
        }
        full.push_str(&delta);
        if tx.send(Ok(StreamItem::Delta(delta))).is_err() {
            // 接收端已放弃
            break;
        }
    }

    ctx.memory
        .append(&state.run_id, vec![Message::assistant(full.clone())])
        .await;
    state.valid = !full.trim().is_empty();
    state.candidate = Some(full.clone());
    state.final_text = Some(full);
    state.ended_at = Some(chrono::Utc::now());
    Ok(())
}
