//! Owl - Rust 多步推理编排引擎
//!
//! 演示入口：从命令行取任务文本，跑一轮完整推理并打印答案与运行元数据。
//! 设置 OWL_USE_MOCK=1 时使用 Mock 模型（无需 API Key）。

use std::sync::Arc;

use anyhow::Context;
use owl::{load_config, EchoTool, MockModel, Orchestrator, RunOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    owl::observability::init();

    let task: String = {
        let args: Vec<String> = std::env::args().skip(1).collect();
        if args.is_empty() {
            "Summarize what a multi-step reasoning engine does, in two sentences.".to_string()
        } else {
            args.join(" ")
        }
    };

    let config = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("config load failed, using defaults: {}", e);
        Default::default()
    });

    let mut builder = Orchestrator::builder(config).register_tool(EchoTool);
    if std::env::var("OWL_USE_MOCK").as_deref() == Ok("1") {
        builder = builder.with_model_client(Arc::new(
            MockModel::new()
                .with_completion("1. Understand the task. 2. Answer it.")
                .with_completion("A draft answer.")
                .with_completion("The draft is fine.")
                .with_completion("The final answer."),
        ));
    }
    let orchestrator = builder.build().context("Failed to build orchestrator")?;

    let outcome = orchestrator
        .run(task.as_str(), RunOptions::default())
        .await
        .context("Run failed")?;

    if let Some(text) = &outcome.text {
        println!("{}", text);
    }
    if let Some(object) = &outcome.object {
        println!("{}", serde_json::to_string_pretty(object)?);
    }
    println!(
        "\n[{} | steps={} | {}ms | tools={:?} | cache_hit={}]",
        outcome.meta.run_id,
        outcome.meta.steps,
        outcome.meta.duration_ms,
        outcome.meta.used_tools,
        outcome.meta.cache_hit
    );

    Ok(())
}
