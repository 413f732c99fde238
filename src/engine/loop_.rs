//! 推理主循环：阶段处理器与驱动器
//!
//! plan 拆解任务并点名候选工具；act 做工具决策、执行工具并产出候选答案；
//! reflect 对候选做内部批判；validate 判定有效性（声明 schema 时产出结构化对象）；
//! converge 记录结束时间。每个阶段前后发 node:enter / node:exit 事件，
//! 失败时 node:exit 仍然发出，错误经 step_errors 上抛。

use serde_json::{json, Value};

use crate::core::Result;
use crate::engine::invoke::{invoke_model, ModelRequest, RunContext};
use crate::engine::phase::{next_phase, Phase};
use crate::engine::state::RunState;
use crate::events::EventKind;
use crate::memory::Message;
use crate::tools::schema::validate;

/// 系统提示词 + 该 run 的全部（有界）历史
pub(crate) async fn assemble(ctx: &RunContext, state: &RunState) -> Vec<Message> {
    let mut messages = vec![Message::system(ctx.params.system_prompt.clone())];
    messages.extend(ctx.memory.history(&state.run_id).await);
    messages
}

/// plan：拆解任务、点名候选工具（不执行），任务与计划写入历史；不推进步数
pub(crate) async fn plan_phase(ctx: &RunContext, state: &mut RunState) -> Result<Value> {
    let tool_names = ctx.tools.names().join(", ");
    let context_block = state
        .input
        .context
        .as_deref()
        .map(|c| format!("Context:\n{}\n\n", c))
        .unwrap_or_default();
    let prompt = format!(
        "Task: {}\n\n{}Break this task into a short numbered plan and name which of the \
         available tools ({}) could help. Do not execute anything yet.",
        state.input.task,
        context_block,
        if tool_names.is_empty() { "none" } else { tool_names.as_str() },
    );

    let mut messages = assemble(ctx, state).await;
    messages.push(Message::user(prompt));

    let plan = invoke_model(ctx, state, Phase::Plan, &messages, ModelRequest::Text)
        .await?
        .into_text();

    ctx.memory
        .append(
            &state.run_id,
            vec![
                Message::user(state.input.task.clone()),
                Message::assistant(plan.clone()),
            ],
        )
        .await;
    let chars = plan.chars().count();
    state.plan = Some(plan);
    Ok(json!({ "phase": "plan", "plan_chars": chars }))
}

/// act 的前半程：工具决策 + 执行，结果（含失败与未注册工具）作为错误载荷写回历史。
/// 每次进入步数 +1；stream() 复用到此为止。
pub(crate) async fn act_tools(ctx: &RunContext, state: &mut RunState) -> Result<usize> {
    state.step += 1;

    let decls = ctx.tools.declarations();
    let calls = if decls.is_empty() {
        Vec::new()
    } else {
        let messages = assemble(ctx, state).await;
        invoke_model(
            ctx,
            state,
            Phase::Act,
            &messages,
            ModelRequest::ToolDecision(&decls),
        )
        .await?
        .into_tool_calls()
    };

    let call_count = calls.len();
    for call in calls {
        ctx.emit(
            &state.run_id,
            EventKind::ToolCallStart,
            json!({ "tool": call.tool, "args": call.args }),
        );

        let started = std::time::Instant::now();
        let payload = match ctx.tools.get(&call.tool) {
            // 未注册工具：作为错误载荷回灌，不中断运行
            None => json!({
                "tool": call.tool,
                "ok": false,
                "error": format!("unknown tool: {}", call.tool),
            }),
            Some(tool) => match validate(&tool.parameters_schema(), &call.args) {
                // 参数被拒的工具未被实际调用，不计入 used_tools
                Err(reason) => json!({
                    "tool": call.tool,
                    "ok": false,
                    "error": format!("invalid arguments: {}", reason),
                }),
                Ok(()) => {
                    state.used_tools.push(call.tool.clone());
                    // 取消不打断已在途的工具调用，只设执行时限
                    match tokio::time::timeout(
                        ctx.params.tool_timeout,
                        tool.execute(call.args.clone()),
                    )
                    .await
                    {
                        Err(_) => json!({
                            "tool": call.tool,
                            "ok": false,
                            "error": format!("tool timed out after {:?}", ctx.params.tool_timeout),
                        }),
                        Ok(Err(reason)) => json!({
                            "tool": call.tool,
                            "ok": false,
                            "error": reason,
                        }),
                        Ok(Ok(output)) => json!({
                            "tool": call.tool,
                            "ok": true,
                            "result": output,
                        }),
                    }
                }
            },
        };

        let ok = payload["ok"].as_bool().unwrap_or(false);
        let audit = json!({
            "event": "tool_audit",
            "tool": call.tool,
            "ok": ok,
            "duration_ms": started.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        ctx.emit(
            &state.run_id,
            EventKind::ToolCallEnd,
            json!({ "tool": call.tool, "ok": ok }),
        );
        ctx.memory
            .append(&state.run_id, vec![Message::tool(payload.to_string())])
            .await;
    }

    Ok(call_count)
}

/// act 的后半程：不绑定工具，综合工具结果产出候选答案并写入历史
async fn act_candidate(ctx: &RunContext, state: &mut RunState) -> Result<()> {
    let mut messages = assemble(ctx, state).await;
    messages.push(Message::user(
        "Using the conversation so far, including any tool results, produce your best \
         candidate answer to the task. Answer directly.",
    ));

    let candidate = invoke_model(ctx, state, Phase::Act, &messages, ModelRequest::Text)
        .await?
        .into_text();

    ctx.memory
        .append(&state.run_id, vec![Message::assistant(candidate.clone())])
        .await;
    state.candidate = Some(candidate);
    Ok(())
}

async fn act_phase(ctx: &RunContext, state: &mut RunState) -> Result<Value> {
    let tool_calls = act_tools(ctx, state).await?;
    act_candidate(ctx, state).await?;
    Ok(json!({ "phase": "act", "step": state.step, "tool_calls": tool_calls }))
}

/// reflect：对最近候选做内部批判，写入历史但绝不出现在对外结果里；不推进步数
async fn reflect_phase(ctx: &RunContext, state: &mut RunState) -> Result<Value> {
    let mut messages = assemble(ctx, state).await;
    messages.push(Message::user(
        "Critique the most recent candidate answer against accuracy, completeness, \
         actionability, risk and source reliability. List concrete improvements. \
         This critique is internal and must not be shown to the user.",
    ));

    let reflection = invoke_model(ctx, state, Phase::Reflect, &messages, ModelRequest::Text)
        .await?
        .into_text();

    ctx.memory
        .append(&state.run_id, vec![Message::assistant(reflection.clone())])
        .await;
    state.reflection = Some(reflection);
    Ok(json!({ "phase": "reflect", "step": state.step }))
}

/// schema 路径的结构化产出 + 事后结构校验；stream() 复用
pub(crate) async fn validate_structured(
    ctx: &RunContext,
    state: &mut RunState,
    schema: &Value,
) -> Result<()> {
    let mut messages = assemble(ctx, state).await;
    messages.push(Message::user(
        "Produce the final result for the task as a single JSON object conforming to the \
         declared schema.",
    ));

    let object = invoke_model(
        ctx,
        state,
        Phase::Validate,
        &messages,
        ModelRequest::Structured(schema),
    )
    .await?
    .into_object();

    match validate(schema, &object) {
        Ok(()) => state.valid = true,
        Err(reason) => {
            // 步数未到上限时回到 act 重试；到上限则带着该对象收敛
            state.valid = false;
            state.step_errors.push(format!("schema mismatch: {}", reason));
        }
    }
    state.final_object = Some(object);
    Ok(())
}

/// validate：schema 路径产出结构化对象；文本路径检查候选非空
async fn validate_phase(ctx: &RunContext, state: &mut RunState) -> Result<Value> {
    if let Some(schema) = state.input.schema.clone() {
        validate_structured(ctx, state, &schema).await?;
    } else {
        let candidate = state.candidate.clone().unwrap_or_default();
        state.valid = !candidate.trim().is_empty();
    }
    Ok(json!({ "phase": "validate", "valid": state.valid }))
}

/// converge：记录结束时间，无模型调用；文本路径把候选定格为最终文本
fn converge_phase(state: &mut RunState) -> Value {
    state.ended_at = Some(chrono::Utc::now());
    if state.input.schema.is_none() && state.final_text.is_none() {
        state.final_text = state.candidate.clone();
    }
    json!({
        "phase": "converge",
        "steps": state.step,
        "duration_ms": state.duration_ms(),
    })
}

async fn run_phase(ctx: &RunContext, state: &mut RunState, phase: Phase) -> Result<Value> {
    match phase {
        Phase::Plan => plan_phase(ctx, state).await,
        Phase::Act => act_phase(ctx, state).await,
        Phase::Reflect => reflect_phase(ctx, state).await,
        Phase::Validate => validate_phase(ctx, state).await,
        Phase::Converge => Ok(converge_phase(state)),
    }
}

/// 驱动状态机直到 converge（或错误上抛）
pub(crate) async fn drive(ctx: &RunContext, state: &mut RunState) -> Result<()> {
    let mut phase = Phase::Plan;
    loop {
        ctx.emit(
            &state.run_id,
            EventKind::NodeEnter,
            json!({ "phase": phase.tag() }),
        );

        let outcome = run_phase(ctx, state, phase).await;

        // 成败都要发 node:exit，保证逐步可追踪
        let exit_data = match &outcome {
            Ok(summary) => summary.clone(),
            Err(err) => json!({ "phase": phase.tag(), "error": err.to_string() }),
        };
        ctx.emit(&state.run_id, EventKind::NodeExit, exit_data);

        if let Err(err) = outcome {
            state.step_errors.push(err.to_string());
            ctx.emit(
                &state.run_id,
                EventKind::Error,
                json!({ "phase": phase.tag(), "error": err.to_string() }),
            );
            return Err(err);
        }

        match next_phase(phase, state) {
            Some(next) => phase = next,
            None => return Ok(()),
        }
    }
}
