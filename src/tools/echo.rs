//! Echo 工具：回显输入文本（演示与测试用）

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
struct EchoArgs {
    /// 要回显的文本
    text: String,
}

/// 最小工具：原样返回 text 参数
#[derive(Debug, Default)]
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text back verbatim."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(schema_for!(EchoArgs)).unwrap_or_else(|_| serde_json::json!({}))
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: EchoArgs = serde_json::from_value(args).map_err(|e| e.to_string())?;
        Ok(args.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let out = EchoTool.execute(serde_json::json!({"text": "hi"})).await;
        assert_eq!(out.unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_echo_rejects_bad_args() {
        assert!(EchoTool.execute(serde_json::json!({})).await.is_err());
    }

    #[test]
    fn test_schema_requires_text() {
        let schema = EchoTool.parameters_schema();
        let required = schema["required"].as_array().expect("required");
        assert!(required.iter().any(|v| v == "text"));
    }
}
