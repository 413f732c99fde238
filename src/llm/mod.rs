//! 模型客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockModel;
pub use openai::OpenAiClient;
pub use traits::{ModelClient, TextStream, ToolCallRequest};

/// 从模型输出中提取 JSON 块（```json ... ``` 围栏或首尾花括号之间）
pub(crate) fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let inner = rest
            .find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or_else(|| rest.trim());
        return Some(inner.to_string());
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end > start {
        Some(trimmed[start..=end].to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_fenced_json() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json(text).as_deref(), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_bare_json() {
        let text = "prefix {\"tool\": \"echo\", \"args\": {}} suffix";
        let json = extract_json(text).expect("json");
        assert!(serde_json::from_str::<serde_json::Value>(&json).is_ok());
    }

    #[test]
    fn test_extract_none_without_braces() {
        assert!(extract_json("plain text answer").is_none());
    }
}
