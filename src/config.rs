//! 编排器配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `OWL__*` 覆盖（双下划线表示嵌套，
//! 如 `OWL__MODEL__NAME=gpt-4o`）。配置在构造期装配一次，之后按值/引用传入每次调用。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::OrchestratorError;

/// 配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub memory: MemorySection,
}

/// [model] 段：模型名、采样温度、OpenAI 兼容端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// OpenAI 兼容端点，未设置时用官方端点
    pub base_url: Option<String>,
    /// 未设置时从环境变量 OPENAI_API_KEY 读取
    pub api_key: Option<String>,
}

fn default_model_name() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            temperature: default_temperature(),
            base_url: None,
            api_key: None,
        }
    }
}

/// [run] 段：步数上限与基础系统提示词
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// act 阶段最多进入次数，防止死循环
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_max_steps() -> u32 {
    6
}

fn default_system_prompt() -> String {
    "You are a careful assistant that solves tasks step by step, \
     using the provided tools when they help."
        .to_string()
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            system_prompt: default_system_prompt(),
        }
    }
}

/// [cache] 段：响应缓存（TTL + LRU）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_max_entries() -> usize {
    256
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
        }
    }
}

/// [rate_limit] 段：全局 rpm 间隔与模型调用并发上限
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RateLimitSection {
    #[serde(default)]
    pub enabled: bool,
    /// 每分钟请求数上限；enabled 且设置时生效
    pub requests_per_minute: Option<u32>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    2
}

/// [timeouts] 段：单步 / 全程 / 工具三级时限（秒），0 或缺省按默认值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsSection {
    /// 单次模型调用时限
    pub step_secs: Option<u64>,
    /// 整次 run/stream 时限
    pub total_secs: Option<u64>,
    /// 单次工具调用时限
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_secs: u64,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            step_secs: Some(60),
            total_secs: Some(300),
            tool_secs: default_tool_timeout_secs(),
        }
    }
}

/// [retry] 段：指数退避重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// [memory] 段：每个 run 的对话历史保留上限（条数，丢最旧）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_max_messages() -> usize {
    64
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: ModelSection::default(),
            run: RunSection::default(),
            cache: CacheSection::default(),
            rate_limit: RateLimitSection::default(),
            timeouts: TimeoutsSection::default(),
            retry: RetrySection::default(),
            memory: MemorySection::default(),
        }
    }
}

impl OrchestratorConfig {
    /// 构造期校验：非法参数同步报错，不进入运行期
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.run.max_steps == 0 {
            return Err(OrchestratorError::Config(
                "run.max_steps must be >= 1".to_string(),
            ));
        }
        if self.rate_limit.enabled && self.rate_limit.requests_per_minute == Some(0) {
            return Err(OrchestratorError::Config(
                "rate_limit.requests_per_minute must be > 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(OrchestratorError::Config(
                "retry.max_attempts must be >= 1".to_string(),
            ));
        }
        if self.retry.factor < 1.0 {
            return Err(OrchestratorError::Config(
                "retry.factor must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 OWL__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 OWL__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<OrchestratorConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("OWL")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.run.max_steps, 6);
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert!(!cfg.rate_limit.enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut f = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        writeln!(
            f,
            "[run]\nmax_steps = 3\n\n[cache]\nenabled = false\n\n[model]\nname = \"test-model\""
        )
        .expect("write");
        let cfg = load_config(Some(f.path().to_path_buf())).expect("load");
        assert_eq!(cfg.run.max_steps, 3);
        assert!(!cfg.cache.enabled);
        assert_eq!(cfg.model.name, "test-model");
        // 未覆盖的键保持默认
        assert_eq!(cfg.retry.factor, 2.0);
    }

    #[test]
    fn test_validate_rejects_zero_steps() {
        let mut cfg = OrchestratorConfig::default();
        cfg.run.max_steps = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_rpm() {
        let mut cfg = OrchestratorConfig::default();
        cfg.rate_limit.enabled = true;
        cfg.rate_limit.requests_per_minute = Some(0);
        assert!(cfg.validate().is_err());
    }
}
