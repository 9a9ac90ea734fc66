use flexi_logger::{FlexiLoggerError, Logger, LoggerHandle};

/// 环境变量覆盖项，前缀 `GECKO_HUB_`
#[derive(Debug, Default, serde::Deserialize)]
pub struct Env {
    /// 日志级别，如 `info`、`gecko_hub=debug`
    pub log: Option<String>,
    /// 配置文件路径
    pub config: Option<String>,
    /// 空闲超时（秒），覆盖配置文件中的值
    pub idle_timeout: Option<u64>,
}

impl Env {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// 解析失败时忽略全部覆盖项
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        match envy::prefixed("GECKO_HUB_").from_iter::<_, Env>(vars) {
            Ok(env) => env,
            Err(e) => {
                // 此时日志还没有初始化
                eprintln!("ignore invalid GECKO_HUB_* variables: {}", e);
                Self::default()
            }
        }
    }
}

/// 初始化日志，`RUST_LOG` 优先，其次是 `GECKO_HUB_LOG`，默认 info
pub fn init_logger(env: &Env) -> Result<LoggerHandle, FlexiLoggerError> {
    let spec = env.log.as_deref().unwrap_or("info");
    Logger::try_with_env_or_str(spec)?
        .format(flexi_logger::detailed_format)
        .start()
}
