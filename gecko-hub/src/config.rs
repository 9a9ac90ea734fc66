use std::time::Duration;

use tokio::{fs, io};

/// 默认的身份目录
pub const DEFAULT_CATALOGUE: [&str; 7] = [
    "SERVER_SQL",
    "JETSON",
    "SERVER_LIN",
    "SERVER_AND",
    "SENSOR_ARD",
    "BOX_ARD",
    "HX_ARD",
];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Read config file error: {0}")]
    IO(#[from] io::Error),
    #[error("Parse config error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: Broker,
    pub catalogue: Catalogue,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Broker {
    pub listen_addr: String,
    /// 同时打开的连接数上限（握手中 + 已登录）
    pub max_connections: usize,
    /// 单次读取的字节数上限，超出的部分作为下一帧处理
    pub max_frame_len: usize,
    /// 空闲超时（秒），不设置时一直等待
    pub idle_timeout: Option<u64>,
}

impl Default for Broker {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".into(),
            max_connections: 10,
            max_frame_len: 199,
            idle_timeout: None,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Catalogue {
    pub identities: Vec<String>,
}

impl Default for Catalogue {
    fn default() -> Self {
        Self {
            identities: DEFAULT_CATALOGUE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Config {
    pub async fn from_path(path: &str) -> Result<Self, Error> {
        let s = fs::read_to_string(path).await?;
        Self::from_toml(&s)
    }

    pub fn from_toml(s: &str) -> Result<Self, Error> {
        let cfg = toml::from_str::<Config>(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.broker.max_connections == 0 {
            return Err(Error::Invalid("max_connections must be positive"));
        }
        if self.broker.max_frame_len == 0 {
            return Err(Error::Invalid("max_frame_len must be positive"));
        }
        if self.catalogue.identities.is_empty() {
            return Err(Error::Invalid("catalogue must not be empty"));
        }
        if self.catalogue.identities.iter().any(|id| id.is_empty()) {
            return Err(Error::Invalid("catalogue contains an empty identity"));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.broker
            .idle_timeout
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }
}
