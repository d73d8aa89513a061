//! 配置加载
//!
//! 默认值 → 可选的配置文件 → `RADLINK_` 前缀的环境变量，
//! 嵌套键用 `__` 分隔，例如 `RADLINK_RIS__PORT=7662`。

use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use radlink_integration::FacilityConfig;
use radlink_mllp::{ListenerConfig, DEFAULT_MAX_FRAME_LENGTH};
use radlink_workflow::PeerSettings;
use serde::{Deserialize, Serialize};
use tracing::info;

/// 运行角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    His,
    Ris,
}

/// RadLink完整配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub his: EndpointConfig,
    pub ris: EndpointConfig,
    pub transport: TransportConfig,
    pub scanner: ScannerConfig,
    pub notify: NotifyConfig,
    pub demo: DemoConfig,
    pub facility: FacilityNames,
}

/// 监听端点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
}

impl EndpointConfig {
    fn local(port: u16) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 传输层参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// 发送超时（毫秒），0 表示不限
    pub timeout_ms: u64,
    pub max_frame_length: usize,
    pub max_connections: usize,
    /// 等待完整请求帧的时间（毫秒），0 表示不限
    pub read_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            max_connections: 64,
            read_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub interval_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { interval_ms: 2_000 }
    }
}

/// 监控面板通知
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub url: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://localhost:5000/log".to_string(),
        }
    }
}

/// 演示脚本
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub enabled: bool,
    pub step_delay_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            step_delay_ms: 0,
        }
    }
}

/// MSH-3..6 使用的应用与机构名
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FacilityNames {
    pub his_application: String,
    pub his_facility: String,
    pub ris_application: String,
    pub ris_facility: String,
}

impl Default for FacilityNames {
    fn default() -> Self {
        Self {
            his_application: "HIS".to_string(),
            his_facility: "HOSP".to_string(),
            ris_application: "RIS".to_string(),
            ris_facility: "RAD".to_string(),
        }
    }
}

impl FacilityNames {
    fn for_role(&self, role: Role) -> FacilityConfig {
        let his = (self.his_application.clone(), self.his_facility.clone());
        let ris = (self.ris_application.clone(), self.ris_facility.clone());
        let ((sending_application, sending_facility), (receiving_application, receiving_facility)) =
            match role {
                Role::His => (his, ris),
                Role::Ris => (ris, his),
            };
        FacilityConfig {
            sending_application,
            sending_facility,
            receiving_application,
            receiving_facility,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            his: EndpointConfig::local(6661),
            ris: EndpointConfig::local(6662),
            transport: TransportConfig::default(),
            scanner: ScannerConfig::default(),
            notify: NotifyConfig::default(),
            demo: DemoConfig::default(),
            facility: FacilityNames::default(),
        }
    }
}

fn optional_millis(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_millis(value))
}

impl LinkConfig {
    /// 加载配置
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("his.host", "127.0.0.1")?
            .set_default("his.port", 6661)?
            .set_default("ris.host", "127.0.0.1")?
            .set_default("ris.port", 6662)?;

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("RADLINK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: LinkConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match path {
            Some(path) => info!("Configuration loaded from: {}", path),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        for (name, endpoint) in [("his", &self.his), ("ris", &self.ris)] {
            if endpoint.port == 0 {
                bail!("{}.port must not be 0", name);
            }
            if endpoint.host.trim().is_empty() {
                bail!("{}.host must not be empty", name);
            }
        }
        if self.his == self.ris {
            bail!("his and ris must listen on different endpoints");
        }
        if self.transport.max_frame_length == 0 {
            bail!("transport.max_frame_length must be positive");
        }
        if self.transport.max_connections == 0 {
            bail!("transport.max_connections must be positive");
        }
        if self.scanner.interval_ms == 0 {
            bail!("scanner.interval_ms must be positive");
        }
        if self.notify.enabled && self.notify.url.trim().is_empty() {
            bail!("notify.url must be set when notifications are enabled");
        }
        Ok(())
    }

    /// 生成指定角色的运行参数
    pub fn peer_settings(&self, role: Role) -> PeerSettings {
        let (own, counterpart) = match role {
            Role::His => (&self.his, &self.ris),
            Role::Ris => (&self.ris, &self.his),
        };

        PeerSettings {
            listener: ListenerConfig {
                host: own.host.clone(),
                port: own.port,
                max_connections: self.transport.max_connections,
                read_timeout: optional_millis(self.transport.read_timeout_ms),
                max_frame_length: self.transport.max_frame_length,
            },
            counterpart_address: counterpart.address(),
            client_timeout: optional_millis(self.transport.timeout_ms),
            max_frame_length: self.transport.max_frame_length,
            scan_interval: Duration::from_millis(self.scanner.interval_ms),
            step_delay: Duration::from_millis(self.demo.step_delay_ms),
            run_script: role == Role::His && self.demo.enabled,
            facility: self.facility.for_role(role),
        }
    }
}
