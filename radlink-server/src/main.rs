//! RadLink 主程序：HIS / RIS 模拟端

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use radlink_integration::{HttpNotifier, NoopNotifier, Notifier};
use radlink_workflow::{InitiatorPeer, ResponderPeer};
use tracing::{error, info};

use crate::config::{LinkConfig, Role};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "radlink-server")]
#[command(about = "HIS/RIS HL7 MLLP 链路模拟器")]
struct Args {
    #[command(subcommand)]
    role: RoleCommand,

    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// 日志级别
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// 覆盖本端监听端口
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// 覆盖对端地址 (host:port)
    #[arg(long, global = true)]
    peer: Option<String>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum RoleCommand {
    /// 医院信息系统：发送登记与申请，接收结果
    His,
    /// 放射信息系统：接收申请，回传结果
    Ris,
}

impl From<RoleCommand> for Role {
    fn from(command: RoleCommand) -> Self {
        match command {
            RoleCommand::His => Role::His,
            RoleCommand::Ris => Role::Ris,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志，RUST_LOG 优先
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let role = Role::from(args.role);
    let mut config = LinkConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        match role {
            Role::His => config.his.port = port,
            Role::Ris => config.ris.port = port,
        }
    }
    config.validate().context("Invalid configuration")?;

    let mut settings = config.peer_settings(role);
    if let Some(peer) = args.peer {
        settings.counterpart_address = peer;
    }

    info!("Starting RadLink {:?} peer", role);
    info!("  listen: {}:{}", settings.listener.host, settings.listener.port);
    info!("  counterpart: {}", settings.counterpart_address);

    let notifier: Arc<dyn Notifier> = if config.notify.enabled {
        info!("  notifications: {}", config.notify.url);
        Arc::new(HttpNotifier::new(config.notify.url.clone()))
    } else {
        Arc::new(NoopNotifier)
    };

    let result = match role {
        Role::His => InitiatorPeer::bind(settings, notifier).await?.run().await,
        Role::Ris => ResponderPeer::bind(settings, notifier).await?.run().await,
    };

    if let Err(e) = &result {
        error!("Peer stopped: {}", e);
    }
    result.context("RadLink peer failed")
}
