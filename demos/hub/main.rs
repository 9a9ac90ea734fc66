use std::process;

use clap::Parser;
use demos::{init_logger, Env};
use gecko_hub::{broker::Broker, config::Config};
use log::{error, info};

/// 按身份转发消息的中转服务
#[derive(Debug, Parser)]
#[clap(name = "hub", version)]
struct Args {
    /// 监听端口
    port: u16,
    /// 配置文件路径，不指定时使用默认目录
    #[clap(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let env = Env::from_env();
    let _logger = match init_logger(&env) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("init logger error: {}", e);
            process::exit(1);
        }
    };

    // 获取配置
    let mut cfg = match args.config.or(env.config) {
        Some(path) => match Config::from_path(&path).await {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("load config {} error: {}", path, e);
                process::exit(1);
            }
        },
        None => Config::default(),
    };
    cfg.broker.listen_addr = format!("0.0.0.0:{}", args.port);
    if env.idle_timeout.is_some() {
        cfg.broker.idle_timeout = env.idle_timeout;
    }
    info!("catalogue: {}", cfg.catalogue.identities.join(" "));

    // 启动 broker
    if let Err(e) = Broker::new(cfg).start().await {
        error!("broker exit error: {}", e);
        process::exit(1);
    }
}
