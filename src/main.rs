// src/main.rs
use anyhow::Result;
use clap::Parser;
use crab_relay::{config::Cli, server};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // 解析命令行（可选叠加 JSON 配置文件），然后按角色启动
    let config = Cli::parse().into_config()?;
    server::start(config).await
}
