//! Mock 积分计算服务入口

use clap::Parser;
use mock_services::cli::{Cli, CommandRunner, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 优先使用环境变量 RUST_LOG，否则使用命令行参数指定的级别
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .init();

    let runner = CommandRunner::new();

    match cli.command {
        Commands::Server {
            port,
            requests_per_minute,
            default_accrual,
        } => {
            runner
                .run_server(port, requests_per_minute, default_accrual)
                .await?;
        }
    }

    Ok(())
}
