//! CLI 命令定义

use clap::{Parser, Subcommand};

/// Mock 积分计算服务命令行工具
#[derive(Parser, Debug)]
#[command(name = "mock-accrual")]
#[command(version, about = "积分计算服务模拟工具")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 启动 Mock 积分计算服务（HTTP REST API）
    ///
    /// 订单需先通过 POST /api/orders 登记，未登记的订单查询返回 204。
    Server {
        /// 服务端口
        #[arg(short, long, default_value = "8081")]
        port: u16,

        /// 每分钟允许的查询数，不指定则不限流
        #[arg(short = 'r', long)]
        requests_per_minute: Option<u32>,

        /// 登记时未提供状态脚本的订单最终获得的积分
        #[arg(long, default_value = "100")]
        default_accrual: f64,
    },
}
