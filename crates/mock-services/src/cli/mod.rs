//! CLI 模块
//!
//! ```bash
//! # 启动不限流的 mock 服务
//! mock-accrual server --port 8081
//!
//! # 每分钟最多 10 个查询，未指定脚本的订单最终获得 250 积分
//! mock-accrual server --requests-per-minute 10 --default-accrual 250
//! ```

pub mod commands;
pub mod runner;

pub use commands::{Cli, Commands};
pub use runner::CommandRunner;
