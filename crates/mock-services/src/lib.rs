//! Mock Services
//!
//! 模拟外部积分计算服务，用于开发环境和集成测试。
//!
//! # 主要模块
//!
//! - `models`: 订单计算状态与状态脚本
//! - `quota`: 固定窗口请求配额（429 限流）
//! - `store`: 内存存储实现
//! - `services`: HTTP 路由与服务启动
//!
//! # 使用示例
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! use mock_services::models::AccrualScript;
//! use mock_services::quota::QuotaWindow;
//! use mock_services::services::{AccrualServiceState, spawn_server};
//!
//! # async fn run() -> std::io::Result<()> {
//! let state = Arc::new(AccrualServiceState::new(Some(QuotaWindow::per_minute(60)), 100.0));
//! state.register("79927398713", AccrualScript::standard(500.0));
//!
//! let (addr, _handle) = spawn_server(state, SocketAddr::from(([127, 0, 0, 1], 0))).await?;
//! println!("mock accrual service at http://{addr}");
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod models;
pub mod quota;
pub mod services;
pub mod store;
