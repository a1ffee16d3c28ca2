//! 积分订单对账服务
//!
//! 用户上传的订单号经 Luhn 校验后登记为 NEW，随后由每订单一个的对账 worker
//! 轮询外部积分计算服务，直到订单到达终态（INVALID / PROCESSED）。
//! PROCESSED 订单的积分按订单号幂等入账，进程重启或持久化失败后
//! 由待处理订单扫描重新接管。
//!
//! 所有 worker 共享一个自适应限流器，配额由外部服务的 429 响应实时下发。

pub mod balance;
pub mod client;
pub mod error;
pub mod manager;
pub mod models;
pub mod rate_limiter;
pub mod repository;
pub mod validation;
pub mod worker;

#[cfg(test)]
mod testing;

/// 内嵌的数据库迁移（crates/accrual-service/migrations）
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
