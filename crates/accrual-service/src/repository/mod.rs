//! 数据访问层
//!
//! - 订单与积分账本各自定义 trait，引擎只依赖 trait
//! - PostgreSQL 实现用于生产，内存实现用于本地运行和测试
//! - 单次调用内部保证原子性，跨调用（入账与更新订单状态）不共享事务

mod ledger_repo;
mod memory_repo;
mod order_repo;
mod traits;

pub use ledger_repo::LedgerRepository;
pub use memory_repo::{MemoryLedgerRepository, MemoryOrderRepository};
pub use order_repo::OrderRepository;
pub use traits::*;
