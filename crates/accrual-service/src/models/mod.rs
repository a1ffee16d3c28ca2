//! 领域模型定义

mod balance;
mod order;

pub use balance::{Balance, CreditOutcome, WithdrawOutcome, Withdrawal};
pub use order::{AccrualOrder, AddOrderOutcome, Order, OrderStatus, OrderUpdate, PendingOrder};
