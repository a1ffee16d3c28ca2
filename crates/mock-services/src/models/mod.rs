//! 模拟数据模型

pub mod accrual;

pub use accrual::{AccrualResponse, AccrualScript, AccrualStatus, AccrualStep, RegisterOrderRequest};
