//! 秒杀领域模型
//!
//! 包含商品、订单、补偿任务及订单消息的定义

pub mod enums;
pub mod item;
pub mod order;

pub use enums::{CompensationStatus, ItemStatus, OrderStatus};
pub use item::Item;
pub use order::{CompensationTask, NewCompensationTask, Order, PersistOutcome, ProvisionalOrder};
