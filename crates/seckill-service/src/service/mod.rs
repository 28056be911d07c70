//! 业务服务层
//!
//! 准入编排服务，供外部 HTTP 层调用

mod seckill_service;

pub use seckill_service::{SeckillOutcome, SeckillService};
