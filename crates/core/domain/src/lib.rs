//! 桥接链路共享的领域模型。

pub mod data;

pub use data::{TagBinding, TagReading, TagValue, now_epoch_ms};
