//! MTD 公共组件
//!
//! 所有 crate 共享的跟踪码、跟踪级别和跟踪/结果写入器。

pub mod codes;
pub mod trace;

pub use codes::TraceCode;
pub use trace::{TestResult, TraceLevel, TraceRecord, TraceWriter};
