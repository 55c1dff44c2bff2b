//! 프로토콜 모듈

pub mod messages;

pub use messages::*;
