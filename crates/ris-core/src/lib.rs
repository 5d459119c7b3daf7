//! # RIS Core
//!
//! RIS工作流引擎的核心模块，提供基础数据结构、错误定义和通用工具。

pub mod error;
pub mod models;
pub mod utils;

pub use error::{ErrorKind, Result, RisError};
pub use models::*;
