#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod allocator;
mod error;
pub mod message;
pub mod pool;
#[cfg(feature = "postgres")]
pub mod postgres;
mod sender;
pub mod types;

pub use crate::allocator::*;
pub use crate::error::*;
pub use crate::sender::*;
pub use crate::types::*;
