#![doc = include_str!("../README.md")]

pub mod error;

mod pool;

pub use pool::NumPool;
