//! Pool module - bounded-concurrency task invoker.

mod worker;

pub use worker::*;
