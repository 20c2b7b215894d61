pub mod assert;
pub mod backoff;
pub mod subscribe;

pub use assert::{assert, assertion_error};
pub use backoff::ExponentialBackoff;
pub use subscribe::{ErrorFn, NextFn, PartialObserver};
