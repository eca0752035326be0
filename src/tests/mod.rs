#![cfg(test)]

pub(crate) mod shared;

pub(crate) fn assert_error<T: std::error::Error + Send + Sync + 'static>() {}
pub(crate) fn assert_send_val<T: Send>(_: &T) {}
