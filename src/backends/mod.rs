#[cfg(any(test, feature = "mock"))]
pub mod mock;
