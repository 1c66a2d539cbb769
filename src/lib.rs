pub mod channel;
pub mod engine;
pub mod error;
pub mod messenger;
pub mod registry;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_util;
