pub mod auth;
pub mod board;
pub mod calendar;
pub mod chat;
pub mod clock;
pub mod config;
pub mod generation;
pub mod identity;
pub mod mutation;
pub mod notification;
pub mod projection;
pub mod reminder;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
