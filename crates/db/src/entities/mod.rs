pub mod account;
pub mod task;
