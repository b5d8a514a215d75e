pub mod core;
pub mod records;
pub mod session;
pub mod storage;
pub mod views;
