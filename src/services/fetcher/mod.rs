pub mod collector;
pub mod retry;
pub mod scheduler;
