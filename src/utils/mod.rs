pub mod logger;
pub mod scheduler;
