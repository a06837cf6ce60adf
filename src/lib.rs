pub mod analyzer;
pub mod composer;
pub mod config;
pub mod crawler;
pub mod mailer;
pub mod pdf;
pub mod pipeline;
pub mod utils;
