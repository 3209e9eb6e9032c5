pub mod cli;
pub mod config;
pub mod downloader;
pub mod extractor;
pub mod post_process;
pub mod validator;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
