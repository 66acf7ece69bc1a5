pub mod config;
pub mod delivery;
pub mod domain;
pub mod error;
pub mod llm;
pub mod news;
pub mod pipeline;
pub mod portfolio_file;
pub mod risk;
pub mod sentiment;
pub mod storage;
pub mod summarize;
pub mod time;
