pub mod api;
pub mod automation;
pub mod cache;
pub mod collector;
pub mod config;
pub mod email;
pub mod llm;
pub mod repository;
pub mod shared;
