pub mod cli;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod handlers;
pub mod indexer;
pub mod retrieval;
pub mod storage;
