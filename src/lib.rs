#![forbid(unsafe_code)]

pub mod cli;
pub mod code;
pub mod config;
pub mod conversation;
pub mod embedding;
pub mod formats;
pub mod kmeans;
pub mod llm;
pub mod logging;
pub mod openai;
pub mod pipeline;
pub mod publish;
pub mod qna;
pub mod quality;
pub mod score;
pub mod toc;
pub mod workspace;
pub mod writer;
