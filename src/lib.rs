//! Console chat client for OpenAI-compatible model APIs.
//!
//! Replies are streamed through [`stream::StreamTextClassifier`], which splits
//! them into prose that is shown as it arrives and fenced code blocks that are
//! shown whole.

pub mod app;
pub mod chat;
pub mod cli;
pub mod config;
pub mod history;
pub mod models;
pub mod paths;
pub mod provider;
pub mod render;
pub mod stream;
