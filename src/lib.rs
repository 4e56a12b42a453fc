pub mod agent;
pub mod attachment;
pub mod config;
pub mod email;
pub mod error;
pub mod notification;
pub mod openai;
pub mod prompt;
pub mod retry;
pub mod server;
pub mod tools;

#[cfg(test)]
mod testing;
