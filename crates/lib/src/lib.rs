//! Scout core library: retrieval, prompt assembly, chat backends, the LINE channel,
//! and the HTTP gateway used by the CLI.

pub mod channels;
pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod init;
pub mod knowledge;
pub mod llm;
pub mod pipeline;
pub mod retrieval;
pub mod text;
