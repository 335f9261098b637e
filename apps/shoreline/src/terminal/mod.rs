pub mod app;
pub mod cli;
pub mod error;
pub mod keys;
pub mod render;
pub mod tty;
