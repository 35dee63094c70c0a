mod commands;
pub mod console;

pub use commands::{Cli, Commands};
