pub mod bridge;
pub mod cli;
pub mod console;
