pub mod btle;
pub mod constants;
pub mod permissions;
pub mod radio;
pub mod scanner;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;
