pub mod chain;
pub mod credential;
