//! Module containing concrete implementations from the [core](crate::core) module.

pub mod cache;
pub mod embedder;
pub mod factory;
pub mod repo;
pub mod state;
pub mod validator;
pub mod vector;

#[cfg(test)]
pub mod test;
