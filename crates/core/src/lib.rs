//! Core library for the task manager service
//!
//! This crate contains the core business logic, including:
//! - Task model, filters and pagination
//! - Task storage (SQLite and JSON file)
//! - Cache backends
//! - The cache-aside task service

pub mod cache;
pub mod error;
pub mod task;

pub use error::{Error, FieldError};
pub type Result<T> = std::result::Result<T, Error>;
