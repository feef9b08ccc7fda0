#![deny(unused_imports)]

pub mod chunker;
pub mod config;
pub mod error;
pub mod loader;
pub mod primary_field;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
