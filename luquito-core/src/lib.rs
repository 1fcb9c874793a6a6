// src/lib.rs

pub mod audio;
pub mod config;
pub mod platforms;
pub mod services;

pub use luquito_common::error::Error;
