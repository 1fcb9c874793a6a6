// File: src/services/mod.rs

pub mod builtin_commands;
pub mod command_service;

pub use command_service::{ChatCommand, CommandReply, CommandService};
