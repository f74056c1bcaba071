pub mod audio;
pub mod command_bridge;
pub mod config;
pub mod controller;
pub mod error;
pub mod fetch;
pub mod player;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod voice_link;

#[cfg(test)]
mod testing;
