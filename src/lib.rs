pub mod animation;
pub mod cli;
pub mod config;
pub mod coords;
pub mod device;
pub mod render;
pub mod serial;
pub mod takeover;
