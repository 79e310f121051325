pub mod server;

pub use server::{TakeoverConfig, TakeoverServer};
