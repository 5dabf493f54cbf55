pub mod auth;
pub mod types;

mod api;
mod balancing;
mod config;
mod constants;
mod control;
mod iface;
mod local_db;
mod map_cache;
mod nonces;
mod ptree;
mod server;
mod timers;

pub use api::*;
pub use balancing::*;
pub use config::*;
pub use constants::*;
pub use control::*;
pub use iface::*;
pub use local_db::*;
pub use map_cache::*;
pub use nonces::*;
pub use ptree::*;
pub use server::*;
pub use timers::*;
