pub mod cli;
pub mod config;
pub mod crypto;
pub mod erase;
pub mod errors;
pub mod index;
pub mod logging;
pub mod retry;
pub mod session;
pub mod vault;
