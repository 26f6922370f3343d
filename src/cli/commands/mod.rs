//! One module per subcommand. Each exposes an `execute` entry point.

pub mod account;
pub mod add;
pub mod completions;
pub mod delete;
pub mod export;
pub mod list;
pub mod rotate;
pub mod search;
pub mod show;
pub mod version;
