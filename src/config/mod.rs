pub mod settings;

pub use settings::{ExpiryMode, SessionConfig, Settings, VaultConfig};
