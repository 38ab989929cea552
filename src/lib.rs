pub(crate) mod changes;
pub mod click;
pub mod config;
pub mod error;
pub mod ffi;
pub mod handlers;
pub mod menu;
pub mod status_notifier;
pub mod tray;

#[cfg(not(feature = "embedded"))]
use env_logger::Env;

pub use config::TrayConfig;
pub use error::{Error, Result};
pub use tray::{ExternalLoop, Tray};

pub const NAME: &str = "SystrayAgent";

/// Install the logger unless the host already did, or owns logging itself.
#[cfg(not(feature = "embedded"))]
pub(crate) fn init_logging() {
    let _ = env_logger::Builder::from_env(
        Env::default().default_filter_or(log::Level::Warn.as_str()),
    )
    .try_init();
}

#[cfg(feature = "embedded")]
pub(crate) fn init_logging() {}
