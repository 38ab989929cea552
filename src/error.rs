use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Dbus connection error: {0}")]
    DbusError(#[from] zbus::Error),
    #[error("Dbus call failed: {0}")]
    DbusFdoError(#[from] zbus::fdo::Error),
    #[error("Failed to decode icon: {0}")]
    IconDecodeError(#[from] image::ImageError),
    #[error("Failed to start the tray runtime: {0}")]
    RuntimeError(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    ConfigError(#[from] serde_json::Error),
    #[error("Failed to serialize config: {0}")]
    ConfigSerializeError(#[from] ron::Error),
    #[error("Unsupported platform '{0}', the tray is Linux-only")]
    UnsupportedPlatform(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
