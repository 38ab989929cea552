pub mod icon;
pub mod item;
pub mod layout;
pub mod menu;
pub mod watcher;

pub(crate) mod names {
    pub const WATCHER_BUS: &str = "org.kde.StatusNotifierWatcher";

    pub const ITEM_OBJECT: &str = "/StatusNotifierItem";
    pub const MENU_OBJECT: &str = "/StatusNotifierMenu";

    /// Advertised by KDE/Plasma items that have no menu.
    pub const NO_DBUSMENU_OBJECT: &str = "/NO_DBUSMENU";
    pub const ROOT_OBJECT: &str = "/";

    /// Well-known name of the item, one item per process.
    pub fn item_bus_name(pid: u32) -> String {
        format!("org.kde.StatusNotifierItem-{}-1", pid)
    }
}

/// The desktop session as seen through the environment, read once at start-up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesktopEnv {
    pub current_desktop: String,
    pub session: String,
    pub kde_full_session: bool,
}

impl DesktopEnv {
    pub fn from_env() -> Self {
        Self {
            current_desktop: std::env::var("XDG_CURRENT_DESKTOP").unwrap_or_default(),
            session: std::env::var("DESKTOP_SESSION").unwrap_or_default(),
            kde_full_session: std::env::var_os("KDE_FULL_SESSION").is_some_and(|v| !v.is_empty()),
        }
    }

    pub fn is_kde(&self) -> bool {
        let desktop = self.current_desktop.to_lowercase();
        let session = self.session.to_lowercase();
        self.kde_full_session
            || desktop.contains("kde")
            || desktop.contains("plasma")
            || session.contains("kde")
            || session.contains("plasma")
    }

    /// Object path advertised as `Menu` while no menu is published.
    pub fn no_menu_path(&self) -> &'static str {
        if self.is_kde() {
            names::NO_DBUSMENU_OBJECT
        } else {
            names::ROOT_OBJECT
        }
    }
}
