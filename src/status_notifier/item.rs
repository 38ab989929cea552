use std::{
    fmt::Display,
    sync::{Arc, Mutex, MutexGuard},
};

use zbus::zvariant::{ObjectPath, OwnedObjectPath};

use super::{
    icon::{Pixmap, ToolTip},
    names,
};
use crate::{
    click::{self, Activation, ClickArbiter},
    handlers::{Handlers, Orientation},
    menu::MenuModel,
    tray::TrayState,
};

/// Recognised values of [`org.freedesktop.StatusNotifierItem.Status`].
///
/// [`org.freedesktop.StatusNotifierItem.Status`]: https://www.freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierItem/#org.freedesktop.statusnotifieritem.status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Status {
    /// Shown while serving.
    #[default]
    Active,
    /// Published during teardown so hosts can drop the item before it disappears.
    Passive,
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Active => write!(f, "Active"),
            Status::Passive => write!(f, "Passive"),
        }
    }
}

/// The item describes the status of a generic application.
pub const CATEGORY: &str = "ApplicationStatus";

/// Object path advertised in the `Menu` property.
///
/// A path written by a client wins, then the dbusmenu object once it has items,
/// then the desktop specific no-menu path.
pub fn menu_path(
    written: Option<&OwnedObjectPath>,
    published: bool,
    no_menu_path: &'static str,
) -> OwnedObjectPath {
    if let Some(path) = written {
        return path.clone();
    }
    let path = if published {
        names::MENU_OBJECT
    } else {
        no_menu_path
    };
    ObjectPath::from_static_str_unchecked(path).into()
}

fn not_handled(method: &str) -> zbus::fdo::Error {
    zbus::fdo::Error::UnknownMethod(format!("{} is not handled by this item", method))
}

/// The `org.kde.StatusNotifierItem` object exported at [`names::ITEM_OBJECT`].
pub struct StatusNotifierItem {
    state: Arc<Mutex<TrayState>>,
    menu: Arc<MenuModel>,
    arbiter: Arc<ClickArbiter>,
    handlers: Arc<Handlers>,
}

impl StatusNotifierItem {
    pub(crate) fn new(
        state: Arc<Mutex<TrayState>>,
        menu: Arc<MenuModel>,
        arbiter: Arc<ClickArbiter>,
        handlers: Arc<Handlers>,
    ) -> Self {
        Self {
            state,
            menu,
            arbiter,
            handlers,
        }
    }

    fn state(&self) -> MutexGuard<'_, TrayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Dispatch an `Activate` received at `now_ms`, false when nobody handles it.
    pub(crate) fn handle_activate(&self, x: i32, y: i32, now_ms: i64) -> bool {
        match self.arbiter.activate(x, y, now_ms) {
            Activation::Single => self.handlers.fire_click(x, y),
            Activation::Double => self.handlers.fire_double_click(x, y),
        }
    }
}

#[zbus::interface(name = "org.kde.StatusNotifierItem")]
impl StatusNotifierItem {
    async fn activate(&self, x: i32, y: i32) -> zbus::fdo::Result<()> {
        if self.handle_activate(x, y, click::now_ms()) {
            Ok(())
        } else {
            Err(not_handled("Activate"))
        }
    }

    async fn secondary_activate(&self, x: i32, y: i32) -> zbus::fdo::Result<()> {
        self.arbiter.record_position(x, y);
        if self.handlers.fire_right_click(x, y) {
            Ok(())
        } else {
            Err(not_handled("SecondaryActivate"))
        }
    }

    /// Without a right click handler the host falls back to showing the menu.
    async fn context_menu(&self, x: i32, y: i32) -> zbus::fdo::Result<()> {
        self.arbiter.record_position(x, y);
        if self.handlers.fire_right_click(x, y) {
            Ok(())
        } else {
            Err(not_handled("ContextMenu"))
        }
    }

    async fn scroll(&self, delta: i32, orientation: &str) -> zbus::fdo::Result<()> {
        let orientation: Orientation = orientation.parse().map_err(|_| {
            zbus::fdo::Error::InvalidArgs(format!("invalid orientation {:?}", orientation))
        })?;
        if self.handlers.fire_scroll(delta, orientation) {
            Ok(())
        } else {
            Err(not_handled("Scroll"))
        }
    }

    /// NewIcon signal
    #[zbus(signal)]
    pub async fn new_icon(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()>;

    /// NewTitle signal
    #[zbus(signal)]
    pub async fn new_title(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()>;

    /// NewToolTip signal
    #[zbus(signal)]
    pub async fn new_tool_tip(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()>;

    /// NewStatus signal
    #[zbus(signal)]
    pub async fn new_status(ctxt: &zbus::SignalContext<'_>, status: &str) -> zbus::Result<()>;

    #[zbus(property)]
    fn status(&self) -> String {
        self.state().status.to_string()
    }

    #[zbus(property)]
    fn title(&self) -> String {
        self.state().title.clone()
    }

    #[zbus(property)]
    fn set_title(&mut self, title: String) {
        self.state().title = title;
    }

    #[zbus(property)]
    fn id(&self) -> String {
        "1".to_string()
    }

    #[zbus(property)]
    fn category(&self) -> String {
        CATEGORY.to_string()
    }

    #[zbus(property)]
    fn icon_name(&self) -> String {
        String::new()
    }

    #[zbus(property)]
    fn icon_pixmap(&self) -> Vec<Pixmap> {
        self.state().pixmaps.clone()
    }

    #[zbus(property)]
    fn set_icon_pixmap(&mut self, pixmaps: Vec<Pixmap>) {
        self.state().pixmaps = pixmaps;
    }

    #[zbus(property)]
    fn icon_theme_path(&self) -> String {
        String::new()
    }

    #[zbus(property)]
    fn item_is_menu(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn menu(&self) -> OwnedObjectPath {
        let published = self.menu.is_published();
        let state = self.state();
        menu_path(state.menu_path.as_ref(), published, state.desktop.no_menu_path())
    }

    #[zbus(property)]
    fn set_menu(&mut self, path: OwnedObjectPath) {
        self.state().menu_path = Some(path);
    }

    #[zbus(property)]
    fn tool_tip(&self) -> ToolTip {
        let state = self.state();
        ToolTip::new(&state.tooltip_title, state.pixmaps.clone())
    }

    #[zbus(property)]
    fn set_tool_tip(&mut self, tooltip: ToolTip) {
        let mut state = self.state();
        state.tooltip_title = tooltip.title;
        state.pixmaps = tooltip.icon_pixmap;
    }
}
