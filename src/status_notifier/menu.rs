use std::{collections::HashMap, fmt::Display, sync::Arc};

use zbus::zvariant::{OwnedValue, Value};

use super::layout::{properties_to_map, LayoutItem, LayoutProperty};
use crate::{
    handlers::{guarded, Handlers},
    menu::MenuModel,
};

/// Protocol version of `com.canonical.dbusmenu` we implement.
pub const DBUSMENU_VERSION: u32 = 3;

/// The menu never asks for attention, `notice` is not used.
pub const MENU_STATUS: &str = "normal";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Clicked,
    Hovered,
    Opened,
    Closed,
}

impl std::str::FromStr for Event {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "clicked" => Ok(Event::Clicked),
            "hovered" => Ok(Event::Hovered),
            "opened" => Ok(Event::Opened),
            "closed" => Ok(Event::Closed),
            _ => Err(()),
        }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Clicked => write!(f, "clicked"),
            Event::Hovered => write!(f, "hovered"),
            Event::Opened => write!(f, "opened"),
            Event::Closed => write!(f, "closed"),
        }
    }
}

type WireProperties = Vec<(i32, HashMap<String, Value<'static>>)>;

fn wire_properties(props: Vec<(u32, Vec<LayoutProperty>)>) -> WireProperties {
    props
        .into_iter()
        .map(|(id, props)| (id as i32, properties_to_map(&props)))
        .collect()
}

/// The `com.canonical.dbusmenu` object exported at [`super::names::MENU_OBJECT`].
pub struct DbusMenu {
    menu: Arc<MenuModel>,
    handlers: Arc<Handlers>,
}

impl DbusMenu {
    pub(crate) fn new(menu: Arc<MenuModel>, handlers: Arc<Handlers>) -> Self {
        Self { menu, handlers }
    }

    /// Handle one dbusmenu event, returns false if `id` is not a menu item.
    pub(crate) fn dispatch_event(&self, id: i32, event: &str) -> bool {
        let Ok(id) = u32::try_from(id) else {
            log::warn!("event {:?} for invalid menu item id {}", event, id);
            return false;
        };
        let Some(target) = self.menu.clicked(id) else {
            log::warn!("event {:?} for unknown menu item {}", event, id);
            return false;
        };
        match event.parse::<Event>() {
            Ok(Event::Clicked) if !target.enabled => {
                log::debug!("ignoring click on disabled menu item {}", id);
            }
            Ok(Event::Clicked) => {
                log::debug!("menu item {} clicked", id);
                if let Some(on_click) = target.on_click {
                    guarded("menu item click handler", on_click.as_ref());
                }
                self.handlers.fire_menu_item_selected(id);
            }
            Ok(other) => log::trace!("ignoring {} event on menu item {}", other, id),
            Err(()) => log::trace!("ignoring unknown event {:?} on menu item {}", event, id),
        }
        true
    }

    /// Items properties for the `ItemsPropertiesUpdated` signal.
    pub(crate) fn updated_properties(&self, ids: &[u32]) -> WireProperties {
        if ids.is_empty() {
            return Vec::new();
        }
        wire_properties(self.menu.group_properties(ids, &[]))
    }
}

#[zbus::interface(name = "com.canonical.dbusmenu")]
impl DbusMenu {
    /// GetLayout method
    #[zbus(out_args("revision", "layout"))]
    async fn get_layout(
        &self,
        parent_id: i32,
        recursion_depth: i32,
        property_names: Vec<String>,
    ) -> zbus::fdo::Result<(u32, LayoutItem)> {
        let layout = u32::try_from(parent_id)
            .ok()
            .and_then(|parent| self.menu.layout(parent, recursion_depth, &property_names));
        match layout {
            Some((revision, root)) => Ok((revision, LayoutItem::from(root))),
            None => Err(zbus::fdo::Error::InvalidArgs(format!(
                "no menu item with id {}",
                parent_id
            ))),
        }
    }

    /// GetGroupProperties method
    async fn get_group_properties(
        &self,
        ids: Vec<i32>,
        property_names: Vec<String>,
    ) -> WireProperties {
        let ids: Vec<u32> = ids
            .into_iter()
            .filter_map(|id| u32::try_from(id).ok())
            .collect();
        wire_properties(self.menu.group_properties(&ids, &property_names))
    }

    /// GetProperty method
    async fn get_property(&self, id: i32, name: &str) -> zbus::fdo::Result<OwnedValue> {
        let value = u32::try_from(id)
            .ok()
            .and_then(|id| self.menu.property(id, name))
            .ok_or_else(|| {
                zbus::fdo::Error::InvalidArgs(format!("item {} has no property {:?}", id, name))
            })?;
        OwnedValue::try_from(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Event method
    async fn event(&self, id: i32, event_id: &str, _data: Value<'_>, _timestamp: u32) {
        self.dispatch_event(id, event_id);
    }

    /// EventGroup method
    async fn event_group(&self, events: Vec<(i32, String, OwnedValue, u32)>) -> Vec<i32> {
        events
            .into_iter()
            .filter(|(id, event_id, _, _)| !self.dispatch_event(*id, event_id))
            .map(|(id, _, _, _)| id)
            .collect()
    }

    /// AboutToShow method
    async fn about_to_show(&self, _id: i32) -> bool {
        false
    }

    /// AboutToShowGroup method
    #[zbus(out_args("updates_needed", "id_errors"))]
    async fn about_to_show_group(&self, ids: Vec<i32>) -> (Vec<i32>, Vec<i32>) {
        let errors = ids
            .into_iter()
            .filter(|&id| id != 0 && !u32::try_from(id).is_ok_and(|id| self.menu.contains(id)))
            .collect();
        (Vec::new(), errors)
    }

    /// LayoutUpdated signal
    #[zbus(signal)]
    pub async fn layout_updated(
        ctxt: &zbus::SignalContext<'_>,
        revision: u32,
        parent: i32,
    ) -> zbus::Result<()>;

    /// ItemsPropertiesUpdated signal
    #[zbus(signal)]
    pub async fn items_properties_updated(
        ctxt: &zbus::SignalContext<'_>,
        updated_props: &[(i32, HashMap<String, Value<'_>>)],
        removed_props: &[(i32, Vec<String>)],
    ) -> zbus::Result<()>;

    #[zbus(property)]
    fn version(&self) -> u32 {
        DBUSMENU_VERSION
    }

    #[zbus(property)]
    fn text_direction(&self) -> String {
        "ltr".to_string()
    }

    #[zbus(property)]
    fn status(&self) -> String {
        MENU_STATUS.to_string()
    }

    #[zbus(property)]
    fn icon_theme_path(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    };

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::changes::ChangeSink;

    fn server() -> (DbusMenu, Arc<MenuModel>, Arc<Handlers>) {
        let menu = Arc::new(MenuModel::new(Arc::new(ChangeSink::default())));
        let handlers = Arc::new(Handlers::default());
        (DbusMenu::new(menu.clone(), handlers.clone()), menu, handlers)
    }

    #[test]
    fn click_runs_item_and_global_handlers() {
        let (server, menu, handlers) = server();
        let a = menu.add_item(0, "One", "", false, false);
        let sub = menu.add_item(a, "Sub", "", false, false);

        let item_clicks = Arc::new(AtomicU32::new(0));
        menu.set_click(
            sub,
            Some(Arc::new({
                let item_clicks = item_clicks.clone();
                move || {
                    item_clicks.fetch_add(1, Ordering::SeqCst);
                }
            })),
        );
        let selected = Arc::new(Mutex::new(Vec::new()));
        handlers.set_menu_item_selected(Some(Arc::new({
            let selected = selected.clone();
            move |id: u32| selected.lock().unwrap().push(id)
        })));

        assert!(server.dispatch_event(sub as i32, "clicked"));
        assert_eq!(item_clicks.load(Ordering::SeqCst), 1);
        assert_eq!(*selected.lock().unwrap(), vec![sub]);

        // hovering selects nothing
        assert!(server.dispatch_event(sub as i32, "hovered"));
        assert_eq!(*selected.lock().unwrap(), vec![sub]);
    }

    #[test]
    fn unknown_ids_are_reported_not_raised() {
        let (server, menu, handlers) = server();
        let selected = Arc::new(AtomicU32::new(0));
        handlers.set_menu_item_selected(Some(Arc::new({
            let selected = selected.clone();
            move |_: u32| {
                selected.fetch_add(1, Ordering::SeqCst);
            }
        })));
        let sep = menu.add_separator();

        assert!(!server.dispatch_event(77, "clicked"));
        assert!(!server.dispatch_event(-1, "clicked"));
        assert!(!server.dispatch_event(sep as i32, "clicked"));
        assert_eq!(selected.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disabled_items_are_not_selected() {
        let (server, menu, handlers) = server();
        let a = menu.add_item(0, "a", "", false, false);
        let item_clicks = Arc::new(AtomicU32::new(0));
        menu.set_click(
            a,
            Some(Arc::new({
                let item_clicks = item_clicks.clone();
                move || {
                    item_clicks.fetch_add(1, Ordering::SeqCst);
                }
            })),
        );
        let selected = Arc::new(AtomicU32::new(0));
        handlers.set_menu_item_selected(Some(Arc::new({
            let selected = selected.clone();
            move |_: u32| {
                selected.fetch_add(1, Ordering::SeqCst);
            }
        })));

        assert!(menu.disable(a));
        // still a known item, so no error goes back to the shell
        assert!(server.dispatch_event(a as i32, "clicked"));
        assert_eq!(item_clicks.load(Ordering::SeqCst), 0);
        assert_eq!(selected.load(Ordering::SeqCst), 0);

        assert!(menu.enable(a));
        assert!(server.dispatch_event(a as i32, "clicked"));
        assert_eq!(item_clicks.load(Ordering::SeqCst), 1);
        assert_eq!(selected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_item_handler_still_selects() {
        let (server, menu, handlers) = server();
        let a = menu.add_item(0, "a", "", false, false);
        menu.set_click(a, Some(Arc::new(|| panic!("host bug"))));
        let selected = Arc::new(AtomicU32::new(0));
        handlers.set_menu_item_selected(Some(Arc::new({
            let selected = selected.clone();
            move |id: u32| selected.store(id, Ordering::SeqCst)
        })));

        assert!(server.dispatch_event(a as i32, "clicked"));
        assert_eq!(selected.load(Ordering::SeqCst), a);
    }

    #[test]
    fn updated_properties_are_wire_maps() {
        let (server, menu, _) = server();
        let a = menu.add_item(0, "a", "", true, false);
        let props = server.updated_properties(&[a]);
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].0, a as i32);
        assert_eq!(props[0].1.get("label"), Some(&Value::from("a")));
        assert_eq!(props[0].1.get("toggle-state"), Some(&Value::from(0i32)));
        assert!(server.updated_properties(&[]).is_empty());
    }

    #[test]
    fn event_names_parse() {
        assert_eq!("clicked".parse(), Ok(Event::Clicked));
        assert_eq!("closed".parse(), Ok(Event::Closed));
        assert_eq!("dragged".parse::<Event>(), Err(()));
        assert_eq!(Event::Opened.to_string(), "opened");
    }
}
