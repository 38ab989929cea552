use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use zbus::zvariant::Value;

use crate::{
    changes::{ChangeSink, TrayChange},
    handlers::ClickHandler,
    status_notifier::layout::{
        filter_properties, LayoutChild, LayoutProperty, ToggleProperty,
        LAYOUT_PROP_ICON_DATA,
    },
};

/// Id of the implicit root node, never handed out to items.
pub const ROOT_ID: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Standard,
    Separator,
}

struct MenuItem {
    kind: ItemKind,
    title: String,
    tooltip: String,
    disabled: bool,
    checkable: bool,
    checked: bool,
    hidden: bool,
    icon: Option<Vec<u8>>,
    parent: Option<u32>,
    children: Vec<u32>,
    on_click: Option<ClickHandler>,
}

impl MenuItem {
    fn new(kind: ItemKind, parent: Option<u32>) -> Self {
        Self {
            kind,
            title: String::new(),
            tooltip: String::new(),
            disabled: false,
            checkable: false,
            checked: false,
            hidden: false,
            icon: None,
            parent,
            children: Vec::new(),
            on_click: None,
        }
    }

    /// `submenu` says whether any child is visible.
    fn properties(&self, submenu: bool) -> Vec<LayoutProperty> {
        if self.kind == ItemKind::Separator {
            return vec![
                LayoutProperty::Separator,
                LayoutProperty::Visible(!self.hidden),
            ];
        }
        let mut props = vec![
            LayoutProperty::Label(self.title.clone()),
            LayoutProperty::Enabled(!self.disabled),
            LayoutProperty::Visible(!self.hidden),
        ];
        if self.checkable {
            props.push(LayoutProperty::ToggleType(ToggleProperty::Checkmark));
            props.push(LayoutProperty::ToggleState(self.checked));
        }
        if submenu {
            props.push(LayoutProperty::ChildrenDisplay);
        }
        if let Some(icon) = &self.icon {
            props.push(LayoutProperty::IconData(icon.clone()));
        }
        props
    }
}

#[derive(Default)]
struct MenuTree {
    items: HashMap<u32, MenuItem>,
    root: Vec<u32>,
    revision: u32,
}

impl MenuTree {
    fn has_visible(&self, ids: &[u32]) -> bool {
        ids.iter()
            .any(|id| self.items.get(id).is_some_and(|item| !item.hidden))
    }

    fn root_properties(&self) -> Vec<LayoutProperty> {
        if self.has_visible(&self.root) {
            vec![LayoutProperty::ChildrenDisplay]
        } else {
            Vec::new()
        }
    }

    fn properties_of(&self, id: u32) -> Option<Vec<LayoutProperty>> {
        if id == ROOT_ID {
            return Some(self.root_properties());
        }
        self.items
            .get(&id)
            .map(|item| item.properties(self.has_visible(&item.children)))
    }

    fn children_of(&self, id: u32) -> Option<&[u32]> {
        if id == ROOT_ID {
            return Some(&self.root);
        }
        self.items.get(&id).map(|item| item.children.as_slice())
    }

    fn node(&self, id: u32, depth: i32, names: &[String]) -> Option<LayoutChild> {
        let properties = filter_properties(self.properties_of(id)?, names);
        let children = if depth == 0 {
            Vec::new()
        } else {
            self.children_of(id)
                .unwrap_or_default()
                .iter()
                .filter(|&&child| self.items.get(&child).is_some_and(|item| !item.hidden))
                .filter_map(|&child| self.node(child, depth - 1, names))
                .collect()
        };
        Some(LayoutChild {
            id,
            properties,
            children,
        })
    }
}

/// The tray menu: a tree of items indexed by id, rendered on demand for dbusmenu.
///
/// Every change is pushed to the [`ChangeSink`] while the write lock is held, so the
/// forwarded `LayoutUpdated` revisions come out in increasing order.
pub struct MenuModel {
    tree: RwLock<MenuTree>,
    next_id: AtomicU32,
    changes: Arc<ChangeSink>,
}

impl MenuModel {
    pub(crate) fn new(changes: Arc<ChangeSink>) -> Self {
        Self {
            tree: RwLock::new(MenuTree {
                revision: 1,
                ..Default::default()
            }),
            next_id: AtomicU32::new(0),
            changes,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MenuTree> {
        self.tree.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MenuTree> {
        self.tree.write().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn layout_changed(&self, tree: &mut MenuTree) {
        tree.revision += 1;
        self.changes.send(TrayChange::Layout {
            revision: tree.revision,
            parent: ROOT_ID,
        });
    }

    /// Add an item under `parent` (0 for the root).
    ///
    /// Returns the new id, or 0 when `parent` is not a known item.
    pub fn add_item(
        &self,
        parent: u32,
        title: &str,
        tooltip: &str,
        checkable: bool,
        checked: bool,
    ) -> u32 {
        let mut tree = self.write();
        if parent != ROOT_ID
            && !tree
                .items
                .get(&parent)
                .is_some_and(|item| item.kind == ItemKind::Standard)
        {
            log::debug!("can't add {:?}: no parent menu item {}", title, parent);
            return 0;
        }
        let id = self.next_id();
        let mut item = MenuItem::new(ItemKind::Standard, (parent != ROOT_ID).then_some(parent));
        item.title = title.to_string();
        item.tooltip = tooltip.to_string();
        item.checkable = checkable;
        item.checked = checked;
        tree.items.insert(id, item);
        if parent == ROOT_ID {
            tree.root.push(id);
        } else if let Some(parent_item) = tree.items.get_mut(&parent) {
            parent_item.children.push(id);
        }
        self.layout_changed(&mut tree);
        id
    }

    pub fn add_separator(&self) -> u32 {
        let mut tree = self.write();
        let id = self.next_id();
        tree.items.insert(id, MenuItem::new(ItemKind::Separator, None));
        tree.root.push(id);
        self.layout_changed(&mut tree);
        id
    }

    /// Drop every item. Ids are not reused afterwards.
    pub fn reset(&self) {
        let mut tree = self.write();
        tree.items.clear();
        tree.root.clear();
        self.layout_changed(&mut tree);
    }

    /// Apply `f` to the item with `id`, then notify the properties it touched.
    ///
    /// `f` returns the property keys it removed from the item.
    fn update(
        &self,
        id: u32,
        structural: bool,
        f: impl FnOnce(&mut MenuItem) -> Vec<&'static str>,
    ) -> bool {
        let mut tree = self.write();
        let Some(item) = tree
            .items
            .get_mut(&id)
            .filter(|item| item.kind == ItemKind::Standard)
        else {
            log::debug!("no menu item with id {}", id);
            return false;
        };
        let removed = f(item);
        if structural {
            self.layout_changed(&mut tree);
        }
        self.changes.send(TrayChange::ItemsProperties {
            updated: vec![id],
            removed: if removed.is_empty() {
                Vec::new()
            } else {
                vec![(id, removed)]
            },
        });
        true
    }

    pub fn set_title(&self, id: u32, title: &str) -> bool {
        self.update(id, false, |item| {
            item.title = title.to_string();
            Vec::new()
        })
    }

    /// Stored for the host, dbusmenu has no per-item tooltip.
    pub fn set_tooltip(&self, id: u32, tooltip: &str) -> bool {
        self.update(id, false, |item| {
            item.tooltip = tooltip.to_string();
            Vec::new()
        })
    }

    pub fn enable(&self, id: u32) -> bool {
        self.update(id, false, |item| {
            item.disabled = false;
            Vec::new()
        })
    }

    pub fn disable(&self, id: u32) -> bool {
        self.update(id, false, |item| {
            item.disabled = true;
            Vec::new()
        })
    }

    pub fn show(&self, id: u32) -> bool {
        self.update(id, true, |item| {
            item.hidden = false;
            Vec::new()
        })
    }

    pub fn hide(&self, id: u32) -> bool {
        self.update(id, true, |item| {
            item.hidden = true;
            Vec::new()
        })
    }

    pub fn check(&self, id: u32) -> bool {
        self.update(id, false, |item| {
            item.checked = true;
            Vec::new()
        })
    }

    pub fn uncheck(&self, id: u32) -> bool {
        self.update(id, false, |item| {
            item.checked = false;
            Vec::new()
        })
    }

    /// Set the raw icon bytes of an item, an empty slice clears it.
    pub fn set_icon(&self, id: u32, icon: &[u8]) -> bool {
        self.update(id, false, |item| {
            if icon.is_empty() {
                if item.icon.take().is_some() {
                    return vec![LAYOUT_PROP_ICON_DATA];
                }
            } else {
                item.icon = Some(icon.to_vec());
            }
            Vec::new()
        })
    }

    pub fn set_click(&self, id: u32, handler: Option<ClickHandler>) -> bool {
        let mut tree = self.write();
        match tree
            .items
            .get_mut(&id)
            .filter(|item| item.kind == ItemKind::Standard)
        {
            Some(item) => {
                item.on_click = handler;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.read()
            .items
            .get(&id)
            .is_some_and(|item| item.kind == ItemKind::Standard)
    }

    pub fn parent_of(&self, id: u32) -> Option<u32> {
        self.read().items.get(&id).and_then(|item| item.parent)
    }

    pub fn title_of(&self, id: u32) -> Option<String> {
        self.read().items.get(&id).map(|item| item.title.clone())
    }

    pub fn tooltip_of(&self, id: u32) -> Option<String> {
        self.read().items.get(&id).map(|item| item.tooltip.clone())
    }

    pub fn revision(&self) -> u32 {
        self.read().revision
    }

    /// Whether the root has at least one child, i.e. there is a menu to advertise.
    pub fn is_published(&self) -> bool {
        !self.read().root.is_empty()
    }

    /// Render the subtree under `parent` down to `depth` levels (-1 for all).
    ///
    /// Hidden items are left out. Returns `None` for an unknown `parent`.
    pub fn layout(&self, parent: u32, depth: i32, names: &[String]) -> Option<(u32, LayoutChild)> {
        let tree = self.read();
        let node = tree.node(parent, depth, names)?;
        Some((tree.revision, node))
    }

    /// Properties of every known id in `ids`, all items when `ids` is empty.
    pub fn group_properties(
        &self,
        ids: &[u32],
        names: &[String],
    ) -> Vec<(u32, Vec<LayoutProperty>)> {
        let tree = self.read();
        let mut ids = ids.to_vec();
        if ids.is_empty() {
            ids = tree.items.keys().copied().collect();
            ids.sort_unstable();
        }
        ids.into_iter()
            .filter_map(|id| {
                let props = tree.properties_of(id)?;
                Some((id, filter_properties(props, names)))
            })
            .collect()
    }

    pub fn property(&self, id: u32, name: &str) -> Option<Value<'static>> {
        self.read()
            .properties_of(id)?
            .into_iter()
            .find(|p| p.key() == name)
            .map(|p| p.to_value())
    }

    /// Look up a clicked item, `None` if the id is unknown.
    pub fn clicked(&self, id: u32) -> Option<ClickTarget> {
        let tree = self.read();
        let item = tree
            .items
            .get(&id)
            .filter(|item| item.kind == ItemKind::Standard)?;
        Some(ClickTarget {
            enabled: !item.disabled,
            on_click: item.on_click.clone(),
        })
    }
}

/// What a click on a known menu item should run.
pub struct ClickTarget {
    /// Disabled items produce no selection.
    pub enabled: bool,
    pub on_click: Option<ClickHandler>,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::status_notifier::layout::{
        LAYOUT_PROP_CHILDREN_DISPLAY, LAYOUT_PROP_LABEL, LAYOUT_PROP_VISIBLE,
    };

    fn model() -> MenuModel {
        MenuModel::new(Arc::new(ChangeSink::default()))
    }

    #[test]
    fn ids_are_unique_increasing_and_non_zero() {
        let menu = model();
        let a = menu.add_item(0, "a", "", false, false);
        let sep = menu.add_separator();
        let b = menu.add_item(a, "b", "", true, false);
        let c = menu.add_item(0, "c", "", false, false);
        assert_eq!(vec![a, sep, b, c], vec![1, 2, 3, 4]);

        menu.reset();
        assert_eq!(menu.add_item(0, "d", "", false, false), 5);
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let menu = model();
        let revision = menu.revision();
        assert_eq!(menu.add_item(42, "orphan", "", false, false), 0);
        let sep = menu.add_separator();
        assert_eq!(menu.add_item(sep, "under separator", "", false, false), 0);
        assert_eq!(menu.revision(), revision + 1);
    }

    #[test]
    fn structural_changes_bump_revision() {
        let menu = model();
        let mut revisions = vec![menu.revision()];
        let id = menu.add_item(0, "a", "", false, false);
        revisions.push(menu.revision());
        menu.add_separator();
        revisions.push(menu.revision());
        menu.hide(id);
        revisions.push(menu.revision());
        menu.show(id);
        revisions.push(menu.revision());
        menu.reset();
        revisions.push(menu.revision());

        assert!(revisions.windows(2).all(|w| w[0] < w[1]), "{:?}", revisions);
    }

    #[test]
    fn property_changes_keep_revision() {
        let menu = model();
        let id = menu.add_item(0, "a", "", true, false);
        let revision = menu.revision();
        assert!(menu.set_title(id, "b"));
        assert!(menu.disable(id));
        assert!(menu.check(id));
        assert!(menu.set_tooltip(id, "tip"));
        assert_eq!(menu.revision(), revision);
        assert_eq!(menu.title_of(id).as_deref(), Some("b"));
        assert_eq!(menu.tooltip_of(id).as_deref(), Some("tip"));
        assert_eq!(menu.property(id, "label"), Some(Value::from("b")));
        assert_eq!(menu.property(id, "enabled"), Some(Value::from(false)));
        assert_eq!(menu.property(id, "toggle-state"), Some(Value::from(1i32)));
    }

    #[test]
    fn menu_round_trip() {
        let menu = model();
        let a = menu.add_item(0, "One", "", false, false);
        let sub = menu.add_item(a, "Sub", "", false, false);
        assert_eq!((a, sub), (1, 2));

        let clicked = Arc::new(AtomicBool::new(false));
        assert!(menu.set_click(
            sub,
            Some(Arc::new({
                let clicked = clicked.clone();
                move || clicked.store(true, Ordering::SeqCst)
            }))
        ));

        let (revision, root) = menu.layout(0, -1, &[]).unwrap();
        assert!(revision >= 2);
        assert_eq!(root.id, 0);
        assert_eq!(root.child_ids(), vec![1]);
        assert_eq!(root.children[0].child_ids(), vec![2]);
        assert_eq!(
            root.children[0].property("children-display"),
            Some(&LayoutProperty::ChildrenDisplay)
        );

        let target = menu.clicked(sub).unwrap();
        assert!(target.enabled);
        let handler = target.on_click.unwrap();
        handler();
        assert!(clicked.load(Ordering::SeqCst));
        assert_eq!(menu.parent_of(sub), Some(a));
    }

    #[test]
    fn depth_truncates_tree() {
        let menu = model();
        let a = menu.add_item(0, "a", "", false, false);
        menu.add_item(a, "b", "", false, false);

        let (_, root) = menu.layout(0, 0, &[]).unwrap();
        assert!(root.children.is_empty());

        let (_, root) = menu.layout(0, 1, &[]).unwrap();
        assert_eq!(root.child_ids(), vec![a]);
        assert!(root.children[0].children.is_empty());

        let (_, sub) = menu.layout(a, -1, &[]).unwrap();
        assert_eq!(sub.id, a);
        assert_eq!(sub.children.len(), 1);

        assert!(menu.layout(99, -1, &[]).is_none());
    }

    #[test]
    fn hidden_items_leave_the_layout() {
        let menu = model();
        let a = menu.add_item(0, "a", "", false, false);
        let b = menu.add_item(0, "b", "", false, false);
        assert!(menu.hide(a));

        let (_, root) = menu.layout(0, -1, &[]).unwrap();
        assert_eq!(root.child_ids(), vec![b]);
        assert_eq!(menu.property(a, LAYOUT_PROP_VISIBLE), Some(Value::from(false)));

        assert!(menu.show(a));
        let (_, root) = menu.layout(0, -1, &[]).unwrap();
        assert_eq!(root.child_ids(), vec![a, b]);
    }

    #[test]
    fn submenu_flag_needs_a_visible_child() {
        let menu = model();
        let a = menu.add_item(0, "a", "", false, false);
        let b = menu.add_item(a, "b", "", false, false);
        assert_eq!(
            menu.property(a, LAYOUT_PROP_CHILDREN_DISPLAY),
            Some(Value::from("submenu"))
        );

        assert!(menu.hide(b));
        assert_eq!(menu.property(a, LAYOUT_PROP_CHILDREN_DISPLAY), None);

        assert!(menu.hide(a));
        let (_, root) = menu.layout(0, 0, &[]).unwrap();
        assert!(root.properties.is_empty());

        assert!(menu.show(b));
        assert_eq!(
            menu.property(a, LAYOUT_PROP_CHILDREN_DISPLAY),
            Some(Value::from("submenu"))
        );
    }

    #[test]
    fn requested_names_limit_properties() {
        let menu = model();
        let a = menu.add_item(0, "a", "", true, true);
        let names = vec![LAYOUT_PROP_LABEL.to_string()];
        let (_, root) = menu.layout(0, -1, &names).unwrap();
        assert_eq!(
            root.children[0].properties,
            vec![LayoutProperty::Label("a".into())]
        );

        let all = menu.group_properties(&[a, 77], &[]);
        assert_eq!(all.len(), 1);
        assert_eq!(
            all[0].1,
            vec![
                LayoutProperty::Label("a".into()),
                LayoutProperty::Enabled(true),
                LayoutProperty::Visible(true),
                LayoutProperty::ToggleType(ToggleProperty::Checkmark),
                LayoutProperty::ToggleState(true),
            ]
        );
    }

    #[test]
    fn separators_render_but_are_not_items() {
        let menu = model();
        let sep = menu.add_separator();
        assert!(!menu.contains(sep));
        assert!(!menu.set_title(sep, "nope"));
        assert!(menu.clicked(sep).is_none());
        assert_eq!(menu.property(sep, "type"), Some(Value::from("separator")));
        assert!(menu.is_published());
    }

    #[test]
    fn misses_return_false() {
        let menu = model();
        assert!(!menu.set_title(9999, "x"));
        assert!(!menu.enable(9999));
        assert!(!menu.hide(9999));
        assert!(!menu.set_icon(9999, &[1, 2, 3]));
        assert!(!menu.set_click(9999, None));
        assert!(menu.clicked(9999).is_none());
        assert!(menu.property(9999, "label").is_none());
    }

    #[test]
    fn changes_are_forwarded_in_order() {
        let sink = Arc::new(ChangeSink::default());
        let mut rx = sink.attach();
        let menu = MenuModel::new(sink);

        let a = menu.add_item(0, "a", "", false, false);
        menu.set_icon(a, &[1, 2, 3]);
        menu.set_icon(a, &[]);

        assert_eq!(
            rx.try_recv(),
            Ok(TrayChange::Layout {
                revision: 2,
                parent: 0
            })
        );
        assert_eq!(
            rx.try_recv(),
            Ok(TrayChange::ItemsProperties {
                updated: vec![a],
                removed: vec![],
            })
        );
        assert_eq!(
            rx.try_recv(),
            Ok(TrayChange::ItemsProperties {
                updated: vec![a],
                removed: vec![(a, vec![LAYOUT_PROP_ICON_DATA])],
            })
        );
    }

    #[test]
    fn reset_clears_everything() {
        let menu = model();
        let a = menu.add_item(0, "a", "", false, false);
        menu.add_item(a, "b", "", false, false);
        menu.reset();
        assert!(!menu.is_published());
        assert!(!menu.contains(a));
        let (_, root) = menu.layout(0, -1, &[]).unwrap();
        assert!(root.children.is_empty());
        assert!(root.properties.is_empty());
    }
}
