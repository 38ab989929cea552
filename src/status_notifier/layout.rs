use std::collections::HashMap;

use serde::Serialize;
use zbus::zvariant::{Structure, StructureBuilder, Type, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleProperty {
    Checkmark,
}

impl ToggleProperty {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToggleProperty::Checkmark => "checkmark",
        }
    }
}

pub const LAYOUT_PROP_TYPE: &str = "type";
pub const LAYOUT_PROP_LABEL: &str = "label";
pub const LAYOUT_PROP_ENABLED: &str = "enabled";
pub const LAYOUT_PROP_VISIBLE: &str = "visible";
pub const LAYOUT_PROP_ICON_DATA: &str = "icon-data";
pub const LAYOUT_PROP_TOGGLE_TYPE: &str = "toggle-type";
pub const LAYOUT_PROP_TOGGLE_STATE: &str = "toggle-state";
pub const LAYOUT_PROP_CHILDREN_DISPLAY: &str = "children-display";

/// A dbusmenu item property, materialized from the menu model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutProperty {
    /// Only ever published as `"separator"`, standard items omit `type`.
    Separator,
    Label(String),
    Enabled(bool),
    Visible(bool),
    IconData(Vec<u8>),
    ToggleType(ToggleProperty),
    ToggleState(bool),
    /// Only ever published as `"submenu"`.
    ChildrenDisplay,
}

impl LayoutProperty {
    pub fn key(&self) -> &'static str {
        match self {
            LayoutProperty::Separator => LAYOUT_PROP_TYPE,
            LayoutProperty::Label(_) => LAYOUT_PROP_LABEL,
            LayoutProperty::Enabled(_) => LAYOUT_PROP_ENABLED,
            LayoutProperty::Visible(_) => LAYOUT_PROP_VISIBLE,
            LayoutProperty::IconData(_) => LAYOUT_PROP_ICON_DATA,
            LayoutProperty::ToggleType(_) => LAYOUT_PROP_TOGGLE_TYPE,
            LayoutProperty::ToggleState(_) => LAYOUT_PROP_TOGGLE_STATE,
            LayoutProperty::ChildrenDisplay => LAYOUT_PROP_CHILDREN_DISPLAY,
        }
    }

    pub fn to_value(&self) -> Value<'static> {
        match self {
            LayoutProperty::Separator => Value::from("separator"),
            LayoutProperty::Label(s) => Value::from(s.clone()),
            LayoutProperty::Enabled(b) | LayoutProperty::Visible(b) => Value::from(*b),
            LayoutProperty::IconData(data) => Value::from(data.clone()),
            LayoutProperty::ToggleType(t) => Value::from(t.as_str()),
            LayoutProperty::ToggleState(checked) => Value::from(i32::from(*checked)),
            LayoutProperty::ChildrenDisplay => Value::from("submenu"),
        }
    }
}

/// Keep only the properties named in `names`, or all of them when `names` is empty.
pub fn filter_properties(props: Vec<LayoutProperty>, names: &[String]) -> Vec<LayoutProperty> {
    if names.is_empty() {
        return props;
    }
    props
        .into_iter()
        .filter(|p| names.iter().any(|n| n == p.key()))
        .collect()
}

pub fn properties_to_map(props: &[LayoutProperty]) -> HashMap<String, Value<'static>> {
    props
        .iter()
        .map(|p| (p.key().to_string(), p.to_value()))
        .collect()
}

/// A node of the menu tree as returned by `GetLayout`, before wire encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutChild {
    pub id: u32,
    pub properties: Vec<LayoutProperty>,
    pub children: Vec<LayoutChild>,
}

impl LayoutChild {
    pub fn property(&self, key: &str) -> Option<&LayoutProperty> {
        self.properties.iter().find(|p| p.key() == key)
    }

    pub fn child_ids(&self) -> Vec<u32> {
        self.children.iter().map(|c| c.id).collect()
    }
}

/// Wire form of a layout node: `(ia{sv}av)`.
#[derive(Debug, Default, Serialize, Type)]
pub struct LayoutItem {
    pub id: i32,
    pub properties: HashMap<String, Value<'static>>,
    pub children: Vec<Value<'static>>,
}

impl From<LayoutChild> for LayoutItem {
    fn from(child: LayoutChild) -> Self {
        LayoutItem {
            id: child.id as i32,
            properties: properties_to_map(&child.properties),
            children: child
                .children
                .into_iter()
                .map(|c| Value::from(Structure::from(LayoutItem::from(c))))
                .collect(),
        }
    }
}

impl From<LayoutItem> for Structure<'static> {
    fn from(value: LayoutItem) -> Self {
        StructureBuilder::new()
            .add_field(value.id)
            .add_field(value.properties)
            .add_field(value.children)
            .build()
    }
}
