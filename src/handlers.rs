use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, RwLock},
};

pub type PointerHandler = Arc<dyn Fn(i32, i32) + Send + Sync>;
pub type ScrollHandler = Arc<dyn Fn(i32, Orientation) + Send + Sync>;
pub type MenuItemHandler = Arc<dyn Fn(u32) + Send + Sync>;
pub type ClickHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

impl std::str::FromStr for Orientation {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.to_lowercase().as_str() {
            "horizontal" => Ok(Orientation::Horizontal),
            "vertical" => Ok(Orientation::Vertical),
            _ => Err(()),
        }
    }
}

/// Run `f`, logging and swallowing a panic instead of unwinding into the caller.
pub fn guarded<R>(what: &str, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => Some(r),
        Err(payload) => {
            log::error!("recovered panic in {}: {}", what, panic_message(&*payload));
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Host callbacks for tray activation and menu selection.
#[derive(Default)]
pub struct Handlers {
    click: RwLock<Option<PointerHandler>>,
    double_click: RwLock<Option<PointerHandler>>,
    right_click: RwLock<Option<PointerHandler>>,
    scroll: RwLock<Option<ScrollHandler>>,
    menu_item_selected: RwLock<Option<MenuItemHandler>>,
}

fn get<T: Clone>(slot: &RwLock<Option<T>>) -> Option<T> {
    slot.read().unwrap_or_else(|e| e.into_inner()).clone()
}

fn set<T>(slot: &RwLock<Option<T>>, value: Option<T>) {
    *slot.write().unwrap_or_else(|e| e.into_inner()) = value;
}

impl Handlers {
    pub fn set_click(&self, handler: Option<PointerHandler>) {
        set(&self.click, handler);
    }

    pub fn set_double_click(&self, handler: Option<PointerHandler>) {
        set(&self.double_click, handler);
    }

    pub fn set_right_click(&self, handler: Option<PointerHandler>) {
        set(&self.right_click, handler);
    }

    pub fn set_scroll(&self, handler: Option<ScrollHandler>) {
        set(&self.scroll, handler);
    }

    pub fn set_menu_item_selected(&self, handler: Option<MenuItemHandler>) {
        set(&self.menu_item_selected, handler);
    }

    /// Each `fire_*` returns false when no handler is registered.
    pub fn fire_click(&self, x: i32, y: i32) -> bool {
        fire_pointer("click", get(&self.click), x, y)
    }

    /// Falls back to the click handler when no double-click handler is registered.
    pub fn fire_double_click(&self, x: i32, y: i32) -> bool {
        match get(&self.double_click) {
            Some(h) => fire_pointer("double click", Some(h), x, y),
            None => self.fire_click(x, y),
        }
    }

    pub fn fire_right_click(&self, x: i32, y: i32) -> bool {
        fire_pointer("right click", get(&self.right_click), x, y)
    }

    pub fn fire_scroll(&self, delta: i32, orientation: Orientation) -> bool {
        match get(&self.scroll) {
            Some(h) => {
                guarded("scroll handler", || h(delta, orientation));
                true
            }
            None => false,
        }
    }

    pub fn fire_menu_item_selected(&self, id: u32) -> bool {
        match get(&self.menu_item_selected) {
            Some(h) => {
                guarded("menu item handler", || h(id));
                true
            }
            None => false,
        }
    }
}

fn fire_pointer(what: &str, handler: Option<PointerHandler>, x: i32, y: i32) -> bool {
    match handler {
        Some(h) => {
            log::trace!("{} at ({}, {})", what, x, y);
            guarded(what, || h(x, y));
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn guarded_swallows_panics() {
        assert_eq!(guarded("ok", || 7), Some(7));
        assert_eq!(guarded("boom", || -> i32 { panic!("boom") }), None);
        assert_eq!(
            guarded("boom", || -> i32 { panic!("{} {}", "formatted", 1) }),
            None
        );
    }

    #[test]
    fn double_click_falls_back_to_click() {
        let handlers = Handlers::default();
        assert!(!handlers.fire_double_click(0, 0));

        let clicks = Arc::new(AtomicU32::new(0));
        handlers.set_click(Some(Arc::new({
            let clicks = clicks.clone();
            move |_: i32, _: i32| {
                clicks.fetch_add(1, Ordering::SeqCst);
            }
        })));
        assert!(handlers.fire_double_click(1, 2));
        assert_eq!(clicks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_still_counts_as_handled() {
        let handlers = Handlers::default();
        handlers.set_menu_item_selected(Some(Arc::new(|_: u32| panic!("host bug"))));
        assert!(handlers.fire_menu_item_selected(3));
    }

    #[test]
    fn orientation_parses_case_insensitively() {
        assert_eq!("Horizontal".parse(), Ok(Orientation::Horizontal));
        assert_eq!("vertical".parse(), Ok(Orientation::Vertical));
        assert_eq!("diagonal".parse::<Orientation>(), Err(()));
    }
}
