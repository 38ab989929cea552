//! C ABI for hosts that can't link against Rust directly.
//!
//! Strings are NUL terminated UTF-8 and bytes are copied before the call
//! returns, the host keeps ownership of everything it passes in. Mutations are
//! ignored while the tray isn't running, with the exception of
//! [`Systray_AddMenuItem`].

use std::{
    ffi::CStr,
    os::raw::{c_char, c_int},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
};

use crate::{
    config::TrayConfig,
    handlers::{guarded, MenuItemHandler, PointerHandler},
    tray::{ExternalLoop, LifecycleHandler, Tray},
};

pub type VoidCallback = extern "C" fn();
pub type MenuItemCallback = extern "C" fn(u32);

#[derive(Default, Clone, Copy)]
struct HostCallbacks {
    on_ready: Option<VoidCallback>,
    on_exit: Option<VoidCallback>,
    on_click: Option<VoidCallback>,
    on_rclick: Option<VoidCallback>,
    on_menu_item: Option<MenuItemCallback>,
}

static RUNNING: AtomicBool = AtomicBool::new(false);
static CALLBACKS: RwLock<HostCallbacks> = RwLock::new(HostCallbacks {
    on_ready: None,
    on_exit: None,
    on_click: None,
    on_rclick: None,
    on_menu_item: None,
});
static EXTERNAL: Mutex<Option<ExternalLoop<'static>>> = Mutex::new(None);

fn running() -> bool {
    RUNNING.load(Ordering::SeqCst)
}

fn callbacks() -> HostCallbacks {
    *CALLBACKS.read().unwrap_or_else(|e| e.into_inner())
}

fn call(cb: Option<VoidCallback>) {
    if let Some(cb) = cb {
        cb();
    }
}

fn lifecycle_handlers() -> (LifecycleHandler, LifecycleHandler) {
    let on_ready: LifecycleHandler = Arc::new(|| {
        RUNNING.store(true, Ordering::SeqCst);
        call(callbacks().on_ready);
    });
    let on_exit: LifecycleHandler = Arc::new(|| {
        RUNNING.store(false, Ordering::SeqCst);
        call(callbacks().on_exit);
    });
    (on_ready, on_exit)
}

/// Copy a C string, `None` for a null pointer.
///
/// # Safety
/// `ptr` must be null or point to a NUL terminated string.
unsafe fn c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL terminated per the caller's contract
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Borrow `len` bytes at `ptr`, `None` for a null pointer or a non-positive length.
///
/// # Safety
/// `ptr` must be null or valid for reads of `len` bytes.
unsafe fn c_bytes<'a>(ptr: *const c_char, len: i32) -> Option<&'a [u8]> {
    if ptr.is_null() || len <= 0 {
        return None;
    }
    // SAFETY: non-null and readable for len bytes per the caller's contract
    Some(unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize) })
}

/// Store the host callbacks and route tray events to them.
///
/// Double clicks are reported through `on_click`.
#[no_mangle]
pub extern "C" fn Systray_InitCallbacks(
    on_ready: Option<VoidCallback>,
    on_exit: Option<VoidCallback>,
    on_click: Option<VoidCallback>,
    on_rclick: Option<VoidCallback>,
    on_menu_item: Option<MenuItemCallback>,
) {
    guarded("Systray_InitCallbacks", || {
        *CALLBACKS.write().unwrap_or_else(|e| e.into_inner()) = HostCallbacks {
            on_ready,
            on_exit,
            on_click,
            on_rclick,
            on_menu_item,
        };

        // unset callbacks leave the slot empty, so the shell falls back to its default
        let handlers = Tray::global().handlers();
        let click: Option<PointerHandler> = on_click.map(|_| -> PointerHandler {
            Arc::new(|_: i32, _: i32| call(callbacks().on_click))
        });
        handlers.set_click(click.clone());
        handlers.set_double_click(click);
        handlers.set_right_click(on_rclick.map(|_| -> PointerHandler {
            Arc::new(|_: i32, _: i32| call(callbacks().on_rclick))
        }));
        handlers.set_menu_item_selected(on_menu_item.map(|_| -> MenuItemHandler {
            Arc::new(|id: u32| {
                if let Some(cb) = callbacks().on_menu_item {
                    cb(id);
                }
            })
        }));
    });
}

/// Serve the tray on the calling thread until [`Systray_Quit`].
#[no_mangle]
pub extern "C" fn Systray_Run() {
    guarded("Systray_Run", || {
        let (on_ready, on_exit) = lifecycle_handlers();
        Tray::global().run(Some(on_ready), Some(on_exit));
    });
}

/// Register the lifecycle callbacks for a host that drives its own loop
/// through [`Systray_NativeStart`] and [`Systray_NativeEnd`].
#[no_mangle]
pub extern "C" fn Systray_PrepareExternalLoop() {
    guarded("Systray_PrepareExternalLoop", || {
        let (on_ready, on_exit) = lifecycle_handlers();
        let external = Tray::global().run_with_external_loop(Some(on_ready), Some(on_exit));
        *EXTERNAL.lock().unwrap_or_else(|e| e.into_inner()) = Some(external);
    });
}

#[no_mangle]
pub extern "C" fn Systray_NativeStart() {
    guarded("Systray_NativeStart", || {
        let external = *EXTERNAL.lock().unwrap_or_else(|e| e.into_inner());
        match external {
            Some(external) => external.start(),
            None => log::debug!("Systray_NativeStart before Systray_PrepareExternalLoop"),
        }
    });
}

/// Tear the tray down. A later start needs [`Systray_PrepareExternalLoop`] again.
#[no_mangle]
pub extern "C" fn Systray_NativeEnd() {
    guarded("Systray_NativeEnd", || {
        // taken out first, the exit callback may call back into us
        let external = EXTERNAL.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(external) = external {
            external.end();
        }
        RUNNING.store(false, Ordering::SeqCst);
    });
}

#[no_mangle]
pub extern "C" fn Systray_Quit() {
    guarded("Systray_Quit", || {
        RUNNING.store(false, Ordering::SeqCst);
        Tray::global().quit();
    });
}

/// # Safety
/// `icon` must be null or valid for reads of `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn Systray_SetIcon(icon: *const c_char, len: i32) {
    guarded("Systray_SetIcon", || {
        if !running() {
            return;
        }
        // SAFETY: forwarded from our caller
        if let Some(icon) = unsafe { c_bytes(icon, len) } {
            Tray::global().set_icon(icon);
        }
    });
}

/// # Safety
/// `title` must be null or a NUL terminated string.
#[no_mangle]
pub unsafe extern "C" fn Systray_SetTitle(title: *const c_char) {
    guarded("Systray_SetTitle", || {
        if !running() {
            return;
        }
        // SAFETY: forwarded from our caller
        if let Some(title) = unsafe { c_string(title) } {
            Tray::global().set_title(&title);
        }
    });
}

/// # Safety
/// `tooltip` must be null or a NUL terminated string.
#[no_mangle]
pub unsafe extern "C" fn Systray_SetTooltip(tooltip: *const c_char) {
    guarded("Systray_SetTooltip", || {
        if !running() {
            return;
        }
        // SAFETY: forwarded from our caller
        if let Some(tooltip) = unsafe { c_string(tooltip) } {
            Tray::global().set_tooltip(&tooltip);
        }
    });
}

/// Add a root item. Allowed before the tray runs, so hosts can build the
/// menu up front. Null strings are taken as empty.
///
/// # Safety
/// `title` and `tooltip` must each be null or a NUL terminated string.
#[no_mangle]
pub unsafe extern "C" fn Systray_AddMenuItem(title: *const c_char, tooltip: *const c_char) -> u32 {
    guarded("Systray_AddMenuItem", || {
        // SAFETY: forwarded from our caller
        let (title, tooltip) = unsafe { (c_string(title), c_string(tooltip)) };
        Tray::global().menu().add_item(
            0,
            title.as_deref().unwrap_or_default(),
            tooltip.as_deref().unwrap_or_default(),
            false,
            false,
        )
    })
    .unwrap_or(0)
}

/// # Safety
/// `title` and `tooltip` must each be null or a NUL terminated string.
#[no_mangle]
pub unsafe extern "C" fn Systray_AddMenuItemCheckbox(
    title: *const c_char,
    tooltip: *const c_char,
    checked: c_int,
) -> u32 {
    // SAFETY: forwarded from our caller
    unsafe { add_gated("Systray_AddMenuItemCheckbox", 0, title, tooltip, true, checked) }
}

/// Returns 0 when `parent_id` is not a menu item.
///
/// # Safety
/// `title` and `tooltip` must each be null or a NUL terminated string.
#[no_mangle]
pub unsafe extern "C" fn Systray_AddSubMenuItem(
    parent_id: u32,
    title: *const c_char,
    tooltip: *const c_char,
) -> u32 {
    if parent_id == 0 {
        return 0;
    }
    // SAFETY: forwarded from our caller
    unsafe { add_gated("Systray_AddSubMenuItem", parent_id, title, tooltip, false, 0) }
}

/// # Safety
/// `title` and `tooltip` must each be null or a NUL terminated string.
#[no_mangle]
pub unsafe extern "C" fn Systray_AddSubMenuItemCheckbox(
    parent_id: u32,
    title: *const c_char,
    tooltip: *const c_char,
    checked: c_int,
) -> u32 {
    if parent_id == 0 {
        return 0;
    }
    // SAFETY: forwarded from our caller
    unsafe {
        add_gated(
            "Systray_AddSubMenuItemCheckbox",
            parent_id,
            title,
            tooltip,
            true,
            checked,
        )
    }
}

/// # Safety
/// `title` and `tooltip` must each be null or a NUL terminated string.
unsafe fn add_gated(
    what: &str,
    parent: u32,
    title: *const c_char,
    tooltip: *const c_char,
    checkable: bool,
    checked: c_int,
) -> u32 {
    guarded(what, || {
        if !running() {
            return 0;
        }
        // SAFETY: forwarded from our caller
        let (title, tooltip) = unsafe { (c_string(title), c_string(tooltip)) };
        Tray::global().menu().add_item(
            parent,
            title.as_deref().unwrap_or_default(),
            tooltip.as_deref().unwrap_or_default(),
            checkable,
            checked != 0,
        )
    })
    .unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn Systray_AddSeparator() {
    guarded("Systray_AddSeparator", || {
        if running() {
            Tray::global().menu().add_separator();
        }
    });
}

#[no_mangle]
pub extern "C" fn Systray_ResetMenu() {
    guarded("Systray_ResetMenu", || {
        if running() {
            Tray::global().menu().reset();
        }
    });
}

/// Returns 1 if the title was set, 0 otherwise.
///
/// # Safety
/// `title` must be null or a NUL terminated string.
#[no_mangle]
pub unsafe extern "C" fn Systray_MenuItem_SetTitle(id: u32, title: *const c_char) -> c_int {
    guarded("Systray_MenuItem_SetTitle", || {
        if !running() {
            return 0;
        }
        // SAFETY: forwarded from our caller
        let Some(title) = (unsafe { c_string(title) }) else {
            return 0;
        };
        c_int::from(Tray::global().menu().set_title(id, &title))
    })
    .unwrap_or(0)
}

fn gated_item_op(what: &str, id: u32, op: impl FnOnce(&crate::menu::MenuModel, u32) -> bool) {
    guarded(what, || {
        if running() {
            op(Tray::global().menu(), id);
        }
    });
}

#[no_mangle]
pub extern "C" fn Systray_MenuItem_Enable(id: u32) {
    gated_item_op("Systray_MenuItem_Enable", id, |menu, id| menu.enable(id));
}

#[no_mangle]
pub extern "C" fn Systray_MenuItem_Disable(id: u32) {
    gated_item_op("Systray_MenuItem_Disable", id, |menu, id| menu.disable(id));
}

#[no_mangle]
pub extern "C" fn Systray_MenuItem_Show(id: u32) {
    gated_item_op("Systray_MenuItem_Show", id, |menu, id| menu.show(id));
}

#[no_mangle]
pub extern "C" fn Systray_MenuItem_Hide(id: u32) {
    gated_item_op("Systray_MenuItem_Hide", id, |menu, id| menu.hide(id));
}

#[no_mangle]
pub extern "C" fn Systray_MenuItem_Check(id: u32) {
    gated_item_op("Systray_MenuItem_Check", id, |menu, id| menu.check(id));
}

#[no_mangle]
pub extern "C" fn Systray_MenuItem_Uncheck(id: u32) {
    gated_item_op("Systray_MenuItem_Uncheck", id, |menu, id| menu.uncheck(id));
}

/// # Safety
/// `icon` must be null or valid for reads of `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn Systray_SetMenuItemIcon(icon: *const c_char, len: i32, id: u32) {
    // SAFETY: forwarded from our caller
    let Some(icon) = (unsafe { c_bytes(icon, len) }) else {
        return;
    };
    gated_item_op("Systray_SetMenuItemIcon", id, |menu, id| {
        menu.set_icon(id, icon)
    });
}

#[no_mangle]
pub extern "C" fn Systray_SetDoubleClickInterval(ms: i64) {
    guarded("Systray_SetDoubleClickInterval", || {
        Tray::global().set_double_click_interval(ms);
    });
}

/// Write the coordinates of the last click. Null pointers are skipped.
///
/// # Safety
/// `x` and `y` must each be null or valid for a write of an `int32_t`.
#[no_mangle]
pub unsafe extern "C" fn Systray_GetLastClickXY(x: *mut i32, y: *mut i32) {
    guarded("Systray_GetLastClickXY", || {
        let (last_x, last_y) = Tray::global().last_click_xy();
        // SAFETY: checked for null, writable per the caller's contract
        unsafe {
            if !x.is_null() {
                *x = last_x;
            }
            if !y.is_null() {
                *y = last_y;
            }
        }
    });
}

/// Apply a JSON config document. Returns 1 on success, 0 if it was rejected.
///
/// # Safety
/// `json` must be null or a NUL terminated string.
#[no_mangle]
pub unsafe extern "C" fn Systray_UpdateConfig(json: *const c_char) -> c_int {
    guarded("Systray_UpdateConfig", || {
        // SAFETY: forwarded from our caller
        let Some(json) = (unsafe { c_string(json) }) else {
            return 0;
        };
        c_int::from(Tray::global().update_config(&json).is_ok())
    })
    .unwrap_or(0)
}

/// Render the default config as RON into `buf`.
///
/// Returns the buffer size needed including the trailing NUL, `buf` is only
/// written when `len` is at least that. Returns -1 if rendering failed.
///
/// # Safety
/// `buf` must be null or valid for writes of `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn Systray_DefaultConfig(buf: *mut c_char, len: i32) -> i32 {
    guarded("Systray_DefaultConfig", || {
        let config = match TrayConfig::default_ron() {
            Ok(config) => config,
            Err(e) => {
                log::error!("failed to render the default config: {}", e);
                return -1;
            }
        };
        let Ok(needed) = i32::try_from(config.len() + 1) else {
            return -1;
        };
        if !buf.is_null() && len >= needed {
            // SAFETY: buf holds at least `needed` bytes per the caller's contract
            unsafe {
                std::ptr::copy_nonoverlapping(config.as_ptr(), buf.cast::<u8>(), config.len());
                *buf.add(config.len()) = 0;
            }
        }
        needed
    })
    .unwrap_or(-1)
}
