use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock},
    time::Duration,
};

use tokio::{
    runtime::Runtime,
    sync::{mpsc::UnboundedReceiver, oneshot, watch},
    task::JoinHandle,
};
use zbus::{object_server::InterfaceRef, zvariant::OwnedObjectPath};

use crate::{
    changes::{ChangeSink, TrayChange},
    click::ClickArbiter,
    config::TrayConfig,
    error::{Error, Result},
    handlers::{guarded, Handlers},
    menu::MenuModel,
    status_notifier::{
        icon::{build_pixmaps, Pixmap},
        item::{Status, StatusNotifierItem},
        menu::DbusMenu,
        names, watcher, DesktopEnv,
    },
};

pub type LifecycleHandler = Arc<dyn Fn() + Send + Sync>;

/// Everything the SNI object publishes, plus the live session.
#[derive(Debug, Default)]
pub(crate) struct TrayState {
    pub icon_data: Vec<u8>,
    pub pixmaps: Vec<Pixmap>,
    pub title: String,
    pub tooltip_title: String,
    pub status: Status,
    pub bus_name: Option<String>,
    pub running: bool,
    pub conn: Option<zbus::Connection>,
    /// `Menu` path written by a client, wins over the computed one.
    pub menu_path: Option<OwnedObjectPath>,
    pub desktop: DesktopEnv,
}

#[derive(Default)]
struct Lifecycle {
    ready: Option<oneshot::Sender<()>>,
    on_exit: Option<LifecycleHandler>,
}

/// One-shot broadcast that ends [`Tray::run`].
struct QuitSignal {
    tx: watch::Sender<bool>,
}

impl QuitSignal {
    fn new() -> Self {
        Self {
            tx: watch::channel(false).0,
        }
    }

    /// Returns true only for the call that actually fired the signal.
    fn fire(&self) -> bool {
        self.tx.send_if_modified(|quit| !std::mem::replace(quit, true))
    }

    fn reset(&self) {
        self.tx.send_replace(false);
    }

    fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in self, so this only fails if it was dropped mid-wait
        let _ = rx.wait_for(|quit| *quit).await;
    }
}

/// The process-wide tray agent.
pub struct Tray {
    runtime: OnceLock<Runtime>,
    state: Arc<Mutex<TrayState>>,
    menu: Arc<MenuModel>,
    arbiter: Arc<ClickArbiter>,
    handlers: Arc<Handlers>,
    changes: Arc<ChangeSink>,
    lifecycle: Mutex<Lifecycle>,
    /// Serializes start and teardown, true while a session is started.
    session: Mutex<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    quit: QuitSignal,
    config: RwLock<TrayConfig>,
}

static TRAY: OnceLock<Tray> = OnceLock::new();

impl Default for Tray {
    fn default() -> Self {
        Self::new()
    }
}

impl Tray {
    pub fn new() -> Self {
        let changes = Arc::new(ChangeSink::default());
        let config = TrayConfig::default();
        Self {
            runtime: OnceLock::new(),
            state: Arc::new(Mutex::new(TrayState::default())),
            menu: Arc::new(MenuModel::new(changes.clone())),
            arbiter: Arc::new(ClickArbiter::new(config.double_click_interval_ms)),
            handlers: Arc::new(Handlers::default()),
            changes,
            lifecycle: Mutex::new(Lifecycle::default()),
            session: Mutex::new(false),
            tasks: Mutex::new(Vec::new()),
            quit: QuitSignal::new(),
            config: RwLock::new(config),
        }
    }

    /// The tray of this process, there can only be one SNI per process id.
    pub fn global() -> &'static Tray {
        TRAY.get_or_init(|| {
            crate::init_logging();
            Tray::new()
        })
    }

    fn runtime(&self) -> Result<&Runtime> {
        if let Some(rt) = self.runtime.get() {
            return Ok(rt);
        }
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("systray-dbus")
            .enable_all()
            .build()?;
        // a concurrent caller may have won, its runtime is kept
        Ok(self.runtime.get_or_init(|| rt))
    }

    fn state(&self) -> MutexGuard<'_, TrayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn menu(&self) -> &MenuModel {
        &self.menu
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    pub fn config(&self) -> TrayConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn status(&self) -> Status {
        self.state().status
    }

    pub fn bus_name(&self) -> Option<String> {
        self.state().bus_name.clone()
    }

    pub fn title(&self) -> String {
        self.state().title.clone()
    }

    pub fn tooltip(&self) -> String {
        self.state().tooltip_title.clone()
    }

    /// Replace the icon with encoded PNG, JPEG or ICO bytes.
    pub fn set_icon(&self, data: &[u8]) {
        let pixmaps = build_pixmaps(data);
        {
            let mut state = self.state();
            state.icon_data = data.to_vec();
            state.pixmaps = pixmaps;
        }
        self.changes.send(TrayChange::Icon);
    }

    pub fn set_title(&self, title: &str) {
        self.state().title = title.to_string();
        self.changes.send(TrayChange::Title);
    }

    pub fn set_tooltip(&self, tooltip: &str) {
        self.state().tooltip_title = tooltip.to_string();
        self.changes.send(TrayChange::ToolTip);
    }

    pub fn set_double_click_interval(&self, ms: i64) {
        self.arbiter.set_min_interval(ms);
        self.config
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .double_click_interval_ms = ms;
    }

    /// Coordinates of the last `Activate`, `SecondaryActivate` or `ContextMenu`.
    pub fn last_click_xy(&self) -> (i32, i32) {
        self.arbiter.last_click_xy()
    }

    /// Apply a JSON config document, keys that are missing get their default.
    pub fn update_config(&self, config: &str) -> Result<()> {
        log::trace!("config: {}", config);
        let config = match TrayConfig::from_json(config) {
            Ok(conf) => conf,
            Err(err) => {
                log::error!("Failed to parse config into struct: {:#?}", err);
                return Err(err);
            }
        };
        self.arbiter.set_min_interval(config.double_click_interval_ms);
        log::debug!("current config: {:#?}", config);
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
        Ok(())
    }

    /// Store the lifecycle callbacks.
    ///
    /// `on_ready` runs once, on its own thread, after the next [`Tray::native_start`].
    /// `on_exit` runs at the beginning of every teardown of a started tray.
    pub fn register(&self, on_ready: Option<LifecycleHandler>, on_exit: Option<LifecycleHandler>) {
        let ready = on_ready.and_then(spawn_ready_worker);
        {
            let mut lifecycle = self.lifecycle();
            lifecycle.ready = ready;
            lifecycle.on_exit = on_exit;
        }
        self.quit.reset();
    }

    /// Serve the tray until [`Tray::quit`] is called.
    pub fn run(&self, on_ready: Option<LifecycleHandler>, on_exit: Option<LifecycleHandler>) {
        self.register(on_ready, on_exit);
        self.native_start();
        self.wait_for_quit();
        self.native_end();
    }

    /// Register the callbacks and hand start and teardown over to the host's own loop.
    pub fn run_with_external_loop(
        &self,
        on_ready: Option<LifecycleHandler>,
        on_exit: Option<LifecycleHandler>,
    ) -> ExternalLoop<'_> {
        self.register(on_ready, on_exit);
        ExternalLoop { tray: self }
    }

    pub fn quit(&self) {
        if self.quit.fire() {
            log::debug!("quit requested");
        }
    }

    pub fn wait_for_quit(&self) {
        if self.quit.is_fired() {
            return;
        }
        match self.runtime() {
            Ok(rt) => block_on(rt, self.quit.wait()),
            Err(e) => log::error!("can't wait for quit: {}", e),
        }
    }

    /// Connect to the session bus and publish the item. Does nothing if already started.
    pub fn native_start(&self) {
        let mut started = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if *started {
            log::debug!("tray already started");
            return;
        }
        *started = true;

        if let Err(e) = self.start_session() {
            log::error!("failed to start the tray: {}", e);
        }

        if let Some(ready) = self.lifecycle().ready.take() {
            // the worker is gone only if its thread died
            let _ = ready.send(());
        }
    }

    fn start_session(&self) -> Result<()> {
        if cfg!(not(target_os = "linux")) {
            return Err(Error::UnsupportedPlatform(std::env::consts::OS));
        }
        let rt = self.runtime()?;
        {
            let mut state = self.state();
            state.desktop = DesktopEnv::from_env();
            state.status = Status::Active;
            state.pixmaps = build_pixmaps(&state.icon_data);
        }

        // attached before exporting so nothing set meanwhile goes unsignalled
        let changes = self.changes.attach();
        let conn = match block_on(rt, self.export()) {
            Ok(conn) => conn,
            Err(e) => {
                self.changes.detach();
                return Err(e);
            }
        };
        let bus_name = names::item_bus_name(std::process::id());
        match block_on(rt, request_name(&conn, &bus_name)) {
            Ok(()) => log::debug!("acquired {}", bus_name),
            Err(e) => log::warn!("failed to request name {}: {}", bus_name, e),
        }

        {
            let mut state = self.state();
            state.conn = Some(conn.clone());
            state.bus_name = Some(bus_name);
            state.running = true;
        }

        let track_watcher = self.config().track_watcher;
        {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.push(rt.spawn(forward_changes(
                conn.clone(),
                changes,
                self.menu.clone(),
            )));
            if track_watcher {
                let conn = conn.clone();
                tasks.push(rt.spawn(async move {
                    if let Err(e) = watcher::track_watcher(&conn).await {
                        log::warn!("stopped tracking the watcher: {}", e);
                    }
                }));
            }
        }

        if let Err(e) = block_on(rt, watcher::register_item(&conn)) {
            log::warn!(
                "failed to register with the StatusNotifierWatcher (is a tray running?): {}",
                e
            );
        }
        Ok(())
    }

    async fn export(&self) -> Result<zbus::Connection> {
        let conn = zbus::Connection::session().await?;
        {
            let server = conn.object_server();
            let item = StatusNotifierItem::new(
                self.state.clone(),
                self.menu.clone(),
                self.arbiter.clone(),
                self.handlers.clone(),
            );
            if !server.at(names::ITEM_OBJECT, item).await? {
                log::warn!("{} was already exported", names::ITEM_OBJECT);
            }
            let menu = DbusMenu::new(self.menu.clone(), self.handlers.clone());
            if !server.at(names::MENU_OBJECT, menu).await? {
                log::warn!("{} was already exported", names::MENU_OBJECT);
            }
        }
        Ok(conn)
    }

    /// Withdraw the item and drop the session. Does nothing if not started.
    pub fn native_end(&self) {
        let mut started = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if !*started {
            log::trace!("tray not started, nothing to tear down");
            return;
        }
        *started = false;

        let on_exit = self.lifecycle().on_exit.clone();
        if let Some(on_exit) = on_exit {
            guarded("exit handler", on_exit.as_ref());
        }

        let (conn, bus_name) = {
            let mut state = self.state();
            state.running = false;
            state.status = Status::Passive;
            state.icon_data.clear();
            state.pixmaps.clear();
            state.title.clear();
            state.tooltip_title.clear();
            state.menu_path = None;
            (state.conn.take(), state.bus_name.take())
        };
        self.changes.detach();
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            task.abort();
        }

        let Some(conn) = conn else {
            return;
        };
        let rt = match self.runtime() {
            Ok(rt) => rt,
            Err(e) => {
                log::error!("can't tear down the session: {}", e);
                return;
            }
        };
        block_on(rt, withdraw(&conn, bus_name.as_deref()));

        let timeout = Duration::from_millis(self.config().close_timeout_ms);
        let close = rt.spawn(conn.close());
        block_on(rt, async move {
            match tokio::time::timeout(timeout, close).await {
                Ok(Ok(Ok(()))) => log::debug!("session connection closed"),
                Ok(Ok(Err(e))) => log::warn!("failed to close the session connection: {}", e),
                Ok(Err(e)) => log::warn!("connection close task failed: {}", e),
                Err(_) => log::debug!("connection still closing after {:?}", timeout),
            }
        });
    }
}

/// Start and teardown handles for hosts that run their own main loop.
#[derive(Clone, Copy)]
pub struct ExternalLoop<'a> {
    tray: &'a Tray,
}

impl ExternalLoop<'_> {
    pub fn start(&self) {
        self.tray.native_start();
    }

    pub fn end(&self) {
        self.tray.native_end();
        self.tray.quit();
    }
}

fn spawn_ready_worker(on_ready: LifecycleHandler) -> Option<oneshot::Sender<()>> {
    let (tx, rx) = oneshot::channel::<()>();
    let spawned = std::thread::Builder::new()
        .name("systray-ready".to_string())
        .spawn(move || {
            if rx.blocking_recv().is_ok() {
                guarded("ready handler", on_ready.as_ref());
            }
        });
    match spawned {
        Ok(_) => Some(tx),
        Err(e) => {
            log::error!("failed to spawn the ready worker: {}", e);
            None
        }
    }
}

/// Drive `fut` on the tray runtime from synchronous code, also from inside another runtime.
fn block_on<F>(rt: &Runtime, fut: F) -> F::Output
where
    F: Future + Send,
    F::Output: Send,
{
    if tokio::runtime::Handle::try_current().is_err() {
        return rt.block_on(fut);
    }
    std::thread::scope(|s| match s.spawn(|| rt.block_on(fut)).join() {
        Ok(output) => output,
        Err(panic) => std::panic::resume_unwind(panic),
    })
}

async fn request_name(conn: &zbus::Connection, bus_name: &str) -> zbus::Result<()> {
    use zbus::fdo::RequestNameReply::*;

    let flags = [zbus::fdo::RequestNameFlags::DoNotQueue];
    match conn
        .request_name_with_flags(bus_name, flags.into_iter().collect())
        .await?
    {
        PrimaryOwner | AlreadyOwner => Ok(()),
        Exists => Err(zbus::Error::NameTaken),
        InQueue => Err(zbus::Error::Failure(format!(
            "queued for {} even though DoNotQueue was requested",
            bus_name
        ))),
    }
}

/// Mark the item passive, unexport both objects and give the name back.
///
/// Every step is attempted even if an earlier one failed.
async fn withdraw(conn: &zbus::Connection, bus_name: Option<&str>) {
    let server = conn.object_server();
    match server
        .interface::<_, StatusNotifierItem>(names::ITEM_OBJECT)
        .await
    {
        Ok(item) => {
            let ctxt = item.signal_context();
            if let Err(e) = item.get().await.status_changed(ctxt).await {
                log::warn!("failed to signal Status change: {}", e);
            }
            if let Err(e) =
                StatusNotifierItem::new_status(ctxt, &Status::Passive.to_string()).await
            {
                log::warn!("failed to emit NewStatus: {}", e);
            }
        }
        Err(e) => log::debug!("no item to mark passive: {}", e),
    }

    if let Err(e) = server
        .remove::<StatusNotifierItem, _>(names::ITEM_OBJECT)
        .await
    {
        log::warn!("failed to unexport {}: {}", names::ITEM_OBJECT, e);
    }
    if let Err(e) = server.remove::<DbusMenu, _>(names::MENU_OBJECT).await {
        log::warn!("failed to unexport {}: {}", names::MENU_OBJECT, e);
    }
    if let Some(bus_name) = bus_name {
        if let Err(e) = conn.release_name(bus_name).await {
            log::warn!("failed to release {}: {}", bus_name, e);
        }
    }
}

async fn icon_changed(item: &InterfaceRef<StatusNotifierItem>) -> zbus::Result<()> {
    let ctxt = item.signal_context();
    let iface = item.get().await;
    iface.icon_pixmap_changed(ctxt).await?;
    iface.tool_tip_changed(ctxt).await?;
    StatusNotifierItem::new_icon(ctxt).await
}

async fn title_changed(item: &InterfaceRef<StatusNotifierItem>) -> zbus::Result<()> {
    let ctxt = item.signal_context();
    item.get().await.title_changed(ctxt).await?;
    StatusNotifierItem::new_title(ctxt).await
}

async fn tool_tip_changed(item: &InterfaceRef<StatusNotifierItem>) -> zbus::Result<()> {
    let ctxt = item.signal_context();
    item.get().await.tool_tip_changed(ctxt).await?;
    StatusNotifierItem::new_tool_tip(ctxt).await
}

/// Turn [`TrayChange`]s into DBus signals, in the order they were made.
///
/// Ends when the sink is detached at teardown.
async fn forward_changes(
    conn: zbus::Connection,
    mut changes: UnboundedReceiver<TrayChange>,
    menu: Arc<MenuModel>,
) {
    let server = conn.object_server();
    let (item, dbusmenu) = match tokio::try_join!(
        server.interface::<_, StatusNotifierItem>(names::ITEM_OBJECT),
        server.interface::<_, DbusMenu>(names::MENU_OBJECT),
    ) {
        Ok(refs) => refs,
        Err(e) => {
            log::error!("exported objects are missing, changes won't be signalled: {}", e);
            return;
        }
    };
    let mut published = menu.is_published();

    while let Some(change) = changes.recv().await {
        log::trace!("forwarding {:?}", change);
        let result = match change {
            TrayChange::Icon => icon_changed(&item).await,
            TrayChange::Title => title_changed(&item).await,
            TrayChange::ToolTip => tool_tip_changed(&item).await,
            TrayChange::Layout { revision, parent } => {
                let mut result =
                    DbusMenu::layout_updated(dbusmenu.signal_context(), revision, parent as i32)
                        .await;
                let now_published = menu.is_published();
                if result.is_ok() && now_published != published {
                    published = now_published;
                    result = item.get().await.menu_changed(item.signal_context()).await;
                }
                result
            }
            TrayChange::ItemsProperties { updated, removed } => {
                let props = dbusmenu.get().await.updated_properties(&updated);
                let removed: Vec<(i32, Vec<String>)> = removed
                    .into_iter()
                    .map(|(id, keys)| (id as i32, keys.into_iter().map(String::from).collect()))
                    .collect();
                DbusMenu::items_properties_updated(dbusmenu.signal_context(), &props, &removed)
                    .await
            }
        };
        if let Err(e) = result {
            log::warn!("failed to signal a tray change: {}", e);
        }
    }
    log::debug!("change forwarding stopped");
}
