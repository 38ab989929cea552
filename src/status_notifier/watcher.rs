use zbus::export::ordered_stream::OrderedStreamExt;

use super::names;

#[zbus::proxy(
    interface = "org.kde.StatusNotifierWatcher",
    default_service = "org.kde.StatusNotifierWatcher",
    default_path = "/StatusNotifierWatcher"
)]
pub trait StatusNotifierWatcher {
    /// RegisterStatusNotifierItem method
    fn register_status_notifier_item(&self, service: &str) -> zbus::Result<()>;

    /// IsStatusNotifierHostRegistered property
    #[zbus(property)]
    fn is_status_notifier_host_registered(&self) -> zbus::Result<bool>;
}

/// Announce the item exported at [`names::ITEM_OBJECT`] to the watcher.
///
/// The watcher resolves the object path against our unique name.
pub async fn register_item(con: &zbus::Connection) -> zbus::Result<()> {
    let snw = StatusNotifierWatcherProxy::new(con).await?;
    snw.register_status_notifier_item(names::ITEM_OBJECT).await?;
    match snw.is_status_notifier_host_registered().await {
        Ok(false) => log::debug!("registered with watcher, but no host is listening yet"),
        Ok(true) => log::debug!("registered with watcher"),
        Err(e) => log::trace!("couldn't query watcher hosts: {}", e),
    }
    Ok(())
}

/// Re-register every time the watcher name gains a new owner.
///
/// Only returns if the `NameOwnerChanged` stream can't be set up or ends.
pub async fn track_watcher(con: &zbus::Connection) -> zbus::fdo::Result<()> {
    let dbus = zbus::fdo::DBusProxy::new(con).await?;
    let mut owner_changes = dbus
        .receive_name_owner_changed_with_args(&[(0, names::WATCHER_BUS)])
        .await?;

    while let Some(sig) = owner_changes.next().await {
        let args = sig.args()?;
        let new_owner: &Option<_> = args.new_owner();
        match new_owner {
            Some(owner) => {
                log::debug!("watcher appeared as {}, registering again", owner);
                if let Err(e) = register_item(con).await {
                    log::warn!("failed to register with the new watcher: {}", e);
                }
            }
            None => log::debug!("watcher went away"),
        }
    }

    Ok(())
}
