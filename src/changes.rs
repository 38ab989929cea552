use std::sync::Mutex;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Something the shell has to be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TrayChange {
    Icon,
    Title,
    ToolTip,
    /// The menu tree changed, `revision` is the layout version after the change.
    Layout { revision: u32, parent: u32 },
    /// Properties of these menu items changed, `removed` lists dropped keys per item.
    ItemsProperties {
        updated: Vec<u32>,
        removed: Vec<(u32, Vec<&'static str>)>,
    },
}

/// Ordered fan-in of [`TrayChange`]s towards the task that owns the bus connection.
///
/// Changes are dropped while nothing is attached, the exported properties are
/// read from the current state when the objects are (re)exported.
#[derive(Debug, Default)]
pub(crate) struct ChangeSink {
    tx: Mutex<Option<UnboundedSender<TrayChange>>>,
}

impl ChangeSink {
    pub fn attach(&self) -> UnboundedReceiver<TrayChange> {
        let (tx, rx) = unbounded_channel();
        *self.lock() = Some(tx);
        rx
    }

    pub fn detach(&self) {
        self.lock().take();
    }

    pub fn send(&self, change: TrayChange) {
        if let Some(tx) = self.lock().as_ref() {
            if tx.send(change).is_err() {
                log::trace!("change receiver is gone");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<UnboundedSender<TrayChange>>> {
        self.tx.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changes_flow_only_while_attached() {
        let sink = ChangeSink::default();
        sink.send(TrayChange::Title);

        let mut rx = sink.attach();
        sink.send(TrayChange::Icon);
        sink.send(TrayChange::Layout {
            revision: 3,
            parent: 0,
        });
        sink.detach();
        sink.send(TrayChange::ToolTip);

        assert_eq!(rx.try_recv(), Ok(TrayChange::Icon));
        assert_eq!(
            rx.try_recv(),
            Ok(TrayChange::Layout {
                revision: 3,
                parent: 0
            })
        );
        assert!(rx.try_recv().is_err());
    }
}
