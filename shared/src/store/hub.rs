use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use super::{Document, DocumentGateway, Filter, Record};

const NOTICE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub collection: String,
    pub id: String,
}

/// In-process fan-out of document changes.
pub struct ChangeHub {
    tx: broadcast::Sender<ChangeNotice>,
}

impl ChangeHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_CAPACITY);
        Self { tx }
    }

    pub fn notify(&self, collection: &str, id: &str) {
        // No listeners is the normal case outside of live views.
        let _ = self.tx.send(ChangeNotice {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }

    pub fn listen(&self) -> broadcast::Receiver<ChangeNotice> {
        self.tx.subscribe()
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Disposal handle for a live feed. Disposing more than once is a no-op and
/// dropping the handle disposes it.
pub struct Subscription {
    active: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            if let Some(task) = self.task.lock().take() {
                task.abort();
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Waits for the next notice accepted by `relevant`. Returns false once the
/// hub is gone. A lagged receiver counts as a change so nothing is missed.
async fn next_change<P>(rx: &mut broadcast::Receiver<ChangeNotice>, relevant: P) -> bool
where
    P: Fn(&ChangeNotice) -> bool,
{
    loop {
        match rx.recv().await {
            Ok(notice) if relevant(&notice) => return true,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "change feed lagged; refreshing");
                return true;
            }
            Err(RecvError::Closed) => return false,
        }
    }
}

pub(super) fn watch_collection<D, F>(
    gateway: DocumentGateway,
    filters: Vec<Filter>,
    on_update: F,
) -> Subscription
where
    D: Document,
    F: Fn(Vec<Record<D>>) + Send + Sync + 'static,
{
    let active = Arc::new(AtomicBool::new(true));
    // Listen before the first read so a write racing it is not lost.
    let mut rx = gateway.hub().listen();
    let flag = Arc::clone(&active);

    let task = tokio::spawn(async move {
        loop {
            match gateway.query::<D>(&filters).await {
                Ok(records) => {
                    if !flag.load(Ordering::SeqCst) {
                        return;
                    }
                    on_update(records);
                }
                Err(e) => {
                    tracing::warn!(collection = D::COLLECTION, error = %e, "live query failed");
                }
            }
            if !next_change(&mut rx, |n| n.collection == D::COLLECTION).await {
                return;
            }
        }
    });

    Subscription {
        active,
        task: Mutex::new(Some(task)),
    }
}

pub(super) fn watch_document<D, F>(gateway: DocumentGateway, id: String, on_update: F) -> Subscription
where
    D: Document,
    F: Fn(Option<Record<D>>) + Send + Sync + 'static,
{
    let active = Arc::new(AtomicBool::new(true));
    let mut rx = gateway.hub().listen();
    let flag = Arc::clone(&active);

    let task = tokio::spawn(async move {
        loop {
            match gateway.get_one::<D>(&id).await {
                Ok(record) => {
                    if !flag.load(Ordering::SeqCst) {
                        return;
                    }
                    on_update(record);
                }
                Err(e) => {
                    tracing::warn!(collection = D::COLLECTION, id = %id, error = %e, "live read failed");
                }
            }
            let watched = |n: &ChangeNotice| n.collection == D::COLLECTION && n.id == id;
            if !next_change(&mut rx, watched).await {
                return;
            }
        }
    });

    Subscription {
        active,
        task: Mutex::new(Some(task)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::memory::MemoryStore;
    use super::super::Filter;
    use super::*;
    use crate::types::Announcement;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn announcement(title: &str, archived: bool) -> Announcement {
        Announcement {
            title: title.to_string(),
            description: None,
            date_created: "2026-10-01T00:00:00Z".to_string(),
            date_updated: None,
            is_archived: archived,
        }
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for update")
            .expect("feed closed")
    }

    #[tokio::test]
    async fn test_subscribe_delivers_full_result_sets() {
        let gw = DocumentGateway::new(Arc::new(MemoryStore::new()));
        gw.put(&announcement("One", false), Some("1")).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = gw.subscribe::<Announcement, _>(vec![Filter::eq("isArchived", false)], move |records| {
            let ids: Vec<String> = records.into_iter().map(|r| r.id).collect();
            let _ = tx.send(ids);
        });

        assert_eq!(next(&mut rx).await, vec!["1".to_string()]);

        gw.put(&announcement("Two", false), Some("2")).await.unwrap();
        assert_eq!(next(&mut rx).await, vec!["1".to_string(), "2".to_string()]);

        // Archived writes still trigger a refresh, filtered server-side.
        gw.put(&announcement("Three", true), Some("3")).await.unwrap();
        assert_eq!(next(&mut rx).await, vec!["1".to_string(), "2".to_string()]);

        sub.unsubscribe();
    }

    #[tokio::test]
    async fn test_unsubscribe_twice_stops_callbacks() {
        let gw = DocumentGateway::new(Arc::new(MemoryStore::new()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = gw.subscribe::<Announcement, _>(Vec::new(), move |records| {
            let _ = tx.send(records.len());
        });
        assert_eq!(next(&mut rx).await, 0);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());

        gw.put(&announcement("Late", false), Some("1")).await.unwrap();
        // The aborted task drops its sender, so the channel closes without
        // another delivery.
        let after = timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(matches!(after, Ok(None) | Err(_)));
    }

    #[tokio::test]
    async fn test_dropping_handle_disposes_feed() {
        let gw = DocumentGateway::new(Arc::new(MemoryStore::new()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let _sub = gw.subscribe::<Announcement, _>(Vec::new(), move |records| {
                let _ = tx.send(records.len());
            });
            assert_eq!(next(&mut rx).await, 0);
        }

        gw.put(&announcement("Late", false), Some("1")).await.unwrap();
        let after = timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(matches!(after, Ok(None) | Err(_)));
    }

    #[tokio::test]
    async fn test_subscribe_one_reports_deletion_as_absent() {
        let gw = DocumentGateway::new(Arc::new(MemoryStore::new()));
        gw.put(&announcement("Watched", false), Some("w")).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = gw.subscribe_one::<Announcement, _>("w", move |record| {
            let _ = tx.send(record.map(|r| r.data.title));
        });
        assert_eq!(next(&mut rx).await, Some("Watched".to_string()));

        // Changes to other documents are ignored.
        gw.put(&announcement("Other", false), Some("o")).await.unwrap();

        gw.remove::<Announcement>("w").await.unwrap();
        assert_eq!(next(&mut rx).await, None);
    }
}
