//! Notifications feed: polled list, unread count, and optimistic mark-read
//! with deterministic rollback when the confirming request fails.

use crate::client::services::api_client::{ApiClient, ApiError};
use crate::common::models::Notification;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub struct NotificationsFeed {
    api: ApiClient,
    items: Mutex<Vec<Notification>>,
}

impl NotificationsFeed {
    pub fn new(api: ApiClient) -> Arc<Self> {
        Arc::new(Self {
            api,
            items: Mutex::new(Vec::new()),
        })
    }

    pub async fn refresh(&self) -> Result<(), ApiError> {
        let fetched: Vec<Notification> = self.api.get("/notifications/").await?;
        *self.items.lock().await = fetched;
        Ok(())
    }

    pub async fn items(&self) -> Vec<Notification> {
        self.items.lock().await.clone()
    }

    pub async fn unread_count(&self) -> usize {
        self.items.lock().await.iter().filter(|n| !n.is_read).count()
    }

    /// Flip the read flag locally, then confirm with the backend. A failed
    /// confirmation rolls the local change back and returns the error.
    pub async fn mark_read(&self, id: &str) -> Result<(), ApiError> {
        {
            let mut items = self.items.lock().await;
            match items.iter_mut().find(|n| n.id == id) {
                Some(n) if n.is_read => return Ok(()),
                Some(n) => n.is_read = true,
                None => return Ok(()),
            }
        }
        match self
            .api
            .put_no_body::<Notification>(&format!("/notifications/{id}/read"))
            .await
        {
            Ok(confirmed) => {
                let mut items = self.items.lock().await;
                if let Some(n) = items.iter_mut().find(|n| n.id == id) {
                    *n = confirmed;
                }
                Ok(())
            }
            Err(err) => {
                let mut items = self.items.lock().await;
                if let Some(n) = items.iter_mut().find(|n| n.id == id) {
                    n.is_read = false;
                }
                Err(err)
            }
        }
    }

    /// Same local-then-remote shape for the whole list; rollback restores
    /// exactly the flags that were unread before.
    pub async fn mark_all_read(&self) -> Result<(), ApiError> {
        let previously_unread: Vec<String> = {
            let mut items = self.items.lock().await;
            let unread: Vec<String> = items
                .iter()
                .filter(|n| !n.is_read)
                .map(|n| n.id.clone())
                .collect();
            for n in items.iter_mut() {
                n.is_read = true;
            }
            unread
        };
        if previously_unread.is_empty() {
            return Ok(());
        }
        match self.api.put_no_body::<bool>("/notifications/read-all").await {
            Ok(_) => Ok(()),
            Err(err) => {
                let mut items = self.items.lock().await;
                for n in items.iter_mut() {
                    if previously_unread.contains(&n.id) {
                        n.is_read = false;
                    }
                }
                Err(err)
            }
        }
    }

    /// Poll the feed on a fixed interval. Failures are logged and leave the
    /// last known list intact.
    pub fn start_polling(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let feed = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(err) = feed.refresh().await {
                    log::warn!("notification poll failed: {err}");
                }
            }
        })
    }
}
