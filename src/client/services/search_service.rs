//! Global search: a fixed command palette filtered client-side, merged with
//! remote matches from `/search/`. Remote failure degrades to the static
//! subset without surfacing an error.

use crate::client::services::api_client::ApiClient;
use crate::common::models::SearchResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Category display order; categories the backend invents later sort after
/// these in first-seen order.
const CATEGORY_ORDER: [&str; 4] = ["Navigation", "Action", "Analysis", "Users"];

fn static_entries() -> Vec<SearchResult> {
    let entry = |id: &str, label: &str, kind: &str, category: &str, href: Option<&str>| SearchResult {
        id: id.to_string(),
        label: label.to_string(),
        kind: kind.to_string(),
        category: category.to_string(),
        href: href.map(String::from),
    };
    vec![
        entry("nav-dashboard", "Dashboard", "navigation", "Navigation", Some("/dashboard")),
        entry("nav-experiments", "Experiments", "navigation", "Navigation", Some("/dashboard/experiments")),
        entry("nav-profile", "Profile", "navigation", "Navigation", Some("/dashboard/profile")),
        entry("nav-settings", "Settings", "navigation", "Navigation", Some("/dashboard/settings")),
        entry("act-new-exp", "New Experiment", "action", "Action", Some("/dashboard/experiments?new=true")),
        entry("act-logout", "Log Out", "action", "Action", None),
    ]
}

#[derive(Clone)]
pub struct SearchService {
    api: ApiClient,
}

impl SearchService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Case-insensitive substring filter over the static palette.
    pub fn static_matches(query: &str) -> Vec<SearchResult> {
        let needle = query.to_lowercase();
        static_entries()
            .into_iter()
            .filter(|e| e.label.to_lowercase().contains(&needle))
            .collect()
    }

    /// Resolve one query: static matches plus remote matches, static-only on
    /// transport failure. An empty query yields nothing and issues no
    /// request.
    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        if query.is_empty() {
            return Vec::new();
        }
        let mut results = Self::static_matches(query);
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("q", query)
            .finish();
        match self.api.get::<Vec<SearchResult>>(&format!("/search/?{encoded}")).await {
            Ok(remote) => results.extend(remote),
            Err(err) => log::warn!("remote search failed, static results only: {err}"),
        }
        results
    }

    /// Group results by category for display, categories in the fixed order.
    pub fn grouped(results: Vec<SearchResult>) -> Vec<(String, Vec<SearchResult>)> {
        let mut groups: Vec<(String, Vec<SearchResult>)> = Vec::new();
        for result in results {
            match groups.iter_mut().find(|(c, _)| *c == result.category) {
                Some((_, bucket)) => bucket.push(result),
                None => groups.push((result.category.clone(), vec![result])),
            }
        }
        groups.sort_by_key(|(category, _)| {
            CATEGORY_ORDER
                .iter()
                .position(|c| c == category)
                .unwrap_or(CATEGORY_ORDER.len())
        });
        groups
    }
}

/// Keystroke-driven debouncer: each keystroke resets the timer, and only the
/// last query within the window is resolved. An empty query clears results
/// without a request.
pub struct SearchDebouncer {
    keystrokes: mpsc::UnboundedSender<String>,
    task: tokio::task::JoinHandle<()>,
}

impl SearchDebouncer {
    pub fn spawn(
        service: Arc<SearchService>,
        delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Vec<SearchResult>>) {
        let (key_tx, mut key_rx) = mpsc::unbounded_channel::<String>();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(mut query) = key_rx.recv().await {
                loop {
                    tokio::select! {
                        next = key_rx.recv() => match next {
                            Some(newer) => query = newer,
                            None => return,
                        },
                        _ = tokio::time::sleep(delay) => break,
                    }
                }
                let results = service.search(&query).await;
                if out_tx.send(results).is_err() {
                    return;
                }
            }
        });
        (
            Self {
                keystrokes: key_tx,
                task,
            },
            out_rx,
        )
    }

    pub fn keystroke(&self, query: &str) {
        let _ = self.keystrokes.send(query.to_string());
    }
}

impl Drop for SearchDebouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
