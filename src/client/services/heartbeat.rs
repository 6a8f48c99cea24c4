//! Periodic liveness signal for an authenticated session.
//!
//! Beats immediately, then on a fixed interval, but only while the front-end
//! reports itself visible (the browser tab-visibility gate made explicit).
//! Failures are logged and otherwise ignored; a lost beat never touches the
//! session state.

use crate::client::services::api_client::ApiClient;
use std::time::Duration;
use tokio::sync::watch;

pub struct Heartbeat {
    visible: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl Heartbeat {
    /// Spawn the heartbeat task. `visible` is the initial visibility; hidden
    /// ticks are skipped silently, not delayed.
    pub fn start(api: ApiClient, interval: Duration, visible: bool) -> Self {
        let (tx, rx) = watch::channel(visible);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !*rx.borrow() {
                    continue;
                }
                if let Err(err) = api.post_unit("/users/heartbeat").await {
                    log::warn!("heartbeat failed: {err}");
                }
            }
        });
        Self { visible: tx, task }
    }

    pub fn set_visible(&self, visible: bool) {
        let _ = self.visible.send(visible);
    }

    pub fn is_visible(&self) -> bool {
        *self.visible.borrow()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::utils::token_store::MemoryTokenStore;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_for(server: &MockServer) -> ApiClient {
        ApiClient::new(server.uri(), Arc::new(MemoryTokenStore::new())).unwrap()
    }

    async fn beats_received(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .map(|r| r.len())
            .unwrap_or(0)
    }

    /// Let the in-flight beats reach the mock server. The short sleeps park
    /// the paused runtime so the socket I/O progresses without advancing the
    /// clock anywhere near the next interval tick.
    async fn settle(server: &MockServer, at_least: usize) {
        for _ in 0..100 {
            if beats_received(server).await >= at_least {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn beats_immediately_and_then_on_the_interval() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/heartbeat"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&server)
            .await;

        let hb = Heartbeat::start(api_for(&server), Duration::from_secs(60), true);
        settle(&server, 1).await;
        tokio::time::advance(Duration::from_secs(60)).await;
        settle(&server, 2).await;
        tokio::time::advance(Duration::from_secs(60)).await;
        settle(&server, 3).await;
        assert_eq!(beats_received(&server).await, 3);
        hb.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn never_beats_while_hidden() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/heartbeat"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let hb = Heartbeat::start(api_for(&server), Duration::from_secs(60), false);
        tokio::time::advance(Duration::from_secs(600)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(beats_received(&server).await, 0);
        hb.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_after_becoming_visible_again() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/heartbeat"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let hb = Heartbeat::start(api_for(&server), Duration::from_secs(60), false);
        // two hidden ticks pass without a beat
        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        hb.set_visible(true);
        tokio::time::advance(Duration::from_secs(60)).await;
        settle(&server, 1).await;
        assert_eq!(beats_received(&server).await, 1);
        hb.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/heartbeat"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let hb = Heartbeat::start(api_for(&server), Duration::from_secs(60), true);
        settle(&server, 1).await;
        tokio::time::advance(Duration::from_secs(60)).await;
        settle(&server, 2).await;
        // still running, still visible, no panic
        assert!(hb.is_visible());
        hb.stop();
    }
}
