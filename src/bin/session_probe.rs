// Manual smoke probe against a live backend: login -> whoami -> heartbeat
// -> logout. Credentials come from LABLINK_EMAIL / LABLINK_PASSWORD.
use lablink::client::config::ClientConfig;
use lablink::client::services::api_client::ApiClient;
use lablink::client::services::auth_service::SessionStore;
use lablink::client::utils::token_store::{MemoryTokenStore, TokenStore};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = ClientConfig::from_env();
    std::env::set_var("RUST_LOG", &config.log_level);
    env_logger::init();

    let email = std::env::var("LABLINK_EMAIL")?;
    let password = std::env::var("LABLINK_PASSWORD")?;

    // ephemeral store so the probe never touches the real keyring
    let tokens: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
    let api = ApiClient::new(config.api_base_url.clone(), tokens)?;
    let (session, _state, _events) = SessionStore::new(api.clone());

    println!("PROBE login against {}", config.api_base_url);
    session.authenticate(&email, &password).await?;
    let user = session
        .snapshot()
        .user
        .ok_or_else(|| anyhow::anyhow!("login succeeded but no user resolved"))?;
    println!("PROBE whoami -> {} ({:?})", user.email, user.role);

    api.post_unit("/users/heartbeat").await?;
    println!("PROBE heartbeat -> ok");

    session.logout();
    println!("PROBE logout -> ok");
    Ok(())
}
