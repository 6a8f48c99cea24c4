pub mod api_client;
pub mod auth_service;
pub mod groups_service;
pub mod heartbeat;
pub mod notifications_service;
pub mod realtime_client;
pub mod search_service;
