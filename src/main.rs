// Interactive terminal client for the lab dashboard backend: the Rust
// stand-in for the browser pages (login, group board, live chat, search,
// notifications, impersonation control).
use lablink::client::config::ClientConfig;
use lablink::client::services::api_client::ApiClient;
use lablink::client::services::auth_service::{SessionEvent, SessionStore};
use lablink::client::services::groups_service::GroupsService;
use lablink::client::services::heartbeat::Heartbeat;
use lablink::client::services::notifications_service::NotificationsFeed;
use lablink::client::services::realtime_client::{ConnectionState, GroupRealtimeClient};
use lablink::client::services::search_service::SearchService;
use lablink::client::utils::token_store::{KeyringTokenStore, TokenSlot, TokenStore};
use lablink::common::models::ResearchGroup;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

struct OpenGroup {
    client: GroupRealtimeClient,
    printer: tokio::task::JoinHandle<()>,
}

impl OpenGroup {
    fn close(self) {
        self.client.close();
        self.printer.abort();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = ClientConfig::from_env();
    std::env::set_var("RUST_LOG", &config.log_level);
    env_logger::init();

    let tokens: Arc<dyn TokenStore> = Arc::new(KeyringTokenStore::new());
    let api = ApiClient::new(config.api_base_url.clone(), tokens.clone())?;
    let (session, _session_state, mut events) = SessionStore::new(api.clone());
    let groups = GroupsService::new(api.clone());
    let search = SearchService::new(api.clone());
    let notifications = NotificationsFeed::new(api.clone());

    // navigation events from the session machine, printed as they arrive
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::NavigateDashboard => println!("[NAV] dashboard"),
                SessionEvent::NavigateLogin => println!("[NAV] login"),
                SessionEvent::Refresh => println!("[NAV] view refreshed"),
            }
        }
    });

    println!("[LABLINK] Connecting to {}", config.api_base_url);
    if let Err(err) = session.bootstrap().await {
        println!("[LABLINK] Stored session is no longer valid: {err}");
    }

    let mut heartbeat: Option<Heartbeat> = None;
    let mut visible = true;
    let mut open_group: Option<OpenGroup> = None;
    let mut group_list: Vec<ResearchGroup> = Vec::new();
    let mut impersonation_timer: Option<tokio::task::JoinHandle<()>> = None;
    let mut notifications_poll: Option<tokio::task::JoinHandle<()>> = None;

    if session.snapshot().user.is_some() {
        let user = session.snapshot().user.unwrap();
        println!("[LABLINK] Signed in as {}", user.email);
    }
    println!("[LABLINK] Type /help for commands.");

    let mut input = BufReader::new(stdin());
    let mut line = String::new();
    loop {
        // keep the heartbeat aligned with the session lifecycle
        let authenticated = session.snapshot().user.is_some();
        if authenticated && heartbeat.is_none() {
            heartbeat = Some(Heartbeat::start(
                api.clone(),
                Duration::from_secs(config.heartbeat_interval_secs),
                visible,
            ));
        } else if !authenticated {
            if let Some(hb) = heartbeat.take() {
                hb.stop();
            }
        }
        if authenticated && notifications_poll.is_none() {
            notifications_poll =
                Some(notifications.start_polling(Duration::from_secs(config.notification_poll_secs)));
        }
        if !authenticated {
            if let Some(poll) = notifications_poll.take() {
                poll.abort();
            }
        }

        line.clear();
        let n = input.read_line(&mut line).await?;
        if n == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if !trimmed.starts_with('/') {
            // plain input goes to the open group verbatim; a silent no-op
            // when the socket is not connected
            match &open_group {
                Some(open) => open.client.send(trimmed),
                None => println!("[LABLINK] No group open. Use /open <n> first."),
            }
            continue;
        }

        let mut parts = trimmed.split_whitespace();
        let command = parts.next().unwrap_or("");
        let args: Vec<&str> = parts.collect();

        match command {
            "/help" => {
                println!("  /login <email> <password>   sign in");
                println!("  /groups                     list research groups");
                println!("  /open <n>                   open group n from the list (live chat)");
                println!("  /close                      leave the open group view");
                println!("  /invite <email>             invite to the open group");
                println!("  /join <token>               accept an invitation token");
                println!("  /search <query>             search navigation, actions and the lab");
                println!("  /notifications              show the feed");
                println!("  /read <n>                   mark notification n read");
                println!("  /read-all                   mark everything read");
                println!("  /impersonate <token>        act as another user (admins)");
                println!("  /stop-impersonating         restore the admin session");
                println!("  /hide, /show                toggle tab visibility (heartbeat gate)");
                println!("  /logout, /quit");
                println!("  plain text                  send a chat message to the open group");
            }
            "/login" if args.len() == 2 => {
                match session.authenticate(args[0], args[1]).await {
                    Ok(()) => {
                        let user = session.snapshot().user;
                        println!(
                            "[LABLINK] Signed in as {}",
                            user.map(|u| u.email).unwrap_or_default()
                        );
                    }
                    Err(err) => println!("[LABLINK] Login failed: {err}"),
                }
            }
            "/groups" => match groups.list().await {
                Ok(list) => {
                    for (i, g) in list.iter().enumerate() {
                        println!("  {}. {} [{}] ({} members)", i + 1, g.name, g.topic, g.members.len());
                    }
                    if list.is_empty() {
                        println!("[LABLINK] No groups yet.");
                    }
                    group_list = list;
                }
                Err(err) => println!("[LABLINK] Could not list groups: {err}"),
            },
            "/open" if args.len() == 1 => {
                let Some(index) = args[0].parse::<usize>().ok().and_then(|n| n.checked_sub(1)) else {
                    println!("[LABLINK] Usage: /open <n> (see /groups)");
                    continue;
                };
                let Some(selected) = group_list.get(index) else {
                    println!("[LABLINK] No group {} in the last /groups listing.", args[0]);
                    continue;
                };
                if let Some(previous) = open_group.take() {
                    previous.close();
                }
                // mount sequence: metadata + history first, one-shot mark-read
                // as soon as the id is known, then the socket
                let group = match groups.get(&selected.id).await {
                    Ok(group) => group,
                    Err(err) => {
                        println!("[LABLINK] Could not load the group: {err}");
                        continue;
                    }
                };
                let history = match groups.messages(&group.id).await {
                    Ok(history) => history,
                    Err(err) => {
                        println!("[LABLINK] Could not load history: {err}");
                        continue;
                    }
                };
                {
                    let groups = groups.clone();
                    let group_id = group.id.clone();
                    tokio::spawn(async move {
                        if let Err(err) = groups.mark_read(&group_id).await {
                            log::debug!("mark-read on open failed: {err}");
                        }
                    });
                }
                let Some(token) = tokens.load(TokenSlot::Session) else {
                    println!("[LABLINK] Sign in first.");
                    continue;
                };
                match GroupRealtimeClient::connect(api.clone(), &group.id, &token, history).await {
                    Ok(client) => {
                        println!("[LABLINK] {} is live. Type to chat, /close to leave.", group.name);
                        for msg in client.chat().lock().await.messages.iter() {
                            println!("  <{}> {}", msg.user_name, msg.content);
                        }
                        let printer = spawn_chat_printer(&client);
                        open_group = Some(OpenGroup { client, printer });
                    }
                    Err(err) => println!("[LABLINK] Could not open the group socket: {err}"),
                }
            }
            "/close" => match open_group.take() {
                Some(open) => {
                    open.close();
                    println!("[LABLINK] Group view closed.");
                }
                None => println!("[LABLINK] Nothing is open."),
            },
            "/invite" if args.len() == 1 => match &open_group {
                Some(open) => match groups.invite(open.client.group_id(), args[0]).await {
                    Ok(invite) => println!("[LABLINK] Invitation sent, token {}", invite.token),
                    Err(err) => println!("[LABLINK] Invite failed: {err}"),
                },
                None => println!("[LABLINK] Open a group first."),
            },
            "/join" if args.len() == 1 => match groups.join(args[0]).await {
                Ok(group) => println!("[LABLINK] Joined {}.", group.name),
                Err(err) => println!("[LABLINK] Join failed: {err}"),
            },
            "/search" => {
                let query = args.join(" ");
                let results = search.search(&query).await;
                if results.is_empty() {
                    println!("[LABLINK] No matches.");
                }
                for (category, bucket) in SearchService::grouped(results) {
                    println!("  {category}:");
                    for r in bucket {
                        match r.href {
                            Some(href) => println!("    {} -> {}", r.label, href),
                            None => println!("    {}", r.label),
                        }
                    }
                }
            }
            "/notifications" => {
                if let Err(err) = notifications.refresh().await {
                    println!("[LABLINK] Could not refresh notifications: {err}");
                }
                let items = notifications.items().await;
                for (i, n) in items.iter().enumerate() {
                    let flag = if n.is_read { ' ' } else { '*' };
                    println!("  {} {}. {} - {}", flag, i + 1, n.title, n.message);
                }
                println!("[LABLINK] {} unread.", notifications.unread_count().await);
            }
            "/read" if args.len() == 1 => {
                let items = notifications.items().await;
                match args[0].parse::<usize>().ok().and_then(|n| items.get(n.checked_sub(1)?)) {
                    Some(n) => {
                        if let Err(err) = notifications.mark_read(&n.id).await {
                            println!("[LABLINK] Mark-read failed and was rolled back: {err}");
                        }
                    }
                    None => println!("[LABLINK] Usage: /read <n> (see /notifications)"),
                }
            }
            "/read-all" => {
                if let Err(err) = notifications.mark_all_read().await {
                    println!("[LABLINK] Mark-all failed and was rolled back: {err}");
                }
            }
            "/impersonate" if args.len() == 1 => match session.impersonate(args[0]).await {
                Ok(()) => {
                    let user = session.snapshot().user;
                    println!(
                        "[LABLINK] Impersonating {} for {} minutes.",
                        user.map(|u| u.email).unwrap_or_default(),
                        config.impersonation_window_secs / 60
                    );
                    if let Some(timer) = impersonation_timer.take() {
                        timer.abort();
                    }
                    let session = session.clone();
                    let window = Duration::from_secs(config.impersonation_window_secs);
                    impersonation_timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(window).await;
                        println!("[LABLINK] Impersonation window elapsed.");
                        if let Err(err) = session.stop_impersonating().await {
                            log::warn!("auto stop-impersonating failed: {err}");
                        }
                    }));
                }
                Err(err) => println!("[LABLINK] Impersonation failed: {err}"),
            },
            "/stop-impersonating" => {
                if let Some(timer) = impersonation_timer.take() {
                    timer.abort();
                }
                match session.stop_impersonating().await {
                    Ok(()) => {
                        let user = session.snapshot().user;
                        match user {
                            Some(u) => println!("[LABLINK] Back as {}.", u.email),
                            None => println!("[LABLINK] Nothing to restore."),
                        }
                    }
                    Err(err) => println!("[LABLINK] Could not restore the admin session: {err}"),
                }
            }
            "/hide" => {
                visible = false;
                if let Some(hb) = &heartbeat {
                    hb.set_visible(false);
                }
                println!("[LABLINK] Tab hidden; heartbeat suspended.");
            }
            "/show" => {
                visible = true;
                if let Some(hb) = &heartbeat {
                    hb.set_visible(true);
                }
                println!("[LABLINK] Tab visible; heartbeat resumed.");
            }
            "/logout" => {
                if let Some(open) = open_group.take() {
                    open.close();
                }
                if let Some(timer) = impersonation_timer.take() {
                    timer.abort();
                }
                session.logout();
                println!("[LABLINK] Signed out.");
            }
            "/quit" => break,
            _ => println!("[LABLINK] Unknown command or bad arguments; try /help."),
        }
    }

    if let Some(open) = open_group.take() {
        open.close();
    }
    Ok(())
}

/// Stream new messages and presence changes of an open group to the
/// terminal. The chat state carries no change signal, so this polls it.
fn spawn_chat_printer(client: &GroupRealtimeClient) -> tokio::task::JoinHandle<()> {
    let chat = client.chat();
    let mut connection = client.subscribe();
    tokio::spawn(async move {
        let mut printed = chat.lock().await.messages.len();
        let mut online: Vec<String> = Vec::new();
        loop {
            {
                let state = chat.lock().await;
                for msg in &state.messages[printed..] {
                    println!("  <{}> {}", msg.user_name, msg.content);
                }
                printed = state.messages.len();
                if state.online_users != online {
                    online = state.online_users.clone();
                    println!("  [online: {}]", online.join(", "));
                }
            }
            if *connection.borrow() == ConnectionState::Disconnected {
                println!("  [chat disconnected]");
                break;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    })
}
