mod config;
mod messaging;
mod registry;
mod room;
mod types;
mod ws;

use std::sync::Arc;
use std::time::Duration;
use log::{error, info, warn};
use warp::Filter;
use watchparty_protocol::{ParticipantId, SystemClock};
use crate::config::HubConfig;
use crate::types::{Hub, SessionParams};

/// Disconnects every client that has been silent longer than the configured
/// timeout. Runs until the hub shuts down.
fn spawn_zombie_sweep(hub: Hub) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(hub.config.zombie_check_interval_secs));
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            let zombies = find_zombies(&hub).await;
            for id in zombies {
                warn!("Removing zombie connection: {}", id);
                room::handle_disconnect(&id, &hub).await;
            }
        }
    })
}

async fn find_zombies(hub: &Hub) -> Vec<ParticipantId> {
    let now = hub.now_ms();
    let locked_clients = hub.clients.read().await;
    locked_clients
        .iter()
        .filter(|(_, client)| now.saturating_sub(client.last_seen) > hub.config.zombie_timeout_ms)
        .map(|(id, _)| id.clone())
        .collect()
}

fn with_hub(hub: Hub) -> impl Filter<Extract = (Hub,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || hub.clone())
}

/// Rejects browser upgrades from origins outside the allow-list. Requests
/// without an `Origin` header (native clients) pass.
fn origin_allowed(hub: Hub) -> impl Filter<Extract = (), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>("origin")
        .and(with_hub(hub))
        .and_then(|origin: Option<String>, hub: Hub| async move {
            match origin {
                Some(o) if !hub.config.is_origin_allowed(&o) => {
                    warn!("Origin {} not allowed, refusing upgrade", o);
                    Err(warp::reject::custom(OriginRejected))
                }
                _ => Ok(()),
            }
        })
        .untuple_one()
}

fn routes(hub: Hub) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let ws_route = warp::path("ws")
        .and(origin_allowed(hub.clone()))
        .and(warp::ws())
        .and(warp::query::<SessionParams>())
        .and(with_hub(hub.clone()))
        .map(|ws: warp::ws::Ws, params: SessionParams, hub: Hub| {
            ws.on_upgrade(move |socket| ws::client_connection(socket, params, hub))
        });

    let cors = warp::cors()
        .allow_origins(hub.config.allowed_origins.iter().map(String::as_str).collect::<Vec<_>>())
        .allow_method("GET");

    let health_route = warp::path("health")
        .and(warp::get())
        .and(with_hub(hub))
        .then(|hub: Hub| async move {
            let rooms = hub.rooms.read().await.len();
            let clients = hub.clients.read().await.len();
            warp::reply::json(&serde_json::json!({ "status": "ok", "rooms": rooms, "clients": clients }))
        })
        .with(cors);

    ws_route.or(health_route)
}

/// Resolves on the first SIGINT/SIGTERM (Ctrl+C elsewhere).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut term), Ok(mut int)) => {
                tokio::select! {
                    _ = term.recv() => info!("SIGTERM received"),
                    _ = int.recv() => info!("SIGINT received"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Cannot install signal handlers: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Ctrl+C received");
    }
}

#[tokio::main]
async fn main() {
    // RUST_LOG overrides the default `info` filter
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = HubConfig::from_env();
    info!("Allowed origins: {:?}", config.allowed_origins);
    let bind_addr = config.bind_addr;
    let hub = Hub::new(config, Arc::new(SystemClock));

    let sweep = spawn_zombie_sweep(hub.clone());

    info!("Watch-party hub listening on {}", bind_addr);
    let (_, server) = warp::serve(routes(hub.clone())).bind_with_graceful_shutdown(bind_addr, shutdown_signal());
    server.await;

    sweep.abort();
    if let Some(count) = open_rooms(&hub).await {
        info!("Dropping {} open room(s) on shutdown", count);
    }
    info!("Hub stopped, connections drained");
}

/// Number of rooms still open, if any.
async fn open_rooms(hub: &Hub) -> Option<usize> {
    let rooms = hub.rooms.read().await;
    (!rooms.is_empty()).then(|| rooms.len())
}

#[derive(Debug)]
struct OriginRejected;

impl warp::reject::Reject for OriginRejected {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::test_support::client;
    use watchparty_protocol::{ManualClock, Participant};

    #[tokio::test]
    async fn test_find_zombies() {
        let clock = Arc::new(ManualClock::new(100_000));
        let hub = Hub::new(HubConfig::default(), clock.clone());
        {
            let mut clients = hub.clients.write().await;
            let (mut quiet, _rx1) = client("quiet", None);
            quiet.last_seen = 10_000;
            let (mut chatty, _rx2) = client("chatty", None);
            chatty.last_seen = 99_000;
            clients.insert(ParticipantId::from("quiet"), quiet);
            clients.insert(ParticipantId::from("chatty"), chatty);
        }
        assert_eq!(find_zombies(&hub).await, vec![ParticipantId::from("quiet")]);
    }

    #[tokio::test]
    async fn test_open_rooms() {
        let hub = Hub::new(HubConfig::default(), Arc::new(ManualClock::new(0)));
        assert_eq!(open_rooms(&hub).await, None);

        let creator = Participant::new(ParticipantId::from("alice"), "Alice", 0);
        hub.rooms.write().await.create_room(creator).unwrap();
        assert_eq!(open_rooms(&hub).await, Some(1));
    }
}
