use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_types::api::Claims;
use parley_types::events::{GatewayCommand, GatewayEvent};
use parley_types::models::ChatRef;

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection. The client opens with an
/// `Identify` command carrying its bearer token; the token's subject is
/// the external identity, which must resolve to a synced user record.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let user_id = match wait_for_identify(&mut receiver, &db, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} connected to gateway", user_id);

    let ready = GatewayEvent::Ready { user_id };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    // Send existing online users to this client so they see who's already here
    for uid in dispatcher.online_users().await {
        let event = GatewayEvent::PresenceUpdate { user_id: uid, is_online: true };
        if sender
            .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
            .await
            .is_err()
        {
            return;
        }
    }

    // Go online: broadcast to everyone else and persist the flag
    let conn_id = dispatcher.connect(user_id).await;
    set_presence(&db, user_id, true).await;

    let mut broadcast_rx = dispatcher.subscribe();

    // Per-connection chat subscriptions (shared between send and recv tasks).
    let subscriptions: Arc<std::sync::RwLock<HashSet<ChatRef>>> =
        Arc::new(std::sync::RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if let Some(chat) = event.chat_scope() {
                        let subs = send_subscriptions.read()
                            .expect("subscription lock poisoned");
                        if !subs.contains(&chat) {
                            continue;
                        }
                    }

                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_subscriptions = subscriptions.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(GatewayCommand::Subscribe { chats }) => {
                        let mut subs = recv_subscriptions
                            .write()
                            .expect("subscription lock poisoned");
                        *subs = chats.into_iter().collect();
                    }
                    // Already identified
                    Ok(GatewayCommand::Identify { .. }) => {}
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if dispatcher.disconnect(user_id, conn_id).await {
        set_presence(&db, user_id, false).await;
    }
    info!("{} disconnected from gateway", user_id);
}

/// Wait for the Identify command, validate the token, and resolve the
/// external identity to an internal user id.
async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    db: &Arc<Database>,
    jwt_secret: &str,
) -> Option<Uuid> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let msg = receiver.next().await?.ok()?;
    let text = match msg {
        Message::Text(text) => text,
        _ => return None,
    };

    let token = match serde_json::from_str::<GatewayCommand>(&text) {
        Ok(GatewayCommand::Identify { token }) => token,
        _ => return None,
    };

    let claims = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?
    .claims;

    let db = db.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_external_id(&claims.sub))
        .await
        .ok()?
        .ok()??;

    user.id.parse().ok()
}

async fn set_presence(db: &Arc<Database>, user_id: Uuid, is_online: bool) {
    let db = db.clone();
    let now = chrono::Utc::now().timestamp_millis();
    let result =
        tokio::task::spawn_blocking(move || db.set_presence(&user_id.to_string(), is_online, now))
            .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to persist presence for {}: {}", user_id, e),
        Err(e) => warn!("spawn_blocking join error: {}", e),
    }
}
