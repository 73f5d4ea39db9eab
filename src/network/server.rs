//! WebSocket Feed Server
//!
//! Streams table state and round events to clients, accepts deposits and
//! operator commands, and serves public verification requests.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::core::ticket::combined_seed;
use crate::proof::verify::verify;
use crate::network::protocol::{
    ClientMessage, DepositRequest, ErrorCode, ErrorReply, ServerMessage, VerifyResult,
    DEFAULT_HISTORY_LIMIT,
};
use crate::table::manager::TableManager;
use crate::table::runner::TableRunner;

/// Outgoing queue depth per client.
const CLIENT_QUEUE: usize = 64;

/// Feed server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,

}

/// Connected client state.
struct ConnectedClient {
    /// Subscribed table.
    subscription: Option<String>,
    /// Task forwarding table events to this client.
    forwarder: Option<JoinHandle<()>>,
    /// Connection time.
    connected_at: Instant,
    /// Last activity.
    last_activity: Instant,
}

impl ConnectedClient {
    fn stop_forwarding(&mut self) {
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
        self.subscription = None;
    }
}

/// Tell an over-limit client why it is being turned away, then close.
async fn reject_connection(stream: TcpStream, addr: SocketAddr) {
    let mut ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("WebSocket handshake failed for rejected {}: {}", addr, e);
            return;
        }
    };

    let reply = ServerMessage::error(
        ErrorCode::ServerOverloaded,
        ServerError::ConnectionLimitReached.to_string(),
    );
    if let Ok(text) = reply.to_json() {
        let _ = ws_stream.send(Message::Text(text)).await;
    }
    let _ = ws_stream.close(None).await;
}

/// Compare operator tokens without short-circuiting on the first differing byte.
fn token_matches(expected: Option<&str>, supplied: &str) -> bool {
    let expected = match expected {
        Some(e) => e.as_bytes(),
        None => return false,
    };
    let supplied = supplied.as_bytes();
    if expected.len() != supplied.len() {
        return false;
    }
    expected
        .iter()
        .zip(supplied)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

// =============================================================================
// REQUEST HANDLING
// =============================================================================

/// Stateless request handling shared by every connection.
#[derive(Clone)]
pub struct FeedHandler {
    config: ServerConfig,
    tables: Arc<TableManager>,
}

impl FeedHandler {
    /// Create a handler over the given tables.
    pub fn new(config: ServerConfig, tables: Arc<TableManager>) -> Self {
        Self { config, tables }
    }

    async fn table(&self, table_id: &str) -> Result<TableRunner, ServerMessage> {
        self.tables.get(table_id).await.ok_or_else(|| {
            ServerMessage::error(ErrorCode::UnknownTable, format!("No table named {:?}", table_id))
        })
    }

    fn authorize(&self, msg: &ClientMessage) -> Result<(), ServerMessage> {
        match msg.operator_token() {
            Some(token) if token_matches(self.config.operator_token.as_deref(), token) => Ok(()),
            Some(_) => Err(ServerMessage::error(ErrorCode::Unauthorized, "Operator token rejected")),
            None => Ok(()),
        }
    }

    /// Welcome message for a new connection.
    pub async fn welcome(&self) -> ServerMessage {
        ServerMessage::Welcome {
            server_version: self.config.version.clone(),
            tables: self.tables.table_ids().await,
        }
    }

    /// Handle one request and produce its reply.
    ///
    /// `Subscribe` / `Unsubscribe` need the connection and are answered by
    /// the connection loop; here they only validate the table.
    pub async fn handle(&self, msg: ClientMessage) -> ServerMessage {
        if let Err(reply) = self.authorize(&msg) {
            warn!("Rejected privileged message without valid operator token");
            return reply;
        }

        match self.dispatch(msg).await {
            Ok(reply) | Err(reply) => reply,
        }
    }

    async fn dispatch(&self, msg: ClientMessage) -> Result<ServerMessage, ServerMessage> {
        let reply = match msg {
            ClientMessage::Subscribe { table_id } => {
                ServerMessage::State(self.table(&table_id).await?.view().await)
            }
            ClientMessage::Unsubscribe => {
                ServerMessage::error(ErrorCode::InvalidInput, "Unsubscribe needs a live connection")
            }
            ClientMessage::Deposit(req) => self.handle_deposit(req).await?,
            ClientMessage::ForceResolve { table_id, .. } => {
                let round_id = self.table(&table_id).await?.force_resolve().await.map_err(round_error)?;
                ServerMessage::ForceResolveAccepted { table_id, round_id }
            }
            ClientMessage::Void { table_id, reason, .. } => {
                let refunds = self.table(&table_id).await?.void(reason).await.map_err(round_error)?;
                ServerMessage::Voided { table_id, refunds }
            }
            ClientMessage::Verify { server_seed, random_seed } => {
                // Pasted seeds often carry stray whitespace
                let server_seed = server_seed.trim().to_string();
                let random_seed = random_seed.trim().to_string();
                let ticket = verify(&server_seed, &random_seed).map_err(round_error)?;
                ServerMessage::VerifyResult(VerifyResult {
                    combined_seed: combined_seed(&server_seed, &random_seed),
                    ticket_text: ticket.to_string(),
                    ticket,
                    server_seed,
                    random_seed,
                })
            }
            ClientMessage::VerifyRound { table_id, round_id } => {
                let result = self
                    .table(&table_id)
                    .await?
                    .verify_round(round_id)
                    .await
                    .map_err(round_error)?;
                ServerMessage::RoundVerified(result)
            }
            ClientMessage::History { table_id, limit } => {
                let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
                let records = self.table(&table_id).await?.history(limit).await;
                ServerMessage::History { table_id, records }
            }
            ClientMessage::Stats { table_id, participant_id } => {
                let stats = self.table(&table_id).await?.participant_stats(&participant_id).await;
                ServerMessage::Stats { participant_id, stats }
            }
            ClientMessage::Ping { timestamp } => ServerMessage::Pong {
                timestamp,
                server_time: now_millis(),
            },
        };
        Ok(reply)
    }

    async fn handle_deposit(&self, req: DepositRequest) -> Result<ServerMessage, ServerMessage> {
        let runner = self.table(&req.table_id).await?;
        let result = match req.round_id {
            Some(round_id) => {
                runner
                    .add_stake(round_id, req.participant_id, req.items, req.total_value)
                    .await
            }
            None => runner.deposit(req.participant_id, req.items, req.total_value).await,
        };

        let stake = result.map_err(round_error)?;
        Ok(ServerMessage::DepositAccepted {
            table_id: req.table_id,
            stake,
        })
    }
}

fn round_error(err: crate::error::RoundError) -> ServerMessage {
    if err.is_rejection() {
        debug!("Request rejected: {}", err);
    } else {
        warn!("Request failed: {}", err);
    }
    ServerMessage::Error(ErrorReply::from(&err))
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

// =============================================================================
// SERVER
// =============================================================================

/// The feed server.
pub struct FeedServer {
    /// Server configuration.
    config: ServerConfig,
    /// Request handling.
    handler: FeedHandler,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl FeedServer {
    /// Create a feed server over the given tables.
    pub fn new(config: ServerConfig, tables: Arc<TableManager>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            handler: FeedHandler::new(config.clone(), tables),
            config,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Sender that stops the accept loop and closes every connection.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Number of connected clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Run the server until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Feed server listening on {}", self.config.bind_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.client_count().await >= self.config.max_connections {
                                warn!("{} for {}", ServerError::ConnectionLimitReached, addr);
                                tokio::spawn(reject_connection(stream, addr));
                                continue;
                            }

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let handler = self.handler.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(CLIENT_QUEUE);

            // Register client
            {
                let now = Instant::now();
                clients.write().await.insert(addr, ConnectedClient {
                    subscription: None,
                    forwarder: None,
                    connected_at: now,
                    last_activity: now,
                });
            }

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            let _ = msg_tx.send(handler.welcome().await).await;

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::error(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        )).await;
                                        continue;
                                    }
                                };

                                if let Some(client) = clients.write().await.get_mut(&addr) {
                                    client.last_activity = Instant::now();
                                }

                                Self::handle_client_message(addr, client_msg, &clients, &handler, &msg_tx).await;
                            }
                            Some(Ok(Message::Ping(_))) => {
                                // tungstenite answers pings itself
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup
            if let Some(mut client) = clients.write().await.remove(&addr) {
                debug!(
                    "Client {} ({:?}) cleaned up after {:?}, idle {:?}",
                    addr,
                    client.subscription,
                    client.connected_at.elapsed(),
                    client.last_activity.elapsed()
                );
                client.stop_forwarding();
            }
            drop(msg_tx);
            let _ = sender_task.await;
        });
    }

    /// Handle a client message.
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        clients: &Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
        handler: &FeedHandler,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::Subscribe { table_id } => {
                Self::handle_subscribe(addr, table_id, clients, handler, sender).await;
            }
            ClientMessage::Unsubscribe => {
                if let Some(client) = clients.write().await.get_mut(&addr) {
                    client.stop_forwarding();
                }
            }
            other => {
                let _ = sender.send(handler.handle(other).await).await;
            }
        }
    }

    /// Send the table's state, then forward its events until unsubscribed.
    async fn handle_subscribe(
        addr: SocketAddr,
        table_id: String,
        clients: &Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
        handler: &FeedHandler,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let runner = match handler.table(&table_id).await {
            Ok(runner) => runner,
            Err(reply) => {
                let _ = sender.send(reply).await;
                return;
            }
        };

        let (view, mut events) = runner.subscribe_with_view().await;
        let _ = sender.send(ServerMessage::State(view)).await;

        let forward_tx = sender.clone();
        let forward_table = table_id.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                let msg = match events.recv().await {
                    Ok(event) => ServerMessage::Event {
                        table_id: forward_table.clone(),
                        event,
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Subscriber lagged by {} events, resyncing", skipped);
                        ServerMessage::State(runner.view().await)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if forward_tx.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let mut clients = clients.write().await;
        match clients.get_mut(&addr) {
            Some(client) => {
                client.stop_forwarding();
                client.subscription = Some(table_id.clone());
                client.forwarder = Some(forwarder);
                debug!("Client {} subscribed to {}", addr, table_id);
            }
            None => forwarder.abort(),
        }
    }
}
