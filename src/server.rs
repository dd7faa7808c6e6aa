//! WebSocket and HTTP transport
//!
//! * `GET /ws?gameCode=..&role=..` upgrades to a WebSocket and attaches it
//!   through the [`Gateway`]
//! * `POST /quizzes/{quizId}/start` creates a room for a quiz
//! * `GET /health` reports liveness and the number of rooms
//! * `GET /games` lists live rooms

use std::convert::Infallible;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use warp::{
    Filter, Rejection, Reply,
    http::StatusCode,
    ws::{Message, WebSocket, Ws},
};

use crate::{
    SyncMessage, UpdateMessage,
    collaborator::QuizId,
    error::{Error, ErrorKind},
    game_code::GameCode,
    gateway::{Gateway, Handshake},
    session::Tunnel,
};

/// Largest accepted HTTP request body
const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Outbound half of a WebSocket
///
/// Frames are queued on an unbounded channel drained by the socket's writer
/// task, so sending never blocks the room that sends.
#[derive(Debug, Clone)]
pub struct WsTunnel {
    sender: mpsc::UnboundedSender<Message>,
}

impl WsTunnel {
    fn push(&self, text: serde_json::Result<String>) {
        match text {
            Ok(text) => {
                // the writer is gone once the socket closed; dropping is fine
                self.sender.send(Message::text(text)).ok();
            }
            Err(error) => tracing::error!(%error, "cannot serialize outbound frame"),
        }
    }
}

impl Tunnel for WsTunnel {
    fn send_message(&self, message: &UpdateMessage) {
        self.push(message.to_message());
    }

    fn send_state(&self, state: &SyncMessage) {
        self.push(state.to_message());
    }

    fn close(self) {
        self.sender.send(Message::close()).ok();
    }
}

/// Body of `POST /quizzes/{quizId}/start`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQuizRequest {
    /// The only host identity the room will accept
    #[serde(default)]
    pub host_id: Option<String>,
}

/// Response of `POST /quizzes/{quizId}/start`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQuizResponse {
    /// Code of the created room
    pub game_code: GameCode,
}

/// Response of `GET /health`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `ok` while the server answers
    pub status: &'static str,
    /// Number of live rooms
    pub active_games: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: ErrorKind,
    message: String,
}

fn status_code(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Protocol => StatusCode::BAD_REQUEST,
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::State => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_reply(error: &Error) -> warp::reply::Response {
    let body = ErrorBody {
        kind: error.kind(),
        message: error.to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), status_code(error.kind())).into_response()
}

fn with_gateway(
    gateway: Gateway<WsTunnel>,
) -> impl Filter<Extract = (Gateway<WsTunnel>,), Error = Infallible> + Clone {
    warp::any().map(move || gateway.clone())
}

/// Every route of the server
pub fn routes(
    gateway: Gateway<WsTunnel>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    websocket_route(gateway.clone())
        .or(start_quiz_route(gateway.clone()))
        .or(health_route(gateway.clone()))
        .or(games_route(gateway))
}

/// `GET /ws`
pub fn websocket_route(
    gateway: Gateway<WsTunnel>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(
            warp::query::<Handshake>()
                .or(warp::any().map(Handshake::default))
                .unify(),
        )
        .and(with_gateway(gateway))
        .map(|ws: Ws, handshake: Handshake, gateway: Gateway<WsTunnel>| {
            ws.on_upgrade(move |websocket| handle_socket(websocket, handshake, gateway))
        })
}

/// `POST /quizzes/{quizId}/start`
pub fn start_quiz_route(
    gateway: Gateway<WsTunnel>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("quizzes" / String / "start")
        .and(warp::post())
        .and(
            warp::body::content_length_limit(MAX_BODY_BYTES)
                .and(warp::body::json::<StartQuizRequest>())
                .or(warp::any().map(StartQuizRequest::default))
                .unify(),
        )
        .and(with_gateway(gateway))
        .and_then(start_quiz)
}

/// `GET /health`
pub fn health_route(
    gateway: Gateway<WsTunnel>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_gateway(gateway))
        .and_then(health)
}

/// `GET /games`
pub fn games_route(
    gateway: Gateway<WsTunnel>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("games")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_gateway(gateway))
        .and_then(games)
}

async fn start_quiz(
    quiz_id: String,
    request: StartQuizRequest,
    gateway: Gateway<WsTunnel>,
) -> Result<warp::reply::Response, Infallible> {
    let host_id = request.host_id.filter(|id| !id.trim().is_empty());
    match gateway.start_quiz(QuizId::from(quiz_id), host_id).await {
        Ok(game_code) => {
            tracing::info!(game_code = %game_code, "quiz started over http");
            Ok(warp::reply::with_status(
                warp::reply::json(&StartQuizResponse { game_code }),
                StatusCode::CREATED,
            )
            .into_response())
        }
        Err(error) => {
            tracing::warn!(%error, "quiz start rejected");
            Ok(error_reply(&error))
        }
    }
}

async fn health(gateway: Gateway<WsTunnel>) -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&HealthResponse {
        status: "ok",
        active_games: gateway.active_games().await,
    }))
}

async fn games(gateway: Gateway<WsTunnel>) -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&gateway.summaries().await))
}

/// Drives one WebSocket until either side closes it
pub async fn handle_socket(websocket: WebSocket, handshake: Handshake, gateway: Gateway<WsTunnel>) {
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            let closing = message.is_close();
            if let Err(error) = ws_sender.send(message).await {
                tracing::debug!(%error, "websocket send failed");
                break;
            }
            if closing {
                break;
            }
        }
        ws_sender.close().await.ok();
    });

    let Ok(session) = gateway.connect(&handshake, WsTunnel { sender }).await else {
        // the error frame and the close frame are already queued
        writer.await.ok();
        return;
    };

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(message) if message.is_close() => break,
            Ok(message) => {
                if let Ok(text) = message.to_str() {
                    gateway.receive(&session, text).await;
                }
            }
            Err(error) => {
                tracing::debug!(connection = %session.connection, %error, "websocket receive failed");
                break;
            }
        }
    }

    gateway.disconnect(&session).await;
    writer.abort();
    tracing::info!(
        game_code = %session.game_code,
        connection = %session.connection,
        "connection closed"
    );
}
