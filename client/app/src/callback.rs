use std::sync::{Arc, Mutex};

use axum::{
    Router,
    extract::{Query, State},
    response::Html,
    routing::get,
};
use serde::Deserialize;
use tokio::{
    net::TcpListener,
    signal::ctrl_c,
    sync::{Notify, oneshot},
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::AppError;

type Delivery = Arc<Mutex<Option<oneshot::Sender<Result<String, String>>>>>;

#[derive(Clone)]
struct CallbackState {
    delivery: Delivery,
    done: Arc<Notify>,
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error_description: Option<String>,
}

/// One-shot loopback server the identity provider redirects back to.
pub struct CallbackServer {
    listener: TcpListener,
    redirect_to: String,
}

impl CallbackServer {
    /// Port `0` picks a free port.
    pub async fn bind(port: u16) -> Result<Self, AppError> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let address = listener.local_addr()?;
        info!("Callback listening on {address}");

        Ok(Self {
            listener,
            redirect_to: format!("http://{address}/callback"),
        })
    }

    pub fn redirect_to(&self) -> &str {
        &self.redirect_to
    }

    /// Serves until the first callback arrives, or Ctrl+C.
    pub async fn wait_for_code(self) -> Result<String, AppError> {
        let (tx, rx) = oneshot::channel();
        let done = Arc::new(Notify::new());
        let state = CallbackState {
            delivery: Arc::new(Mutex::new(Some(tx))),
            done: done.clone(),
        };

        let app = Router::new()
            .route("/callback", get(callback_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown_signal(done))
            .await?;

        match rx.await {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(message)) => Err(AppError::SignIn(message)),
            Err(_) => Err(AppError::SignIn("cancelled".to_string())),
        }
    }
}

async fn callback_handler(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let outcome = match (params.code, params.error_description) {
        (Some(code), _) if !code.is_empty() => Ok(code),
        (_, Some(description)) => Err(description),
        _ => Err("missing code".to_string()),
    };
    let succeeded = outcome.is_ok();

    let sender = state
        .delivery
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take();
    if let Some(sender) = sender {
        // The receiver only goes away once the server is shutting down.
        let _ = sender.send(outcome);
        state.done.notify_one();
    }

    if succeeded {
        Html("<h2>Sesión iniciada</h2><p>Ya puedes cerrar esta ventana y volver a la terminal.</p>")
    } else {
        Html("<h2>No se pudo iniciar sesión</h2><p>Vuelve a la terminal para intentarlo de nuevo.</p>")
    }
}

async fn shutdown_signal(done: Arc<Notify>) {
    tokio::select! {
        _ = done.notified() => {
            info!("Callback received, shutting down");
        },
        _ = ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        },
    }
}
