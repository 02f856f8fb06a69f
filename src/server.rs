/// HTTP server assembly and lifecycle
use crate::{context::AppContext, error::ServiceResult};
use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the router with middleware attached. Separated from [`serve`] so
/// tests can drive it without binding a socket.
pub fn build_router(ctx: AppContext) -> Router {
    crate::api::routes()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Bind and serve until the process is stopped
pub async fn serve(ctx: AppContext) -> ServiceResult<()> {
    let addr = format!("{}:{}", ctx.config.server.hostname, ctx.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(addr, "listening");

    axum::serve(listener, build_router(ctx))
        .await
        .map_err(crate::error::ServiceError::Io)?;

    Ok(())
}
