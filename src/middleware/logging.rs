use async_trait::async_trait;

use crate::{
    context::RequestContext,
    error::LimiterResult,
    middleware::{ControlFlow, RequestMiddleware},
};

pub struct RequestLoggingMiddleware;

#[async_trait]
impl RequestMiddleware for RequestLoggingMiddleware {
    fn name(&self) -> &'static str {
        "request-logging"
    }

    async fn on_request(&self, ctx: &mut RequestContext) -> LimiterResult<ControlFlow> {
        tracing::info!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.uri.path(),
            client_addr = ?ctx.client_addr,
            "incoming request"
        );
        Ok(ControlFlow::Continue)
    }

    async fn on_response(
        &self,
        ctx: &RequestContext,
        response: &mut axum::response::Response,
    ) -> LimiterResult<()> {
        let latency_ms = ctx.started_at.elapsed().as_millis();
        tracing::info!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.uri.path(),
            status = %response.status(),
            latency_ms = latency_ms,
            "request completed"
        );
        Ok(())
    }
}
