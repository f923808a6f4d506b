use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::{
    config::{LimiterConfig, StorageBackendConfig},
    context::RequestContext,
    error::LimiterResult,
    limiter::RateLimiter,
    middleware::{
        ControlFlow, RequestMiddleware, logging::RequestLoggingMiddleware,
        rate_limit::RateLimitMiddleware,
    },
    storage::{StorageAdapter, in_memory::InMemoryAdapter, redis_backend::RedisAdapter},
};

/// The HTTP service: a middleware pipeline in front of the protected
/// handler. The storage adapter is built once here and shared for the life
/// of the process.
pub struct Service {
    middlewares: Vec<Arc<dyn RequestMiddleware>>,
}

impl Service {
    pub async fn from_config(config: LimiterConfig) -> LimiterResult<Self> {
        let adapter: Arc<dyn StorageAdapter> = match &config.backend {
            StorageBackendConfig::InMemory => Arc::new(InMemoryAdapter::new()),
            StorageBackendConfig::Redis { url, op_timeout } => {
                Arc::new(RedisAdapter::new(url, *op_timeout).await?)
            }
        };

        let limiter = RateLimiter::new(adapter);

        let middlewares: Vec<Arc<dyn RequestMiddleware>> = vec![
            Arc::new(RequestLoggingMiddleware),
            Arc::new(RateLimitMiddleware::new(
                limiter,
                config.policies,
                config.token_header,
            )),
        ];

        Ok(Self { middlewares })
    }

    pub async fn handle_http(
        &self,
        request: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Response<Body> {
        let (parts, _body) = request.into_parts();

        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut ctx = RequestContext::new(
            request_id,
            parts.method,
            parts.uri,
            parts.headers,
            client_addr,
        );

        let mut executed = Vec::new();

        for (idx, middleware) in self.middlewares.iter().enumerate() {
            match middleware.on_request(&mut ctx).await {
                Ok(ControlFlow::Continue) => executed.push(idx),
                Ok(ControlFlow::ShortCircuit(mut response)) => {
                    self.apply_response_middlewares(&executed, &ctx, &mut response)
                        .await;
                    self.attach_response_headers(&ctx.request_id, &mut response);
                    return response;
                }
                Err(err) => {
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        middleware = middleware.name(),
                        error = %err,
                        "middleware rejected request"
                    );
                    let mut response = err.into_response();
                    self.apply_response_middlewares(&executed, &ctx, &mut response)
                        .await;
                    self.attach_response_headers(&ctx.request_id, &mut response);
                    return response;
                }
            }
        }

        // The protected resource. Anything the pipeline admits lands here.
        let mut response = (StatusCode::OK, "Hello World!").into_response();
        self.apply_response_middlewares(&executed, &ctx, &mut response)
            .await;
        self.attach_response_headers(&ctx.request_id, &mut response);
        response
    }

    async fn apply_response_middlewares(
        &self,
        executed: &[usize],
        ctx: &RequestContext,
        response: &mut Response<Body>,
    ) {
        for idx in executed.iter().rev() {
            let middleware = &self.middlewares[*idx];
            if let Err(err) = middleware.on_response(ctx, response).await {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    middleware = middleware.name(),
                    error = %err,
                    "middleware post-response hook failed"
                );
            }
        }
    }

    fn attach_response_headers(&self, request_id: &str, response: &mut Response<Body>) {
        if let Ok(value) = HeaderValue::from_str(request_id) {
            response
                .headers_mut()
                .insert(HeaderName::from_static("x-request-id"), value);
        }

        response.headers_mut().insert(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        );
    }
}
