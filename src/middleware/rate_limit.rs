use async_trait::async_trait;
use axum::{
    Json,
    body::Body,
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    context::RequestContext,
    error::LimiterResult,
    limiter::{Decision, RateLimiter},
    middleware::{ControlFlow, RequestMiddleware},
    policy::PolicyTable,
};

const DENIED_MESSAGE: &str = "You have reached the maximum number of requests or actions allowed within a certain time frame.";

#[derive(Serialize)]
struct RateLimitBody<'a> {
    error: &'a str,
    message: &'a str,
}

/// Consumption contract for the decision engine: resolves the caller's
/// identity and policy, asks the limiter, and translates the outcome into
/// pass-through, 429, or (via error propagation) a fail-closed 500.
pub struct RateLimitMiddleware {
    limiter: RateLimiter,
    policies: PolicyTable,
    token_header: HeaderName,
}

impl RateLimitMiddleware {
    pub fn new(limiter: RateLimiter, policies: PolicyTable, token_header: String) -> Self {
        let token_header = HeaderName::from_bytes(token_header.as_bytes())
            .unwrap_or_else(|_| HeaderName::from_static("api_key"));

        Self {
            limiter,
            policies,
            token_header,
        }
    }

    fn denied_response(&self, blocked_until: DateTime<Utc>) -> Response<Body> {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(RateLimitBody {
                error: "rate_limited",
                message: DENIED_MESSAGE,
            }),
        )
            .into_response();

        let retry_after_secs = (blocked_until - Utc::now()).num_seconds().max(1);
        if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }

        response
    }
}

#[async_trait]
impl RequestMiddleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    async fn on_request(&self, ctx: &mut RequestContext) -> LimiterResult<ControlFlow> {
        let token = ctx
            .headers
            .get(&self.token_header)
            .and_then(|v| v.to_str().ok());
        let remote_addr = ctx
            .client_addr
            .map(|addr| addr.to_string())
            .unwrap_or_default();

        let (key, policy) = self.policies.resolve(token, &remote_addr);

        match self.limiter.check(&key, &policy).await? {
            Decision::Allowed { count } => {
                let remaining =
                    u64::from(policy.max_requests_per_second).saturating_sub(count);
                ctx.metadata
                    .insert("ratelimit.remaining".to_string(), remaining.to_string());
                Ok(ControlFlow::Continue)
            }
            Decision::Denied { blocked_until } => Ok(ControlFlow::ShortCircuit(
                self.denied_response(blocked_until),
            )),
        }
    }

    async fn on_response(
        &self,
        ctx: &RequestContext,
        response: &mut Response<Body>,
    ) -> LimiterResult<()> {
        if let Some(remaining) = ctx.metadata.get("ratelimit.remaining")
            && let Ok(value) = HeaderValue::from_str(remaining)
        {
            response
                .headers_mut()
                .insert(HeaderName::from_static("x-ratelimit-remaining"), value);
        }

        Ok(())
    }
}
