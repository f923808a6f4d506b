pub mod logging;
pub mod rate_limit;

use async_trait::async_trait;
use axum::{body::Body, response::Response};

use crate::{context::RequestContext, error::LimiterResult};

pub enum ControlFlow {
    Continue,
    ShortCircuit(Response<Body>),
}

#[async_trait]
pub trait RequestMiddleware: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_request(&self, ctx: &mut RequestContext) -> LimiterResult<ControlFlow>;

    async fn on_response(
        &self,
        _ctx: &RequestContext,
        _response: &mut Response<Body>,
    ) -> LimiterResult<()> {
        Ok(())
    }
}
