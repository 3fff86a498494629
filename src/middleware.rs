use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{Error, HttpMessage};
use futures_util::future::{ok, Ready};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::auth::{ResolvedApiKey, API_KEY_HEADER};

/// Copies the key of the authenticated user into the `api-key` response
/// header, for every response whose request resolved a key.
#[derive(Clone, Default)]
pub struct EchoApiKey;

impl<S, B> Transform<S, ServiceRequest> for EchoApiKey
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = EchoApiKeyMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(EchoApiKeyMiddleware { service })
    }
}

pub struct EchoApiKeyMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for EchoApiKeyMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        log::debug!("New {} request to {}", req.method(), req.path());

        let fut = self.service.call(req);

        Box::pin(async move {
            let mut res = fut.await?;

            let resolved = res
                .request()
                .extensions()
                .get::<ResolvedApiKey>()
                .map(|key| key.0.clone());

            if let Some(key) = resolved {
                match HeaderValue::from_str(&key) {
                    Ok(value) => {
                        res.headers_mut()
                            .insert(HeaderName::from_static(API_KEY_HEADER), value);
                    }
                    Err(e) => log::warn!("Cannot echo api-key header: {}", e),
                }
            }

            Ok(res)
        })
    }
}
