use std::rc::Rc;
use std::sync::Arc;

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error, HttpMessage,
};
use futures::future::{ready, LocalBoxFuture, Ready};

use crate::auth::stage::{AuthorizationMark, RequestStage};
use crate::auth::token::{bearer_token, Claims, TokenValidator};
use crate::error::AppError;

/// Validates the bearer token, if any, and attaches its claims to the request.
///
/// Requests without an `Authorization` header pass through untouched; routes
/// that need a principal reject them in the `CurrentPrincipal` extractor.
/// Validation never touches the store.
pub struct AuthMiddleware {
    validator: Arc<TokenValidator>,
}

impl AuthMiddleware {
    pub fn new(validator: Arc<TokenValidator>) -> Self {
        Self { validator }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service: Rc::new(service),
            validator: self.validator.clone(),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
    validator: Arc<TokenValidator>,
}

fn authenticate(validator: &TokenValidator, req: &ServiceRequest) -> Result<Option<Claims>, AppError> {
    let Some(value) = req.headers().get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::InvalidToken("Authorization header is not valid text".into()))?;
    validator.validate(bearer_token(value)?).map(Some)
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let mut stage = RequestStage::Unauthenticated;
        match authenticate(&self.validator, &req) {
            Ok(Some(claims)) => {
                stage = stage.advance();
                req.extensions_mut().insert(claims);
            }
            Ok(None) => {}
            Err(app_err) => {
                log::warn!(
                    "{} {} {}: {}",
                    req.method(),
                    req.path(),
                    stage.reject(),
                    app_err
                );
                return Box::pin(async move { Err(app_err.into()) });
            }
        }
        req.extensions_mut().insert(stage);

        let service = self.service.clone();
        Box::pin(async move {
            let res = service.call(req).await?;
            let reached = {
                let extensions = res.request().extensions();
                let recorded = extensions.get::<RequestStage>().copied().unwrap_or(stage);
                recorded.authorized_if(extensions.get::<AuthorizationMark>())
            };
            let outcome = reached.finish(res.status().is_success());
            if let RequestStage::Rejected(_) = outcome {
                log::info!(
                    "{} {} -> {} ({})",
                    res.request().method(),
                    res.request().path(),
                    res.status(),
                    outcome
                );
            } else {
                log::debug!("{} {} {}", res.request().method(), res.request().path(), outcome);
            }
            Ok(res)
        })
    }
}
