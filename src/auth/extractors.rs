use actix_web::dev::Payload;
use actix_web::{web, Error as ActixError, FromRequest, HttpMessage, HttpRequest};
use futures::future::LocalBoxFuture;

use crate::auth::principal::{Principal, PrincipalResolver};
use crate::auth::stage::RequestStage;
use crate::auth::token::Claims;
use crate::error::AppError;

/// Resolves the request's verified claims to a stored user.
///
/// Relies on `AuthMiddleware` having attached `Claims`; without them the request
/// carried no credential and is rejected as `Unauthorized`.
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub Principal);

impl FromRequest for CurrentPrincipal {
    type Error = ActixError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move {
            let claims = req.extensions().get::<Claims>().cloned();
            let Some(claims) = claims else {
                return Err(AppError::Unauthorized("Missing bearer token".into()).into());
            };
            let resolver = req
                .app_data::<web::Data<PrincipalResolver>>()
                .cloned()
                .ok_or_else(|| AppError::InternalServerError("Principal resolver not configured".into()))?;

            match resolver.resolve(&claims).await {
                Ok(principal) => {
                    let mut extensions = req.extensions_mut();
                    extensions.insert(RequestStage::TokenValidated.advance());
                    extensions.insert(principal.authorization().clone());
                    drop(extensions);
                    Ok(CurrentPrincipal(principal))
                }
                Err(err) => {
                    log::warn!(
                        "{} {} {}: {}",
                        req.method(),
                        req.path(),
                        RequestStage::TokenValidated.reject(),
                        err
                    );
                    req.extensions_mut()
                        .insert(RequestStage::TokenValidated.reject());
                    Err(err.into())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use actix_web::http::StatusCode;
    use actix_web::test;

    use crate::auth::principal::ProvisioningPolicy;
    use crate::auth::stage::AuthorizationMark;
    use crate::models::{NewUser, Role};
    use crate::store::{MemoryStore, Store};

    fn claims(sub: &str) -> Claims {
        Claims {
            sub: sub.to_string(),
            iss: Some("task-manager".to_string()),
            exp: 4_102_444_800,
            iat: 0,
            jti: None,
            email: None,
            given_name: None,
            family_name: None,
            roles: vec![],
            scope: None,
        }
    }

    fn resolver(store: Arc<MemoryStore>) -> web::Data<PrincipalResolver> {
        web::Data::new(PrincipalResolver::new(
            store,
            ProvisioningPolicy::Reject,
            Duration::from_secs(1),
        ))
    }

    #[actix_rt::test]
    async fn test_current_principal_extractor_success() {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user(NewUser {
                subject: "sub-123".to_string(),
                email: "x@example.com".to_string(),
                first_name: "X".to_string(),
                last_name: "Y".to_string(),
                password_digest: None,
                role: Role::User,
            })
            .await
            .unwrap();
        let req = test::TestRequest::default()
            .app_data(resolver(store))
            .to_http_request();
        req.extensions_mut().insert(claims("sub-123"));

        let mut payload = Payload::None;
        let principal = CurrentPrincipal::from_request(&req, &mut payload).await.unwrap();
        assert_eq!(principal.0.user_id, user.id);
        assert_eq!(
            req.extensions().get::<RequestStage>().copied(),
            Some(RequestStage::PrincipalResolved)
        );

        // The handler's grant is visible through the request.
        assert!(!req.extensions().get::<AuthorizationMark>().unwrap().is_set());
        principal.0.authorize();
        assert!(req.extensions().get::<AuthorizationMark>().unwrap().is_set());
    }

    #[actix_rt::test]
    async fn test_current_principal_extractor_without_claims() {
        let req = test::TestRequest::default()
            .app_data(resolver(Arc::new(MemoryStore::new())))
            .to_http_request();

        let mut payload = Payload::None;
        let err = CurrentPrincipal::from_request(&req, &mut payload).await.unwrap_err();
        assert_eq!(err.error_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn test_current_principal_extractor_unknown_subject() {
        let req = test::TestRequest::default()
            .app_data(resolver(Arc::new(MemoryStore::new())))
            .to_http_request();
        req.extensions_mut().insert(claims("nobody"));

        let mut payload = Payload::None;
        let err = CurrentPrincipal::from_request(&req, &mut payload).await.unwrap_err();
        assert_eq!(err.error_response().status(), StatusCode::UNAUTHORIZED);
    }
}
