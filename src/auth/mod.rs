use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpMessage, HttpRequest};
use futures_util::future::{ready, Ready};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::models::User;
use crate::store::{Store, StoreError, StoreResult};

/// Request and response header carrying the user's key
pub const API_KEY_HEADER: &str = "api-key";

pub struct AuthService {
    store: Arc<Store>,
}

impl AuthService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Resolve an API key to its user. Unknown keys fail closed.
    pub fn authenticate(&self, api_key: &str) -> Result<User, ApiError> {
        if api_key.is_empty() {
            return Err(ApiError::Unauthorized("API Key Authentication failed!".to_string()));
        }

        match self.store.get_user_by_api_key(api_key) {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound(_)) => {
                log::debug!("Rejected unknown API key");
                Err(ApiError::Unauthorized("API Key Authentication failed!".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create a user holding `api_key` unless one already exists
    pub fn ensure_user(&self, name: &str, api_key: &str) -> StoreResult<User> {
        match self.store.get_user_by_api_key(api_key) {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound(_)) => {
                let mut user = User {
                    id: 0,
                    name: name.to_string(),
                    api_key: api_key.to_string(),
                    created_at: chrono::Utc::now(),
                };
                self.store.create_user(&mut user)?;
                log::info!("Created user '{}' (id {})", user.name, user.id);
                Ok(user)
            }
            Err(e) => Err(e),
        }
    }
}

/// Authenticated user extracted from the `api-key` header
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Key of the resolved user, left in request extensions for `EchoApiKey`
#[derive(Debug, Clone)]
pub struct ResolvedApiKey(pub String);

impl FromRequest for CurrentUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract_current_user(req))
    }
}

fn extract_current_user(req: &HttpRequest) -> Result<CurrentUser, ApiError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ApiError::Internal("AppState is not registered".to_string()))?;

    let api_key = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing api-key header".to_string()))?;

    let user = state.auth_service.authenticate(api_key)?;
    req.extensions_mut().insert(ResolvedApiKey(user.api_key.clone()));

    Ok(CurrentUser(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaStorage;
    use actix_web::test as actix_test;

    fn create_test_auth_service() -> AuthService {
        let store = Store::in_memory().unwrap();
        AuthService::new(Arc::new(store))
    }

    #[test]
    fn test_ensure_user_is_idempotent() {
        let auth = create_test_auth_service();

        let first = auth.ensure_user("Ivan Volkov", "test").unwrap();
        let second = auth.ensure_user("Someone Else", "test").unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Ivan Volkov");
    }

    #[test]
    fn test_authenticate() {
        let auth = create_test_auth_service();
        let user = auth.ensure_user("Ivan Volkov", "test").unwrap();

        assert_eq!(auth.authenticate("test").unwrap().id, user.id);
        assert!(matches!(auth.authenticate("wrong"), Err(ApiError::Unauthorized(_))));
        assert!(matches!(auth.authenticate(""), Err(ApiError::Unauthorized(_))));
    }

    #[actix_web::test]
    async fn test_extractor_resolves_header() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = Arc::new(Store::in_memory().unwrap());
        let auth_service = Arc::new(AuthService::new(store.clone()));
        auth_service.ensure_user("Nikita Ivanov", "dev").unwrap();

        let state = web::Data::new(AppState {
            store,
            auth_service,
            media: Arc::new(MediaStorage::new(temp.path().to_path_buf(), vec!["png".into()], 1024)),
        });

        let req = actix_test::TestRequest::default()
            .insert_header((API_KEY_HEADER, "dev"))
            .app_data(state.clone())
            .to_http_request();
        let CurrentUser(user) = CurrentUser::extract(&req).await.unwrap();
        assert_eq!(user.name, "Nikita Ivanov");
        assert_eq!(req.extensions().get::<ResolvedApiKey>().unwrap().0, "dev");

        let req = actix_test::TestRequest::default().app_data(state).to_http_request();
        assert!(matches!(CurrentUser::extract(&req).await, Err(ApiError::Unauthorized(_))));
    }
}
