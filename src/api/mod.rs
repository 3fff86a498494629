pub mod error;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::{AuthService, CurrentUser};
use crate::media::{content_type_for, MediaError, MediaStorage};
use crate::models::*;
use crate::store::Store;

use self::error::{json_error_handler, path_error_handler, query_error_handler, ApiError};

pub const DEFAULT_FEED_LIMIT: i64 = 50;
pub const MAX_FEED_LIMIT: i64 = 100;

pub struct AppState {
    pub store: Arc<Store>,
    pub auth_service: Arc<AuthService>,
    pub media: Arc<MediaStorage>,
}

// ==================== Health Check ====================

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

pub async fn not_found() -> Result<HttpResponse, ApiError> {
    Err(ApiError::NotFound("Resource not found!".to_string()))
}

// ==================== Users Endpoints ====================

pub async fn get_me(
    state: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<HttpResponse, ApiError> {
    let profile = state.store.get_user_profile(user.id)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(UserPayload { user: profile })))
}

pub async fn get_user(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let user_id = positive_id(path.into_inner(), "user_id")?;
    let profile = state.store.get_user_profile(user_id)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(UserPayload { user: profile })))
}

pub async fn follow_user(
    state: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let user_id = positive_id(path.into_inner(), "user_id")?;
    state.store.create_follow(user.id, user_id)?;

    log::info!("User {} now follows user {}", user.id, user_id);
    Ok(HttpResponse::Ok().json(ApiResponse::ok()))
}

pub async fn unfollow_user(
    state: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let user_id = positive_id(path.into_inner(), "user_id")?;
    state.store.delete_follow(user.id, user_id)?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok()))
}

// ==================== Tweets Endpoints ====================

#[derive(Deserialize)]
pub struct FeedQuery {
    offset: Option<i64>,
    limit: Option<i64>,
}

pub async fn create_tweet(
    state: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    body: web::Json<CreateTweetRequest>,
) -> Result<HttpResponse, ApiError> {
    body.validate().map_err(ApiError::Validation)?;

    let mut tweet = Tweet {
        id: 0,
        user_id: user.id,
        content: body.tweet_data.clone(),
        created_at: Utc::now(),
    };
    state.store.create_tweet(&mut tweet, body.media_ids())?;

    log::info!("User {} created tweet {}", user.id, tweet.id);
    Ok(HttpResponse::Created().json(ApiResponse::success(TweetCreated { tweet_id: tweet.id })))
}

pub async fn get_tweets(
    state: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    query: web::Query<FeedQuery>,
) -> Result<HttpResponse, ApiError> {
    let offset = query.offset.unwrap_or(0).max(0);
    let limit = query.limit.unwrap_or(DEFAULT_FEED_LIMIT).clamp(0, MAX_FEED_LIMIT);

    let mut tweets = state.store.get_feed(user.id, offset, limit)?;
    for tweet in &mut tweets {
        tweet.attachments = tweet
            .attachments
            .iter()
            .map(|file_name| state.media.public_url(file_name))
            .collect();
    }

    Ok(HttpResponse::Ok().json(ApiResponse::success(FeedPayload { tweets })))
}

pub async fn delete_tweet(
    state: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let tweet_id = positive_id(path.into_inner(), "tweet_id")?;

    let tweet = state.store.get_tweet(tweet_id)?;
    if tweet.user_id != user.id {
        return Err(ApiError::Forbidden(format!(
            "You don't have permission to delete the tweet '{}'!",
            tweet_id
        )));
    }

    // Files go first; a failure here leaves the rows untouched
    for media in state.store.get_media_by_tweet_id(tweet_id)? {
        match state.media.delete(&media.file_name) {
            Ok(()) => {}
            Err(MediaError::NotFound(_)) => {
                log::warn!("Media file {} of tweet {} was already gone", media.file_name, tweet_id);
            }
            Err(e) => return Err(e.into()),
        }
    }

    state.store.delete_tweet(tweet_id)?;

    log::info!("User {} deleted tweet {}", user.id, tweet_id);
    Ok(HttpResponse::Ok().json(ApiResponse::ok()))
}

// ==================== Likes Endpoints ====================

pub async fn like_tweet(
    state: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let tweet_id = positive_id(path.into_inner(), "tweet_id")?;
    state.store.create_like(tweet_id, user.id)?;
    Ok(HttpResponse::Created().json(ApiResponse::ok()))
}

pub async fn unlike_tweet(
    state: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let tweet_id = positive_id(path.into_inner(), "tweet_id")?;
    state.store.delete_like(tweet_id, user.id)?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok()))
}

// ==================== Medias Endpoints ====================

pub async fn upload_media(
    state: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(malformed_multipart)?;

        if field.name() != Some("file") {
            while let Some(chunk) = field.next().await {
                chunk.map_err(malformed_multipart)?;
            }
            continue;
        }

        let original_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_owned)
            .unwrap_or_default();
        state.media.validate_extension(&original_name)?;

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(malformed_multipart)?;
            if data.len() + chunk.len() > state.media.max_bytes() {
                return Err(MediaError::TooLarge(state.media.max_bytes()).into());
            }
            data.extend_from_slice(&chunk);
        }

        upload = Some((original_name, data));
        break;
    }

    let (original_name, data) = upload.ok_or_else(|| {
        ApiError::Validation(vec![
            FieldError::new(&["body", "file"], "Field required").kind("missing"),
        ])
    })?;

    let file_name = state.media.save(&original_name, &data)?;
    let mut media = Media {
        id: 0,
        file_name,
        tweet_id: None,
        created_at: Utc::now(),
    };

    if let Err(e) = state.store.create_media(&mut media) {
        if let Err(cleanup) = state.media.delete(&media.file_name) {
            log::warn!("Could not remove orphaned media file {}: {}", media.file_name, cleanup);
        }
        return Err(e.into());
    }

    log::info!("User {} uploaded media {}", user.id, media.id);
    Ok(HttpResponse::Created().json(ApiResponse::success(MediaCreated { media_id: media.id })))
}

pub async fn get_media_file(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let file_name = path.into_inner();
    let data = state.media.read(&file_name)?;
    Ok(HttpResponse::Ok()
        .content_type(content_type_for(&file_name))
        .body(data))
}

fn malformed_multipart(err: actix_multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Malformed multipart payload: {}", err))
}

fn positive_id(value: i64, name: &str) -> Result<i64, ApiError> {
    if value < 1 {
        return Err(ApiError::Validation(vec![FieldError::new(
            &["path", name],
            "Input should be greater than or equal to 1",
        )
        .kind("greater_than_equal")
        .ctx(serde_json::json!({ "ge": 1 }))]));
    }
    Ok(value)
}

// ==================== Route Configuration ====================

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Extractor failures share the error envelope
        .app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .app_data(web::PathConfig::default().error_handler(path_error_handler))
        .app_data(web::QueryConfig::default().error_handler(query_error_handler))

        // Health check
        .route("/health", web::get().to(health))

        // Users
        .route("/api/users/me", web::get().to(get_me))
        .route("/api/users/{user_id}", web::get().to(get_user))
        .route("/api/users/{user_id}/follow", web::post().to(follow_user))
        .route("/api/users/{user_id}/follow", web::delete().to(unfollow_user))

        // Tweets
        .route("/api/tweets", web::post().to(create_tweet))
        .route("/api/tweets", web::get().to(get_tweets))
        .route("/api/tweets/{tweet_id}", web::delete().to(delete_tweet))

        // Likes
        .route("/api/tweets/{tweet_id}/likes", web::post().to(like_tweet))
        .route("/api/tweets/{tweet_id}/likes", web::delete().to(unlike_tweet))

        // Medias
        .route("/api/medias", web::post().to(upload_media))
        .route("/medias/{file_name}", web::get().to(get_media_file));
}
