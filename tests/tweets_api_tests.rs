use actix_web::{test, web, App};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

use microblog::api::{self, AppState};
use microblog::auth::AuthService;
use microblog::media::MediaStorage;
use microblog::middleware::EchoApiKey;
use microblog::models::Media;
use microblog::store::Store;

fn create_app_state(media_dir: &TempDir) -> AppState {
    let store = Arc::new(Store::new(":memory:").unwrap());
    let auth_service = Arc::new(AuthService::new(store.clone()));
    auth_service.ensure_user("Ivan Volkov", "test").unwrap();
    auth_service.ensure_user("Nikita Ivanov", "dev").unwrap();
    auth_service.ensure_user("Olga Petrova", "third").unwrap();

    AppState {
        store,
        auth_service,
        media: Arc::new(MediaStorage::new(
            media_dir.path().to_path_buf(),
            vec!["jpg".into(), "jpeg".into(), "png".into()],
            1024 * 1024,
        )),
    }
}

macro_rules! init_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .wrap(EchoApiKey)
                .app_data(web::Data::new($state))
                .configure(api::configure_routes),
        )
        .await
    };
}

/// Helper macro to post a tweet and return its id
macro_rules! create_tweet {
    ($app:expr, $key:expr, $text:expr) => {{
        let req = test::TestRequest::post()
            .uri("/api/tweets")
            .insert_header(("api-key", $key))
            .set_json(json!({ "tweet_data": $text }))
            .to_request();
        let resp = test::call_service(&$app, req).await;
        assert_eq!(resp.status(), 201);
        let body: serde_json::Value = test::read_body_json(resp).await;
        body["tweet_id"].as_i64().unwrap()
    }};
}

/// Helper macro to fetch the feed of a user
macro_rules! get_feed {
    ($app:expr, $key:expr) => {
        get_feed!($app, $key, "/api/tweets")
    };
    ($app:expr, $key:expr, $uri:expr) => {{
        let req = test::TestRequest::get()
            .uri($uri)
            .insert_header(("api-key", $key))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&$app, req).await;
        assert_eq!(body["result"], true);
        body["tweets"].as_array().unwrap().clone()
    }};
}

macro_rules! like {
    ($app:expr, $key:expr, $tweet_id:expr) => {{
        let req = test::TestRequest::post()
            .uri(&format!("/api/tweets/{}/likes", $tweet_id))
            .insert_header(("api-key", $key))
            .to_request();
        let resp = test::call_service(&$app, req).await;
        assert_eq!(resp.status(), 201);
    }};
}

fn feed_ids(tweets: &[serde_json::Value]) -> Vec<i64> {
    tweets.iter().map(|t| t["id"].as_i64().unwrap()).collect()
}

#[actix_web::test]
async fn test_create_tweet_and_read_feed() {
    let temp = TempDir::new().unwrap();
    let app = init_app!(create_app_state(&temp));

    let req = test::TestRequest::post()
        .uri("/api/tweets")
        .insert_header(("api-key", "test"))
        .set_json(json!({ "tweet_data": "Hello world!", "tweet_media_ids": [] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    assert_eq!(resp.headers().get("api-key").unwrap(), "test");
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({"result": true, "tweet_id": 1}));

    let tweets = get_feed!(app, "test");
    assert_eq!(
        tweets,
        vec![json!({
            "id": 1,
            "content": "Hello world!",
            "attachments": [],
            "author": {"id": 1, "name": "Ivan Volkov"},
            "likes": []
        })]
    );
}

#[actix_web::test]
async fn test_create_tweet_validation() {
    let temp = TempDir::new().unwrap();
    let app = init_app!(create_app_state(&temp));

    let cases = vec![
        (json!({}), json!(["body", "tweet_data"])),
        (json!({ "tweet_data": "" }), json!(["body", "tweet_data"])),
        (json!({ "tweet_data": "x".repeat(101) }), json!(["body", "tweet_data"])),
        (
            json!({ "tweet_data": "ok", "tweet_media_ids": [0] }),
            json!(["body", "tweet_media_ids", "0"]),
        ),
    ];

    for (payload, loc) in cases {
        let req = test::TestRequest::post()
            .uri("/api/tweets")
            .insert_header(("api-key", "test"))
            .set_json(payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 422);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["result"], false);
        assert_eq!(body["error_type"], 422);
        assert_eq!(body["error_message"][0]["loc"], loc);
    }

    // Exactly the maximum length is fine
    create_tweet!(app, "test", "x".repeat(100));

    let req = test::TestRequest::post()
        .uri("/api/tweets")
        .set_json(json!({ "tweet_data": "anonymous" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn test_create_tweet_with_media() {
    let temp = TempDir::new().unwrap();
    let state = create_app_state(&temp);
    let store = state.store.clone();
    let app = init_app!(state);

    let mut media = Media {
        id: 0,
        file_name: "abc.png".to_string(),
        tweet_id: None,
        created_at: Utc::now(),
    };
    store.create_media(&mut media).unwrap();

    let req = test::TestRequest::post()
        .uri("/api/tweets")
        .insert_header(("api-key", "test"))
        .set_json(json!({ "tweet_data": "With picture", "tweet_media_ids": [media.id] }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let tweet_id = body["tweet_id"].as_i64().unwrap();

    let tweets = get_feed!(app, "test");
    assert_eq!(tweets[0]["attachments"], json!(["/medias/abc.png"]));

    // Already attached media cannot be claimed again, and nothing is inserted
    let req = test::TestRequest::post()
        .uri("/api/tweets")
        .insert_header(("api-key", "test"))
        .set_json(json!({ "tweet_data": "Stolen picture", "tweet_media_ids": [media.id] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let req = test::TestRequest::post()
        .uri("/api/tweets")
        .insert_header(("api-key", "test"))
        .set_json(json!({ "tweet_data": "Missing picture", "tweet_media_ids": [999] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    assert_eq!(feed_ids(&get_feed!(app, "test")), vec![tweet_id]);
}

#[actix_web::test]
async fn test_feed_follows_the_follow_graph() {
    let temp = TempDir::new().unwrap();
    let app = init_app!(create_app_state(&temp));

    let ivan_tweet = create_tweet!(app, "test", "Ivan speaks");
    let olga_tweet = create_tweet!(app, "third", "Olga speaks");

    // Nikita sees nothing until following Ivan
    assert!(get_feed!(app, "dev").is_empty());

    let req = test::TestRequest::post()
        .uri("/api/users/1/follow")
        .insert_header(("api-key", "dev"))
        .to_request();
    test::call_service(&app, req).await;

    let nikita_tweet = create_tweet!(app, "dev", "Nikita speaks");
    let ids = feed_ids(&get_feed!(app, "dev"));
    assert_eq!(ids, vec![ivan_tweet, nikita_tweet]);
    assert!(!ids.contains(&olga_tweet));

    let req = test::TestRequest::delete()
        .uri("/api/users/1/follow")
        .insert_header(("api-key", "dev"))
        .to_request();
    test::call_service(&app, req).await;

    assert_eq!(feed_ids(&get_feed!(app, "dev")), vec![nikita_tweet]);
}

#[actix_web::test]
async fn test_feed_ordering_and_pagination() {
    let temp = TempDir::new().unwrap();
    let app = init_app!(create_app_state(&temp));

    let first = create_tweet!(app, "test", "first");
    let second = create_tweet!(app, "test", "second");
    let third = create_tweet!(app, "test", "third");

    like!(app, "dev", third);
    like!(app, "third", third);
    like!(app, "dev", second);

    let tweets = get_feed!(app, "test");
    assert_eq!(feed_ids(&tweets), vec![third, second, first]);
    assert_eq!(
        tweets[0]["likes"],
        json!([
            {"user_id": 2, "name": "Nikita Ivanov"},
            {"user_id": 3, "name": "Olga Petrova"}
        ])
    );

    let page = get_feed!(app, "test", "/api/tweets?offset=1&limit=1");
    assert_eq!(feed_ids(&page), vec![second]);

    // Out-of-range values are clamped rather than rejected
    let page = get_feed!(app, "test", "/api/tweets?offset=-5&limit=1000");
    assert_eq!(feed_ids(&page), vec![third, second, first]);

    let page = get_feed!(app, "test", "/api/tweets?limit=0");
    assert!(page.is_empty());

    let req = test::TestRequest::get()
        .uri("/api/tweets?limit=many")
        .insert_header(("api-key", "test"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 422);
}

#[actix_web::test]
async fn test_delete_tweet_ownership_and_idempotence() {
    let temp = TempDir::new().unwrap();
    let app = init_app!(create_app_state(&temp));

    let tweet_id = create_tweet!(app, "test", "Mine");

    let req = test::TestRequest::delete()
        .uri(&format!("/api/tweets/{}", tweet_id))
        .insert_header(("api-key", "dev"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
    assert_eq!(resp.headers().get("api-key").unwrap(), "dev");
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(
        body["error_message"],
        format!("You don't have permission to delete the tweet '{}'!", tweet_id)
    );
    assert_eq!(feed_ids(&get_feed!(app, "test")), vec![tweet_id]);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/tweets/{}", tweet_id))
        .insert_header(("api-key", "test"))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({"result": true}));
    assert!(get_feed!(app, "test").is_empty());

    let req = test::TestRequest::delete()
        .uri(&format!("/api/tweets/{}", tweet_id))
        .insert_header(("api-key", "test"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn test_delete_tweet_removes_media_files() {
    let temp = TempDir::new().unwrap();
    let state = create_app_state(&temp);
    let store = state.store.clone();
    let storage = state.media.clone();
    let app = init_app!(state);

    let kept = storage.save("photo.png", b"png bytes").unwrap();
    let missing = storage.save("other.jpg", b"jpg bytes").unwrap();
    storage.delete(&missing).unwrap();

    let mut ids = Vec::new();
    for file_name in [&kept, &missing] {
        let mut media = Media {
            id: 0,
            file_name: file_name.clone(),
            tweet_id: None,
            created_at: Utc::now(),
        };
        store.create_media(&mut media).unwrap();
        ids.push(media.id);
    }

    let req = test::TestRequest::post()
        .uri("/api/tweets")
        .insert_header(("api-key", "test"))
        .set_json(json!({ "tweet_data": "Album", "tweet_media_ids": ids }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let tweet_id = body["tweet_id"].as_i64().unwrap();

    // One file is already gone; deletion still succeeds
    let req = test::TestRequest::delete()
        .uri(&format!("/api/tweets/{}", tweet_id))
        .insert_header(("api-key", "test"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    assert!(!temp.path().join(&kept).exists());
    assert!(store.get_media_by_tweet_id(tweet_id).unwrap().is_empty());
}

#[actix_web::test]
async fn test_repeated_media_id_attaches_once() {
    let temp = TempDir::new().unwrap();
    let state = create_app_state(&temp);
    let store = state.store.clone();
    let app = init_app!(state);

    let mut media = Media {
        id: 0,
        file_name: "dup.png".to_string(),
        tweet_id: None,
        created_at: Utc::now(),
    };
    store.create_media(&mut media).unwrap();

    let req = test::TestRequest::post()
        .uri("/api/tweets")
        .insert_header(("api-key", "test"))
        .set_json(json!({ "tweet_data": "dup", "tweet_media_ids": [media.id, media.id] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = test::read_body_json(resp).await;
    let tweet_id = body["tweet_id"].as_i64().unwrap();

    let tweets = get_feed!(app, "test");
    assert_eq!(feed_ids(&tweets), vec![tweet_id]);
    assert_eq!(tweets[0]["attachments"], json!(["/medias/dup.png"]));
}

#[actix_web::test]
async fn test_delete_tweet_keeps_rows_when_file_removal_fails() {
    let temp = TempDir::new().unwrap();
    let state = create_app_state(&temp);
    let store = state.store.clone();
    let app = init_app!(state);

    // A directory in place of the file makes removal fail with an I/O error
    std::fs::create_dir(temp.path().join("d.png")).unwrap();
    let mut media = Media {
        id: 0,
        file_name: "d.png".to_string(),
        tweet_id: None,
        created_at: Utc::now(),
    };
    store.create_media(&mut media).unwrap();

    let req = test::TestRequest::post()
        .uri("/api/tweets")
        .insert_header(("api-key", "test"))
        .set_json(json!({ "tweet_data": "Stuck", "tweet_media_ids": [media.id] }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let tweet_id = body["tweet_id"].as_i64().unwrap();
    like!(app, "dev", tweet_id);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/tweets/{}", tweet_id))
        .insert_header(("api-key", "test"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error_message"], "Internal server error");

    assert_eq!(store.get_tweet(tweet_id).unwrap().content, "Stuck");
    assert_eq!(store.get_media_by_tweet_id(tweet_id).unwrap().len(), 1);
    let tweets = get_feed!(app, "test");
    assert_eq!(tweets[0]["likes"], json!([{"user_id": 2, "name": "Nikita Ivanov"}]));
}
