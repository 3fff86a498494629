use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest tweet body accepted, counted in characters
pub const TWEET_MAX_LENGTH: usize = 100;

/// User owns tweets and is identified by a static API key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub created_at: DateTime<Utc>,
}

/// Minimal user view embedded in profiles and feed entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub name: String,
}

/// Profile with both directions of the follow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub followers: Vec<UserSummary>,
    pub following: Vec<UserSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tweet {
    pub id: i64,
    pub user_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Like links a user to a tweet, at most once per pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Like {
    pub id: i64,
    pub tweet_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Media is an uploaded file. `tweet_id` stays empty until a tweet claims it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub id: i64,
    pub file_name: String,
    pub tweet_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Liker as rendered inside a feed entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikeAuthor {
    pub user_id: i64,
    pub name: String,
}

/// Feed entry, fully hydrated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedTweet {
    pub id: i64,
    pub content: String,
    pub attachments: Vec<String>,
    pub author: UserSummary,
    pub likes: Vec<LikeAuthor>,
    #[serde(skip)]
    pub like_count: i64,
}

// Request/Response types for API

/// Body of `POST /api/tweets`
#[derive(Debug, Deserialize)]
pub struct CreateTweetRequest {
    pub tweet_data: String,
    #[serde(default)]
    pub tweet_media_ids: Option<Vec<i64>>,
}

impl CreateTweetRequest {
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        let length = self.tweet_data.chars().count();
        if length < 1 {
            errors.push(
                FieldError::new(&["body", "tweet_data"], "String should have at least 1 character")
                    .kind("string_too_short")
                    .ctx(serde_json::json!({ "min_length": 1 })),
            );
        } else if length > TWEET_MAX_LENGTH {
            errors.push(
                FieldError::new(
                    &["body", "tweet_data"],
                    format!("String should have at most {} characters", TWEET_MAX_LENGTH),
                )
                .kind("string_too_long")
                .ctx(serde_json::json!({ "max_length": TWEET_MAX_LENGTH })),
            );
        }

        for (index, id) in self.media_ids().iter().enumerate() {
            if *id < 1 {
                let position = index.to_string();
                errors.push(
                    FieldError::new(
                        &["body", "tweet_media_ids", position.as_str()],
                        "Input should be greater than or equal to 1",
                    )
                    .kind("greater_than_equal")
                    .ctx(serde_json::json!({ "ge": 1 })),
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn media_ids(&self) -> &[i64] {
        self.tweet_media_ids.as_deref().unwrap_or(&[])
    }
}

/// A single field-level validation failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctx: Option<serde_json::Value>,
}

impl FieldError {
    pub fn new(loc: &[&str], msg: impl Into<String>) -> Self {
        Self {
            loc: loc.iter().map(|s| s.to_string()).collect(),
            msg: msg.into(),
            kind: "value_error".to_string(),
            ctx: None,
        }
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = kind.to_string();
        self
    }

    pub fn ctx(mut self, ctx: serde_json::Value) -> Self {
        self.ctx = Some(ctx);
        self
    }
}

/// Success envelope: `{"result": true, ...payload}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub result: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { result: true, data }
    }
}

impl ApiResponse<Empty> {
    pub fn ok() -> Self {
        Self::success(Empty {})
    }
}

#[derive(Debug, Serialize)]
pub struct Empty {}

#[derive(Debug, Serialize)]
pub struct UserPayload {
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct TweetCreated {
    pub tweet_id: i64,
}

#[derive(Debug, Serialize)]
pub struct FeedPayload {
    pub tweets: Vec<FeedTweet>,
}

#[derive(Debug, Serialize)]
pub struct MediaCreated {
    pub media_id: i64,
}
