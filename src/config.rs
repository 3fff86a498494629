use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

/// Runtime configuration, read from the environment (and `.env`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub media_dir: PathBuf,
    pub allowed_extensions: Vec<String>,
    pub max_upload_bytes: usize,
    pub seed_demo_users: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            database_path: "microblog.db".to_string(),
            media_dir: PathBuf::from("medias"),
            allowed_extensions: parse_list("jpg,jpeg,png"),
            max_upload_bytes: 10 * 1024 * 1024,
            seed_demo_users: true,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let defaults = Self::default();

        Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: try_load("PORT", defaults.port),
            database_path: env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            media_dir: env::var("MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_dir),
            allowed_extensions: env::var("MEDIA_ALLOWED_EXTENSIONS")
                .map(|v| parse_list(&v))
                .unwrap_or(defaults.allowed_extensions),
            max_upload_bytes: try_load("MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            seed_demo_users: env::var("SEED_DEMO_USERS")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.seed_demo_users),
        }
    }
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            log::warn!("Invalid {} value '{}': {}, using default: {}", key, raw, e, default);
            default
        }),
        Err(_) => default,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().trim_start_matches('.').to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
