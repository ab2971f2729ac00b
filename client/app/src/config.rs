use std::{env, fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr, time::Duration};

use tracing::{info, warn};

use crate::{error::AppError, supply::SupplyKind};

pub struct Config {
    pub supabase_url: String,
    pub anon_key: String,
    pub callback_port: u16,
    pub session_path: PathBuf,
    pub counts_ttl: Duration,
    pub batch_size: u32,
    pub supply: SupplyKind,
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        Ok(Self {
            supabase_url: var("SUPABASE_URL")?,
            anon_key: read_secret("SUPABASE_ANON_KEY")?,
            callback_port: try_load("WORDVOTE_CALLBACK_PORT", "54321")?,
            session_path: try_load("WORDVOTE_SESSION_PATH", ".wordvote-session.json")?,
            counts_ttl: Duration::from_secs(try_load("WORDVOTE_COUNTS_TTL_SECS", "300")?),
            batch_size: try_load("WORDVOTE_BATCH_SIZE", "500")?,
            supply: try_load("WORDVOTE_SUPPLY", "rpc")?,
        })
    }
}

fn var(key: &str) -> Result<String, AppError> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found");
        AppError::Config(format!("{key} is not set"))
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, AppError>
where
    T::Err: Display,
{
    env::var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
            AppError::Config(format!("invalid {key}: {e}"))
        })
}

/// Environment first, then the mounted secret file.
fn read_secret(secret_name: &str) -> Result<String, AppError> {
    if let Ok(value) = env::var(secret_name) {
        return Ok(value.trim().to_string());
    }

    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
            AppError::Config(format!("{secret_name} is not set"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_load_default() {
        let port: u16 = try_load("WORDVOTE_TEST_UNSET_PORT", "54321").unwrap();
        assert_eq!(port, 54321);
    }

    #[test]
    fn test_try_load_invalid_default() {
        let result: Result<u16, _> = try_load("WORDVOTE_TEST_UNSET_PORT", "not-a-port");
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_missing_secret() {
        assert!(read_secret("WORDVOTE_TEST_MISSING_SECRET").is_err());
    }
}
