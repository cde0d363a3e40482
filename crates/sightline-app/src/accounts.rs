//! User accounts backed by a Firebase-style REST store.
//!
//! The backend is a flat `users.json` document: a JSON object mapping
//! usernames to records. GET fetches the whole map (a missing document
//! comes back as JSON `null`), POST with `?print=silent` replaces it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("account backend returned HTTP {0}")]
    Status(u16),
    #[error("user {0:?} already exists")]
    AlreadyExists(String),
    #[error("passwords do not match")]
    PasswordMismatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub full_name: String,
    pub password: String,
    pub category: String,
}

pub struct AccountStore {
    base_url: String,
    client: reqwest::Client,
}

impl AccountStore {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to create HTTP client");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn users_url(&self) -> String {
        format!("{}/users.json", self.base_url)
    }

    /// Fetch the full user map. A store that has never been written
    /// serves `null`, which reads as an empty map.
    pub async fn fetch_users(&self) -> Result<HashMap<String, UserRecord>, AccountError> {
        let response = self.client.get(self.users_url()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AccountError::Status(status.as_u16()));
        }
        let users: Option<HashMap<String, UserRecord>> = response.json().await?;
        Ok(users.unwrap_or_default())
    }

    /// Register a new user. Rejects duplicate usernames and mismatched
    /// password confirmation before touching the network write.
    pub async fn register(
        &self,
        username: &str,
        record: UserRecord,
        confirm_password: &str,
    ) -> Result<(), AccountError> {
        if record.password != confirm_password {
            return Err(AccountError::PasswordMismatch);
        }

        let mut users = self.fetch_users().await?;
        if users.contains_key(username) {
            return Err(AccountError::AlreadyExists(username.to_string()));
        }
        users.insert(username.to_string(), record);

        let response = self
            .client
            .post(format!("{}?print=silent", self.users_url()))
            .json(&users)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AccountError::Status(status.as_u16()));
        }
        tracing::info!(username, "registered account");
        Ok(())
    }
}

/// Check a username/password pair against a fetched user map.
pub fn credentials_match(
    users: &HashMap<String, UserRecord>,
    username: &str,
    password: &str,
) -> bool {
    users
        .get(username)
        .is_some_and(|record| record.password == password)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_users() -> HashMap<String, UserRecord> {
        let mut users = HashMap::new();
        users.insert(
            "alice".to_string(),
            UserRecord {
                full_name: "Alice Smith".to_string(),
                password: "hunter2".to_string(),
                category: "visually-impaired".to_string(),
            },
        );
        users
    }

    #[test]
    fn test_credentials_match() {
        let users = sample_users();
        assert!(credentials_match(&users, "alice", "hunter2"));
        assert!(!credentials_match(&users, "alice", "wrong"));
        assert!(!credentials_match(&users, "bob", "hunter2"));
    }

    #[test]
    fn test_user_record_roundtrip() {
        let users = sample_users();
        let json = serde_json::to_string(&users).unwrap();
        let back: HashMap<String, UserRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, users);
    }

    #[test]
    fn test_null_document_reads_as_empty() {
        let parsed: Option<HashMap<String, UserRecord>> = serde_json::from_str("null").unwrap();
        assert!(parsed.unwrap_or_default().is_empty());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let store = AccountStore::new("https://example.test/");
        assert_eq!(store.users_url(), "https://example.test/users.json");
    }
}
