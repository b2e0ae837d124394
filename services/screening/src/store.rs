//! services/screening/src/store.rs
//!
//! The session & history store: a users table, a session pointer and one
//! history list per user, all kept as JSON in a `KeyValueStore`.
//!
//! Credentials are hashed with Argon2 before they reach the key-value medium and
//! are compared against the hash on login; the domain `User` never carries them.

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use hemoscan_core::{
    domain::{AnalysisResult, Gender, User, UserCredentials},
    ports::{KeyValueStore, PortError, PortResult},
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

const USERS_KEY: &str = "users";
const SESSION_KEY: &str = "session";
const MAX_AGE: u8 = 120;

fn history_key(user_id: Uuid) -> String {
    format!("history:{}", user_id)
}

/// Normalizes an email for storage and lookups.
fn canonical_email(email: &str) -> String {
    email.trim().to_lowercase()
}

//=========================================================================================
// Request Types
//=========================================================================================

#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub age: u8,
    pub gender: Gender,
    pub terms_accepted: bool,
}

//=========================================================================================
// "Impure" Persistence Record
//=========================================================================================

#[derive(Serialize, Deserialize)]
struct UserRecord {
    #[serde(flatten)]
    user: User,
    password_hash: String,
}

impl UserRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user: self.user,
            hashed_password: self.password_hash,
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> PortResult<String> {
    serde_json::to_string(value).map_err(|e| PortError::Unexpected(e.to_string()))
}

fn from_json<T: for<'de> Deserialize<'de>>(text: &str) -> PortResult<T> {
    serde_json::from_str(text).map_err(|e| PortError::Unexpected(e.to_string()))
}

//=========================================================================================
// The Store
//=========================================================================================

pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    /// Serializes users-table writes so the email uniqueness check cannot race.
    users_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            users_lock: Mutex::new(()),
        }
    }

    async fn read_users(&self) -> PortResult<Vec<UserRecord>> {
        self.kv
            .read_list(USERS_KEY)
            .await?
            .iter()
            .map(|row| from_json(row))
            .collect()
    }

    async fn write_users(&self, users: &[UserRecord]) -> PortResult<()> {
        self.kv.update(USERS_KEY, &to_json(&users)?).await
    }

    async fn set_session(&self, user: &User) -> PortResult<()> {
        self.kv.update(SESSION_KEY, &to_json(user)?).await
    }

    /// Creates an account and signs it in.
    pub async fn register(&self, registration: Registration) -> PortResult<User> {
        let email = canonical_email(&registration.email);
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(PortError::ValidationFailure(
                "Please enter a valid email address".to_string(),
            ));
        }
        if registration.password.is_empty() {
            return Err(PortError::ValidationFailure("Password must not be empty".to_string()));
        }
        if registration.age > MAX_AGE {
            return Err(PortError::ValidationFailure(format!(
                "Age must be between 0 and {}",
                MAX_AGE
            )));
        }
        if !registration.terms_accepted {
            return Err(PortError::ValidationFailure(
                "The terms of use must be accepted".to_string(),
            ));
        }

        let _guard = self.users_lock.lock().await;
        let users = self.read_users().await?;
        if users.iter().any(|record| record.user.email == email) {
            return Err(PortError::DuplicateEmail);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(registration.password.as_bytes(), &salt)
            .map_err(|e| {
                error!("Failed to hash password: {:?}", e);
                PortError::Unexpected("Failed to hash password".to_string())
            })?
            .to_string();

        let user = User {
            id: Uuid::new_v4(),
            email,
            age: registration.age,
            gender: registration.gender,
            terms_accepted: registration.terms_accepted,
            created_at: Utc::now().timestamp_millis(),
            share_data: false,
        };

        let record = UserRecord {
            user: user.clone(),
            password_hash,
        };
        self.kv.append_to_list(USERS_KEY, &to_json(&record)?).await?;
        self.set_session(&user).await?;

        info!("Registered user {}", user.id);
        Ok(user)
    }

    /// Signs in an existing account. No session is created on failure.
    pub async fn login(&self, email: &str, password: &str) -> PortResult<User> {
        let email = canonical_email(email);
        let credentials = self
            .read_users()
            .await?
            .into_iter()
            .find(|record| record.user.email == email)
            .map(UserRecord::to_domain)
            .ok_or(PortError::InvalidCredentials)?;

        let parsed_hash = PasswordHash::new(&credentials.hashed_password).map_err(|e| {
            error!("Failed to parse password hash: {:?}", e);
            PortError::Unexpected("Authentication error".to_string())
        })?;

        let valid = Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok();
        if !valid {
            return Err(PortError::InvalidCredentials);
        }

        self.set_session(&credentials.user).await?;
        info!("User {} logged in", credentials.user.id);
        Ok(credentials.user)
    }

    pub async fn logout(&self) -> PortResult<()> {
        self.kv.remove(SESSION_KEY).await
    }

    pub async fn current_user(&self) -> PortResult<Option<User>> {
        match self.kv.find_by_key(SESSION_KEY).await? {
            Some(text) => Ok(Some(from_json(&text)?)),
            None => Ok(None),
        }
    }

    /// Overwrites the user's row; the session follows when it points at that user.
    pub async fn update_user(&self, user: &User) -> PortResult<()> {
        if user.age > MAX_AGE {
            return Err(PortError::ValidationFailure(format!(
                "Age must be between 0 and {}",
                MAX_AGE
            )));
        }

        let _guard = self.users_lock.lock().await;
        let mut users = self.read_users().await?;
        let email = canonical_email(&user.email);
        if users
            .iter()
            .any(|record| record.user.email == email && record.user.id != user.id)
        {
            return Err(PortError::DuplicateEmail);
        }

        let record = users
            .iter_mut()
            .find(|record| record.user.id == user.id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user.id)))?;
        record.user = User {
            email,
            ..user.clone()
        };
        let updated = record.user.clone();
        self.write_users(&users).await?;

        if let Some(current) = self.current_user().await? {
            if current.id == updated.id {
                self.set_session(&updated).await?;
            }
        }
        Ok(())
    }

    pub async fn save_scan(&self, user_id: Uuid, result: &AnalysisResult) -> PortResult<()> {
        self.kv
            .append_to_list(&history_key(user_id), &to_json(result)?)
            .await
    }

    /// The user's history in insertion order.
    pub async fn get_history(&self, user_id: Uuid) -> PortResult<Vec<AnalysisResult>> {
        self.kv
            .read_list(&history_key(user_id))
            .await?
            .iter()
            .map(|row| from_json(row))
            .collect()
    }
}
