//! User registration and password login.
//!
//! Users are stored as JSON records, keyed by username, in a [`RecordStore`]
//! of their own.

use crate::{Error, FieldErrors, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use kvs::{KvsError, RecordStore};
use log::{debug, info};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

const MAX_NAME_LEN: usize = 150;
const MIN_PASSWORD_LEN: usize = 8;

const REQUIRED: &str = "This field is required.";
const BLANK: &str = "This field may not be blank.";

/// A registered account
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
}

/// Public view of a [`User`], returned by registration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        }
    }
}

/// Registration body; every field is optional here so that missing ones can
/// be reported together
#[derive(Deserialize, Debug, Default, Clone)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Account storage with uniqueness checks and Argon2 password hashes
pub struct UserDirectory {
    store: Arc<dyn RecordStore>,
    // uniqueness checks and the insert must not interleave
    registration: Mutex<()>,
    argon2: Argon2<'static>,
}

impl UserDirectory {
    /// Keep users in `store`
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            registration: Mutex::new(()),
            argon2: Argon2::default(),
        }
    }

    /// Validate `request` and create the account
    pub fn register(&self, request: RegisterRequest) -> Result<User> {
        let mut errors = FieldErrors::new();

        let username = required(&mut errors, "username", request.username);
        let email = required(&mut errors, "email", request.email);
        let password = required(&mut errors, "password", request.password);

        if let Some(username) = &username {
            if let Err(message) = validate_username(username) {
                push(&mut errors, "username", message);
            }
        }
        if let Some(email) = &email {
            if !is_valid_email(email) {
                push(&mut errors, "email", "Enter a valid email address.");
            }
        }
        if let Some(password) = &password {
            if password.chars().count() < MIN_PASSWORD_LEN {
                push(
                    &mut errors,
                    "password",
                    format!("Ensure this field has at least {} characters.", MIN_PASSWORD_LEN),
                );
            }
        }
        let first_name = optional_name(&mut errors, "first_name", request.first_name);
        let last_name = optional_name(&mut errors, "last_name", request.last_name);

        let (Some(username), Some(email), Some(password), true) =
            (username, email, password, errors.is_empty())
        else {
            return Err(Error::Validation(errors));
        };

        let password_hash = self.hash_password(&password)?;

        let _guard = self
            .registration
            .lock()
            .map_err(|_| Error::Storage(KvsError::LockError))?;

        if self.store.get(&username)?.is_some() {
            push(&mut errors, "username", "A user with that username already exists.");
        }
        if self.email_taken(&email)? {
            push(&mut errors, "email", "A user with this email already exists.");
        }
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        let user = User {
            username,
            email,
            password_hash,
            first_name,
            last_name,
            is_active: true,
            date_joined: Utc::now(),
        };
        self.save(&user)?;
        info!("Registered user {}", user.username);

        Ok(user)
    }

    /// Check a username / password pair
    pub fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let user = match self.find(username)? {
            Some(user) if user.is_active => user,
            _ => {
                debug!("Login for unknown or inactive user {}", username);
                return Err(Error::InvalidCredentials);
            }
        };

        if !self.verify_password(password, &user.password_hash)? {
            debug!("Wrong password for {}", username);
            return Err(Error::InvalidCredentials);
        }

        Ok(user)
    }

    /// Look a user up by username
    pub fn find(&self, username: &str) -> Result<Option<User>> {
        if kvs::check_key(username).is_err() {
            return Ok(None);
        }

        match self.store.get(username)? {
            Some(record) => Ok(Some(decode(&record.value)?)),
            None => Ok(None),
        }
    }

    /// Enable or disable login for `username`
    pub fn set_active(&self, username: &str, active: bool) -> Result<()> {
        let mut user = self.find(username)?.ok_or_else(|| Error::NotFound {
            key: username.to_owned(),
        })?;
        user.is_active = active;
        self.save(&user)
    }

    fn save(&self, user: &User) -> Result<()> {
        let json = serde_json::to_string(user).map_err(KvsError::from)?;
        self.store.upsert(user.username.clone(), json)?;
        Ok(())
    }

    fn email_taken(&self, email: &str) -> Result<bool> {
        for record in self.store.list()? {
            if decode(&record.value)?.email.eq_ignore_ascii_case(email) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(hash.to_string())
    }

    fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(hash).map_err(|e| Error::Internal(e.to_string()))?;

        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}

fn decode(json: &str) -> Result<User> {
    Ok(serde_json::from_str(json).map_err(KvsError::from)?)
}

fn push(errors: &mut FieldErrors, field: &str, message: impl Into<String>) {
    errors
        .entry(field.to_owned())
        .or_default()
        .push(message.into());
}

fn required(errors: &mut FieldErrors, field: &str, value: Option<String>) -> Option<String> {
    match value {
        None => {
            push(errors, field, REQUIRED);
            None
        }
        Some(v) if v.trim().is_empty() => {
            push(errors, field, BLANK);
            None
        }
        Some(v) => Some(v.trim().to_owned()),
    }
}

fn optional_name(errors: &mut FieldErrors, field: &str, value: Option<String>) -> String {
    let value = value.unwrap_or_default().trim().to_owned();
    if value.chars().count() > MAX_NAME_LEN {
        push(
            errors,
            field,
            format!("Ensure this field has no more than {} characters.", MAX_NAME_LEN),
        );
    }
    value
}

fn validate_username(username: &str) -> std::result::Result<(), String> {
    if username.chars().count() > MAX_NAME_LEN {
        return Err(format!(
            "Ensure this field has no more than {} characters.",
            MAX_NAME_LEN
        ));
    }
    let allowed = |c: char| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_');
    if !username.chars().all(allowed) {
        return Err("Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.".to_owned());
    }
    Ok(())
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };

    !local.is_empty()
        && !email.chars().any(char::is_whitespace)
        && !local.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}
