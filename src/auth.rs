//! In-memory accounts, registration OTPs and bearer sessions.
//!
//! Nothing here survives a restart. The demo account is seeded at startup
//! so the frontend can log in without registering first.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::AppError;

pub const DEFAULT_ROLE: &str = "user";

// Wrong guesses allowed before a pending OTP is thrown away
pub const MAX_OTP_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    #[serde(skip)]
    salt: String,
    #[serde(skip)]
    password_hash: String,
    #[serde(skip)]
    pub verified: bool,
}

impl User {
    fn password_matches(&self, password: &str) -> bool {
        hash_password(&self.salt, password) == self.password_hash
    }
}

struct PendingOtp {
    code: String,
    expires_at: Instant,
    failed_attempts: u32,
}

pub struct AuthStore {
    users: DashMap<String, User>,       // email -> user
    otps: DashMap<String, PendingOtp>,  // email -> pending code
    sessions: DashMap<String, String>,  // token -> email
    otp_ttl: Duration,
    next_id: AtomicU64,
}

impl AuthStore {
    pub fn new(otp_ttl: Duration) -> Self {
        Self {
            users: DashMap::new(),
            otps: DashMap::new(),
            sessions: DashMap::new(),
            otp_ttl,
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds an already verified account.
    pub fn seed_user(&self, name: &str, email: &str, password: &str) {
        let user = self.new_user(name, &normalize_email(email), password, true);
        self.users.insert(user.email.clone(), user);
    }

    /// Creates an unverified account and returns the OTP that verifies it.
    ///
    /// Registering again with an email that is still unverified replaces the
    /// pending account and issues a fresh code.
    pub fn register(&self, name: &str, email: &str, password: &str) -> Result<String, AppError> {
        let name = name.trim();
        let email = normalize_email(email);

        if name.is_empty() || email.is_empty() || password.is_empty() {
            return Err(AppError::Validation(
                "Name, email and password are required".into(),
            ));
        }
        if !email.contains('@') {
            return Err(AppError::Validation("Invalid email address".into()));
        }

        match self.users.entry(email.clone()) {
            Entry::Occupied(existing) if existing.get().verified => {
                return Err(AppError::Conflict(
                    "An account with this email already exists".into(),
                ));
            }
            Entry::Occupied(mut pending) => {
                let user = self.new_user(name, &email, password, false);
                pending.insert(user);
            }
            Entry::Vacant(slot) => {
                slot.insert(self.new_user(name, &email, password, false));
            }
        }

        let code = new_otp();
        self.otps.insert(
            email.clone(),
            PendingOtp {
                code: code.clone(),
                expires_at: Instant::now() + self.otp_ttl,
                failed_attempts: 0,
            },
        );

        info!("Issued OTP {code} for {email}");
        Ok(code)
    }

    /// Checks the OTP, marks the account verified and opens a session.
    pub fn verify_otp(&self, email: &str, code: &str) -> Result<(String, User), AppError> {
        let email = normalize_email(email);
        let code = code.trim();

        if email.is_empty() || code.is_empty() {
            return Err(AppError::Validation("Email and OTP are required".into()));
        }

        let Some(mut pending) = self.otps.get_mut(&email) else {
            return Err(AppError::Validation(
                "No pending verification for this email".into(),
            ));
        };

        if Instant::now() >= pending.expires_at {
            drop(pending);
            self.otps.remove(&email);
            return Err(AppError::Validation(
                "OTP has expired, please register again".into(),
            ));
        }
        if pending.code != code {
            pending.failed_attempts += 1;
            if pending.failed_attempts >= MAX_OTP_ATTEMPTS {
                drop(pending);
                self.otps.remove(&email);
                warn!("Too many wrong OTP attempts for {email}, code discarded");
                return Err(AppError::Validation(
                    "Too many invalid attempts, please register again".into(),
                ));
            }
            return Err(AppError::Validation("Invalid OTP".into()));
        }
        drop(pending);
        self.otps.remove(&email);

        let user = {
            let mut user = self
                .users
                .get_mut(&email)
                .ok_or_else(|| AppError::Internal(format!("OTP issued for unknown user {email}")))?;
            user.verified = true;
            user.value().clone()
        };

        info!("Verified account {email}");
        Ok((self.open_session(&user.email), user))
    }

    pub fn login(&self, email: &str, password: &str) -> Result<(String, User), AppError> {
        let email = normalize_email(email);

        if email.is_empty() || password.is_empty() {
            return Err(AppError::Validation("Email and password are required".into()));
        }

        let user = self
            .users
            .get(&email)
            .map(|user| user.value().clone())
            .ok_or(AppError::InvalidCredentials)?;

        if !user.password_matches(password) {
            return Err(AppError::InvalidCredentials);
        }
        if !user.verified {
            return Err(AppError::Unverified);
        }

        Ok((self.open_session(&user.email), user))
    }

    pub fn user_for_token(&self, token: &str) -> Option<User> {
        let email = self.sessions.get(token)?;
        self.users.get(email.value()).map(|user| user.value().clone())
    }

    /// Removes expired OTPs, returns how many were dropped.
    pub fn purge_expired_otps(&self) -> usize {
        let before = self.otps.len();
        let now = Instant::now();
        self.otps.retain(|_, pending| pending.expires_at > now);
        before - self.otps.len()
    }

    fn open_session(&self, email: &str) -> String {
        let token = new_token();
        self.sessions.insert(token.clone(), email.to_string());
        token
    }

    fn new_user(&self, name: &str, email: &str, password: &str, verified: bool) -> User {
        let salt = new_token();
        User {
            id: format!("user_{}", self.next_id.fetch_add(1, Ordering::Relaxed)),
            name: name.to_string(),
            email: email.to_string(),
            role: DEFAULT_ROLE.to_string(),
            password_hash: hash_password(&salt, password),
            salt,
            verified,
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password);
    format!("{:x}", hasher.finalize())
}

fn new_token() -> String {
    let bytes: [u8; 32] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn new_otp() -> String {
    format!("{:06}", rand::rng().random_range(0..1_000_000u32))
}
