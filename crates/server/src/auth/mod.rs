//! Admin Authentication Module
//!
//! Email + password login against the `admins` collection. Passwords are
//! only ever stored and compared as bcrypt hashes. Nothing here creates an
//! account as a side effect of logging in; provisioning goes through
//! [`AdminAuth::create_admin`] and [`AdminAuth::seed_default_admin`].

pub mod handlers;

use crate::error::{Error, Result};
use crate::models::{self, AdminAccount, AdminUser};
use crate::store::{DocumentStore, Filter};
use bcrypt::{hash, verify, DEFAULT_COST};
use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;

pub const ADMINS: &str = "admins";

pub const DEFAULT_ADMIN_NAME: &str = "Administrator";
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@library.com";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";
pub const DEFAULT_ROLE: &str = "admin";

const MIN_PASSWORD_LEN: usize = 6;

/// Account to provision.
#[derive(Debug, Clone)]
pub struct NewAdmin {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: String,
}

pub struct AdminAuth {
    documents: DocumentStore,
    cost: u32,
    /// Verified against when the email is unknown, so both failures cost the same
    dummy_hash: OnceCell<String>,
}

impl AdminAuth {
    pub fn new(documents: DocumentStore) -> Self {
        Self::with_cost(documents, DEFAULT_COST)
    }

    /// Use a specific bcrypt cost (4..=31).
    pub fn with_cost(documents: DocumentStore, cost: u32) -> Self {
        Self {
            documents,
            cost,
            dummy_hash: OnceCell::new(),
        }
    }

    /// Verify credentials. Unknown email and wrong password are indistinguishable.
    pub async fn login(&self, email: &str, password: &str) -> Result<AdminUser> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(Error::Validation("email and password are required".to_string()));
        }

        let account = {
            let mut conn = self.documents.acquire().await?;
            conn.find_one(ADMINS, &Filter::eq("email", email.as_str()))
                .await?
        };
        let account: Option<AdminAccount> = account.map(serde_json::from_value).transpose()?;

        let stored_hash = match &account {
            Some(account) => account.password_hash.clone(),
            None => self.dummy_hash().await?.to_string(),
        };

        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || verify(password, &stored_hash)).await?;

        match (account, matches) {
            (Some(account), Ok(true)) => {
                info!("[Auth] Admin {} logged in", account.email);
                Ok(account.into())
            }
            (Some(_), Err(e)) => {
                warn!("[Auth] Stored hash for {} is unreadable: {}", email, e);
                Err(Error::InvalidCredentials)
            }
            _ => {
                warn!("[Auth] Failed login for {}", email);
                Err(Error::InvalidCredentials)
            }
        }
    }

    /// Insert a new admin account after validating it.
    pub async fn create_admin(&self, new: NewAdmin) -> Result<AdminUser> {
        let name = new.name.trim().to_string();
        let email = normalize_email(&new.email);
        let role = match new.role.trim() {
            "" => DEFAULT_ROLE.to_string(),
            role => role.to_string(),
        };

        if name.is_empty() {
            return Err(Error::Validation("name is required".to_string()));
        }
        if !email.contains('@') {
            return Err(Error::Validation(format!("invalid email: {email}")));
        }
        if new.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let mut conn = self.documents.acquire().await?;
        if conn
            .find_one(ADMINS, &Filter::eq("email", email.as_str()))
            .await?
            .is_some()
        {
            return Err(Error::Validation(format!(
                "an admin with email {email} already exists"
            )));
        }

        let password = new.password;
        let cost = self.cost;
        let password_hash = tokio::task::spawn_blocking(move || hash(password, cost)).await??;

        let now = models::now();
        let account = AdminAccount {
            id: Uuid::new_v4().to_string(),
            name,
            email,
            password_hash,
            role,
            created_at: now,
            updated_at: now,
        };
        conn.insert_one(ADMINS, &serde_json::to_value(&account)?).await?;

        info!("[Auth] Created admin {} ({})", account.email, account.role);
        Ok(account.into())
    }

    /// Insert the well-known default account, but only into an empty `admins` collection.
    pub async fn seed_default_admin(&self) -> Result<Option<AdminUser>> {
        {
            let mut conn = self.documents.acquire().await?;
            if conn.count(ADMINS, &Filter::All).await? > 0 {
                info!("[Auth] Admin accounts present, skipping default seed");
                return Ok(None);
            }
        }

        let admin = self
            .create_admin(NewAdmin {
                name: DEFAULT_ADMIN_NAME.to_string(),
                email: DEFAULT_ADMIN_EMAIL.to_string(),
                password: DEFAULT_ADMIN_PASSWORD.to_string(),
                role: DEFAULT_ROLE.to_string(),
            })
            .await?;

        warn!(
            "[Auth] Seeded default admin {}; change its password before going live",
            admin.email
        );
        Ok(Some(admin))
    }

    async fn dummy_hash(&self) -> Result<&str> {
        let cost = self.cost;
        let hash = self
            .dummy_hash
            .get_or_try_init(|| async move {
                let hashed = tokio::task::spawn_blocking(move || {
                    hash(Uuid::new_v4().to_string(), cost)
                })
                .await??;
                Ok::<_, Error>(hashed)
            })
            .await?;
        Ok(hash.as_str())
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
