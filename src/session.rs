use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    backend::DocumentBackend,
    error::{PortalError, Result},
    store::{clear_session, KeyValueStore, ACCESS_TOKEN_KEY, USER_EMAIL_KEY, USER_ROLE_KEY},
    types::{AuthUser, Role, TokenGrant},
};

const NOT_INVITED: &str = "Email is not invited to register";
const ALREADY_REGISTERED: &str = "Email already registered";
const LOGIN_FAILED: &str = "Login failed. Please check your credentials and try again.";

/// Sign-in state persisted in a [`KeyValueStore`]
///
/// The store is the only place the token lives; the backend reads it from
/// there for every request, so signing in here authenticates the backend.
#[derive(Clone)]
pub struct Session {
    backend: Arc<dyn DocumentBackend>,
    store: Arc<dyn KeyValueStore>,
}

impl Session {
    pub fn new(backend: Arc<dyn DocumentBackend>, store: Arc<dyn KeyValueStore>) -> Self {
        Self { backend, store }
    }

    /// Sign in with email and password
    ///
    /// Rejected credentials surface as an `Api` error with a fixed
    /// message; the stored session is untouched.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthUser> {
        let grant = match self.backend.login(email, password).await {
            Ok(grant) => grant,
            Err(PortalError::Api { status, .. }) => {
                warn!(email, status, "login rejected");
                return Err(PortalError::Api {
                    status,
                    message: LOGIN_FAILED.to_string(),
                });
            }
            Err(e) => return Err(e),
        };
        self.accept_grant(email, grant).await
    }

    /// Create an account for an invited email and sign in
    ///
    /// The backend's well-known rejections are reworded for display.
    pub async fn register(&self, email: &str, password: &str) -> Result<AuthUser> {
        let grant = match self.backend.register(email, password).await {
            Ok(grant) => grant,
            Err(PortalError::Api { status, message }) => {
                let message = match message.as_str() {
                    NOT_INVITED => "Your email is not invited to register. Please contact an administrator for an invitation.".to_string(),
                    ALREADY_REGISTERED => "This email is already registered. Please try logging in instead.".to_string(),
                    "" => "Registration failed".to_string(),
                    other => format!("Registration failed: {}", other),
                };
                return Err(PortalError::Api { status, message });
            }
            Err(e) => return Err(e),
        };
        self.accept_grant(email, grant).await
    }

    async fn accept_grant(&self, email: &str, grant: TokenGrant) -> Result<AuthUser> {
        let token = grant
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PortalError::invalid_response("missing access token"))?;

        self.store.set(ACCESS_TOKEN_KEY, &token).await?;
        self.store.set(USER_EMAIL_KEY, email).await?;
        match &grant.role {
            Some(role) => self.store.set(USER_ROLE_KEY, role).await?,
            None => self.store.remove(USER_ROLE_KEY).await?,
        }

        info!(email, "signed in");
        Ok(AuthUser {
            email: Some(email.to_string()),
            role: grant.role.as_deref().map(Role::parse),
        })
    }

    /// Check the stored token with the backend
    ///
    /// A missing, rejected or unverifiable token signs the user out.
    pub async fn check_auth(&self) -> Result<bool> {
        if !self.store.contains(ACCESS_TOKEN_KEY).await {
            return Ok(false);
        }

        match self.backend.verify_token().await {
            Ok(status) if status.valid => {
                if let Some(email) = &status.email {
                    self.store.set(USER_EMAIL_KEY, email).await?;
                }
                if let Some(role) = &status.role {
                    self.store.set(USER_ROLE_KEY, role).await?;
                }
                Ok(true)
            }
            Ok(_) => {
                self.logout().await?;
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "token verification failed");
                self.logout().await?;
                Ok(false)
            }
        }
    }

    pub async fn logout(&self) -> Result<()> {
        clear_session(self.store.as_ref()).await?;
        info!("signed out");
        Ok(())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.store.contains(ACCESS_TOKEN_KEY).await
    }

    /// The signed-in user as last recorded, if any
    pub async fn current_user(&self) -> Result<Option<AuthUser>> {
        if !self.is_authenticated().await {
            return Ok(None);
        }
        Ok(Some(AuthUser {
            email: self.store.get(USER_EMAIL_KEY).await?,
            role: self
                .store
                .get(USER_ROLE_KEY)
                .await?
                .as_deref()
                .map(Role::parse),
        }))
    }

    /// Invite a new user. Only super admins may invite.
    pub async fn invite(&self, email: &str, role: Role) -> Result<String> {
        let user = self.current_user().await?;
        if user.and_then(|u| u.role) != Some(Role::SuperAdmin) {
            return Err(PortalError::Forbidden {
                message: "Only super admins can send invitations".to_string(),
            });
        }

        let message = self.backend.invite(email, role.as_str()).await?;
        info!(email, role = %role, "invitation sent");
        Ok(message.unwrap_or_else(|| "Invitation sent successfully!".to_string()))
    }
}
