/// Send sign-in code
///
/// Resolves the user behind an email address, mails a six-digit code and
/// records the pending session. One code per email per send window.
use crate::error::{IdentityError, Result};
use crate::infrastructure::{SignInSession, SignInStore};
use crate::services::email::EmailSender;
use crate::services::user_directory::UserDirectory;
use crypto_core::Clock;
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

pub const SIGNIN_CODE_SUBJECT: &str = "Your sign-in code";

pub struct SendCodeService {
    store: Arc<dyn SignInStore>,
    directory: Arc<dyn UserDirectory>,
    email: Arc<dyn EmailSender>,
    clock: Arc<dyn Clock>,
    send_frequency: chrono::Duration,
}

impl SendCodeService {
    pub fn new(
        store: Arc<dyn SignInStore>,
        directory: Arc<dyn UserDirectory>,
        email: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
        send_frequency: chrono::Duration,
    ) -> Self {
        Self {
            store,
            directory,
            email,
            clock,
            send_frequency,
        }
    }

    /// Email a fresh code to `email` and return the new session key
    ///
    /// Nothing is stored when the email cannot be sent.
    ///
    /// ## Errors
    ///
    /// - `SendCodeFreqExceeded` if the previous code was sent too recently
    /// - `UserNotFound` if no user owns the address
    pub async fn send_code(&self, email: &str) -> Result<Uuid> {
        let now = self.clock.now();

        if let Some(previous) = self.store.find_by_email(email).await? {
            if previous.last_request + self.send_frequency > now {
                return Err(IdentityError::SendCodeFreqExceeded);
            }
        }

        let user = self
            .directory
            .get_user_by_email(email)
            .await?
            .ok_or(IdentityError::UserNotFound)?;

        let session = SignInSession {
            signin_key: Uuid::new_v4(),
            last_request: now,
            user_id: user.user_id,
            email: email.to_string(),
            name: user.name,
            username: user.username,
            code: generate_code(),
        };

        self.email
            .send(email, SIGNIN_CODE_SUBJECT, &code_message(&session.code))
            .await?;
        self.store.store(&session).await?;

        tracing::info!(user_id = %session.user_id, "sign-in code sent");
        Ok(session.signin_key)
    }
}

/// Six digits, never with a leading zero
fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

pub fn code_message(code: &str) -> String {
    format!(
        "Do not tell this code to anybody. Your code for signing in is {}",
        code
    )
}
