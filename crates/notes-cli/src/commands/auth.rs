//! Authentication commands.

use crate::output::{self, OutputFormat};
use anyhow::Result;
use notes_auth::{AuthError, AuthRuntime, SessionState, User};
use serde::Serialize;
use std::io::{self, Write};

/// Environment variable read instead of prompting for the password.
const PASSWORD_ENV: &str = "NOTES_PASSWORD";

/// Login with email and password.
pub async fn login(runtime: &AuthRuntime, email: Option<String>, format: &OutputFormat) -> Result<()> {
    if runtime.session().state().is_authenticated() {
        let who = display_name(runtime.session().snapshot().user.as_ref());
        output::print_success(&format!("Already logged in as {}", who), format);
        return Ok(());
    }

    let email = match email {
        Some(email) => email.trim().to_string(),
        None => {
            print!("Email: ");
            io::stdout().flush()?;
            let mut email = String::new();
            io::stdin().read_line(&mut email)?;
            email.trim().to_string()
        }
    };
    if email.is_empty() {
        output::print_error("Email is required", format);
        return Ok(());
    }

    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ")?,
    };
    if password.is_empty() {
        output::print_error("Password is required", format);
        return Ok(());
    }

    match runtime.session().login(&email, &password).await {
        Ok(snapshot) => {
            let who = snapshot
                .user
                .as_ref()
                .map(|u| u.email.clone())
                .unwrap_or(email);
            output::print_success(&format!("Logged in as {}", who), format);
        }
        Err(e) => output::print_error(&format!("Login failed: {}", e), format),
    }

    Ok(())
}

/// Logout and clear session.
pub async fn logout(runtime: &AuthRuntime, format: &OutputFormat) -> Result<()> {
    if runtime.session().state() == SessionState::Anonymous {
        output::print_success("Not logged in", format);
        return Ok(());
    }

    runtime.session().logout().await?;
    output::print_success("Logged out successfully", format);
    Ok(())
}

/// Refresh the access token.
pub async fn refresh(runtime: &AuthRuntime, format: &OutputFormat) -> Result<()> {
    match runtime.session().refresh_session().await {
        Ok(true) => output::print_success("Access token refreshed", format),
        Ok(false) => output::print_error("Session expired. Run 'notes login' to sign in again", format),
        Err(AuthError::NotLoggedIn) => output::print_error("Not logged in", format),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    logged_in: bool,
    state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<User>,
    api_base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let auth = if self.logged_in {
            format!("logged in as {}", display_name(self.user.as_ref()))
        } else {
            "not logged in".to_string()
        };
        writeln!(f, "{}", output::row("Auth", &auth))?;
        writeln!(f, "{}", output::row("State", &self.state.to_string()))?;
        write!(f, "{}", output::row("API", &self.api_base_url))?;
        if let Some(error) = &self.error {
            write!(f, "\n{}", output::row("Last error", error))?;
        }
        Ok(())
    }
}

/// Check authentication status.
pub fn status(runtime: &AuthRuntime, format: &OutputFormat) -> Result<()> {
    let snapshot = runtime.session().snapshot();
    let report = StatusReport {
        logged_in: snapshot.is_authenticated,
        state: runtime.session().state(),
        user: snapshot.user,
        api_base_url: runtime.base_url().to_string(),
        error: snapshot.error,
    };
    output::print(&report, format);
    Ok(())
}

fn display_name(user: Option<&User>) -> String {
    match user {
        Some(user) => user
            .nickname
            .as_ref()
            .map(|nick| format!("{} <{}>", nick, user.email))
            .unwrap_or_else(|| user.email.clone()),
        None => "unknown user".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(nickname: Option<&str>) -> User {
        User {
            id: "u1".into(),
            email: "ada@example.com".into(),
            name: None,
            nickname: nickname.map(str::to_string),
            avatar_url: None,
        }
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name(Some(&user(Some("ada")))), "ada <ada@example.com>");
        assert_eq!(display_name(Some(&user(None))), "ada@example.com");
        assert_eq!(display_name(None), "unknown user");
    }

    #[test]
    fn test_status_report_json() {
        let report = StatusReport {
            logged_in: false,
            state: SessionState::Anonymous,
            user: None,
            api_base_url: "https://api.notes.local/".into(),
            error: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "logged_in": false,
                "state": "anonymous",
                "api_base_url": "https://api.notes.local/"
            })
        );
    }
}
