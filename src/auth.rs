use std::{path::PathBuf, sync::LazyLock};

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    APP_DATA_DIR,
    error::{NxchatError, NxchatResult},
};

static AZURE_AD_LOGIN_HOST: &str = "https://login.microsoftonline.com";
static AZURE_AD_SCOPE: &str = "openid profile email offline_access";

/// Identity provider settings, read from the environment and passed through untouched
#[derive(Clone, Debug, PartialEq)]
pub struct AuthSettings {
    pub client_id: Option<String>,
    pub client_secret: String,
    pub tenant_id: String,
    pub secret: Option<String>,
    pub data_api_key: Option<String>,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize, strum::Display, strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum UserRole {
    #[default]
    Admin,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Session {
    pub access_token: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub role: UserRole,
}

#[derive(Clone, Copy, Debug, PartialEq, strum::Display)]
pub enum Screen {
    #[strum(serialize = "auth")]
    Auth,
    #[strum(serialize = "chat")]
    Chat,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

impl AuthSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            client_id: non_empty("AZURE_AD_CLIENT_ID"),
            client_secret: non_empty("AZURE_AD_CLIENT_SECRET")
                .unwrap_or_else(|| "defaultClientSecret".to_string()),
            tenant_id: non_empty("AZURE_AD_TENANT_ID")
                .unwrap_or_else(|| "defaultTenantId".to_string()),
            secret: non_empty("NEXTAUTH_SECRET"),
            data_api_key: non_empty("DATA_API_KEY"),
        }
    }

    /// Sign-in is only required once a client id is configured
    pub fn is_enabled(&self) -> bool {
        self.client_id.is_some()
    }

    fn client_id(&self) -> NxchatResult<&str> {
        self.client_id.as_deref().ok_or(NxchatError::Required(
            "AZURE_AD_CLIENT_ID_REQUIRED",
            "Environment variable 'AZURE_AD_CLIENT_ID' is missing".to_string(),
        ))
    }

    fn endpoint(&self, name: &str) -> NxchatResult<Url> {
        let url = Url::parse(&format!(
            "{AZURE_AD_LOGIN_HOST}/{}/oauth2/v2.0/{name}",
            self.tenant_id
        ))?;
        Ok(url)
    }

    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> NxchatResult<Url> {
        let mut url = self.endpoint("authorize")?;
        url.query_pairs_mut()
            .append_pair("client_id", self.client_id()?)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", AZURE_AD_SCOPE)
            .append_pair("state", state);

        Ok(url)
    }

    /// Trade an authorization code for tokens, the tokens are kept opaque
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> NxchatResult<Session> {
        let request_url = self.endpoint("token")?;
        let client = reqwest::Client::builder().build()?;

        let response = client
            .post(request_url)
            .form(&[
                ("client_id", self.client_id()?),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("scope", AZURE_AD_SCOPE),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NxchatError::HttpStatusError(format!(
                "{} {}",
                response.status(),
                response.text().await.ok().unwrap_or_default()
            )));
        }

        let token: TokenResponse = response.json().await?;
        let session = sign_in(token, Utc::now());
        info!("Signed in as {}", session.role);

        Ok(session)
    }
}

/// Every signed-in user gets the admin role
fn sign_in(token: TokenResponse, now: DateTime<Utc>) -> Session {
    Session {
        access_token: token.access_token,
        id_token: token.id_token,
        refresh_token: token.refresh_token,
        expires_at: token
            .expires_in
            .and_then(TimeDelta::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl)),
        role: UserRole::Admin,
    }
}

impl Session {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_empty() {
            return false;
        }

        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }
}

impl Screen {
    pub fn resolve(gate_enabled: bool, session: Option<&Session>, now: DateTime<Utc>) -> Self {
        if !gate_enabled {
            return Screen::Chat;
        }

        match session {
            Some(session) if session.is_active(now) => Screen::Chat,
            _ => Screen::Auth,
        }
    }
}

pub fn load_session() -> NxchatResult<Option<Session>> {
    if !SESSION_PATH.exists() {
        return Ok(None);
    }

    let session: Session = confy::load_path(&*SESSION_PATH)?;
    if session.access_token.is_empty() {
        Ok(None)
    } else {
        Ok(Some(session))
    }
}

pub fn store_session(session: &Session) -> NxchatResult<()> {
    confy::store_path(&*SESSION_PATH, session)?;
    debug!("Session stored at {}", SESSION_PATH.display());
    Ok(())
}

pub fn clear_session() -> NxchatResult<()> {
    if SESSION_PATH.exists() {
        std::fs::remove_file(&*SESSION_PATH)?;
    }
    Ok(())
}

/// Screen to show right now given the environment and the stored session
pub fn current_screen() -> NxchatResult<Screen> {
    let settings = AuthSettings::from_env();
    let session = load_session()?;

    Ok(Screen::resolve(
        settings.is_enabled(),
        session.as_ref(),
        Utc::now(),
    ))
}

static SESSION_PATH: LazyLock<PathBuf> =
    LazyLock::new(|| APP_DATA_DIR.join("auth-session.toml"));
