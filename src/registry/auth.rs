//! Authentication module for Docker registry access
//!
//! Probes `/v2/` for a `WWW-Authenticate` challenge and turns the configured
//! credentials into a per-request [`Credential`]: a bearer token from the
//! challenge realm, HTTP basic, or nothing.

use crate::error::{Result, SyncError};
use crate::image::Auth;
use crate::logging::Logger;
use regex::Regex;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::LazyLock;

static CHALLENGE_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("valid challenge regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    Bearer {
        realm: String,
        service: String,
        scope: Option<String>,
    },
    Basic,
}

impl AuthChallenge {
    /// Parse a `WWW-Authenticate` header value
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));

        if scheme.eq_ignore_ascii_case("basic") {
            return Some(AuthChallenge::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let params: HashMap<&str, &str> = CHALLENGE_PARAM_RE
            .captures_iter(params)
            .filter_map(|caps| {
                let key = caps.get(1)?.as_str();
                let value = caps.get(2)?.as_str();
                Some((key, value))
            })
            .collect();

        let realm = params.get("realm")?;
        Some(AuthChallenge::Bearer {
            realm: realm.to_string(),
            service: params.get("service").unwrap_or(&"").to_string(),
            scope: params.get("scope").map(|s| s.to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Authorization attached to every registry request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Credential {
    #[default]
    Anonymous,
    Basic {
        username: String,
        password: String,
    },
    Bearer(String),
}

impl Credential {
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Credential::Anonymous => request,
            Credential::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            Credential::Bearer(token) => request.bearer_auth(token),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryAuth {
    client: Client,
    address: String,
    logger: Logger,
}

impl RegistryAuth {
    pub fn new(client: Client, address: &str, logger: Logger) -> Self {
        Self {
            client,
            address: address.to_string(),
            logger,
        }
    }

    /// Obtain a credential for `repository` with `actions` (`pull` or
    /// `pull,push`)
    pub async fn login(&self, repository: &str, actions: &str, auth: &Auth) -> Result<Credential> {
        let Some(challenge) = self.get_auth_challenge().await? else {
            self.logger
                .debug("No authentication challenge - registry may not require auth");
            return Ok(Credential::Anonymous);
        };

        match challenge {
            AuthChallenge::Basic if auth.has_credentials() => Ok(Credential::Basic {
                username: auth.username.clone(),
                password: auth.password.clone(),
            }),
            AuthChallenge::Basic => Ok(Credential::Anonymous),
            AuthChallenge::Bearer { realm, service, .. } => {
                let scope = format!("repository:{}:{}", repository, actions);
                let token = self.get_token(&realm, &service, &scope, auth).await?;
                Ok(Credential::Bearer(token))
            }
        }
    }

    async fn get_auth_challenge(&self) -> Result<Option<AuthChallenge>> {
        let url = format!("{}/v2/", self.address);
        let response = self.client.get(&url).send().await?;

        self.logger
            .trace(&format!("Auth challenge response status: {}", response.status()));

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(None);
        }

        let header = response
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok());

        match header {
            Some(header) => {
                let challenge = AuthChallenge::parse(header);
                if challenge.is_none() {
                    self.logger
                        .warning(&format!("Unsupported auth challenge: {}", header));
                }
                Ok(challenge)
            }
            None => Ok(None),
        }
    }

    async fn get_token(&self, realm: &str, service: &str, scope: &str, auth: &Auth) -> Result<String> {
        let mut url = url::Url::parse(realm)?;
        {
            let mut query = url.query_pairs_mut();
            if !service.is_empty() {
                query.append_pair("service", service);
            }
            query.append_pair("scope", scope);
        }

        self.logger.trace(&format!("Requesting token from: {}", url));

        let mut request = self.client.get(url.as_str());
        if auth.has_credentials() {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(SyncError::Http {
                status: status.as_u16(),
                operation: format!("token request for {}", scope),
                message,
            });
        }

        let body: TokenResponse = response.json().await?;
        body.token
            .or(body.access_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| SyncError::Transport(format!("empty token for {}", scope)))
    }
}
