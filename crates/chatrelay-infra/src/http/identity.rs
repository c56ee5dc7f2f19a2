//! Display identity resolution.
//!
//! The chat platform's own hint wins. Otherwise, when a directory URL is
//! configured, `GET {directory}/{userIdentity}` is expected to return a member
//! record with an `email` (or `mail`) field. A 404 means "no identity".

use std::time::Duration;

use chatrelay_core::channel::IdentityResolver;
use chatrelay_types::conversation::IncomingMessage;
use chatrelay_types::error::IdentityError;
use reqwest::StatusCode;
use serde::Deserialize;

use super::build_client;

#[derive(Deserialize)]
struct MemberRecord {
    #[serde(alias = "mail")]
    email: Option<String>,
}

pub struct DirectoryResolver {
    http: reqwest::Client,
    directory_url: Option<String>,
}

impl DirectoryResolver {
    pub fn new(directory_url: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            directory_url: directory_url.map(|url| url.trim_end_matches('/').to_string()),
        })
    }

    async fn lookup(&self, base: &str, user: &str) -> Result<Option<String>, IdentityError> {
        let response = self
            .http
            .get(format!("{base}/{user}"))
            .send()
            .await
            .map_err(|e| IdentityError::Lookup(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let record: MemberRecord = response
                    .json()
                    .await
                    .map_err(|e| IdentityError::Lookup(e.to_string()))?;
                Ok(record.email.filter(|email| !email.trim().is_empty()))
            }
            status => Err(IdentityError::Lookup(format!("directory returned {status}"))),
        }
    }
}

impl IdentityResolver for DirectoryResolver {
    async fn resolve(&self, message: &IncomingMessage) -> Result<Option<String>, IdentityError> {
        if let Some(hint) = message
            .identity_hint
            .as_deref()
            .filter(|hint| !hint.trim().is_empty())
        {
            return Ok(Some(hint.trim().to_string()));
        }
        match &self.directory_url {
            Some(base) => self.lookup(base, &message.user_identity).await,
            None => Ok(None),
        }
    }
}
