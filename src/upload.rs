//! Ships the finished CSV to Dropbox.

use std::path::Path;
use std::time::Duration;

use chrono::Local;
use log::{error, info};
use reqwest::Client;
use serde::Deserialize;

use crate::config::DropboxCredentials;
use crate::{info_time, Error, Result};

const TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";
const UPLOAD_URL: &str = "https://content.dropboxapi.com/2/files/upload";
const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct DropboxUploader {
    client: Client,
    credentials: DropboxCredentials,
    token_url: String,
    upload_url: String,
}

impl DropboxUploader {
    pub fn new(credentials: DropboxCredentials) -> Self {
        Self::with_endpoints(credentials, TOKEN_URL, UPLOAD_URL)
    }

    pub fn with_endpoints(
        credentials: DropboxCredentials,
        token_url: impl Into<String>,
        upload_url: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            credentials,
            token_url: token_url.into(),
            upload_url: upload_url.into(),
        }
    }

    /// Trades the refresh token for a short-lived access token.
    async fn access_token(&self) -> Result<String> {
        info!("Requesting a new Dropbox access token...");
        let res = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.credentials.app_key, Some(&self.credentials.app_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.credentials.refresh_token.as_str()),
            ])
            .timeout(TOKEN_TIMEOUT)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(Error::Upload(format!("token refresh failed ({status}): {body}")));
        }
        let token: TokenResponse = res.json().await?;
        Ok(token.access_token)
    }

    /// Uploads `path` to `/<file name>` in the app folder, replacing any file of the
    /// same name.
    pub async fn upload(&self, path: &Path) -> Result<()> {
        let start_time = Local::now();
        let Some(file_name) = path.file_name().map(|name| name.to_string_lossy().into_owned())
        else {
            return Err(Error::Upload(format!("{} has no file name", path.display())));
        };
        if !path.exists() {
            error!("Local file not found: {}", path.display());
            return Err(Error::Upload(format!("{} doesn't exist", path.display())));
        }

        let token = self.access_token().await?;
        let body = tokio::fs::read(path).await?;
        let api_arg = serde_json::json!({
            "path": remote_path(&file_name),
            "mode": "overwrite",
        });

        info!("Uploading {file_name} to Dropbox...");
        let res = self
            .client
            .post(&self.upload_url)
            .bearer_auth(token)
            .header("Dropbox-API-Arg", api_arg.to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(Error::Upload(format!("upload failed ({status}): {body}")));
        }
        info_time!(start_time, "Dropbox upload finished.");
        Ok(())
    }
}

fn remote_path(file_name: &str) -> String {
    format!("/{file_name}")
}
