use reqwest::StatusCode;
use snafu::prelude::*;

use super::error::variant::*;
use super::types::*;
use super::Result;

static BASE_URL: &str = "https://www.kaiheila.cn/api/v3";

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Gateway endpoint-discovery HTTP client
#[derive(Debug, Clone)]
pub struct Client {
    client: reqwest::Client,
}

impl Client {
    fn new(auth_type: &'static str, token: &str) -> Result<Self> {
        let auth_header_value = format!("{} {}", auth_type, token).parse().map_err(|_| {
            InvalidToken {
                token: token.to_string(),
            }
            .build()
        })?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::AUTHORIZATION, auth_header_value);

        let client = reqwest::Client::builder()
            .gzip(true)
            .deflate(true)
            .user_agent(APP_USER_AGENT)
            .default_headers(headers)
            .build()
            .context(CreateClient)?;

        Ok(Self { client })
    }

    /// create a new api client using bot token
    pub fn new_from_bot_token<S: AsRef<str> + ?Sized>(token: &S) -> Result<Self> {
        Self::new("Bot", token.as_ref())
    }

    /// create a new api client using oauth2 token
    pub fn new_from_oauth2_token<S: AsRef<str> + ?Sized>(token: &S) -> Result<Self> {
        Self::new("Bearer", token.as_ref())
    }

    async fn request<R>(&self, path: &str, query: &[(&str, &str)]) -> Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", BASE_URL, path);

        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|_| Request { url: &url })?;

        ensure!(
            resp.status() == StatusCode::OK,
            BadStatus {
                url: &url,
                status_code: resp.status()
            }
        );

        let body = resp
            .bytes()
            .await
            .with_context(|_| Request { url: &url })?;

        let result: Response<R> =
            serde_json::from_slice(&body).with_context(|_| ParseBody { body })?;

        ensure!(
            result.code == 0,
            GatewayCode {
                code: result.code,
                message: result.message
            }
        );

        Ok(result.data)
    }

    /// Call /gateway/index, get a fresh gateway url
    pub async fn gateway_url(&self, compress: bool) -> Result<String> {
        let data: GatewayIndexData = self
            .request("/gateway/index", &[("compress", if compress { "1" } else { "0" })])
            .await?;
        Ok(data.url)
    }
}
