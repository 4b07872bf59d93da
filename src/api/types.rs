//! Discovery api response types and the gateway url.

use serde::Deserialize;
use snafu::prelude::*;

/// Common response envelope: a code, a message and a data field.
#[derive(Debug, Deserialize)]
pub struct Response<T> {
    /// zero is success
    pub code: i64,
    /// error message
    pub message: String,
    /// result data, differ type for each api
    pub data: T,
}

/// data type for api /gateway/index
#[derive(Debug, Deserialize)]
pub struct GatewayIndexData {
    /// gateway url
    pub url: String,
}

/// Parse string as gateway url error
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ParseGatewayUrlError {
    /// the str is not a valid url
    #[snafu(display("{s} is an invalid url: {source}"))]
    InvalidUrl {
        /// string be parsed
        s: String,
        /// source error
        source: url::ParseError,
    },

    /// the parsed url scheme is not websocket
    #[snafu(display("the url {s} has invalid scheme {scheme}, only ws or wss is ok"))]
    InvalidScheme {
        /// the url
        s: String,
        /// invalid scheme
        scheme: String,
    },

    /// the parsed url has no host
    #[snafu(display("the gateway url {s} has no host"))]
    NoHost {
        /// the url
        s: String,
    },
}

/// A validated websocket gateway url, as returned by the discovery api.
#[derive(Debug, Clone)]
pub struct GatewayUrl {
    url: url::Url,
}

impl GatewayUrl {
    /// The url to actually dial.
    ///
    /// When a session id is present the resume query parameters are
    /// appended so the gateway continues the old session instead of
    /// starting a fresh one.
    pub fn connect_url(&self, session_id: Option<&str>, sn: u64) -> url::Url {
        let mut u = self.url.clone();
        if let Some(session_id) = session_id {
            u.query_pairs_mut()
                .append_pair("resume", "1")
                .append_pair("sn", &sn.to_string())
                .append_pair("session_id", session_id);
        }
        u
    }
}

impl std::str::FromStr for GatewayUrl {
    type Err = ParseGatewayUrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = url::Url::parse(s).with_context(|_| error::InvalidUrl { s: s.to_string() })?;

        ensure!(
            url.scheme() == "wss" || url.scheme() == "ws",
            error::InvalidScheme {
                s,
                scheme: url.scheme(),
            }
        );

        ensure!(url.host().is_some(), error::NoHost { s });

        Ok(Self { url })
    }
}

impl std::fmt::Display for GatewayUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.url.fmt(f)
    }
}
