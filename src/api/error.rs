use snafu::prelude::*;

/// API Error
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(variant), context(suffix(false)))]
pub enum Error {
    /// bot token contains characters that cannot be sent in an HTTP header
    #[snafu(display("bot token {token} is invalid"))]
    InvalidToken {
        /// input token
        token: String,
    },

    /// create HTTP client failed
    #[snafu(display("create api client failed: {source}"))]
    CreateClient {
        /// source error
        source: reqwest::Error,
    },

    /// send api request failed
    #[snafu(display("request {url} failed: {source}"))]
    Request {
        /// target url
        url: String,
        /// source http error
        source: reqwest::Error,
    },

    /// http response status is not OK(200)
    #[snafu(display("request {url} got http status code {status_code}"))]
    BadStatus {
        /// request url
        url: String,
        /// received http status code
        status_code: reqwest::StatusCode,
    },

    /// parse response body as the expected json type failed
    #[snafu(display("parse response body {body:?} failed: {source}"))]
    ParseBody {
        /// http response body
        body: bytes::Bytes,
        /// source parse error
        source: serde_json::Error,
    },

    /// api envelope code is not zero
    #[snafu(display("api return error code {code}, {message}"))]
    GatewayCode {
        /// received response code
        code: i64,
        /// received message
        message: String,
    },
}
