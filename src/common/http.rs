use reqwest::{blocking, Client, Error};
use std::time::Duration;

pub struct HttpClient;

impl HttpClient {
    pub const USER_AGENT: &'static str = "Mozilla/5.0 (compatible; Riffle/0.1.0)";

    /// Async client for the watch-page and player-script fetches.
    pub fn new() -> Result<Client, Error> {
        Client::builder()
            .user_agent(Self::USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
    }

    /// Blocking client for media range requests. No total request timeout:
    /// a response body may be streamed from for minutes.
    pub fn new_blocking() -> Result<blocking::Client, Error> {
        blocking::Client::builder()
            .user_agent(Self::USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .timeout(None)
            .build()
    }
}
