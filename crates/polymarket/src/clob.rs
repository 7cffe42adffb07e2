//! REST client for the Polymarket CLOB catalog endpoints.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::Price;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Decoded value of the cursor that signals end-of-pagination.
const END_CURSOR: &[u8] = b"-1";

/// One tradable outcome token of a market.
#[derive(Clone, Debug, Deserialize)]
pub struct MarketToken {
    #[serde(default)]
    pub token_id: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub price: Price,
    #[serde(default)]
    pub winner: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Market {
    pub condition_id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub end_date_iso: String,
    #[serde(default)]
    pub tokens: Vec<MarketToken>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MarketPage {
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub count: i64,
    pub data: Vec<Market>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ClobClient {
    http: reqwest::Client,
    base_url: String,
}

impl ClobClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetches one catalog page. Any non-2xx status is a typed error.
    pub async fn get_markets(&self, cursor: Option<&str>) -> Result<MarketPage> {
        let mut url = format!("{}/markets", self.base_url);
        if let Some(cursor) = cursor {
            url = format!("{url}?next_cursor={cursor}");
        }
        debug!(%url, "fetching market page");

        let response = self.http.get(&url).timeout(REQUEST_TIMEOUT).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }

    /// Walks the whole catalog. The venue signals the last page with a
    /// base64 cursor decoding to `-1`; a cursor that fails to decode is an
    /// error, not the end.
    pub async fn get_all_markets(&self) -> Result<Vec<Market>> {
        let mut markets = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.get_markets(cursor.as_deref()).await?;
            markets.extend(page.data);
            match page.next_cursor {
                None => break,
                Some(next) => {
                    if cursor_is_end(&next)? {
                        break;
                    }
                    cursor = Some(next);
                }
            }
        }
        Ok(markets)
    }
}

fn cursor_is_end(cursor: &str) -> Result<bool> {
    Ok(BASE64.decode(cursor)? == END_CURSOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    #[test]
    fn end_cursor_sentinel() {
        let end = BASE64.encode("-1");
        assert!(cursor_is_end(&end).unwrap());
        let more = BASE64.encode("abc");
        assert!(!cursor_is_end(&more).unwrap());
    }

    #[test]
    fn invalid_cursor_is_surfaced() {
        assert!(matches!(
            cursor_is_end("not-base64!!"),
            Err(Error::Cursor(_))
        ));
    }

    async fn markets_handler(
        Query(params): Query<HashMap<String, String>>,
    ) -> Json<serde_json::Value> {
        let page_two_cursor = BASE64.encode("abc");
        match params.get("next_cursor") {
            None => Json(serde_json::json!({
                "limit": 1,
                "count": 1,
                "data": [{"condition_id": "m1", "description": "first", "tokens": []}],
                "next_cursor": page_two_cursor,
            })),
            Some(c) if *c == page_two_cursor => Json(serde_json::json!({
                "limit": 1,
                "count": 1,
                "data": [{"condition_id": "m2", "description": "second", "tokens": []}],
                "next_cursor": BASE64.encode("-1"),
            })),
            Some(other) => panic!("unexpected cursor {other}"),
        }
    }

    #[tokio::test]
    async fn pagination_stops_at_sentinel() {
        let app = Router::new().route("/markets", get(markets_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = ClobClient::new(format!("http://{addr}"));
        let markets = client.get_all_markets().await.unwrap();

        let ids: Vec<&str> = markets.iter().map(|m| m.condition_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn non_success_status_is_api_error() {
        let app = Router::new().route(
            "/markets",
            get(|| async { (axum::http::StatusCode::BAD_GATEWAY, "upstream down") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = ClobClient::new(format!("http://{addr}"));
        match client.get_markets(None).await {
            Err(Error::Api { status, body }) => {
                assert_eq!(status.as_u16(), 502);
                assert_eq!(body, "upstream down");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }
}
