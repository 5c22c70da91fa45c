use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode, Url};
use scorekeeper_core::{ChatMessage, DmResult, MessageId, Transport, TransportError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// REST client for a Discord-compatible chat API.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    base_url: Url,
    bot_token: String,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: String,
    author: RawAuthor,
    #[serde(default)]
    content: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    edited_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    /// Seconds until the quota resets
    retry_after: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DmChannel {
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateDm<'a> {
    recipient_id: &'a str,
}

impl RawMessage {
    fn into_message(self) -> Option<ChatMessage> {
        let Some(id) = MessageId::parse(&self.id) else {
            warn!("Dropping message with invalid id {:?}", self.id);
            return None;
        };
        Some(ChatMessage {
            id,
            author_id: self.author.id,
            content: self.content,
            created_at: self.timestamp,
            edited_at: self.edited_timestamp,
        })
    }
}

fn http_error(err: reqwest::Error) -> TransportError {
    TransportError::Http(err.to_string())
}

fn retry_after_from_body(body: &str) -> Option<Duration> {
    let parsed: RateLimitBody = serde_json::from_str(body).ok()?;
    let secs = parsed.retry_after?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

/// Map a non-2xx response to a transport error.
fn status_error(status: StatusCode, body: &str) -> TransportError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => TransportError::QuotaExceeded {
            retry_after: retry_after_from_body(body),
        },
        StatusCode::NOT_FOUND => TransportError::NotFound(body.to_string()),
        _ => TransportError::Http(format!("Chat API non-2xx: {status} body={body}")),
    }
}

async fn check(resp: Response) -> Result<Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

impl ChatClient {
    pub fn new(base_url: &str, bot_token: String) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid chat API base URL {base_url}: {e}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Chat API base URL cannot carry paths: {base_url}");
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url,
            bot_token,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Protocol("base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    async fn post_message(&self, channel: &str, text: &str) -> Result<Response, TransportError> {
        let url = self.endpoint(&["channels", channel, "messages"])?;
        self.http
            .post(url)
            .header("Authorization", self.auth())
            .json(&CreateMessage { content: text })
            .send()
            .await
            .map_err(http_error)
    }
}

#[async_trait]
impl Transport for ChatClient {
    async fn fetch_messages(
        &self,
        channel: &str,
        after: Option<&MessageId>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, TransportError> {
        let mut url = self.endpoint(&["channels", channel, "messages"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(after) = after {
                query.append_pair("after", after.as_str());
            }
        }

        let resp = self
            .http
            .get(url)
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(http_error)?;
        let raw: Vec<RawMessage> = check(resp)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let messages: Vec<ChatMessage> =
            raw.into_iter().filter_map(RawMessage::into_message).collect();
        debug!("Fetched {} messages from {}", messages.len(), channel);
        Ok(messages)
    }

    async fn fetch_one(
        &self,
        channel: &str,
        target: &MessageId,
    ) -> Result<Option<ChatMessage>, TransportError> {
        let url = self.endpoint(&["channels", channel, "messages", target.as_str()])?;
        let resp = self
            .http
            .get(url)
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(http_error)?;
        let resp = match check(resp).await {
            Ok(resp) => resp,
            Err(TransportError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let raw: RawMessage = resp
            .json()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        Ok(raw.into_message())
    }

    async fn post_reaction(
        &self,
        channel: &str,
        target: &MessageId,
        emoji: &str,
    ) -> Result<(), TransportError> {
        let url = self.endpoint(&[
            "channels",
            channel,
            "messages",
            target.as_str(),
            "reactions",
            emoji,
            "@me",
        ])?;
        let resp = self
            .http
            .put(url)
            .header("Authorization", self.auth())
            .header("Content-Length", "0")
            .send()
            .await
            .map_err(http_error)?;
        check(resp).await?;
        Ok(())
    }

    async fn post_reply(&self, channel: &str, text: &str) -> Result<(), TransportError> {
        let resp = self.post_message(channel, text).await?;
        check(resp).await?;
        Ok(())
    }

    async fn send_direct_message(
        &self,
        user_id: &str,
        text: &str,
    ) -> Result<DmResult, TransportError> {
        let url = self.endpoint(&["users", "@me", "channels"])?;
        let resp = self
            .http
            .post(url)
            .header("Authorization", self.auth())
            .json(&CreateDm { recipient_id: user_id })
            .send()
            .await
            .map_err(http_error)?;
        if resp.status() == StatusCode::FORBIDDEN {
            return Ok(DmResult::suppressed());
        }
        let dm: DmChannel = check(resp)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let resp = self.post_message(&dm.id, text).await?;
        if resp.status() == StatusCode::FORBIDDEN {
            // Recipient closed DMs from server members
            return Ok(DmResult::suppressed());
        }
        check(resp).await?;
        Ok(DmResult::delivered())
    }

    fn transport_name(&self) -> &str {
        "chat_api"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_maps_to_quota() {
        let err = status_error(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"message":"You are being rate limited.","retry_after":2.5,"global":false}"#,
        );
        match err {
            TransportError::QuotaExceeded { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_millis(2500)));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = status_error(StatusCode::TOO_MANY_REQUESTS, "not json");
        assert!(matches!(
            err,
            TransportError::QuotaExceeded { retry_after: None }
        ));
        assert!(err.is_quota());
    }

    #[test]
    fn test_other_statuses() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, ""),
            TransportError::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, "upstream"),
            TransportError::Http(_)
        ));
    }

    #[test]
    fn test_raw_message_conversion() {
        let raw: Vec<RawMessage> = serde_json::from_str(
            r#"[
                {"id":"1200","author":{"id":"77"},"content":"[Gold] dod_lennon2 Wickeds 5 > Avengers 3",
                 "timestamp":"2024-03-10T11:55:00+00:00","edited_timestamp":null},
                {"id":"not-a-snowflake","author":{"id":"77"},"content":"x",
                 "timestamp":"2024-03-10T11:56:00+00:00"}
            ]"#,
        )
        .unwrap();
        let messages: Vec<ChatMessage> =
            raw.into_iter().filter_map(RawMessage::into_message).collect();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id.as_str(), "1200");
        assert_eq!(messages[0].author_id, "77");
        assert!(messages[0].edited_at.is_none());
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let client = ChatClient::new("https://chat.example/api/v10/", "t".to_string()).unwrap();
        let url = client
            .endpoint(&["channels", "5", "messages", "9", "reactions", "✅", "@me"])
            .unwrap();
        assert!(url
            .as_str()
            .starts_with("https://chat.example/api/v10/channels/5/messages/9/reactions/"));
        assert!(!url.as_str().contains('✅'));
    }
}
