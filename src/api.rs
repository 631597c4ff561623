use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::backend::{Backend, FetchParams};
use crate::error::{CommandError, FetchError};
use crate::models::{
    ActionRequest, BotAction, BotKind, BotsStatus, ClearRequest, Command, CommandOutcome,
    CommandReply, LeaderboardEntry, PanelStats, PointsRequest, Ranking, Resource, ServerStatus,
    Snapshot,
};
use crate::util::normalize_server_url;

/// Which bot-control route the server exposes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ActionEndpoint {
    /// `POST /api/bot/{type}/{action}`
    #[default]
    PerBot,
    /// `POST /api/action` with `{"action": "start_twitch"}`
    Combined,
}

impl ActionEndpoint {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "per-bot" | "per_bot" | "bot" => Some(ActionEndpoint::PerBot),
            "combined" | "action" => Some(ActionEndpoint::Combined),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    action_endpoint: ActionEndpoint,
}

impl ApiClient {
    pub fn new(
        server_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        action_endpoint: ActionEndpoint,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build panel API client")?;
        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        Ok(Self {
            client,
            base_url: normalize_server_url(server_url),
            api_key,
            action_endpoint,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn credential(&self) -> Result<&str, FetchError> {
        self.api_key.as_deref().ok_or(FetchError::MissingCredential)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let token = self.credential()?;
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                message: error_text(&body).unwrap_or_else(|| status_text(status)),
            });
        }
        decode_body(path, &body)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<CommandOutcome, CommandError> {
        let token = self.credential()?;
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(FetchError::from)?;

        let status = response.status();
        let text = response.text().await.map_err(FetchError::from)?;
        let reply = serde_json::from_str::<CommandReply>(&text);

        if !status.is_success() {
            let message = reply
                .ok()
                .and_then(|reply| reply.error)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(CommandError::Rejected(message));
        }

        let reply = reply.map_err(|err| {
            FetchError::Protocol(format!("{} returned invalid JSON: {}", path, err))
        })?;
        // The server reports some refusals (e.g. bot already running) with 200.
        if let Some(error) = reply.error {
            return Err(CommandError::Rejected(error));
        }

        Ok(CommandOutcome {
            message: reply.message.unwrap_or_else(|| "OK".to_string()),
            total_points: reply.total_points,
            affected: reply.affected,
        })
    }

    pub async fn status(&self) -> Result<ServerStatus, FetchError> {
        self.get("/api/status").await
    }

    pub async fn bots_status(&self) -> Result<BotsStatus, FetchError> {
        self.get("/api/bots/status").await
    }

    pub async fn stats(&self) -> Result<PanelStats, FetchError> {
        self.get("/api/stats").await
    }

    pub async fn ranking(&self, limit: usize) -> Result<Ranking, FetchError> {
        self.get(&format!("/api/users/ranking?limit={}", limit)).await
    }

    pub async fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>, FetchError> {
        self.get("/api/leaderboard").await
    }

    pub async fn bot_action(
        &self,
        bot: BotKind,
        action: BotAction,
    ) -> Result<CommandOutcome, CommandError> {
        match self.action_endpoint {
            ActionEndpoint::PerBot => {
                let path = format!("/api/bot/{}/{}", bot.as_str(), action.as_str());
                self.post(&path, &ActionRequest {
                    action: action.as_str(),
                })
                .await
            }
            ActionEndpoint::Combined => {
                let action = format!("{}_{}", action.as_str(), bot.as_str());
                self.post("/api/action", &ActionRequest { action: &action })
                    .await
            }
        }
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn fetch(&self, resource: Resource, params: FetchParams) -> Result<Snapshot, FetchError> {
        debug!(resource = %resource, base_url = %self.base_url, "fetching");
        let snapshot = match resource {
            Resource::Status => Snapshot::Status(self.status().await?),
            Resource::BotStatus => Snapshot::BotStatus(self.bots_status().await?),
            Resource::Stats => Snapshot::Stats(self.stats().await?),
            Resource::Ranking => Snapshot::Ranking(self.ranking(params.ranking_limit).await?),
            Resource::Leaderboard => Snapshot::Leaderboard(self.leaderboard().await?),
        };
        Ok(snapshot)
    }

    async fn execute(&self, command: &Command) -> Result<CommandOutcome, CommandError> {
        match command {
            Command::Bot { bot, action } => self.bot_action(*bot, *action).await,
            Command::AddPoints { username, points } => {
                self.post(
                    "/api/users/points/add",
                    &PointsRequest {
                        username,
                        points: Some(*points),
                        clear_all: false,
                    },
                )
                .await
            }
            Command::RemovePoints { username, points } => {
                self.post(
                    "/api/users/points/remove",
                    &PointsRequest {
                        username,
                        points: Some(*points),
                        clear_all: false,
                    },
                )
                .await
            }
            Command::ClearUserPoints { username } => {
                self.post(
                    "/api/users/points/remove",
                    &PointsRequest {
                        username,
                        points: None,
                        clear_all: true,
                    },
                )
                .await
            }
            Command::ClearAllPoints { scope } => {
                self.post(
                    "/api/points/clear",
                    &ClearRequest {
                        scope: scope.as_str(),
                    },
                )
                .await
            }
        }
    }

    fn name(&self) -> &str {
        "panel-api"
    }
}

fn decode_body<T: DeserializeOwned>(path: &str, body: &str) -> Result<T, FetchError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|err| FetchError::Protocol(format!("{} returned invalid JSON: {}", path, err)))?;
    if let Some(message) = value.get("error").and_then(|error| error.as_str()) {
        return Err(FetchError::Protocol(format!("{}: {}", path, message)));
    }
    serde_json::from_value(value)
        .map_err(|err| FetchError::Protocol(format!("{} has unexpected shape: {}", path, err)))
}

fn error_text(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|error| error.as_str())
        .map(|error| error.to_string())
}

fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(|reason| reason.to_string())
        .unwrap_or_else(|| status.as_u16().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_bodies_on_success_are_protocol_errors() {
        let err = decode_body::<PanelStats>(
            "/api/stats",
            r#"{"error":"Brak połączenia z bazą danych"}"#,
        )
        .expect_err("error body");
        assert!(matches!(err, FetchError::Protocol(message) if message.contains("bazą danych")));
    }

    #[test]
    fn missing_fields_are_protocol_errors() {
        let err = decode_body::<ServerStatus>("/api/status", r#"{"twitch":true}"#)
            .expect_err("missing discord");
        assert!(matches!(err, FetchError::Protocol(_)));
    }

    #[test]
    fn action_endpoint_names() {
        assert_eq!(ActionEndpoint::parse("combined"), Some(ActionEndpoint::Combined));
        assert_eq!(ActionEndpoint::parse(" Per-Bot "), Some(ActionEndpoint::PerBot));
        assert_eq!(ActionEndpoint::parse("rpc"), None);
    }

    #[test]
    fn base_url_is_normalized() {
        let client = ApiClient::new(
            "http://localhost:5000/api/",
            Some("  ".to_string()),
            Duration::from_secs(1),
            ActionEndpoint::PerBot,
        )
        .expect("client");
        assert_eq!(client.base_url(), "http://localhost:5000");
        assert!(matches!(client.credential(), Err(FetchError::MissingCredential)));
    }
}
