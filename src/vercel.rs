//! Vercel deployment client.
//!
//! Reads deployment state from the REST API; triggering a deploy goes
//! through the `vercel` CLI so its interactive output streams into the
//! output panel like every other wrapped tool.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::events::{Event, PanelKind};
use crate::exec;

const API_BASE: &str = "https://api.vercel.com";

/// Deployment lifecycle state as reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeployState {
    Queued,
    Initializing,
    Building,
    Ready,
    Error,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl DeployState {
    pub fn label(&self) -> &'static str {
        match self {
            DeployState::Queued => "QUEUED",
            DeployState::Initializing => "INITIALIZING",
            DeployState::Building => "BUILDING",
            DeployState::Ready => "READY",
            DeployState::Error => "ERROR",
            DeployState::Canceled => "CANCELED",
            DeployState::Unknown => "UNKNOWN",
        }
    }
}

/// One deployment, flattened for display.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub uid: String,
    pub name: String,
    pub url: String,
    pub state: DeployState,
    pub created_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
    pub inspector_url: Option<String>,
}

impl Deployment {
    pub fn deployment_url(&self) -> String {
        format!("https://{}", self.url)
    }

    pub fn created_str(&self) -> String {
        self.created_at.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

#[derive(Deserialize)]
struct DeploymentsResponse {
    #[serde(default)]
    deployments: Vec<RawDeployment>,
}

#[derive(Deserialize)]
struct RawDeployment {
    uid: String,
    name: Option<String>,
    url: Option<String>,
    state: Option<DeployState>,
    created: i64,
    ready: Option<i64>,
    #[serde(rename = "inspectorUrl")]
    inspector_url: Option<String>,
}

/// Parses the `/v6/deployments` response body.
pub fn parse_deployments(json: &str) -> Result<Vec<Deployment>> {
    let resp: DeploymentsResponse =
        serde_json::from_str(json).context("unexpected deployments response")?;
    Ok(resp
        .deployments
        .into_iter()
        .map(|d| Deployment {
            uid: d.uid,
            name: d.name.unwrap_or_else(|| "unknown".to_string()),
            url: d.url.unwrap_or_default(),
            state: d.state.unwrap_or(DeployState::Queued),
            created_at: DateTime::from_timestamp_millis(d.created).unwrap_or_default(),
            ready_at: d.ready.and_then(DateTime::from_timestamp_millis),
            inspector_url: d.inspector_url,
        })
        .collect())
}

#[derive(Debug, Clone)]
pub struct VercelService {
    client: reqwest::Client,
    token: Option<String>,
    project_id: Option<String>,
    team_id: Option<String>,
}

impl VercelService {
    pub fn new(token: Option<String>, project_id: Option<String>, team_id: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            project_id,
            team_id,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    pub async fn get_deployments(&self, limit: usize) -> Result<Vec<Deployment>> {
        let Some(token) = &self.token else {
            bail!("VERCEL_TOKEN is not set");
        };
        let mut params = vec![("limit", limit.to_string())];
        if let Some(project) = &self.project_id {
            params.push(("projectId", project.clone()));
        }
        if let Some(team) = &self.team_id {
            params.push(("teamId", team.clone()));
        }
        let resp = self
            .client
            .get(format!("{API_BASE}/v6/deployments"))
            .bearer_auth(token)
            .query(&params)
            .send()
            .await
            .context("vercel api unreachable")?;
        if !resp.status().is_success() {
            bail!("vercel api returned {}", resp.status());
        }
        let body = resp.text().await.context("failed reading vercel response")?;
        parse_deployments(&body)
    }

    pub async fn latest(&self) -> Result<Option<Deployment>> {
        Ok(self.get_deployments(1).await?.into_iter().next())
    }

    /// Kicks off a production deploy through the CLI, streaming its output.
    pub async fn trigger(&self, tx: &mpsc::Sender<Event>, panel: PanelKind) -> Result<i32> {
        exec::stream("vercel", &["--prod", "--yes"], None, None, tx, panel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployments_response_is_flattened() {
        let raw = r#"{"deployments": [
            {
                "uid": "dpl_1",
                "name": "petehome",
                "url": "petehome-abc.vercel.app",
                "state": "READY",
                "created": 1756500000000,
                "ready": 1756500090000,
                "inspectorUrl": "https://vercel.com/x/petehome/dpl_1"
            },
            {
                "uid": "dpl_2",
                "state": "BUILDING",
                "created": 1756501000000
            }
        ]}"#;
        let deployments = parse_deployments(raw).unwrap();
        assert_eq!(deployments.len(), 2);

        let ready = &deployments[0];
        assert_eq!(ready.state, DeployState::Ready);
        assert_eq!(ready.deployment_url(), "https://petehome-abc.vercel.app");
        assert!(ready.ready_at.is_some());
        assert_eq!(ready.created_str(), "2025-08-29 20:40:00");

        let building = &deployments[1];
        assert_eq!(building.name, "unknown");
        assert_eq!(building.state, DeployState::Building);
        assert!(building.ready_at.is_none());
    }

    #[test]
    fn unknown_states_do_not_fail_parsing() {
        let raw = r#"{"deployments": [
            {"uid": "d", "state": "PROMOTING", "created": 0}
        ]}"#;
        let deployments = parse_deployments(raw).unwrap();
        assert_eq!(deployments[0].state, DeployState::Unknown);
    }

    #[test]
    fn empty_body_yields_no_deployments() {
        assert!(parse_deployments("{}").unwrap().is_empty());
    }
}
