use crate::config::Config;
use crate::sparkline::HistoryPoint;
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize, Debug)]
struct HaHistoryRecord {
    state: String,
    last_changed: DateTime<Utc>,
}

/// REST side of the hub: used for sparkline history only.
#[derive(Clone)]
pub struct HaClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HaClient {
    pub fn new(config: &Config) -> Self {
        HaClient {
            client: Client::new(),
            base_url: config.ha_base_url.clone(),
            token: config.ha_token.clone(),
        }
    }

    fn history_url(&self, since: DateTime<Utc>) -> String {
        format!(
            "{}/api/history/period/{}",
            self.base_url,
            since.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }

    /// Numeric history of `entity_id` since `since`, oldest first.
    pub async fn fetch_history(&self, entity_id: &str, since: DateTime<Utc>) -> Result<Vec<HistoryPoint>> {
        let mut request = self
            .client
            .get(self.history_url(since))
            .query(&[("filter_entity_id", entity_id)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await?.error_for_status()?;
        let series: Vec<Vec<HaHistoryRecord>> = resp.json().await?;
        Ok(numeric_points(entity_id, series))
    }
}

fn numeric_points(entity_id: &str, series: Vec<Vec<HaHistoryRecord>>) -> Vec<HistoryPoint> {
    let mut points: Vec<HistoryPoint> = series
        .into_iter()
        .flatten()
        .filter_map(|record| match record.state.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => Some(HistoryPoint {
                value,
                time: record.last_changed,
            }),
            _ => {
                debug!("Skipping {} history state {:?}", entity_id, record.state);
                None
            }
        })
        .collect();
    points.sort_by_key(|p| p.time);
    points
}
