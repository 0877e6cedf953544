//! Per-source clients and collectors.

pub mod beestat;
pub mod openweather;
pub mod purpleair;

use iotsight_common::{Error, Result};
use serde_json::Value;

/// Issue one upstream GET and decode the JSON body.
///
/// Non-success statuses are reported as [`Error::Upstream`] and malformed
/// bodies as [`Error::Decode`]; the cache layer turns both into
/// stale-but-available semantics.
pub(crate) async fn get_json(
    http: &reqwest::Client,
    url: &str,
    params: &[(&str, &str)],
) -> Result<Value> {
    let response = http.get(url).query(params).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Upstream(format!(
            "'{}' returned status {}",
            url, status
        )));
    }

    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}
