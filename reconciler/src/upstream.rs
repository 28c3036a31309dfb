//! Client side of the flight data provider. The reconciler only needs
//! "fetch by key returns a record or fails", so every record type gets one
//! `Upstream` implementation and the HTTP details stay in this module.

use crate::types::{FlightId, FlightSummary, FlightTrack, Record, SummaryList, SummaryQuery};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const ACCEPT_VERSION: &str = "v1";
const PROVIDER_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    #[error("record not found upstream")]
    NotFound,
    #[error("upstream rate limit exceeded")]
    RateLimited,
    #[error("upstream call timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("could not decode upstream response: {0}")]
    Decode(String),
}

impl UpstreamError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout(timeout)
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

#[async_trait]
pub trait Upstream<R: Record>: Send + Sync {
    /// Must be safe to call concurrently up to the gate's permit count.
    async fn fetch(&self, key: &R::Key) -> Result<R, UpstreamError>;
}

#[derive(Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    data: Vec<FlightSummary>,
}

/// Flightradar24 API client.
pub struct Fr24Client {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    timeout: Duration,
}

impl Fr24Client {
    pub fn new(base_url: &str, api_token: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(Fr24Client {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            timeout,
        })
    }

    async fn get(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Vec<u8>, UpstreamError> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, endpoint))
            .map_err(|e| UpstreamError::Transport(format!("invalid URL: {e}")))?;
        url.query_pairs_mut().extend_pairs(query);

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .header("Accept-Version", ACCEPT_VERSION)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, self.timeout))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(UpstreamError::NotFound),
            StatusCode::TOO_MANY_REQUESTS => return Err(UpstreamError::RateLimited),
            status => return Err(UpstreamError::Transport(format!("HTTP {status}"))),
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, self.timeout))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Upstream<FlightTrack> for Fr24Client {
    async fn fetch(&self, key: &FlightId) -> Result<FlightTrack, UpstreamError> {
        let body = self
            .get("flight-tracks", &[("flight_id", key.as_str())])
            .await?;

        // The provider answers with a list holding at most one track.
        let tracks: Vec<FlightTrack> =
            serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode(e.to_string()))?;

        match tracks.into_iter().next() {
            Some(track) if !track.is_empty() => Ok(track),
            _ => Err(UpstreamError::NotFound),
        }
    }
}

#[async_trait]
impl Upstream<SummaryList> for Fr24Client {
    async fn fetch(&self, key: &SummaryQuery) -> Result<SummaryList, UpstreamError> {
        let (from, to) = key.window();
        let from = from.format(PROVIDER_DATETIME_FORMAT).to_string();
        let to = to.format(PROVIDER_DATETIME_FORMAT).to_string();

        let body = self
            .get(
                "flight-summary/full",
                &[
                    ("flight_datetime_from", from.as_str()),
                    ("flight_datetime_to", to.as_str()),
                    ("callsigns", key.callsign.as_str()),
                ],
            )
            .await?;

        let response: SummaryResponse =
            serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode(e.to_string()))?;

        let summaries: SummaryList = response
            .data
            .into_iter()
            .map(FlightSummary::normalized)
            .collect();

        if summaries.is_empty() {
            return Err(UpstreamError::NotFound);
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TRACK_BODY: &str = r#"[{
        "fr24_id": "3a1b2c3d",
        "tracks": [
            {"timestamp": "2024-05-01T22:00:00Z", "alt": 0, "track": 280,
             "gspeed": 14, "vspeed": 0, "lat": 37.6189, "lon": -122.375},
            {"timestamp": "2024-05-01T22:05:00Z", "alt": 8500, "track": 295,
             "gspeed": 260, "vspeed": 2400, "lat": 37.70, "lon": -122.55}
        ]
    }]"#;

    fn client(server: &MockServer) -> Fr24Client {
        Fr24Client::new(&server.uri(), "test-token", Duration::from_secs(2)).unwrap()
    }

    async fn fetch_track(client: &Fr24Client, id: &str) -> Result<FlightTrack, UpstreamError> {
        Upstream::<FlightTrack>::fetch(client, &FlightId::from(id)).await
    }

    async fn fetch_summaries(
        client: &Fr24Client,
        query: &SummaryQuery,
    ) -> Result<SummaryList, UpstreamError> {
        Upstream::<SummaryList>::fetch(client, query).await
    }

    async fn mount_tracks(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/flight-tracks"))
            .and(query_param("flight_id", "3a1b2c3d"))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_track() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/flight-tracks"))
            .and(query_param("flight_id", "3a1b2c3d"))
            .and(header("Authorization", "Bearer test-token"))
            .and(header("Accept-Version", "v1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(TRACK_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let track = fetch_track(&client(&server), "3a1b2c3d").await.unwrap();
        assert_eq!(track.id.as_str(), "3a1b2c3d");
        assert_eq!(track.points.len(), 2);
        assert_eq!(track.points[1].altitude, 8500);
    }

    #[tokio::test]
    async fn test_empty_track_is_not_found() {
        for body in ["[]", r#"[{"fr24_id": "3a1b2c3d", "tracks": []}]"#] {
            let server = MockServer::start().await;
            mount_tracks(&server, ResponseTemplate::new(200).set_body_string(body)).await;

            let result = fetch_track(&client(&server), "3a1b2c3d").await;
            assert_eq!(result, Err(UpstreamError::NotFound), "body: {body}");
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        mount_tracks(&server, ResponseTemplate::new(200).set_body_string("{not json")).await;

        let result = fetch_track(&client(&server), "3a1b2c3d").await;
        assert!(matches!(result, Err(UpstreamError::Decode(_))));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (404, UpstreamError::NotFound),
            (429, UpstreamError::RateLimited),
            (
                500,
                UpstreamError::Transport("HTTP 500 Internal Server Error".into()),
            ),
        ];

        for (status, expected) in cases {
            let server = MockServer::start().await;
            mount_tracks(&server, ResponseTemplate::new(status)).await;

            let result = fetch_track(&client(&server), "3a1b2c3d").await;
            assert_eq!(result, Err(expected));
        }
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        mount_tracks(
            &server,
            ResponseTemplate::new(200)
                .set_body_string(TRACK_BODY)
                .set_delay(Duration::from_millis(500)),
        )
        .await;

        let client =
            Fr24Client::new(&server.uri(), "test-token", Duration::from_millis(50)).unwrap();
        let result = fetch_track(&client, "3a1b2c3d").await;
        assert_eq!(
            result,
            Err(UpstreamError::Timeout(Duration::from_millis(50)))
        );
    }

    #[tokio::test]
    async fn test_fetch_summaries() {
        let server = MockServer::start().await;

        let body = r#"{"data": [{
            "fr24_id": "3a1b2c3d",
            "flight": "UA1",
            "callsign": "UAL1",
            "orig_icao": "KSFO",
            "dest_icao": "WSSS",
            "datetime_takeoff": "2024-05-01T22:00:00Z",
            "datetime_landed": "2024-05-03T08:00:00Z",
            "actual_distance": 13612.5,
            "flight_ended": true
        }]}"#;

        Mock::given(method("GET"))
            .and(path("/flight-summary/full"))
            .and(query_param("callsigns", "UAL1"))
            .and(query_param("flight_datetime_from", "2024-05-01T00:00:00Z"))
            .and(query_param("flight_datetime_to", "2024-05-03T23:59:00Z"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let query = SummaryQuery::new(
            "UAL1",
            "2024-05-01".parse().unwrap(),
            "2024-05-03".parse().unwrap(),
        );
        let summaries = fetch_summaries(&client(&server), &query).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].dest_icao.as_deref(), Some("WSSS"));
        assert!(query.matches(&summaries[0]));
    }

    #[tokio::test]
    async fn test_no_summaries_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flight-summary/full"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data": []}"#))
            .mount(&server)
            .await;

        let query = SummaryQuery::new(
            "UAL1",
            "2024-05-01".parse().unwrap(),
            "2024-05-01".parse().unwrap(),
        );
        let result = fetch_summaries(&client(&server), &query).await;
        assert_eq!(result, Err(UpstreamError::NotFound));
    }
}
