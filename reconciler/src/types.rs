use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;

/// Anything the reconciler can serve from the store or fetch from upstream.
pub trait Record: Clone + Send + Sync + 'static {
    type Key: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Short name used in logs, metrics and events.
    const KIND: &'static str;

    /// Records without content are treated the same as missing records.
    fn is_empty(&self) -> bool;

    /// Reduces an upstream answer for `key` to what the store hands back for
    /// `key` once it is persisted.
    fn restrict_to(self, _key: &Self::Key) -> Self {
        self
    }
}

/// Provider assigned flight identifier. Empty until the provider has seen the flight.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlightId(String);

impl FlightId {
    pub fn new<I: Into<String>>(id: I) -> Self {
        FlightId(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FlightId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FlightId {
    fn from(id: &str) -> Self {
        FlightId::new(id)
    }
}

impl From<String> for FlightId {
    fn from(id: String) -> Self {
        FlightId::new(id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightSummary {
    #[serde(default)]
    pub fr24_id: FlightId,
    pub flight: Option<String>,
    pub callsign: Option<String>,
    pub operating_as: Option<String>,
    pub painted_as: Option<String>,
    #[serde(rename = "type")]
    pub aircraft_type: Option<String>,
    pub reg: Option<String>,
    pub orig_icao: Option<String>,
    pub datetime_takeoff: Option<DateTime<Utc>>,
    pub runway_takeoff: Option<String>,
    pub dest_icao: Option<String>,
    pub dest_icao_actual: Option<String>,
    pub datetime_landed: Option<DateTime<Utc>>,
    pub runway_landed: Option<String>,
    /// Seconds airborne.
    pub flight_time: Option<i64>,
    pub actual_distance: Option<f64>,
    pub circle_distance: Option<f64>,
    pub category: Option<String>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub flight_ended: Option<bool>,
}

impl FlightSummary {
    pub fn normalized(mut self) -> Self {
        self.fr24_id = FlightId::new(self.fr24_id.0);
        self.callsign = self
            .callsign
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty());
        self
    }

    /// Key the summary is stored under. Summaries without a provider id are
    /// keyed by callsign, flight number, route and takeoff time until the
    /// provider assigns one.
    pub fn storage_key(&self) -> String {
        if self.fr24_id.is_empty() {
            self.provisional_key()
        } else {
            self.fr24_id.to_string()
        }
    }

    pub fn provisional_key(&self) -> String {
        let takeoff = self
            .datetime_takeoff
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        format!(
            "~{}/{}/{}/{}@{}",
            self.callsign.as_deref().unwrap_or_default(),
            self.flight.as_deref().unwrap_or_default(),
            self.orig_icao.as_deref().unwrap_or_default(),
            self.dest_icao.as_deref().unwrap_or_default(),
            takeoff
        )
    }
}

/// The provider's list of summaries matching a query.
pub type SummaryList = Vec<FlightSummary>;

impl Record for SummaryList {
    type Key = SummaryQuery;
    const KIND: &'static str = "summary";

    fn is_empty(&self) -> bool {
        <[FlightSummary]>::is_empty(self)
    }

    /// Keeps the summaries `query` matches, one per storage key, in the
    /// order the store lists them.
    fn restrict_to(self, query: &SummaryQuery) -> Self {
        self.into_iter()
            .map(FlightSummary::normalized)
            .filter(|summary| query.matches(summary))
            .map(|summary| (summary.storage_key(), summary))
            .collect::<BTreeMap<_, _>>()
            .into_values()
            .collect()
    }
}

/// Looks up the summaries of a callsign that took off on `date_from` and
/// landed on `date_to` (UTC days).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SummaryQuery {
    pub callsign: String,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

impl SummaryQuery {
    pub fn new<C: Into<String>>(callsign: C, date_from: NaiveDate, date_to: NaiveDate) -> Self {
        SummaryQuery {
            callsign: callsign.into().trim().to_ascii_uppercase(),
            date_from,
            date_to,
        }
    }

    pub fn matches(&self, summary: &FlightSummary) -> bool {
        let same_callsign = summary
            .callsign
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(&self.callsign));
        let took_off = summary
            .datetime_takeoff
            .is_some_and(|t| t.date_naive() == self.date_from);
        let landed = summary
            .datetime_landed
            .is_some_and(|t| t.date_naive() == self.date_to);

        same_callsign && took_off && landed
    }

    /// Provider search window: start of `date_from` to 23:59 of `date_to`.
    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.date_from.and_time(NaiveTime::MIN).and_utc();
        let end = self
            .date_to
            .and_hms_opt(23, 59, 0)
            .map(|t| t.and_utc())
            .unwrap_or(start);
        (start, end)
    }
}

impl fmt::Display for SummaryQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}..{}", self.callsign, self.date_from, self.date_to)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub timestamp: DateTime<Utc>,
    /// Feet.
    #[serde(rename = "alt")]
    pub altitude: i32,
    /// Degrees from true north.
    #[serde(rename = "track")]
    pub heading: i32,
    /// Knots.
    #[serde(rename = "gspeed")]
    pub ground_speed: i32,
    /// Feet per minute.
    #[serde(rename = "vspeed")]
    pub vertical_speed: i32,
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlightTrack {
    #[serde(rename = "fr24_id")]
    pub id: FlightId,
    #[serde(rename = "tracks", default)]
    pub points: Vec<TrackPoint>,
}

impl Record for FlightTrack {
    type Key = FlightId;
    const KIND: &'static str = "track";

    fn is_empty(&self) -> bool {
        self.id.is_empty() || self.points.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserFlightLink {
    pub owner: String,
    pub flight_id: FlightId,
}

impl UserFlightLink {
    pub fn new<O: Into<String>>(owner: O, flight_id: FlightId) -> Self {
        UserFlightLink {
            owner: owner.into(),
            flight_id,
        }
    }
}
