//! Core types shared by the locate service and its clients.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LocateError;

/// A candidate server eligible to serve a client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Stable machine identifier (e.g. `mlab1-lga03.example.org`)
    pub machine: String,

    /// Service URLs on this machine. Carry an `access_token` parameter once issued.
    #[serde(default)]
    pub urls: Vec<String>,

    /// Site code (e.g. `lga03`)
    #[serde(default)]
    pub site: String,

    /// ISO 3166-1 country code
    #[serde(default)]
    pub country: String,

    /// ISO 3166-2 region code (e.g. `US-NY`)
    #[serde(default)]
    pub region: String,

    /// Ranking score from the backend, higher is better
    #[serde(default)]
    pub score: f64,
}

/// A mutually-exclusive geographic selector.
///
/// Exactly one of site, country, or region. Use [`QueryFilter::from_parts`]
/// to build one from optional inputs; conflicting or missing fields are an
/// [`LocateError::InvalidFilter`], never resolved by precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryFilter {
    Site(String),
    Country(String),
    Region(String),
}

impl QueryFilter {
    /// Build a filter from optional parts. Blank values count as absent.
    pub fn from_parts(
        site: Option<&str>,
        country: Option<&str>,
        region: Option<&str>,
    ) -> Result<Self, LocateError> {
        fn present(v: Option<&str>) -> Option<&str> {
            v.map(str::trim).filter(|v| !v.is_empty())
        }

        match (present(site), present(country), present(region)) {
            (Some(s), None, None) => Ok(Self::Site(s.to_string())),
            (None, Some(c), None) => Ok(Self::Country(c.to_string())),
            (None, None, Some(r)) => Ok(Self::Region(r.to_string())),
            (None, None, None) => Err(LocateError::InvalidFilter(
                "one of site, country, or region is required".to_string(),
            )),
            _ => Err(LocateError::InvalidFilter(
                "site, country, and region are mutually exclusive".to_string(),
            )),
        }
    }

    /// Query parameter name for this filter
    pub fn key(&self) -> &'static str {
        match self {
            Self::Site(_) => "site",
            Self::Country(_) => "country",
            Self::Region(_) => "region",
        }
    }

    /// Filter value
    pub fn value(&self) -> &str {
        match self {
            Self::Site(v) | Self::Country(v) | Self::Region(v) => v,
        }
    }

    /// Check whether a target falls inside this filter's scope. Codes compare
    /// without regard to ASCII case.
    pub fn matches(&self, target: &Target) -> bool {
        match self {
            Self::Site(s) => target.site.eq_ignore_ascii_case(s),
            Self::Country(c) => target.country.eq_ignore_ascii_case(c),
            Self::Region(r) => target.region.eq_ignore_ascii_case(r),
        }
    }
}

impl fmt::Display for QueryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key(), self.value())
    }
}

/// Raw filter query parameters as received over HTTP
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterParams {
    pub site: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
}

impl TryFrom<&FilterParams> for QueryFilter {
    type Error = LocateError;

    fn try_from(params: &FilterParams) -> Result<Self, Self::Error> {
        QueryFilter::from_parts(
            params.site.as_deref(),
            params.country.as_deref(),
            params.region.as_deref(),
        )
    }
}

/// Structured error carried in a failed reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub title: String,
    pub detail: String,
    #[serde(default)]
    pub status: u16,
}

impl From<&LocateError> for ErrorObject {
    fn from(err: &LocateError) -> Self {
        Self {
            title: err.title().to_string(),
            detail: err.to_string(),
            status: err.status_code(),
        }
    }
}

/// Reply body of the nearest endpoints
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NearestResult {
    #[serde(default)]
    pub results: Option<Vec<Target>>,
    #[serde(default)]
    pub error: Option<ErrorObject>,
}

impl NearestResult {
    pub fn ok(results: Vec<Target>) -> Self {
        Self {
            results: Some(results),
            error: None,
        }
    }

    pub fn err(err: &LocateError) -> Self {
        Self {
            results: None,
            error: Some(ErrorObject::from(err)),
        }
    }
}
