//! Machine location lookup through the node.
//!
//! The node fetches its own public-IP geolocation into the dictionary and we
//! read it back. Location only decorates policies, so failures degrade to
//! defaults and never fail a reconciliation run.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::executor::CommandExecutor;

const LOCATION_COMMAND: &str = "location_info = rest get where url=https://ipinfo.io/json";

/// The subset of the ipinfo.io payload carried on policies.
#[derive(Debug, Default, Deserialize)]
struct LocationInfo {
	loc: Option<String>,
	country: Option<String>,
	region: Option<String>,
	city: Option<String>,
}

/// Location attributes carried on node policies.
#[derive(Debug, Clone)]
pub struct GeoLocation {
	pub location: String,
	pub country: String,
	pub state: String,
	pub city: String,
}

impl Default for GeoLocation {
	fn default() -> Self {
		Self {
			location: "0.0, 0.0".to_string(),
			country: "Unknown".to_string(),
			state: "Unknown".to_string(),
			city: "Unknown".to_string(),
		}
	}
}

pub struct Geolocator {
	executor: Arc<dyn CommandExecutor>,
}

impl Geolocator {
	pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
		Self { executor }
	}

	/// Resolve the node's location, returning defaults on any failure.
	pub async fn resolve(&self) -> GeoLocation {
		let mut location = GeoLocation::default();

		if let Err(error) = self.executor.post(LOCATION_COMMAND, None).await {
			warn!("failed to fetch location info through the node: {}", error);
			return location;
		}
		let dictionary = match self.executor.get("get dictionary where format=json").await {
			Ok(outcome) => outcome.as_json().cloned().unwrap_or(Value::Null),
			Err(error) => {
				warn!("failed to read location info back: {}", error);
				return location;
			}
		};
		let Some(raw) = dictionary.get("location_info") else {
			debug!("no location_info in node dictionary");
			return location;
		};
		let info: LocationInfo = match raw {
			Value::String(text) => serde_json::from_str(text).unwrap_or_default(),
			other => serde_json::from_value(other.clone()).unwrap_or_default(),
		};

		if let Some(loc) = info.loc {
			location.location = loc;
		}
		if let Some(country) = info.country {
			location.country = country;
		}
		if let Some(state) = info.region {
			location.state = state;
		}
		if let Some(city) = info.city {
			location.city = city;
		}
		location
	}
}
