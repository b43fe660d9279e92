//! The declarative configuration document (§6 of SPEC_FULL.md) and its validation.
//!
//! Parsing is purely structural (serde); validation is a separate pass so that a malformed
//! document and a structurally-valid-but-semantically-wrong one produce distinct, typed errors.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::id::generate_route_id;

fn default_protocol() -> String {
	"http".to_string()
}

fn default_port() -> String {
	"80".to_string()
}

fn default_route_prefix() -> String {
	"/".to_string()
}

fn default_mode() -> String {
	"RoundRobin".to_string()
}

const DEFAULT_TARGET_WAIT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_TARGET_WEIGHT: u32 = 1;

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
	pub listeners: Vec<ListenerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
	#[serde(default = "default_protocol")]
	pub protocol: String,
	#[serde(default = "default_port")]
	pub port: String,
	pub ssl_certificate: Option<String>,
	pub ssl_certificate_key: Option<String>,
	#[serde(default)]
	pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
	#[serde(default = "default_route_prefix")]
	pub routeprefix: String,
	pub id: Option<String>,
	#[serde(default = "default_mode")]
	pub mode: String,
	#[serde(default)]
	#[serde(rename = "targetWaitTimeout")]
	pub target_wait_timeout: Option<u64>,
	#[serde(default)]
	#[serde(rename = "customHeaders")]
	pub custom_headers: Vec<HeaderRuleConfig>,
	pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeaderRuleConfig {
	pub method: String,
	pub headers: Vec<HeaderEntryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeaderEntryConfig {
	pub name: String,
	pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
	pub address: String,
	#[serde(default)]
	pub weight: Option<i64>,
}

/// A `Document` that has passed [`Document::validate`]: every field downstream code reads has
/// already been defaulted and checked, so [`crate::service::Service::assemble`] never needs to
/// re-derive a default or reject a bad value.
#[derive(Debug, Clone)]
pub struct ValidatedDocument {
	pub listeners: Vec<ValidatedListener>,
}

#[derive(Debug, Clone)]
pub struct ValidatedListener {
	pub protocol: Protocol,
	pub port: String,
	pub ssl_certificate: Option<String>,
	pub ssl_certificate_key: Option<String>,
	pub routes: Vec<ValidatedRoute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
	Http,
	Https,
}

#[derive(Debug, Clone)]
pub struct ValidatedRoute {
	pub id: String,
	pub routeprefix: String,
	pub mode: crate::policy::Mode,
	pub target_wait_timeout_secs: u64,
	pub custom_headers: Vec<crate::header::HeaderRule>,
	pub targets: Vec<ValidatedTarget>,
}

#[derive(Debug, Clone)]
pub struct ValidatedTarget {
	pub address: url::Url,
	pub weight: u32,
}

impl Document {
	pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
		Ok(serde_yaml::from_str(s)?)
	}

	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.display().to_string(),
			source,
		})?;
		Self::from_yaml_str(&contents)
	}

	/// Validates the document and produces a [`ValidatedDocument`], applying every default
	/// described in §6 and rejecting every violation enumerated there.
	pub fn validate(self) -> Result<ValidatedDocument, ConfigError> {
		let mut seen_listener_keys = HashSet::new();
		let mut seen_route_ids = HashSet::new();
		let mut listeners = Vec::with_capacity(self.listeners.len());

		for (index, listener) in self.listeners.into_iter().enumerate() {
			let protocol = match listener.protocol.as_str() {
				"http" => Protocol::Http,
				"https" => Protocol::Https,
				other => {
					return Err(ConfigError::UnsupportedProtocol {
						index,
						protocol: other.to_string(),
					});
				},
			};

			if protocol == Protocol::Https
				&& (listener.ssl_certificate.is_none() || listener.ssl_certificate_key.is_none())
			{
				return Err(ConfigError::MissingTlsMaterial {
					index,
					protocol: listener.protocol.clone(),
					port: listener.port.clone(),
				});
			}

			let key = (listener.protocol.clone(), listener.port.clone());
			if !seen_listener_keys.insert(key) {
				return Err(ConfigError::DuplicateListener {
					protocol: listener.protocol,
					port: listener.port,
				});
			}

			let mut routes = Vec::with_capacity(listener.routes.len());
			for route in listener.routes {
				let id = route.id.clone().unwrap_or_else(generate_route_id);
				if !seen_route_ids.insert(id.clone()) {
					return Err(ConfigError::DuplicateRouteId { id });
				}
				if !route.routeprefix.starts_with('/') {
					return Err(ConfigError::InvalidRoutePrefix {
						id,
						prefix: route.routeprefix,
					});
				}
				let mode = crate::policy::Mode::parse(&route.mode).ok_or_else(|| {
					ConfigError::UnsupportedMode {
						id: id.clone(),
						mode: route.mode.clone(),
					}
				})?;
				if route.targets.is_empty() {
					return Err(ConfigError::NoTargets { id });
				}

				let mut targets = Vec::with_capacity(route.targets.len());
				for target in route.targets {
					let address =
						url::Url::parse(&target.address).map_err(|source| ConfigError::InvalidTargetUrl {
							id: id.clone(),
							address: target.address.clone(),
							source,
						})?;
					let weight = match target.weight {
						Some(w) if w > 0 => w as u32,
						_ => DEFAULT_TARGET_WEIGHT,
					};
					targets.push(ValidatedTarget { address, weight });
				}

				let custom_headers = route
					.custom_headers
					.into_iter()
					.map(crate::header::HeaderRule::from_config)
					.collect();

				routes.push(ValidatedRoute {
					id,
					routeprefix: route.routeprefix,
					mode,
					target_wait_timeout_secs: route
						.target_wait_timeout
						.filter(|&t| t > 0)
						.unwrap_or(DEFAULT_TARGET_WAIT_TIMEOUT_SECS),
					custom_headers,
					targets,
				});
			}

			listeners.push(ValidatedListener {
				protocol,
				port: listener.port,
				ssl_certificate: listener.ssl_certificate,
				ssl_certificate_key: listener.ssl_certificate_key,
				routes,
			});
		}

		Ok(ValidatedDocument { listeners })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_apply_when_fields_are_omitted() {
		let doc = Document::from_yaml_str(
			r#"
listeners:
  - routes:
      - targets:
          - address: http://localhost:8091
"#,
		)
		.unwrap();
		let validated = doc.validate().unwrap();
		let listener = &validated.listeners[0];
		assert_eq!(listener.protocol, Protocol::Http);
		assert_eq!(listener.port, "80");
		let route = &listener.routes[0];
		assert_eq!(route.routeprefix, "/");
		assert_eq!(route.target_wait_timeout_secs, DEFAULT_TARGET_WAIT_TIMEOUT_SECS);
		assert_eq!(route.targets[0].weight, DEFAULT_TARGET_WEIGHT);
		assert_eq!(route.id.len(), 10);
	}

	#[test]
	fn rejects_unknown_protocol() {
		let doc = Document::from_yaml_str(
			r#"
listeners:
  - protocol: gopher
    routes:
      - targets:
          - address: http://localhost:8091
"#,
		)
		.unwrap();
		assert!(matches!(
			doc.validate(),
			Err(ConfigError::UnsupportedProtocol { .. })
		));
	}

	#[test]
	fn rejects_https_without_certificates() {
		let doc = Document::from_yaml_str(
			r#"
listeners:
  - protocol: https
    routes:
      - targets:
          - address: http://localhost:8091
"#,
		)
		.unwrap();
		assert!(matches!(
			doc.validate(),
			Err(ConfigError::MissingTlsMaterial { .. })
		));
	}

	#[test]
	fn rejects_route_without_targets() {
		let doc = Document::from_yaml_str(
			r#"
listeners:
  - routes:
      - id: empty
        targets: []
"#,
		)
		.unwrap();
		assert!(matches!(doc.validate(), Err(ConfigError::NoTargets { .. })));
	}

	#[test]
	fn rejects_duplicate_listener_port() {
		let doc = Document::from_yaml_str(
			r#"
listeners:
  - port: "8080"
    routes:
      - targets:
          - address: http://localhost:8091
  - port: "8080"
    routes:
      - targets:
          - address: http://localhost:8092
"#,
		)
		.unwrap();
		assert!(matches!(
			doc.validate(),
			Err(ConfigError::DuplicateListener { .. })
		));
	}

	#[test]
	fn negative_weight_is_coerced_to_default() {
		let doc = Document::from_yaml_str(
			r#"
listeners:
  - routes:
      - targets:
          - address: http://localhost:8091
            weight: -3
"#,
		)
		.unwrap();
		let validated = doc.validate().unwrap();
		assert_eq!(validated.listeners[0].routes[0].targets[0].weight, 1);
	}
}
