//! Custom header rewriting (§4.3 of SPEC_FULL.md).
//!
//! Each route carries an ordered list of [`HeaderRule`]s, each scoped to an HTTP method (or
//! `"any"`). A matching rule's headers are applied, in declaration order, last-write-wins per
//! header name, to the request before it is forwarded to the chosen target. Values may embed
//! `[[token]]` placeholders; unknown tokens are left as literal text rather than rejected, per
//! the original source's lenient fallback.

use std::sync::LazyLock;

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use minijinja::Environment;
use tracing::warn;

use crate::config::HeaderRuleConfig;

/// Template context available to a header value's `[[token]]` placeholders.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TemplateContext {
	pub protocol: String,
	pub client_host: String,
	pub tls_version: String,
	pub balancer_id: String,
}

static ENV: LazyLock<Environment<'static>> = LazyLock::new(|| {
	let mut env = Environment::new();
	env.set_syntax(
		minijinja::Syntax {
			block_start: "{%".into(),
			block_end: "%}".into(),
			variable_start: "[[".into(),
			variable_end: "]]".into(),
			comment_start: "{#".into(),
			comment_end: "#}".into(),
		}
		.unwrap(),
	);
	env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
	env
});

#[derive(Debug, Clone)]
pub struct HeaderEntry {
	pub name: HeaderName,
	/// Raw template source, e.g. `"[[protocol]]"` or a literal like `"keep-alive"`.
	pub template: String,
}

#[derive(Debug, Clone)]
pub struct HeaderRule {
	/// `None` means the rule applies to any method (the configuration document's `"any"`).
	pub method: Option<Method>,
	pub entries: Vec<HeaderEntry>,
}

impl HeaderRule {
	pub fn from_config(config: HeaderRuleConfig) -> Self {
		let method = if config.method.eq_ignore_ascii_case("any") {
			None
		} else {
			Method::from_bytes(config.method.as_bytes()).ok()
		};
		let entries = config
			.headers
			.into_iter()
			.filter_map(|entry| {
				HeaderName::from_bytes(entry.name.as_bytes())
					.map(|name| HeaderEntry {
						name,
						template: entry.value,
					})
					.map_err(|err| warn!(name = entry.name, %err, "skipping invalid header name"))
					.ok()
			})
			.collect();
		Self { method, entries }
	}

	fn applies_to(&self, method: &Method) -> bool {
		match &self.method {
			None => true,
			Some(m) => m == method,
		}
	}
}

/// Applies every rule matching `method`, in declaration order, to `headers`. A later rule's
/// entry for the same header name overwrites an earlier one.
pub fn apply_custom_headers(rules: &[HeaderRule], method: &Method, ctx: &TemplateContext, headers: &mut HeaderMap) {
	for rule in rules.iter().filter(|r| r.applies_to(method)) {
		for entry in &rule.entries {
			let rendered = render(&entry.template, ctx);
			match HeaderValue::from_str(&rendered) {
				Ok(value) => {
					headers.insert(entry.name.clone(), value);
				},
				Err(err) => warn!(name = %entry.name, %err, "skipping header with invalid rendered value"),
			}
		}
	}
}

fn render(template: &str, ctx: &TemplateContext) -> String {
	match ENV.render_str(template, ctx) {
		Ok(rendered) => rendered,
		Err(err) => {
			warn!(template, %err, "header template failed to render, using literal text");
			template.to_string()
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::HeaderEntryConfig;

	fn ctx() -> TemplateContext {
		TemplateContext {
			protocol: "https".into(),
			client_host: "10.0.0.5".into(),
			tls_version: "TLS1.3".into(),
			balancer_id: "route-a".into(),
		}
	}

	#[test]
	fn renders_known_tokens() {
		let rule = HeaderRule::from_config(HeaderRuleConfig {
			method: "any".into(),
			headers: vec![HeaderEntryConfig {
				name: "x-forwarded-proto".into(),
				value: "[[protocol]]".into(),
			}],
		});
		let mut headers = HeaderMap::new();
		apply_custom_headers(&[rule], &Method::GET, &ctx(), &mut headers);
		assert_eq!(headers.get("x-forwarded-proto").unwrap(), "https");
	}

	#[test]
	fn unknown_token_falls_back_to_literal() {
		let rule = HeaderRule::from_config(HeaderRuleConfig {
			method: "any".into(),
			headers: vec![HeaderEntryConfig {
				name: "x-custom".into(),
				value: "[[nonsense]]".into(),
			}],
		});
		let mut headers = HeaderMap::new();
		apply_custom_headers(&[rule], &Method::GET, &ctx(), &mut headers);
		assert_eq!(headers.get("x-custom").unwrap(), "[[nonsense]]");
	}

	#[test]
	fn method_scoped_rule_only_applies_to_matching_method() {
		let rule = HeaderRule::from_config(HeaderRuleConfig {
			method: "POST".into(),
			headers: vec![HeaderEntryConfig {
				name: "x-only-post".into(),
				value: "yes".into(),
			}],
		});
		let mut headers = HeaderMap::new();
		apply_custom_headers(&[rule.clone()], &Method::GET, &ctx(), &mut headers);
		assert!(headers.get("x-only-post").is_none());
		apply_custom_headers(&[rule], &Method::POST, &ctx(), &mut headers);
		assert_eq!(headers.get("x-only-post").unwrap(), "yes");
	}

	#[test]
	fn later_rule_overwrites_earlier_for_same_header() {
		let first = HeaderRule::from_config(HeaderRuleConfig {
			method: "any".into(),
			headers: vec![HeaderEntryConfig {
				name: "x-balancer".into(),
				value: "first".into(),
			}],
		});
		let second = HeaderRule::from_config(HeaderRuleConfig {
			method: "any".into(),
			headers: vec![HeaderEntryConfig {
				name: "x-balancer".into(),
				value: "second".into(),
			}],
		});
		let mut headers = HeaderMap::new();
		apply_custom_headers(&[first, second], &Method::GET, &ctx(), &mut headers);
		assert_eq!(headers.get("x-balancer").unwrap(), "second");
	}
}
