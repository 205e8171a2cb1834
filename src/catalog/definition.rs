//! Integration descriptor types
//!
//! These types map directly to the YAML catalog format. Descriptors are
//! immutable once loaded; every provider-specific behaviour (sticky fields,
//! injected headers/query values, token placement, base URL overrides) is a
//! declared field here rather than a branch in the resolver.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

/// Value names an OAuth token delivery may carry besides the access token
pub const OAUTH_TOKEN_VALUES: [&str; 2] = ["instance_url", "subdomain"];

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("placeholder pattern is valid"));

/// Iterate over the `{name}` placeholders of a template, in order of appearance
pub fn placeholders(template: &str) -> impl Iterator<Item = &str> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
}

/// Replace every `{name}` placeholder using `lookup`
///
/// Fails on the first placeholder that `lookup` cannot resolve.
pub fn substitute<F>(template: &str, mut lookup: F) -> Result<String, String>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = lookup(name.as_str()).ok_or_else(|| name.as_str().to_string())?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}

/// One third-party provider and its API surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationDescriptor {
    /// Unique catalog key
    pub key: String,

    /// Human-readable label
    #[serde(default)]
    pub name: String,

    /// Optional longer description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Prefix for every endpoint path (may contain placeholders)
    pub base_url: String,

    /// Authentication scheme
    #[serde(default)]
    pub auth: AuthScheme,

    /// Headers merged into every request
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,

    /// Integration-wide inputs not tied to any endpoint
    #[serde(default)]
    pub additional_config: BTreeMap<String, ConfigField>,

    /// Values echoed into query parameters and/or headers
    #[serde(default)]
    pub injections: Vec<InjectionRule>,

    /// Fields whose values survive endpoint switches
    #[serde(default)]
    pub sticky_fields: BTreeSet<String>,

    /// Name of a value that, when present, replaces `base_url`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url_override: Option<String>,

    /// Declared endpoints, in display order
    #[serde(default)]
    pub endpoints: Vec<EndpointDescriptor>,
}

impl IntegrationDescriptor {
    /// Display name, falling back to the key
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.key
        } else {
            &self.name
        }
    }

    /// Look up an endpoint by id
    #[must_use]
    pub fn endpoint(&self, id: &str) -> Option<&EndpointDescriptor> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    /// Whether a field keeps its value across endpoint switches
    #[must_use]
    pub fn is_sticky(&self, name: &str) -> bool {
        self.sticky_fields.contains(name)
    }

    /// Whether `name` is an additional-config field
    #[must_use]
    pub fn is_config_field(&self, name: &str) -> bool {
        self.additional_config.contains_key(name)
    }
}

/// Authentication scheme of an integration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthScheme {
    /// No authentication
    #[default]
    None,

    /// Static key written to a custom header
    ApiKey {
        /// Header carrying the key
        #[serde(default = "default_auth_header")]
        header: String,
        /// Optional prefix concatenated before the key (e.g. `"Bearer "`)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },

    /// HTTP basic auth from `username`/`password`
    Basic,

    /// Token delivered by an external OAuth flow
    #[serde(rename = "oauth")]
    OAuth {
        /// Additional token-response values retained for injection
        #[serde(default)]
        extra_params: BTreeSet<String>,
        /// Where the access token goes on outbound requests
        #[serde(default)]
        token_placement: TokenPlacement,
    },
}

fn default_auth_header() -> String {
    "Authorization".to_string()
}

impl AuthScheme {
    /// Whether requests cannot be built without credential material
    #[must_use]
    pub fn requires_credentials(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether credentials persist across integration switches
    #[must_use]
    pub fn is_oauth(&self) -> bool {
        matches!(self, Self::OAuth { .. })
    }

    /// Credential fields a user must fill in directly
    #[must_use]
    pub fn credential_fields(&self) -> &'static [&'static str] {
        match self {
            Self::ApiKey { .. } => &["api_key"],
            Self::Basic => &["username", "password"],
            Self::None | Self::OAuth { .. } => &[],
        }
    }

    /// Names of values an OAuth token delivery can supply for substitution
    #[must_use]
    pub fn auth_value_names(&self) -> BTreeSet<&str> {
        match self {
            Self::OAuth { extra_params, .. } => OAUTH_TOKEN_VALUES
                .iter()
                .copied()
                .chain(extra_params.iter().map(String::as_str))
                .collect(),
            _ => BTreeSet::new(),
        }
    }

    /// Short label for listings
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ApiKey { .. } => "api_key",
            Self::Basic => "basic",
            Self::OAuth { .. } => "oauth",
        }
    }
}

/// Where an OAuth access token is placed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "in", rename_all = "snake_case")]
pub enum TokenPlacement {
    /// `Authorization: Bearer <token>`
    #[default]
    Header,
    /// Appended to the query string as `param=<token>`
    Query {
        /// Query parameter name
        param: String,
    },
}

/// Extra integration-wide input field
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigField {
    /// Form label
    #[serde(default)]
    pub label: String,
    /// Help text
    #[serde(default)]
    pub description: String,
    /// Whether a value must be supplied before resolving
    #[serde(default)]
    pub required: bool,
}

/// Declared injection of a value into the query string and/or a header
///
/// e.g. a base URI echoed into `X-DocuSign-Base-URI` and appended as
/// `base_uri=...`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionRule {
    /// Parameter, config field or auth value providing the value
    pub source: String,
    /// Target query parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_param: Option<String>,
    /// Target header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

/// HTTP method of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    #[serde(alias = "get")]
    Get,
    /// POST
    #[serde(alias = "post")]
    Post,
    /// PUT
    #[serde(alias = "put")]
    Put,
    /// PATCH
    #[serde(alias = "patch")]
    Patch,
    /// DELETE
    #[serde(alias = "delete")]
    Delete,
}

impl HttpMethod {
    /// Whether leftover parameters travel in a JSON body
    #[must_use]
    pub fn has_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }

    /// Upper-case method name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared operation of an integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Unique id within the integration
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Display description
    #[serde(default)]
    pub description: String,
    /// HTTP method
    pub method: HttpMethod,
    /// Path template with `{param}` placeholders
    #[serde(default)]
    pub path: String,
    /// Declared parameters, in form order
    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,
}

impl EndpointDescriptor {
    /// Look up a parameter by name
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Input type of a parameter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ParamType {
    /// Single-line text
    #[default]
    Text,
    /// Numeric text
    Number,
    /// One of a fixed list of options
    Select {
        /// Allowed values, in display order
        options: Vec<String>,
    },
    /// Multi-line text
    Textarea,
}

impl ParamType {
    /// Check a submitted value against the type
    ///
    /// Values are never coerced; this only decides whether they are acceptable.
    pub fn check(&self, value: &str) -> Result<(), String> {
        match self {
            Self::Number => match value.trim().parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(()),
                _ => Err(format!("'{value}' is not a number")),
            },
            Self::Select { options } => {
                if options.iter().any(|o| o == value) {
                    Ok(())
                } else {
                    Err(format!("'{value}' is not one of [{}]", options.join(", ")))
                }
            }
            Self::Text | Self::Textarea => Ok(()),
        }
    }
}

/// One declared endpoint parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawParameter", into = "RawParameter")]
pub struct ParameterDescriptor {
    /// Name, unique within the endpoint
    pub name: String,
    /// Input type
    pub param_type: ParamType,
    /// Whether a non-empty value is mandatory
    pub required: bool,
    /// Form pre-fill value
    pub default: Option<String>,
    /// Help text
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ParamKind {
    #[default]
    Text,
    Number,
    Select,
    Textarea,
}

/// Wire shape of a parameter: the `select` options sit beside `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawParameter {
    name: String,
    #[serde(rename = "type", default)]
    kind: ParamKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    options: Vec<String>,
    #[serde(default)]
    required: bool,
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

/// Accept `default: 25` and `default: true` as well as quoted strings
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|s| match s {
        Scalar::Text(s) => s,
        Scalar::Int(n) => n.to_string(),
        Scalar::Float(n) => n.to_string(),
        Scalar::Bool(b) => b.to_string(),
    }))
}

impl TryFrom<RawParameter> for ParameterDescriptor {
    type Error = String;

    fn try_from(raw: RawParameter) -> Result<Self, Self::Error> {
        let param_type = match raw.kind {
            ParamKind::Select if raw.options.is_empty() => {
                return Err(format!("select parameter '{}' declares no options", raw.name));
            }
            ParamKind::Select => ParamType::Select {
                options: raw.options,
            },
            _ if !raw.options.is_empty() => {
                return Err(format!(
                    "parameter '{}' declares options but is not a select",
                    raw.name
                ));
            }
            ParamKind::Text => ParamType::Text,
            ParamKind::Number => ParamType::Number,
            ParamKind::Textarea => ParamType::Textarea,
        };

        Ok(Self {
            name: raw.name,
            param_type,
            required: raw.required,
            default: raw.default,
            description: raw.description,
        })
    }
}

impl From<ParameterDescriptor> for RawParameter {
    fn from(param: ParameterDescriptor) -> Self {
        let (kind, options) = match param.param_type {
            ParamType::Text => (ParamKind::Text, Vec::new()),
            ParamType::Number => (ParamKind::Number, Vec::new()),
            ParamType::Select { options } => (ParamKind::Select, options),
            ParamType::Textarea => (ParamKind::Textarea, Vec::new()),
        };
        Self {
            name: param.name,
            kind,
            options,
            required: param.required,
            default: param.default,
            description: param.description,
        }
    }
}
