//! Launch request for a batch generation run.
//!
//! A [`LaunchRequest`] is what the caller fills in; [`BatchCopyParams`]
//! is the validated `data` object of the `start_batch_copy` command and
//! also the task configuration persisted with the snapshot.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default upper bound on entities extracted per run.
pub const DEFAULT_MAX_ENTITIES: u32 = 20;

/// Locale applied when an entity name drives the run.
pub const DEFAULT_LANG: &str = "zh";

/// Country code applied when an entity name drives the run.
pub const DEFAULT_COUNTRY_CODE: &str = "CN";

/// Entity types kept by the default relevance filter.
pub const DEFAULT_FILTER_TYPES: [&str; 2] = ["person", "concept"];

/// Minimum relevance score of the default filter.
pub const DEFAULT_MIN_SCORE: f64 = 0.2;

/// Caller-supplied launch input.
///
/// At least one of `url` or `entity_name` must be non-blank.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub url: String,
    pub entity_name: String,
    pub max_entities: u32,
    pub preset_codes: Vec<String>,
    pub template_id: Option<String>,
    pub lang: Option<String>,
    pub country_code: Option<String>,
    pub filters: Option<EntityFilters>,
    pub return_related: Option<bool>,
}

impl Default for LaunchRequest {
    fn default() -> Self {
        Self {
            url: String::new(),
            entity_name: String::new(),
            max_entities: DEFAULT_MAX_ENTITIES,
            preset_codes: Vec::new(),
            template_id: None,
            lang: None,
            country_code: None,
            filters: None,
            return_related: None,
        }
    }
}

impl LaunchRequest {
    /// A run seeded from a source page.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// A run seeded from an entity name.
    pub fn for_entity(name: impl Into<String>) -> Self {
        Self {
            entity_name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_entities(mut self, max_entities: u32) -> Self {
        self.max_entities = max_entities;
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn with_preset_codes(mut self, codes: Vec<String>) -> Self {
        self.preset_codes = codes;
        self
    }

    pub fn with_filters(mut self, filters: EntityFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Validate the request and build the wire parameters.
    ///
    /// Entity-mode options (`lang`, `country_code`, `filters`,
    /// `return_related`) are only sent when an entity name is present,
    /// and fall back to the defaults above.
    pub fn to_params(&self) -> Result<BatchCopyParams, CoreError> {
        let url = non_blank(&self.url);
        let entity_name = non_blank(&self.entity_name);

        if url.is_none() && entity_name.is_none() {
            return Err(CoreError::Validation(
                "a source URL or an entity name is required".into(),
            ));
        }

        let entity_mode = entity_name.is_some();

        Ok(BatchCopyParams {
            url,
            max_entities: self.max_entities,
            preset_codes: self.preset_codes.clone(),
            template_id: self.template_id.clone().filter(|id| !id.is_empty()),
            lang: entity_mode.then(|| {
                self.lang
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LANG.to_string())
            }),
            country_code: entity_mode.then(|| {
                self.country_code
                    .clone()
                    .unwrap_or_else(|| DEFAULT_COUNTRY_CODE.to_string())
            }),
            filters: entity_mode.then(|| self.filters.clone().unwrap_or_default()),
            return_related: entity_mode.then(|| self.return_related.unwrap_or(true)),
            entity_name,
        })
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// `data` object of the `start_batch_copy` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchCopyParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    #[serde(default = "default_max_entities")]
    pub max_entities: u32,
    #[serde(default)]
    pub preset_codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<EntityFilters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_related: Option<bool>,
}

fn default_max_entities() -> u32 {
    DEFAULT_MAX_ENTITIES
}

/// Relevance filter applied to extracted entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only: Option<TypeFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
}

impl Default for EntityFilters {
    fn default() -> Self {
        Self {
            only: Some(TypeFilter {
                types: DEFAULT_FILTER_TYPES.iter().map(|t| t.to_string()).collect(),
            }),
            min_score: Some(DEFAULT_MIN_SCORE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeFilter {
    #[serde(default)]
    pub types: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn blank_request_is_rejected() {
        let request = LaunchRequest {
            url: "   ".into(),
            entity_name: "".into(),
            ..Default::default()
        };
        assert_matches!(request.to_params(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn url_mode_omits_entity_options() {
        let params = LaunchRequest::from_url("https://example.com")
            .with_max_entities(20)
            .to_params()
            .unwrap();

        assert_eq!(params.url.as_deref(), Some("https://example.com"));
        assert_eq!(params.max_entities, 20);
        assert!(params.entity_name.is_none());
        assert!(params.lang.is_none());
        assert!(params.country_code.is_none());
        assert!(params.filters.is_none());
        assert!(params.return_related.is_none());

        let json = serde_json::to_value(&params).unwrap();
        assert!(json.get("lang").is_none());
        assert_eq!(json["preset_codes"], serde_json::json!([]));
    }

    #[test]
    fn entity_mode_applies_defaults() {
        let params = LaunchRequest::for_entity("  Ada Lovelace ").to_params().unwrap();

        assert_eq!(params.entity_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(params.lang.as_deref(), Some("zh"));
        assert_eq!(params.country_code.as_deref(), Some("CN"));
        assert_eq!(params.return_related, Some(true));

        let filters = params.filters.unwrap();
        assert_eq!(filters.min_score, Some(0.2));
        assert_eq!(filters.only.unwrap().types, vec!["person", "concept"]);
    }

    #[test]
    fn entity_mode_keeps_caller_overrides() {
        let request = LaunchRequest {
            entity_name: "Rust".into(),
            lang: Some("en".into()),
            country_code: Some("US".into()),
            return_related: Some(false),
            filters: Some(EntityFilters {
                only: None,
                min_score: Some(0.5),
            }),
            ..Default::default()
        };
        let params = request.to_params().unwrap();

        assert_eq!(params.lang.as_deref(), Some("en"));
        assert_eq!(params.country_code.as_deref(), Some("US"));
        assert_eq!(params.return_related, Some(false));
        assert_eq!(params.filters.unwrap().min_score, Some(0.5));
    }

    #[test]
    fn url_and_entity_together() {
        let request = LaunchRequest {
            url: "https://example.com/a".into(),
            entity_name: "Foo".into(),
            ..Default::default()
        }
        .with_template("tpl-3");
        let params = request.to_params().unwrap();

        assert!(params.url.is_some());
        assert!(params.entity_name.is_some());
        assert_eq!(params.template_id.as_deref(), Some("tpl-3"));
        assert_eq!(params.lang.as_deref(), Some("zh"));
    }
}
