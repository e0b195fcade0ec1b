//! Result collections accumulated while a run is in progress.

use serde::{Deserialize, Deserializer, Serialize};

use crate::types::Timestamp;

/// An entity reported by the runner on the `entities` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub category_id: Option<String>,
    #[serde(default)]
    pub is_verified: Option<bool>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub aliases: Option<serde_json::Value>,
    #[serde(default)]
    pub processed: Option<bool>,
    /// Server creation time, or the local receive time when absent.
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    /// Whether the entity arrived in a new extraction round.
    #[serde(default)]
    pub new_round: bool,
}

/// Entity object exactly as the runner sends it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityPayload {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub category_id: Option<String>,
    #[serde(default, deserialize_with = "opt_flag")]
    pub is_verified: Option<bool>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub aliases: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "opt_flag")]
    pub processed: Option<bool>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl ExtractedEntity {
    /// Normalize a runner payload into a stored entity.
    pub fn from_payload(payload: EntityPayload, new_round: bool, received_at: Timestamp) -> Self {
        Self {
            id: payload.id,
            name: payload.name,
            kind: payload.kind,
            description: payload.description,
            short_description: payload.short_description,
            category_name: payload.category_name,
            category_id: payload.category_id,
            is_verified: payload.is_verified,
            confidence: payload.confidence.or(payload.confidence_score),
            slug: payload.slug,
            lang: payload.lang,
            country_code: payload.country_code,
            aliases: payload.aliases,
            processed: payload.processed,
            created_at: payload
                .created_at
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| received_at.to_rfc3339()),
            updated_at: payload.updated_at,
            new_round,
        }
    }
}

/// An article produced by the runner on the `articles` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedArticle {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub entity_name: Option<String>,
    #[serde(default = "chrono::Utc::now")]
    pub received_at: Timestamp,
    /// Server fields this client does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GeneratedArticle {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("untitled article")
    }
}

/// JavaScript-style truthiness of a loosely typed runner field.
pub fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Null => false,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Deserialize any JSON value as a truthy/falsy flag.
pub fn truthy_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(is_truthy(&value))
}

/// Optional flag; `null` stays absent, anything else is coerced.
fn opt_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(is_truthy))
}

/// Strings pass through, numbers are stringified, anything else is empty.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(opt_string_or_number(deserializer)?.unwrap_or_default())
}

/// Accept identifiers sent as either JSON strings or numbers.
fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> Timestamp {
        chrono::Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn numeric_ids_become_strings() {
        let payload: EntityPayload =
            serde_json::from_value(serde_json::json!({"id": 42, "name": "Foo", "category_id": 7}))
                .unwrap();
        let entity = ExtractedEntity::from_payload(payload, false, fixed_now());
        assert_eq!(entity.id.as_deref(), Some("42"));
        assert_eq!(entity.category_id.as_deref(), Some("7"));
    }

    #[test]
    fn confidence_falls_back_to_score() {
        let payload: EntityPayload = serde_json::from_value(
            serde_json::json!({"id": "1", "name": "Foo", "confidence_score": 0.8}),
        )
        .unwrap();
        let entity = ExtractedEntity::from_payload(payload, true, fixed_now());
        assert_eq!(entity.confidence, Some(0.8));
        assert!(entity.new_round);
    }

    #[test]
    fn created_at_defaults_to_receive_time() {
        let payload: EntityPayload =
            serde_json::from_value(serde_json::json!({"name": "Foo"})).unwrap();
        let entity = ExtractedEntity::from_payload(payload, false, fixed_now());
        assert_eq!(entity.created_at, fixed_now().to_rfc3339());
    }

    #[test]
    fn loose_flags_and_null_name_decode() {
        let payload: EntityPayload = serde_json::from_value(serde_json::json!({
            "id": "1",
            "name": null,
            "is_verified": 1,
            "processed": 0
        }))
        .unwrap();
        assert_eq!(payload.name, "");
        assert_eq!(payload.is_verified, Some(true));
        assert_eq!(payload.processed, Some(false));

        let payload: EntityPayload =
            serde_json::from_value(serde_json::json!({"name": 12, "is_verified": null})).unwrap();
        assert_eq!(payload.name, "12");
        assert_eq!(payload.is_verified, None);
    }

    #[test]
    fn article_keeps_unknown_fields() {
        let article: GeneratedArticle = serde_json::from_value(serde_json::json!({
            "id": 5,
            "title": "Hello",
            "content": "<p>hi</p>",
            "slug": "hello"
        }))
        .unwrap();
        assert_eq!(article.id.as_deref(), Some("5"));
        assert_eq!(article.extra["slug"], "hello");
        assert_eq!(article.display_title(), "Hello");
    }
}
