//! Catalogue data models

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// Supported interface languages
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Default)]
#[sqlx(type_name = "translation_language", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Pt,
    En,
    Es,
    Fr,
    It,
    Ja,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Country {
    pub id: Uuid,
    pub code: String,
    pub name_key: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct State {
    pub id: Uuid,
    pub country_id: Uuid,
    pub code: String,
    pub name_key: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct City {
    pub id: Uuid,
    pub state_id: Uuid,
    pub name_key: String,
    pub slug: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Development row joined with its city, state and country
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DevelopmentListing {
    pub id: Uuid,
    pub slug: String,
    pub name_key: String,
    pub description_key: String,
    pub short_description_key: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub rating: Option<f64>,
    pub starting_price: Option<i64>,
    pub rules_key: Option<String>,
    pub city_id: Uuid,
    pub city_slug: String,
    pub city_name_key: String,
    pub state_code: String,
    pub country_code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DevelopmentPhoto {
    pub id: Uuid,
    pub url: String,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Amenity {
    pub id: Uuid,
    pub name_key: String,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SponsoredBusiness {
    pub id: Uuid,
    pub name: String,
    pub description_key: Option<String>,
    pub category: Option<String>,
    pub logo_url: Option<String>,
    pub website_url: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DevelopmentDetail {
    #[serde(flatten)]
    pub development: DevelopmentListing,
    pub photos: Vec<DevelopmentPhoto>,
    pub amenities: Vec<Amenity>,
    pub businesses: Vec<SponsoredBusiness>,
}

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct TranslationsQuery {
    #[serde(default)]
    pub lang: Language,
    /// Comma-separated key list
    pub keys: Option<String>,
}

impl TranslationsQuery {
    pub fn key_list(&self) -> Option<Vec<String>> {
        self.keys.as_ref().map(|keys| {
            keys.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct AvailabilityQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_list_parsing() {
        let q = TranslationsQuery {
            lang: Language::En,
            keys: Some("home.title, home.subtitle,,".to_string()),
        };
        assert_eq!(
            q.key_list(),
            Some(vec!["home.title".to_string(), "home.subtitle".to_string()])
        );
        assert_eq!(TranslationsQuery::default().key_list(), None);
    }

    #[test]
    fn test_language_names() {
        let lang: Language = serde_json::from_str("\"ja\"").unwrap();
        assert_eq!(lang, Language::Ja);
        assert_eq!(Language::default(), Language::Pt);
    }
}
