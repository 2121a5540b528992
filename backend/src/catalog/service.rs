//! Read-only catalogue queries

use chrono::NaiveDate;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use super::model::*;
use crate::error::{ApiError, ApiResult};
use crate::models::AvailabilitySlot;

const LISTING_SELECT: &str = r#"
    SELECT d.id, d.slug, d.name_key, d.description_key, d.short_description_key,
           d.address, d.latitude, d.longitude, d.rating, d.starting_price, d.rules_key,
           c.id AS city_id, c.slug AS city_slug, c.name_key AS city_name_key,
           s.code AS state_code, co.code AS country_code, d.created_at
    FROM developments d
    JOIN cities c ON c.id = d.city_id
    JOIN states s ON s.id = c.state_id
    JOIN countries co ON co.id = s.country_id
"#;

#[derive(Clone)]
pub struct CatalogService {
    db_pool: PgPool,
}

impl CatalogService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Key → value map for one language, optionally limited to `keys`
    pub async fn translations(
        &self,
        language: Language,
        keys: Option<Vec<String>>,
    ) -> ApiResult<HashMap<String, String>> {
        let rows: Vec<(String, String)> = match keys {
            Some(keys) if !keys.is_empty() => {
                sqlx::query_as(
                    "SELECT key, value FROM translations WHERE language = $1 AND key = ANY($2)",
                )
                .bind(language)
                .bind(keys)
                .fetch_all(&self.db_pool)
                .await?
            }
            _ => {
                sqlx::query_as("SELECT key, value FROM translations WHERE language = $1")
                    .bind(language)
                    .fetch_all(&self.db_pool)
                    .await?
            }
        };
        Ok(rows.into_iter().collect())
    }

    pub async fn translations_by_category(
        &self,
        language: Language,
        category: &str,
    ) -> ApiResult<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT key, value FROM translations WHERE language = $1 AND category = $2",
        )
        .bind(language)
        .bind(category)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    pub async fn countries(&self) -> ApiResult<Vec<Country>> {
        Ok(
            sqlx::query_as::<_, Country>("SELECT id, code, name_key FROM countries ORDER BY code")
                .fetch_all(&self.db_pool)
                .await?,
        )
    }

    pub async fn states(&self, country_id: Uuid) -> ApiResult<Vec<State>> {
        Ok(sqlx::query_as::<_, State>(
            "SELECT id, country_id, code, name_key FROM states WHERE country_id = $1 ORDER BY code",
        )
        .bind(country_id)
        .fetch_all(&self.db_pool)
        .await?)
    }

    pub async fn cities(&self, state_id: Uuid) -> ApiResult<Vec<City>> {
        Ok(sqlx::query_as::<_, City>(
            "SELECT id, state_id, name_key, slug, latitude, longitude FROM cities \
             WHERE state_id = $1 ORDER BY slug",
        )
        .bind(state_id)
        .fetch_all(&self.db_pool)
        .await?)
    }

    pub async fn city_by_slug(&self, slug: &str) -> ApiResult<City> {
        sqlx::query_as::<_, City>(
            "SELECT id, state_id, name_key, slug, latitude, longitude FROM cities WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("City {}", slug)))
    }

    /// Active developments with their location
    pub async fn developments(&self) -> ApiResult<Vec<DevelopmentListing>> {
        let sql = format!("{} WHERE d.is_active = TRUE ORDER BY d.rating DESC NULLS LAST, d.slug", LISTING_SELECT);
        Ok(sqlx::query_as::<_, DevelopmentListing>(&sql)
            .fetch_all(&self.db_pool)
            .await?)
    }

    pub async fn developments_by_city(&self, city_id: Uuid) -> ApiResult<Vec<DevelopmentListing>> {
        let sql = format!(
            "{} WHERE d.is_active = TRUE AND d.city_id = $1 ORDER BY d.slug",
            LISTING_SELECT
        );
        Ok(sqlx::query_as::<_, DevelopmentListing>(&sql)
            .bind(city_id)
            .fetch_all(&self.db_pool)
            .await?)
    }

    pub async fn development_by_id(&self, id: Uuid) -> ApiResult<DevelopmentDetail> {
        let sql = format!("{} WHERE d.id = $1 AND d.is_active = TRUE", LISTING_SELECT);
        let listing = sqlx::query_as::<_, DevelopmentListing>(&sql)
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Development {}", id)))?;
        self.with_details(listing).await
    }

    pub async fn development_by_slug(&self, slug: &str) -> ApiResult<DevelopmentDetail> {
        let sql = format!("{} WHERE d.slug = $1 AND d.is_active = TRUE", LISTING_SELECT);
        let listing = sqlx::query_as::<_, DevelopmentListing>(&sql)
            .bind(slug)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Development {}", slug)))?;
        self.with_details(listing).await
    }

    async fn with_details(&self, development: DevelopmentListing) -> ApiResult<DevelopmentDetail> {
        let photos = sqlx::query_as::<_, DevelopmentPhoto>(
            "SELECT id, url, sort_order FROM development_photos \
             WHERE development_id = $1 ORDER BY sort_order, created_at",
        )
        .bind(development.id)
        .fetch_all(&self.db_pool)
        .await?;

        let amenities = sqlx::query_as::<_, Amenity>(
            "SELECT a.id, a.name_key, a.icon FROM amenities a \
             JOIN development_amenities da ON da.amenity_id = a.id \
             WHERE da.development_id = $1 ORDER BY a.name_key",
        )
        .bind(development.id)
        .fetch_all(&self.db_pool)
        .await?;

        let businesses = sqlx::query_as::<_, SponsoredBusiness>(
            "SELECT b.id, b.name, b.description_key, b.category, b.logo_url, b.website_url, \
                    b.phone, b.address \
             FROM sponsored_businesses b \
             JOIN business_developments bd ON bd.business_id = b.id \
             WHERE bd.development_id = $1 AND b.is_active = TRUE \
             ORDER BY bd.sort_order, b.name",
        )
        .bind(development.id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(DevelopmentDetail {
            development,
            photos,
            amenities,
            businesses,
        })
    }

    /// Published, unbooked slots of approved cotistas. With a window, only
    /// slots that fully contain it.
    pub async fn availability(
        &self,
        development_id: Uuid,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> ApiResult<Vec<AvailabilitySlot>> {
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if end <= start {
                return Err(ApiError::BadRequest(
                    "End date must be after start date".to_string(),
                ));
            }
        }

        Ok(sqlx::query_as::<_, AvailabilitySlot>(
            r#"
            SELECT a.id, a.cotista_id, a.development_id, a.start_date, a.end_date,
                   a.price_per_night, a.is_published, a.is_booked, c.status AS cotista_status
            FROM cotista_availability a
            JOIN cotistas c ON c.id = a.cotista_id
            WHERE a.development_id = $1
              AND a.is_published = TRUE
              AND a.is_booked = FALSE
              AND c.status = 'approved'
              AND ($2::date IS NULL OR a.start_date <= $2)
              AND ($3::date IS NULL OR a.end_date >= $3)
            ORDER BY a.start_date
            "#,
        )
        .bind(development_id)
        .bind(start_date)
        .bind(end_date)
        .fetch_all(&self.db_pool)
        .await?)
    }
}
