//! Public catalogue endpoints

use axum::extract::{Path, Query, State};
use std::collections::HashMap;
use uuid::Uuid;

use super::{ok, JsonResult};
use crate::catalog::{
    AvailabilityQuery, City, Country, DevelopmentDetail, DevelopmentListing, Language, State as Region,
    TranslationsQuery,
};
use crate::models::AvailabilitySlot;
use crate::state::AppState;

#[derive(Debug, serde::Deserialize, Default)]
pub struct LanguageQuery {
    #[serde(default)]
    pub lang: Language,
}

pub async fn translations(
    State(state): State<AppState>,
    Query(query): Query<TranslationsQuery>,
) -> JsonResult<HashMap<String, String>> {
    ok(state.catalog.translations(query.lang, query.key_list()).await?)
}

pub async fn translations_by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(query): Query<LanguageQuery>,
) -> JsonResult<HashMap<String, String>> {
    ok(state
        .catalog
        .translations_by_category(query.lang, &category)
        .await?)
}

pub async fn countries(State(state): State<AppState>) -> JsonResult<Vec<Country>> {
    ok(state.catalog.countries().await?)
}

pub async fn states(
    State(state): State<AppState>,
    Path(country_id): Path<Uuid>,
) -> JsonResult<Vec<Region>> {
    ok(state.catalog.states(country_id).await?)
}

pub async fn cities(
    State(state): State<AppState>,
    Path(state_id): Path<Uuid>,
) -> JsonResult<Vec<City>> {
    ok(state.catalog.cities(state_id).await?)
}

pub async fn city_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> JsonResult<City> {
    ok(state.catalog.city_by_slug(&slug).await?)
}

pub async fn developments(State(state): State<AppState>) -> JsonResult<Vec<DevelopmentListing>> {
    ok(state.catalog.developments().await?)
}

pub async fn developments_by_city(
    State(state): State<AppState>,
    Path(city_id): Path<Uuid>,
) -> JsonResult<Vec<DevelopmentListing>> {
    ok(state.catalog.developments_by_city(city_id).await?)
}

pub async fn development_by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> JsonResult<DevelopmentDetail> {
    ok(state.catalog.development_by_id(id).await?)
}

pub async fn development_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> JsonResult<DevelopmentDetail> {
    ok(state.catalog.development_by_slug(&slug).await?)
}

pub async fn availability(
    State(state): State<AppState>,
    Path(development_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> JsonResult<Vec<AvailabilitySlot>> {
    ok(state
        .catalog
        .availability(development_id, query.start_date, query.end_date)
        .await?)
}
