//! Weather, location suggestions and GeoNames lookups.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{bad_request, ApiError};
use super::routes::AppState;
use crate::geo::{self, City, CitySearchHit, Country};
use crate::weather::{self, WeatherResponse};

/// GeoNames proxies used before sign-up.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/geo/countries", get(countries))
        .route("/geo/cities/:country_code", get(cities_in_country))
        .route("/geo/search-cities", get(search_cities))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/weather", get(get_weather))
        .route("/locations/cities", get(known_cities))
        .route("/locations/neighborhoods", get(known_neighborhoods))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WeatherQuery {
    pub city: String,
    pub date: String,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SuggestQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub city: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CitiesQuery {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub country_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CitiesResponse {
    pub cities: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct NeighborhoodsResponse {
    pub neighborhoods: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CountriesResponse {
    pub countries: Vec<Country>,
}

#[derive(Debug, Serialize)]
pub struct CountryCitiesResponse {
    pub cities: Vec<City>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchCitiesResponse {
    pub cities: Vec<CitySearchHit>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/weather?city&date&country - Daily forecast for a walk.
async fn get_weather(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WeatherQuery>,
) -> Result<Json<WeatherResponse>, ApiError> {
    let date = NaiveDate::parse_from_str(&query.date, "%Y-%m-%d")
        .map_err(|_| bad_request("Invalid date format. Use YYYY-MM-DD"))?;
    let forecast = weather::forecast(
        state.weather.as_ref(),
        &query.city,
        query.country.as_deref(),
        date,
        Utc::now().date_naive(),
    )
    .await;
    Ok(Json(forecast))
}

/// GET /api/locations/cities?q - Cities already used in the app.
async fn known_cities(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SuggestQuery>,
) -> Json<CitiesResponse> {
    Json(CitiesResponse {
        cities: geo::known_cities(&state.db, &query.q).await,
    })
}

/// GET /api/locations/neighborhoods?city&q - Neighborhoods already used.
async fn known_neighborhoods(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SuggestQuery>,
) -> Json<NeighborhoodsResponse> {
    Json(NeighborhoodsResponse {
        neighborhoods: geo::known_neighborhoods(&state.db, &query.city, &query.q).await,
    })
}

/// GET /api/geo/countries
async fn countries(State(state): State<Arc<AppState>>) -> Json<CountriesResponse> {
    Json(CountriesResponse {
        countries: state.geonames.countries().await,
    })
}

/// GET /api/geo/cities/:country_code?query
async fn cities_in_country(
    State(state): State<Arc<AppState>>,
    Path(country_code): Path<String>,
    Query(query): Query<CitiesQuery>,
) -> Json<CountryCitiesResponse> {
    match state.geonames.cities(&country_code, &query.query).await {
        Ok(cities) => Json(CountryCitiesResponse {
            total: Some(cities.len()),
            cities,
            error: None,
        }),
        Err(error) => Json(CountryCitiesResponse {
            cities: Vec::new(),
            total: None,
            error: Some(error),
        }),
    }
}

/// GET /api/geo/search-cities?query&country_code
async fn search_cities(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CitiesQuery>,
) -> Json<SearchCitiesResponse> {
    Json(SearchCitiesResponse {
        cities: state
            .geonames
            .search_cities(&query.query, query.country_code.as_deref())
            .await,
    })
}
