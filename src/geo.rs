//! Place lookups: GeoNames country/city search and location suggestions
//! drawn from existing users and walks.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::store::Database;

const GEONAMES_BASE: &str = "http://api.geonames.org";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Country {
    pub name: String,
    pub code: String,
    #[serde(rename = "geonameId", skip_serializing_if = "Option::is_none")]
    pub geoname_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct City {
    pub name: String,
    #[serde(rename = "adminName1")]
    pub admin_name1: String,
    pub population: u64,
    #[serde(rename = "geonameId")]
    pub geoname_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitySearchHit {
    pub name: Option<String>,
    pub country: Option<String>,
    #[serde(rename = "countryCode")]
    pub country_code: Option<String>,
    #[serde(rename = "adminName1")]
    pub admin_name1: String,
    pub population: u64,
}

#[derive(Debug, Deserialize)]
struct GeoNamesResponse {
    geonames: Option<Vec<Place>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Place {
    name: Option<String>,
    toponym_name: Option<String>,
    country_name: Option<String>,
    country_code: Option<String>,
    #[serde(rename = "adminName1")]
    admin_name1: Option<String>,
    population: Option<u64>,
    geoname_id: Option<u64>,
}

impl Place {
    fn display_name(&self) -> Option<String> {
        self.name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| self.toponym_name.clone())
    }
}

const STATIC_COUNTRIES: &[(&str, &str)] = &[
    ("Algeria", "DZ"),
    ("Argentina", "AR"),
    ("Australia", "AU"),
    ("Austria", "AT"),
    ("Belgium", "BE"),
    ("Brazil", "BR"),
    ("Canada", "CA"),
    ("Chile", "CL"),
    ("China", "CN"),
    ("Colombia", "CO"),
    ("Czech Republic", "CZ"),
    ("Denmark", "DK"),
    ("Egypt", "EG"),
    ("Finland", "FI"),
    ("France", "FR"),
    ("Germany", "DE"),
    ("Greece", "GR"),
    ("Hungary", "HU"),
    ("India", "IN"),
    ("Indonesia", "ID"),
    ("Ireland", "IE"),
    ("Israel", "IL"),
    ("Italy", "IT"),
    ("Japan", "JP"),
    ("Malaysia", "MY"),
    ("Mexico", "MX"),
    ("Morocco", "MA"),
    ("Netherlands", "NL"),
    ("New Zealand", "NZ"),
    ("Norway", "NO"),
    ("Philippines", "PH"),
    ("Poland", "PL"),
    ("Portugal", "PT"),
    ("Romania", "RO"),
    ("Russia", "RU"),
    ("Saudi Arabia", "SA"),
    ("Singapore", "SG"),
    ("South Africa", "ZA"),
    ("South Korea", "KR"),
    ("Spain", "ES"),
    ("Sweden", "SE"),
    ("Switzerland", "CH"),
    ("Thailand", "TH"),
    ("Tunisia", "TN"),
    ("Turkey", "TR"),
    ("United Arab Emirates", "AE"),
    ("United Kingdom", "GB"),
    ("United States", "US"),
    ("Vietnam", "VN"),
];

/// Countries served when GeoNames is unreachable.
pub fn static_countries() -> Vec<Country> {
    STATIC_COUNTRIES
        .iter()
        .map(|(name, code)| Country {
            name: name.to_string(),
            code: code.to_string(),
            geoname_id: None,
        })
        .collect()
}

/// Unique city names, largest population first, then by name.
fn dedupe_cities(places: Vec<Place>) -> Vec<City> {
    let mut seen = HashSet::new();
    let mut cities: Vec<City> = places
        .into_iter()
        .filter_map(|p| {
            let name = p.display_name()?;
            if !seen.insert(name.clone()) {
                return None;
            }
            Some(City {
                name,
                admin_name1: p.admin_name1.unwrap_or_default(),
                population: p.population.unwrap_or(0),
                geoname_id: p.geoname_id,
            })
        })
        .collect();
    cities.sort_by(|a, b| {
        b.population
            .cmp(&a.population)
            .then_with(|| a.name.cmp(&b.name))
    });
    cities
}

pub struct GeoNamesClient {
    client: Client,
    username: String,
}

impl GeoNamesClient {
    pub fn new(client: Client, username: String) -> Self {
        Self { client, username }
    }

    async fn search_json(
        &self,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> Result<Option<Vec<Place>>, reqwest::Error> {
        let resp: GeoNamesResponse = self
            .client
            .get(format!("{}/searchJSON", GEONAMES_BASE))
            .query(params)
            .query(&[("username", self.username.as_str())])
            .timeout(timeout)
            .send()
            .await?
            .json()
            .await?;
        Ok(resp.geonames)
    }

    /// Every country GeoNames knows, sorted by name. Falls back to a static
    /// list on any failure.
    pub async fn countries(&self) -> Vec<Country> {
        let result: Result<GeoNamesResponse, reqwest::Error> = async {
            self.client
                .get(format!("{}/countryInfoJSON", GEONAMES_BASE))
                .query(&[("username", self.username.as_str())])
                .timeout(Duration::from_secs(10))
                .send()
                .await?
                .json()
                .await
        }
        .await;

        match result {
            Ok(GeoNamesResponse {
                geonames: Some(places),
            }) => {
                let mut countries: Vec<Country> = places
                    .into_iter()
                    .filter_map(|p| {
                        Some(Country {
                            name: p.country_name?,
                            code: p.country_code?,
                            geoname_id: p.geoname_id,
                        })
                    })
                    .collect();
                countries.sort_by(|a, b| a.name.cmp(&b.name));
                countries
            }
            Ok(_) => {
                tracing::warn!("GeoNames returned no countries, using static list");
                static_countries()
            }
            Err(e) => {
                tracing::error!("GeoNames countries request failed: {}", e);
                static_countries()
            }
        }
    }

    /// Populated places in a country, optionally by name prefix.
    pub async fn cities(&self, country_code: &str, query: &str) -> Result<Vec<City>, String> {
        let mut params = vec![
            ("country", country_code.to_uppercase()),
            ("featureClass", "P".to_string()),
            ("maxRows", "1000".to_string()),
            ("orderby", "population".to_string()),
            ("cities", "cities1000".to_string()),
        ];
        if !query.is_empty() {
            params.push(("name_startsWith", query.to_string()));
        }

        match self.search_json(&params, Duration::from_secs(15)).await {
            Ok(Some(places)) => Ok(dedupe_cities(places)),
            Ok(None) => Err("Failed to fetch cities".to_string()),
            Err(e) => {
                tracing::error!(country_code, "GeoNames cities request failed: {}", e);
                Err(e.to_string())
            }
        }
    }

    /// City name search. Queries shorter than two characters return nothing.
    pub async fn search_cities(&self, query: &str, country_code: Option<&str>) -> Vec<CitySearchHit> {
        if query.chars().count() < 2 {
            return Vec::new();
        }
        let mut params = vec![
            ("name_startsWith", query.to_string()),
            ("featureClass", "P".to_string()),
            ("maxRows", "50".to_string()),
            ("orderby", "relevance".to_string()),
        ];
        if let Some(code) = country_code.filter(|c| !c.is_empty()) {
            params.push(("country", code.to_uppercase()));
        }

        match self.search_json(&params, Duration::from_secs(10)).await {
            Ok(places) => places
                .unwrap_or_default()
                .into_iter()
                .map(|p| CitySearchHit {
                    name: p.display_name(),
                    country: p.country_name,
                    country_code: p.country_code,
                    admin_name1: p.admin_name1.unwrap_or_default(),
                    population: p.population.unwrap_or(0),
                })
                .collect(),
            Err(e) => {
                tracing::error!(query, "GeoNames search failed: {}", e);
                Vec::new()
            }
        }
    }
}

fn matches_query(value: &str, q: &str) -> bool {
    q.is_empty() || value.to_lowercase().contains(&q.to_lowercase())
}

/// Distinct non-empty cities of users and walks containing `q`, sorted.
pub async fn known_cities(db: &Database, q: &str) -> Vec<String> {
    let mut set = BTreeSet::new();
    for user in db.users.find(|u| u.city.is_some()).await {
        if let Some(city) = user.city.filter(|c| !c.is_empty()) {
            set.insert(city);
        }
    }
    for walk in db.walks.find(|w| !w.city.is_empty()).await {
        set.insert(walk.city);
    }
    set.into_iter().filter(|c| matches_query(c, q)).collect()
}

/// Distinct non-empty neighborhoods, optionally within `city`, containing
/// `q`, sorted.
pub async fn known_neighborhoods(db: &Database, city: &str, q: &str) -> Vec<String> {
    let in_city = |c: Option<&str>| city.is_empty() || c == Some(city);
    let mut set = BTreeSet::new();
    for user in db.users.find(|u| in_city(u.city.as_deref())).await {
        if let Some(n) = user.neighborhood.filter(|n| !n.is_empty()) {
            set.insert(n);
        }
    }
    for walk in db
        .walks
        .find(|w| in_city(Some(w.city.as_str())) && !w.neighborhood.is_empty())
        .await
    {
        set.insert(walk.neighborhood);
    }
    set.into_iter().filter(|n| matches_query(n, q)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walks::test_support::{user_in, walk_in};

    fn place(name: &str, population: u64) -> Place {
        Place {
            name: Some(name.to_string()),
            population: Some(population),
            ..Place::default()
        }
    }

    #[test]
    fn test_static_countries() {
        let countries = static_countries();
        assert_eq!(countries.len(), 49);
        assert!(countries.iter().any(|c| c.code == "DZ" && c.name == "Algeria"));
        let json = serde_json::to_value(&countries[0]).unwrap();
        assert!(json.get("geonameId").is_none());
    }

    #[test]
    fn test_dedupe_and_sort_cities() {
        let places = vec![
            place("Oran", 800_000),
            place("Algiers", 3_000_000),
            place("Oran", 5),
            place("Blida", 800_000),
            Place {
                toponym_name: Some("Tlemcen".to_string()),
                population: None,
                ..Place::default()
            },
        ];
        let names: Vec<String> = dedupe_cities(places).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Algiers", "Blida", "Oran", "Tlemcen"]);
    }

    #[test]
    fn test_parse_geonames_payload() {
        let body = r#"{"geonames":[{"name":"Lyon","countryName":"France","countryCode":"FR",
            "adminName1":"Auvergne-Rhône-Alpes","population":522250,"geonameId":2996944}]}"#;
        let parsed: GeoNamesResponse = serde_json::from_str(body).unwrap();
        let places = parsed.geonames.unwrap();
        assert_eq!(places[0].geoname_id, Some(2996944));
        assert_eq!(places[0].admin_name1.as_deref(), Some("Auvergne-Rhône-Alpes"));

        let error: GeoNamesResponse =
            serde_json::from_str(r#"{"status":{"message":"limit exceeded"}}"#).unwrap();
        assert!(error.geonames.is_none());
    }

    #[tokio::test]
    async fn test_known_locations() {
        let db = Database::in_memory();
        let mut a = user_in("a", "Lyon");
        a.neighborhood = Some("Croix-Rousse".to_string());
        db.users.insert(a).await.unwrap();
        let mut b = user_in("b", "");
        b.city = None;
        db.users.insert(b).await.unwrap();

        let mut w = walk_in("Paris", "a");
        w.neighborhood = "Marais".to_string();
        db.walks.insert(w).await.unwrap();
        db.walks.insert(walk_in("Lyon", "a")).await.unwrap();

        assert_eq!(known_cities(&db, "").await, vec!["Lyon", "Paris"]);
        assert_eq!(known_cities(&db, "PAR").await, vec!["Paris"]);
        assert_eq!(
            known_neighborhoods(&db, "Lyon", "").await,
            vec!["Centre", "Croix-Rousse"]
        );
        assert_eq!(known_neighborhoods(&db, "", "ma").await, vec!["Marais"]);
    }
}
