//! Environment-derived configuration and the startup region registry.
//!
//! Both are initialized once in `main` and read-only afterwards; request
//! and task paths never mutate them.

use std::collections::HashMap;
use std::env;
use std::sync::OnceLock;

use sqlx::PgPool;
use tracing::info;

use crate::db::models::Region;
use crate::db::repository::regions;
use crate::ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Dev,
    Prod,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("invalid region format {0:?} (expected CC-City)")]
    InvalidRegionFormat(String),
}

/// All environment variables the process reads.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub app_env: AppEnv,
    pub app_name: String,
    pub app_machine_id: u16,
    pub app_port: String,
    pub app_region: String,
    pub app_regions: Vec<String>,

    pub db_host: String,
    pub db_port: String,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub db_ssl_mode: String,

    pub redis_host: String,
    pub redis_port: String,
    pub redis_password: String,

    // Consumed by the auth layer, parsed here so a bad value fails fast.
    pub access_token_expires_at: u64,
    pub refresh_token_expires_at: u64,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let app_env = match optional("APP_ENV", "prod").as_str() {
            "dev" => AppEnv::Dev,
            "prod" => AppEnv::Prod,
            other => {
                return Err(ConfigError::Invalid {
                    name: "APP_ENV",
                    value: other.to_string(),
                })
            }
        };

        let machine_id = optional("APP_MACHINE_ID", "1");
        let app_machine_id = machine_id.parse().map_err(|_| ConfigError::Invalid {
            name: "APP_MACHINE_ID",
            value: machine_id,
        })?;

        let app_regions = optional("APP_REGIONS", "TW-Taipei")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(EnvConfig {
            app_env,
            app_name: optional("APP_NAME", "knocker"),
            app_machine_id,
            app_port: optional("APP_PORT", "8000"),
            app_region: optional("APP_REGION", "TW-Taipei"),
            app_regions,
            db_host: required("DB_HOST")?,
            db_port: required("DB_PORT")?,
            db_user: required("DB_USER")?,
            db_password: required("DB_PASSWORD")?,
            db_name: required("DB_NAME")?,
            db_ssl_mode: optional("DB_SSL_MODE", "disable"),
            redis_host: optional("REDIS_HOST", "localhost"),
            redis_port: optional("REDIS_PORT", "6379"),
            redis_password: optional("REDIS_PASSWORD", ""),
            access_token_expires_at: parse_u64("ACCESS_TOKEN_EXPIRES_AT", 900)?,
            refresh_token_expires_at: parse_u64("REFRESH_TOKEN_EXPIRES_AT", 31_536_000)?,
        })
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name, self.db_ssl_mode,
        )
    }

    pub fn redis_url(&self) -> String {
        if self.redis_password.is_empty() {
            format!("redis://{}:{}", self.redis_host, self.redis_port)
        } else {
            format!("redis://:{}@{}:{}", self.redis_password, self.redis_host, self.redis_port)
        }
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(default),
    }
}

static CONFIG: OnceLock<EnvConfig> = OnceLock::new();

/// Loads the configuration once.
pub fn init() -> Result<&'static EnvConfig, ConfigError> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = EnvConfig::from_env()?;
    Ok(CONFIG.get_or_init(|| cfg))
}

/// Returns the configuration. Panics if `init` has not run.
pub fn get() -> &'static EnvConfig {
    CONFIG.get().expect("config not initialized, call config::init() first")
}

struct RegionRegistry {
    by_id: HashMap<i64, Region>,
    by_name: HashMap<String, Region>,
}

static REGIONS: OnceLock<RegionRegistry> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum RegionInitError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Id(#[from] ids::IdError),
    #[error(transparent)]
    Storage(#[from] crate::db::repository::RepoError),
}

/// Seeds missing regions from `APP_REGIONS` and caches the full table.
/// Must run before the scheduler or a worker starts; the registry is
/// immutable afterwards.
pub async fn init_regions(pool: &PgPool) -> Result<(), RegionInitError> {
    if REGIONS.get().is_some() {
        return Ok(());
    }

    let seeds = parse_region_seeds(&get().app_regions)?;
    for seed in &seeds {
        regions::insert_region_if_absent(pool, seed).await?;
    }

    let rows = regions::list_all_regions(pool).await?;
    info!(count = rows.len(), "region registry loaded");

    let mut by_id = HashMap::with_capacity(rows.len());
    let mut by_name = HashMap::with_capacity(rows.len());
    for region in rows {
        by_name.insert(region.name.clone(), region.clone());
        by_id.insert(region.id, region);
    }

    let _ = REGIONS.set(RegionRegistry { by_id, by_name });
    Ok(())
}

pub fn region_by_id(id: i64) -> Option<Region> {
    REGIONS.get().and_then(|r| r.by_id.get(&id).cloned())
}

pub fn region_by_name(name: &str) -> Option<Region> {
    REGIONS.get().and_then(|r| r.by_name.get(name).cloned())
}

pub fn all_regions() -> Vec<Region> {
    let Some(registry) = REGIONS.get() else {
        return Vec::new();
    };
    let mut regions: Vec<Region> = registry.by_id.values().cloned().collect();
    regions.sort_by_key(|r| r.id);
    regions
}

fn parse_region_seeds(raw_regions: &[String]) -> Result<Vec<Region>, RegionInitError> {
    let mut seeds = Vec::with_capacity(raw_regions.len());

    for raw in raw_regions {
        let Some((country_code, city)) = raw.split_once('-') else {
            return Err(ConfigError::InvalidRegionFormat(raw.clone()).into());
        };

        let country_code = country_code.trim();
        let city = prettify_city(city.trim());
        let country = country_name(country_code).unwrap_or(country_code);

        seeds.push(Region {
            id: ids::next_id()?,
            name: raw.clone(),
            display_name: format!("{country}, {city}"),
        });
    }

    Ok(seeds)
}

/// Splits camel-cased city names, e.g. `NewYork` becomes `New York`.
fn prettify_city(city: &str) -> String {
    let mut pretty = String::with_capacity(city.len() + 4);
    let mut previous_lower = false;
    for ch in city.chars() {
        if ch.is_ascii_uppercase() && previous_lower {
            pretty.push(' ');
        }
        previous_lower = ch.is_ascii_lowercase();
        pretty.push(ch);
    }
    pretty
}

fn country_name(code: &str) -> Option<&'static str> {
    Some(match code {
        "TW" => "Taiwan",
        "US" => "United States",
        "UK" => "United Kingdom",
        "CA" => "Canada",
        "SG" => "Singapore",
        "JP" => "Japan",
        "KR" => "South Korea",
        "AU" => "Australia",
        "IN" => "India",
        "DE" => "Germany",
        "FR" => "France",
        _ => return None,
    })
}
