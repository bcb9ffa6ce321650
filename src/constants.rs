pub const SNAPSHOT_BASE_URL: &str = "https://a.windbornesystems.com";
pub const SNAPSHOT_PATH_PREFIX: &str = "/treasure";
pub const MAX_TIME_INDEX: u8 = 24;

pub const OPENAQ_BASE_URL: &str = "https://api.openaq.org";
pub const OPENAQ_SOURCE_LABEL: &str = "OpenAQ v3";
pub const OPENAQ_API_KEY_HEADER: &str = "X-API-Key";
pub const STATION_QUERY_RADIUS_METERS: u32 = 25_000;
pub const STATION_QUERY_LIMIT: u32 = 10;
pub const STATION_MAX_DISTANCE_KM: f64 = 100.0;
pub const PM25_PARAMETER_NAME: &str = "pm25";
pub const PM25_PARAMETER_ID: i64 = 2;
pub const KNOWN_PM25_SENSOR_IDS: [i64; 1] = [1437];
pub const PM25_NAME_TOKENS: [&str; 2] = ["pm25", "pm2.5"];

pub const EARTH_RADIUS_KM: f64 = 6371.0;

pub const ALTITUDE_LOW_MAX_KM: f64 = 5.0;
pub const ALTITUDE_MEDIUM_MAX_KM: f64 = 10.0;
pub const ALTITUDE_HIGH_MAX_KM: f64 = 15.0;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8788";
pub const DEFAULT_PROBE_CONCURRENCY: usize = 4;
pub const MAX_PROBE_CONCURRENCY: usize = 4;
pub const DEFAULT_PROBE_TIMEOUT_SECONDS: u64 = 5;
pub const DEFAULT_PROBE_MAX_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 15;

pub const USER_AGENT: &str = "balloon-air-quality/1.0";
