use crate::division::{Level, RemoteDivisionSource};
use anyhow::{anyhow, Result};
use config::Config;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SOURCE_BASE_URL: &str =
    "http://resultadosgenerales2015.interior.es/congreso/config/ES201512-CON-ES";
const DEFAULT_RESULTS_URL_TEMPLATE: &str =
    "http://resultadosgenerales2015.interior.es/congreso/results/ES201512-CON-ES/{path}/info.json";
const DEFAULT_DATABASE_FILE: &str = "congreso.sqlite3";
const DEFAULT_HTTP_ADDRESS: &str = "0.0.0.0";
const DEFAULT_HTTP_PORT: u16 = 8080;

/// Path served by `/testread` when none is configured
pub const DEFAULT_READBACK_PATH: &str = "ES/CA02/50/50297/5029710";
pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_secs(200);
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 32;

/// Balearic, Las Palmas and Santa Cruz de Tenerife
pub const DEFAULT_INSULAR_PROVINCES: &[&str] = &["07", "35", "38"];

pub struct EscrutinioConfig {
    /// Directory holding the snapshot store
    pub data_dir: String,

    /// Store file name inside `data_dir`
    pub database_file: String,

    /// Prefix of the six division datasets (`<base>/<stem>.json`)
    pub source_base_url: String,

    /// Per-level dataset locations replacing the `<base>/<stem>.json` default
    pub source_overrides: BTreeMap<Level, String>,

    /// Results document URL, `{path}` is replaced by the node path
    pub results_url_template: String,

    pub cycle_interval: Duration,
    pub fetch_timeout: Duration,
    pub max_jitter: Duration,

    /// 0 disables the limit
    pub max_concurrent_fetches: usize,

    pub http_address: String,
    pub http_port: u16,

    /// Path served by the `/testread` endpoint
    pub readback_path: String,

    /// Provinces whose paths include an island level
    pub insular_provinces: Vec<String>,
}

const EMPTY_CONFIG: &str = r#"### escrutinio configuration file

### directory and file name of the snapshot store
# data_dir = "~/.escrutinio"
# database_file = "congreso.sqlite3"

### division datasets: <source_base_url>/<stem>.json for every level,
### stems are pais, comunidad, provincia, islas, municipio and distrito
# source_base_url = "http://resultadosgenerales2015.interior.es/congreso/config/ES201512-CON-ES"
# source_islas = "/var/lib/escrutinio/islas.json"

### results document of every node, {path} is e.g. ES/CA02/50/50297
# results_url_template = "http://resultadosgenerales2015.interior.es/congreso/results/ES201512-CON-ES/{path}/info.json"

### retrieval schedule
# cycle_interval = "5m"
# fetch_timeout = "30s"
# max_jitter = "200s"
# max_concurrent_fetches = 32      # 0 = unbounded

### status server
# http_address = "0.0.0.0"
# http_port = 8080
# readback_path = "ES/CA02/50/50297/5029710"

### export
# insular_provinces = "07,35,38"
"#;

impl Default for EscrutinioConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self {
            data_dir: format!("{}/.escrutinio", home_dir),
            database_file: DEFAULT_DATABASE_FILE.to_string(),
            source_base_url: DEFAULT_SOURCE_BASE_URL.to_string(),
            source_overrides: BTreeMap::new(),
            results_url_template: DEFAULT_RESULTS_URL_TEMPLATE.to_string(),
            cycle_interval: DEFAULT_CYCLE_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_jitter: DEFAULT_MAX_JITTER,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            http_address: DEFAULT_HTTP_ADDRESS.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            readback_path: DEFAULT_READBACK_PATH.to_string(),
            insular_provinces: DEFAULT_INSULAR_PROVINCES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl EscrutinioConfig {
    /// Load the configuration file (created with a commented template when
    /// missing) layered with `ESCRUTINIO_*` environment variables
    pub fn new(path: &Option<String>) -> Result<EscrutinioConfig> {
        let mut builder = Config::builder();

        let home_dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
            .to_owned();
        let escrutinio_dir = format!("{}/.escrutinio", home_dir.as_str());

        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(escrutinio_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create escrutinio directory: {}", e))?;
                let p = format!("{}/escrutinio.toml", escrutinio_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // E.g., `ESCRUTINIO_HTTP_PORT=9090 escrutinio retrieve`
        builder = builder.add_source(config::Environment::with_prefix("ESCRUTINIO"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let map = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        let config = Self::from_map(&map)?;
        std::fs::create_dir_all(config.data_dir.as_str())
            .map_err(|e| anyhow!("Unable to create data directory: {}", e))?;
        Ok(config)
    }

    /// Build a configuration from flat key/value settings, defaulting
    /// everything that is missing
    pub fn from_map(map: &HashMap<String, String>) -> Result<EscrutinioConfig> {
        let defaults = EscrutinioConfig::default();

        let text = |key: &str, default: String| -> String {
            map.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };

        let duration = |key: &str, default: Duration| -> Result<Duration> {
            match map.get(key) {
                Some(v) => humantime::parse_duration(v.trim())
                    .map_err(|e| anyhow!("Invalid duration for {} '{}': {}", key, v, e)),
                None => Ok(default),
            }
        };

        let mut source_overrides = BTreeMap::new();
        for level in Level::ALL {
            let key = format!("source_{}", level.dataset_stem());
            if let Some(location) = map.get(&key).filter(|v| !v.trim().is_empty()) {
                source_overrides.insert(level, location.trim().to_string());
            }
        }

        let results_url_template = text("results_url_template", defaults.results_url_template);
        if !results_url_template.contains(crate::division::PATH_PLACEHOLDER) {
            return Err(anyhow!(
                "results_url_template '{}' must contain {}",
                results_url_template,
                crate::division::PATH_PLACEHOLDER
            ));
        }

        let cycle_interval = duration("cycle_interval", defaults.cycle_interval)?;
        if cycle_interval.is_zero() {
            return Err(anyhow!("cycle_interval must be greater than zero"));
        }

        let max_concurrent_fetches = match map.get("max_concurrent_fetches") {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|e| anyhow!("Invalid max_concurrent_fetches '{}': {}", v, e))?,
            None => defaults.max_concurrent_fetches,
        };

        let http_port = match map.get("http_port") {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|e| anyhow!("Invalid http_port '{}': {}", v, e))?,
            None => defaults.http_port,
        };

        Ok(EscrutinioConfig {
            data_dir: text("data_dir", defaults.data_dir),
            database_file: text("database_file", defaults.database_file),
            source_base_url: text("source_base_url", defaults.source_base_url),
            source_overrides,
            results_url_template,
            cycle_interval,
            fetch_timeout: duration("fetch_timeout", defaults.fetch_timeout)?,
            max_jitter: duration("max_jitter", defaults.max_jitter)?,
            max_concurrent_fetches,
            http_address: text("http_address", defaults.http_address),
            http_port,
            readback_path: text("readback_path", defaults.readback_path),
            insular_provinces: map
                .get("insular_provinces")
                .map(|v| split_list(v))
                .unwrap_or(defaults.insular_provinces),
        })
    }

    /// Get the path to the SQLite snapshot store
    pub fn sqlite_path(&self) -> PathBuf {
        Path::new(self.data_dir.as_str()).join(self.database_file.as_str())
    }

    /// Dataset locations for the tree loader
    pub fn division_source(&self) -> RemoteDivisionSource {
        self.source_overrides.iter().fold(
            RemoteDivisionSource::from_base(&self.source_base_url),
            |source, (level, location)| source.with_location(*level, location.as_str()),
        )
    }

    #[cfg(feature = "retrieval")]
    pub fn scheduler_config(&self) -> crate::retrieval::SchedulerConfig {
        crate::retrieval::SchedulerConfig::default()
            .with_max_jitter(self.max_jitter)
            .with_max_concurrent_fetches(self.max_concurrent_fetches)
    }

    #[cfg(feature = "server")]
    pub fn server_config(&self) -> crate::server::ServerConfig {
        crate::server::ServerConfig::default()
            .with_address(self.http_address.as_str())
            .with_port(self.http_port)
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let source = self.division_source();
        let mut lines = vec![
            format!("Data Directory:     {}", self.data_dir),
            format!("SQLite Path:        {}", self.sqlite_path().display()),
        ];

        if let Ok(meta) = std::fs::metadata(self.sqlite_path()) {
            lines.push(format!("SQLite Size:        {}", format_size(meta.len())));
        }

        lines.push("Division Datasets:".to_string());
        for level in Level::ALL {
            lines.push(format!("  {:<18}{}", format!("{}:", level), source.location(level)));
        }

        lines.extend([
            format!("Results URL:        {}", self.results_url_template),
            format!(
                "Cycle Interval:     {}",
                humantime::format_duration(self.cycle_interval)
            ),
            format!(
                "Fetch Timeout:      {}",
                humantime::format_duration(self.fetch_timeout)
            ),
            format!(
                "Max Jitter:         {}",
                humantime::format_duration(self.max_jitter)
            ),
            format!(
                "Max Fetches:        {}",
                match self.max_concurrent_fetches {
                    0 => "unbounded".to_string(),
                    n => n.to_string(),
                }
            ),
            format!("HTTP Listen:        {}:{}", self.http_address, self.http_port),
            format!("Read-back Path:     {}", self.readback_path),
            format!("Insular Provinces:  {}", self.insular_provinces.join(", ")),
        ]);

        lines.join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.escrutinio/escrutinio.toml", home_dir)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = EscrutinioConfig::from_map(&HashMap::new()).unwrap();

        assert_eq!(config.database_file, "congreso.sqlite3");
        assert_eq!(config.cycle_interval, Duration::from_secs(300));
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.max_jitter, Duration::from_secs(200));
        assert_eq!(config.max_concurrent_fetches, 32);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.readback_path, "ES/CA02/50/50297/5029710");
        assert_eq!(config.insular_provinces, vec!["07", "35", "38"]);
        assert!(config.sqlite_path().ends_with("congreso.sqlite3"));
    }

    #[test]
    fn test_overrides() {
        let config = EscrutinioConfig::from_map(&map(&[
            ("data_dir", "/tmp/escrutinio"),
            ("database_file", "generales.sqlite3"),
            ("source_base_url", "https://example.test/config/"),
            ("source_islas", "/srv/islas.json"),
            ("results_url_template", "https://example.test/{path}.json"),
            ("cycle_interval", "90s"),
            ("max_jitter", "1m 30s"),
            ("max_concurrent_fetches", "0"),
            ("http_port", "9090"),
            ("insular_provinces", "35, 38"),
        ]))
        .unwrap();

        assert_eq!(
            config.sqlite_path(),
            PathBuf::from("/tmp/escrutinio/generales.sqlite3")
        );
        assert_eq!(config.cycle_interval, Duration::from_secs(90));
        assert_eq!(config.max_jitter, Duration::from_secs(90));
        assert_eq!(config.max_concurrent_fetches, 0);
        assert_eq!(config.http_port, 9090);
        assert_eq!(config.insular_provinces, vec!["35", "38"]);

        let source = config.division_source();
        assert_eq!(
            source.location(Level::Country),
            "https://example.test/config/pais.json"
        );
        assert_eq!(source.location(Level::Island), "/srv/islas.json");
    }

    #[test]
    fn test_invalid_values() {
        assert!(EscrutinioConfig::from_map(&map(&[("cycle_interval", "soon")])).is_err());
        assert!(EscrutinioConfig::from_map(&map(&[("cycle_interval", "0s")])).is_err());
        assert!(EscrutinioConfig::from_map(&map(&[("http_port", "99999")])).is_err());
        assert!(
            EscrutinioConfig::from_map(&map(&[("results_url_template", "https://x.test/a")]))
                .is_err()
        );
    }

    #[test]
    fn test_summary() {
        let config = EscrutinioConfig::from_map(&HashMap::new()).unwrap();
        let summary = config.summary();
        assert!(summary.contains("Cycle Interval:     5m"));
        assert!(summary.contains("municipality:     "));
        assert!(summary.contains("municipio.json"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
