//! Configuración del servidor.
//! Carga variables de entorno (.env incluido) con prefijo `PIPEFLOW_` y
//! expone una estructura inmutable. Un valor presente pero mal formado es
//! un error, nunca un default silencioso.
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::Lazy;
use thiserror::Error;

pub const ENV_HOST: &str = "PIPEFLOW_HOST";
pub const ENV_PORT: &str = "PIPEFLOW_PORT";
pub const ENV_CATALOG: &str = "PIPEFLOW_CATALOG";
pub const ENV_WORK_DIR: &str = "PIPEFLOW_WORK_DIR";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "PIPEFLOW_REQUEST_TIMEOUT_SECS";
pub const ENV_STAGE_TIMEOUT_SECS: &str = "PIPEFLOW_STAGE_TIMEOUT_SECS";
pub const ENV_DIAGNOSTIC_CAP_BYTES: &str = "PIPEFLOW_DIAGNOSTIC_CAP_BYTES";
pub const ENV_MAX_CONCURRENT_RUNS: &str = "PIPEFLOW_MAX_CONCURRENT_RUNS";
pub const ENV_RETAIN_RUNS: &str = "PIPEFLOW_RETAIN_RUNS";
pub const ENV_DEFAULT_PIPELINE: &str = "PIPEFLOW_DEFAULT_PIPELINE";
pub const ENV_LOG: &str = "PIPEFLOW_LOG";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CATALOG: &str = "config/pipelines.json";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 2400;
pub const DEFAULT_PIPELINE: &str = "generate";

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenvy::dotenv();
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}' ({reason})")]
    Invalid { var: &'static str, value: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub catalog: PathBuf,
    pub work_dir: PathBuf,
    /// Deadline de cada request completo (run o secuencia de iteraciones).
    pub request_timeout: Duration,
    /// Límite por stage para stages sin `timeout_ms` propio.
    pub stage_timeout: Option<Duration>,
    pub diagnostic_cap_bytes: usize,
    /// `None` = sin límite de runs concurrentes.
    pub max_concurrent_runs: Option<usize>,
    pub retain_runs: bool,
    pub default_pipeline: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { host: DEFAULT_HOST.to_string(),
               port: DEFAULT_PORT,
               catalog: PathBuf::from(DEFAULT_CATALOG),
               work_dir: std::env::temp_dir().join("pipeflow"),
               request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
               stage_timeout: None,
               diagnostic_cap_bytes: pipe_core::constants::DEFAULT_DIAGNOSTIC_CAP_BYTES,
               max_concurrent_runs: None,
               retain_runs: false,
               default_pipeline: DEFAULT_PIPELINE.to_string() }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // asegura que .env se haya cargado
        Lazy::force(&DOTENV_LOADED);
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Igual que `from_env` pero leyendo de `lookup`; útil en tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &'static str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        if let Some(host) = get(ENV_HOST) {
            cfg.host = host;
        }
        if let Some(port) = parse(ENV_PORT, get(ENV_PORT))? {
            cfg.port = port;
        }
        if let Some(catalog) = get(ENV_CATALOG) {
            cfg.catalog = PathBuf::from(catalog);
        }
        if let Some(dir) = get(ENV_WORK_DIR) {
            cfg.work_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse::<u64>(ENV_REQUEST_TIMEOUT_SECS, get(ENV_REQUEST_TIMEOUT_SECS))? {
            cfg.request_timeout = Duration::from_secs(positive(ENV_REQUEST_TIMEOUT_SECS, secs)?);
        }
        if let Some(secs) = parse::<u64>(ENV_STAGE_TIMEOUT_SECS, get(ENV_STAGE_TIMEOUT_SECS))? {
            cfg.stage_timeout = Some(Duration::from_secs(positive(ENV_STAGE_TIMEOUT_SECS, secs)?));
        }
        if let Some(cap) = parse::<usize>(ENV_DIAGNOSTIC_CAP_BYTES, get(ENV_DIAGNOSTIC_CAP_BYTES))? {
            cfg.diagnostic_cap_bytes = cap;
        }
        if let Some(n) = parse::<usize>(ENV_MAX_CONCURRENT_RUNS, get(ENV_MAX_CONCURRENT_RUNS))? {
            cfg.max_concurrent_runs = Some(positive(ENV_MAX_CONCURRENT_RUNS, n as u64)? as usize);
        }
        if let Some(raw) = get(ENV_RETAIN_RUNS) {
            cfg.retain_runs = parse_bool(ENV_RETAIN_RUNS, &raw)?;
        }
        if let Some(name) = get(ENV_DEFAULT_PIPELINE) {
            cfg.default_pipeline = name;
        }
        Ok(cfg)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T>(var: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
    where T: FromStr,
          T::Err: std::fmt::Display
{
    raw.map(|value| {
           value.parse::<T>().map_err(|e| ConfigError::Invalid { var,
                                                                  reason: e.to_string(),
                                                                  value })
       })
       .transpose()
}

fn positive(var: &'static str, n: u64) -> Result<u64, ConfigError> {
    if n == 0 {
        return Err(ConfigError::Invalid { var,
                                          value: "0".into(),
                                          reason: "must be greater than zero".into() });
    }
    Ok(n)
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { var,
                                        value: raw.to_string(),
                                        reason: "expected true or false".into() }),
    }
}
