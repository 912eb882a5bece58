//! Command line, tuning file and environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use byne_core::{
    Cadence, CadenceError, ClientIdentity, EmptyIdentity, Endpoint, EndpointError, EndpointSet,
    Parity, StallDetector,
};
use clap::{Parser, ValueEnum};
use serde::Deserialize;

/// Byne challenge client.
#[derive(Debug, Parser)]
#[command(name = "byne-client", version, about, allow_negative_numbers = true)]
pub struct Args {
    /// Client identity
    pub client_id: String,
    /// Client type
    #[arg(value_enum)]
    pub client_type: ClientType,
    /// Endpoint of primary server (tcp://host:port)
    pub primary_url: String,
    /// Endpoint of backup server (tcp://host:port)
    pub backup_url: String,
    /// Primary server access timeout in seconds (0 = infinite)
    #[arg(default_value_t = 0)]
    pub timeout: i64,
    /// Tuning file (defaults to ~/.config/byne/client.toml or /etc/byne/client.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClientType {
    Odd,
    Even,
}

impl From<ClientType> for Parity {
    fn from(t: ClientType) -> Self {
        match t {
            ClientType::Odd => Parity::Odd,
            ClientType::Even => Parity::Even,
        }
    }
}

/// Tuning file. Env overrides: BYNE_STALL_THRESHOLD, BYNE_BACKUP_TIMEOUT_SECS,
/// BYNE_INCREMENT_PERIOD_MS, BYNE_REFRESH_MIN_MS, BYNE_REFRESH_MAX_MS, BYNE_QUIESCENCE_MS.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Queue depth that counts as a stalled dispatch loop (default 50, 0 disables).
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold: usize,
    /// Per-request timeout once on backup (default 0 = infinite).
    #[serde(default)]
    pub backup_timeout_secs: u64,
    #[serde(default)]
    pub cadence: Cadence,
}

fn default_stall_threshold() -> usize {
    byne_core::scheduler::DEFAULT_STALL_THRESHOLD
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stall_threshold: default_stall_threshold(),
            backup_timeout_secs: 0,
            cadence: Cadence::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error(transparent)]
    Identity(#[from] EmptyIdentity),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error("invalid cadence: {0}")]
    Cadence(#[from] CadenceError),
}

/// Validated client settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub identity: ClientIdentity,
    pub parity: Parity,
    pub endpoints: EndpointSet,
    pub primary_timeout: Duration,
    pub backup_timeout: Duration,
    pub cadence: Cadence,
    pub stall: StallDetector,
}

impl Settings {
    pub fn new(args: &Args, config: &Config) -> Result<Self, ConfigError> {
        let identity = ClientIdentity::new(args.client_id.as_bytes())?;
        let primary: Endpoint = args.primary_url.parse()?;
        let backup: Endpoint = args.backup_url.parse()?;
        let endpoints = EndpointSet::new(primary, backup)?;
        config.cadence.validate()?;
        Ok(Self {
            identity,
            parity: args.client_type.into(),
            endpoints,
            primary_timeout: Duration::from_secs(args.timeout.max(0) as u64),
            backup_timeout: Duration::from_secs(config.backup_timeout_secs),
            cadence: config.cadence,
            stall: StallDetector::new(config.stall_threshold),
        })
    }
}

/// Load settings: tuning file (explicit, else first default path found), env vars, then CLI.
pub fn load(args: &Args) -> Result<Settings, ConfigError> {
    let mut config = match &args.config {
        Some(path) => load_file(path)?,
        None => load_default_file(),
    };
    apply_env(&mut config, |key| std::env::var(key).ok());
    Settings::new(args, &config)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/byne/client.toml"));
    }
    out.push(PathBuf::from("/etc/byne/client.toml"));
    out
}

fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<Config>(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn load_default_file() -> Config {
    for p in config_paths() {
        if p.exists() {
            match load_file(&p) {
                Ok(c) => return c,
                Err(e) => tracing::warn!(error = %e, "ignoring tuning file"),
            }
            break;
        }
    }
    Config::default()
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    let num = |key: &str| var(key).and_then(|s| s.trim().parse::<u64>().ok());
    if let Some(v) = num("BYNE_STALL_THRESHOLD") {
        c.stall_threshold = v as usize;
    }
    if let Some(v) = num("BYNE_BACKUP_TIMEOUT_SECS") {
        c.backup_timeout_secs = v;
    }
    if let Some(v) = num("BYNE_INCREMENT_PERIOD_MS") {
        c.cadence.increment_period_ms = v;
    }
    if let Some(v) = num("BYNE_REFRESH_MIN_MS") {
        c.cadence.refresh_min_ms = v;
    }
    if let Some(v) = num("BYNE_REFRESH_MAX_MS") {
        c.cadence.refresh_max_ms = v;
    }
    if let Some(v) = num("BYNE_QUIESCENCE_MS") {
        c.cadence.quiescence_ms = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec![
            "byne-client",
            "CLIENT-1",
            "odd",
            "tcp://localhost:5555",
            "tcp://localhost:5556",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn positional_arguments() {
        let a = args(&["60"]);
        let s = Settings::new(&a, &Config::default()).unwrap();
        assert_eq!(s.identity.as_bytes(), b"CLIENT-1");
        assert_eq!(s.parity, Parity::Odd);
        assert_eq!(s.endpoints.primary().port(), 5555);
        assert_eq!(s.endpoints.backup().port(), 5556);
        assert_eq!(s.primary_timeout, Duration::from_secs(60));
        assert_eq!(s.backup_timeout, Duration::ZERO);
        assert_eq!(s.stall.threshold(), 50);
    }

    #[test]
    fn timeout_is_optional_and_negative_clamps_to_zero() {
        let s = Settings::new(&args(&[]), &Config::default()).unwrap();
        assert_eq!(s.primary_timeout, Duration::ZERO);
        let s = Settings::new(&args(&["-5"]), &Config::default()).unwrap();
        assert_eq!(s.primary_timeout, Duration::ZERO);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(Args::try_parse_from(["byne-client", "c", "prime", "tcp://a:1", "tcp://b:2"]).is_err());
        assert!(Args::try_parse_from(["byne-client", "c", "odd", "tcp://a:1"]).is_err());

        let mut a = args(&[]);
        a.primary_url = "udp://localhost:1".into();
        assert!(matches!(
            Settings::new(&a, &Config::default()),
            Err(ConfigError::Endpoint(EndpointError::Scheme(_)))
        ));
        let mut a = args(&[]);
        a.backup_url = "tcp://*:5556".into();
        assert!(matches!(
            Settings::new(&a, &Config::default()),
            Err(ConfigError::Endpoint(EndpointError::WildcardConnect(_)))
        ));
        let mut a = args(&[]);
        a.client_id = String::new();
        assert!(matches!(
            Settings::new(&a, &Config::default()),
            Err(ConfigError::Identity(_))
        ));
    }

    #[test]
    fn tuning_file_and_env_overrides() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "stall_threshold = 20\nbackup_timeout_secs = 3\n[cadence]\nquiescence_ms = 250"
        )
        .unwrap();
        let mut c = load_file(f.path()).unwrap();
        assert_eq!(c.stall_threshold, 20);
        assert_eq!(c.backup_timeout_secs, 3);
        assert_eq!(c.cadence.quiescence_ms, 250);
        assert_eq!(c.cadence.increment_period_ms, 500);

        let env: HashMap<&str, &str> = [
            ("BYNE_STALL_THRESHOLD", "0"),
            ("BYNE_REFRESH_MAX_MS", " 9000 "),
            ("BYNE_INCREMENT_PERIOD_MS", "fast"),
        ]
        .into_iter()
        .collect();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.stall_threshold, 0);
        assert_eq!(c.cadence.refresh_max_ms, 9000);
        assert_eq!(c.cadence.increment_period_ms, 500);
    }

    #[test]
    fn explicit_file_errors_are_reported() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "no_such_key = 1").unwrap();
        assert!(matches!(load_file(f.path()), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            load_file(Path::new("/nonexistent/byne.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn invalid_cadence_rejected() {
        let mut c = Config::default();
        c.cadence.refresh_min_ms = 6_000;
        assert!(matches!(
            Settings::new(&args(&[]), &c),
            Err(ConfigError::Cadence(_))
        ));
    }
}
