use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

use crate::limits::DEFAULT_LOCK_TIMEOUT_MS;

/// Server settings, read once from `SLOTBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub lock_timeout: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "slotbook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> io::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable numbers are errors,
    /// not silent defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> io::Result<Self> {
        let defaults = Self::default();
        let lock_timeout_ms = parse_or(&get, "SLOTBOOK_LOCK_TIMEOUT_MS", DEFAULT_LOCK_TIMEOUT_MS)?;
        if lock_timeout_ms == 0 {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "SLOTBOOK_LOCK_TIMEOUT_MS must be positive",
            ));
        }
        Ok(Self {
            port: parse_or(&get, "SLOTBOOK_PORT", defaults.port)?,
            bind: get("SLOTBOOK_BIND").unwrap_or(defaults.bind),
            data_dir: get("SLOTBOOK_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            password: get("SLOTBOOK_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_or(&get, "SLOTBOOK_MAX_CONNECTIONS", defaults.max_connections)?,
            compact_threshold: parse_or(&get, "SLOTBOOK_COMPACT_THRESHOLD", defaults.compact_threshold)?,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            metrics_port: get("SLOTBOOK_METRICS_PORT")
                .map(|v| parse_value("SLOTBOOK_METRICS_PORT", &v))
                .transpose()?,
            tls_cert: get("SLOTBOOK_TLS_CERT"),
            tls_key: get("SLOTBOOK_TLS_KEY"),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotbook.wal")
    }

    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        load_tls_acceptor(self.tls_cert.as_deref(), self.tls_key.as_deref())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> io::Result<T> {
    raw.trim().parse().map_err(|_| {
        io::Error::new(ErrorKind::InvalidInput, format!("{key}: cannot parse {raw:?}"))
    })
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> io::Result<T> {
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

pub fn load_tls_acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "set both SLOTBOOK_TLS_CERT and SLOTBOOK_TLS_KEY, or neither",
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}
