//! Command-line interface.
//!
//! Flags override the config file, which overrides built-in defaults.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::{read_config, validate_config, ConfigError, LogFormat, ProxyConfig, TlsConfig};

#[derive(Debug, Parser)]
#[command(name = "logxy")]
#[command(version, about = "Single-target HTTP reverse proxy that logs per-request timings", long_about = None)]
pub struct Cli {
    /// Port to listen on [default: 8080]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Upstream base URL, e.g. https://api.example.com
    #[arg(short, long)]
    pub target: Option<String>,

    /// PEM file holding both the TLS certificate chain and private key
    #[arg(long, value_name = "PEM")]
    pub ssl: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Resolve flags and the optional config file into a validated config.
    pub fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => ProxyConfig::default(),
        };

        if let Some(port) = self.port {
            config.listener.bind_address = with_port(&config.listener.bind_address, port);
        }
        if let Some(target) = self.target {
            config.upstream.target = target;
        }
        if let Some(pem) = self.ssl {
            config.listener.tls = Some(TlsConfig::combined(pem.to_string_lossy()));
        }
        if let Some(format) = self.log_format {
            config.observability.log_format = format;
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

/// Replace the port of `bind_address`, keeping its host when it parses.
fn with_port(bind_address: &str, port: u16) -> String {
    match bind_address.parse::<SocketAddr>() {
        Ok(mut addr) => {
            addr.set_port(port);
            addr.to_string()
        }
        Err(_) => format!("0.0.0.0:{port}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("logxy").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn short_flags_resolve_to_config() {
        let config = parse(&["-p", "9000", "-t", "http://up.example"])
            .into_config()
            .unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:9000");
        assert_eq!(config.upstream.target, "http://up.example");
        assert!(config.listener.tls.is_none());
    }

    #[test]
    fn defaults_listen_on_8080() {
        let config = parse(&["--target", "https://api.example.com"])
            .into_config()
            .unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn missing_target_fails_validation() {
        let err = parse(&[]).into_config().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn ssl_uses_one_file_for_cert_and_key() {
        let config = parse(&["-t", "http://up.example", "--ssl", "/etc/logxy/proxy.pem"])
            .into_config()
            .unwrap();
        let tls = config.listener.tls.unwrap();
        assert_eq!(tls.cert_path, "/etc/logxy/proxy.pem");
        assert_eq!(tls.key_path, "/etc/logxy/proxy.pem");
    }

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[listener]\nbind_address = \"127.0.0.1:7000\"\n\n[upstream]\ntarget = \"http://from-file\"\n\n[observability]\nlog_format = \"pretty\""
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let config = parse(&["-c", path, "-p", "7001", "--log-format", "json"])
            .into_config()
            .unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:7001");
        assert_eq!(config.upstream.target, "http://from-file");
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_unknown_log_format() {
        let args = ["logxy", "-t", "http://up.example", "--log-format", "xml"];
        assert!(Cli::try_parse_from(args).is_err());
    }
}
