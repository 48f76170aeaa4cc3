use crate::mirror::MirrorTarget;
use crate::secret_string::SecretString;
use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs, path::Path};
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/kube-image-mirror/config.yaml";
const DEFAULT_DOCKER_HOST: &str = "http://127.0.0.1:2375";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub webserver: Webserver,
    #[serde(default)]
    pub mirror: Mirror,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub docker: Docker,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct Webserver {
    #[serde(default = "default_port")]
    pub port: u16,
    pub tls: Tls,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tls {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
pub struct Mirror {
    pub registry: Option<String>,
    pub namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: SecretString,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Docker {
    pub host: Option<String>,
    #[serde(default)]
    pub ca_certificate_paths: Vec<PathBuf>,
}

fn default_port() -> u16 {
    443
}

fn default_request_timeout_seconds() -> u64 {
    25
}

impl Config {
    /// Registry and namespace images get mirrored into.
    ///
    /// Without an explicit namespace the registry username is used, the account pushes go to.
    pub fn mirror_target(&self) -> Result<MirrorTarget> {
        let namespace = self
            .mirror
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .or(Some(self.credentials.username.as_str()).filter(|u| !u.is_empty()))
            .context("Neither mirror.namespace nor credentials.username is configured")?;

        Ok(MirrorTarget::new(
            self.mirror.registry.as_deref().unwrap_or_default(),
            namespace,
        ))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Docker Engine endpoint: config file first, then `DOCKER_HOST`, then the local TCP default.
    pub fn docker_host(&self) -> String {
        let host = self
            .docker
            .host
            .clone()
            .or_else(|| env::var("DOCKER_HOST").ok())
            .unwrap_or_else(|| DEFAULT_DOCKER_HOST.to_string());

        match host.strip_prefix("tcp://") {
            Some(rest) => format!("http://{}", rest),
            None => host,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config: Config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    config.mirror_target()?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming the first variable that is not set.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    if let Some(missing) = re
        .captures_iter(input)
        .map(|caps| caps[1].to_string())
        .find(|name| env::var(name).is_err())
    {
        bail!("Missing environment variable: {}", missing);
    }

    let result = re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    });

    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn write_config(yaml: &str) -> tempfile::NamedTempFile {
        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        fs::write(tmp_file.path(), yaml).expect("Failed to write to temp file");
        tmp_file
    }

    #[test]
    fn test_expand_env_vars_success() {
        unsafe {
            env::set_var("KIM_TEST_VAR", "value123");
        }
        let input = "This is a test: ${KIM_TEST_VAR}";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, "This is a test: value123");
        unsafe {
            env::remove_var("KIM_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_missing_var() {
        let input = "This will fail: ${KIM_MISSING_VAR}";
        let err = expand_env_vars(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing environment variable: KIM_MISSING_VAR"
        );
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let input = "No variables here";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, input);
    }

    #[test]
    fn test_load_config_file() {
        unsafe {
            env::set_var("KIM_TEST_PASSWORD", "secret_token");
        }
        let tmp_file = write_config(
            r#"
        webserver:
          port: 8443
          tls:
            certFile: /certs/tls.crt
            keyFile: /certs/tls.key
        mirror:
          registry: quay.io
          namespace: acme
        credentials:
          username: robot
          password: ${KIM_TEST_PASSWORD}
        docker:
          host: tcp://dind:2375
        requestTimeoutSeconds: 10
        "#,
        );

        let config = load_config(tmp_file.path()).expect("Should load config");

        assert_eq!(config.webserver.port, 8443);
        assert_eq!(config.webserver.tls.cert_file, PathBuf::from("/certs/tls.crt"));
        assert_eq!(config.credentials.password.expose_secret(), "secret_token");
        assert_eq!(config.docker_host(), "http://dind:2375");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));

        let target = config.mirror_target().expect("mirror target");
        assert_eq!(target.registry(), "quay.io");
        assert_eq!(target.namespace(), "acme");
        unsafe {
            env::remove_var("KIM_TEST_PASSWORD");
        }
    }

    #[test]
    fn test_namespace_falls_back_to_username() {
        let tmp_file = write_config(
            r#"
        webserver:
          tls:
            certFile: /certs/tls.crt
            keyFile: /certs/tls.key
        credentials:
          username: gauravgahlot
          password: pw
        "#,
        );

        let config = load_config(tmp_file.path()).expect("Should load config");

        assert_eq!(config.webserver.port, 443);
        assert_eq!(config.request_timeout_seconds, 25);
        let target = config.mirror_target().expect("mirror target");
        assert_eq!(target.registry(), "");
        assert_eq!(target.namespace(), "gauravgahlot");
    }

    #[test]
    fn test_missing_namespace_and_username_is_rejected() {
        let tmp_file = write_config(
            r#"
        webserver:
          tls:
            certFile: /certs/tls.crt
            keyFile: /certs/tls.key
        mirror:
          registry: quay.io
        "#,
        );

        let err = load_config(tmp_file.path()).unwrap_err();
        assert!(err.to_string().contains("mirror.namespace"));
    }
}
