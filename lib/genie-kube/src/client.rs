//! Kubernetes client construction from the genie netconf

use std::io::BufReader;

use anyhow::{anyhow, Context, Result};
use genie_core::GenieConf;
use kube::config::{AuthInfo, KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use rustls_pemfile::certs;
use tracing::debug;

/// Client configuration for `conf`
///
/// Base configuration comes from `kubernetes.kubeconfig` when set, otherwise
/// from the `policy` API root or the environment. The `policy` credentials
/// are then layered on top, and `kubernetes.k8s_api_root` has the final say
/// on the server URL.
pub async fn kube_config(conf: &GenieConf) -> Result<Config> {
    let mut config = match (conf.kubernetes.kubeconfig(), conf.policy.api_root()) {
        (Some(path), _) => {
            debug!(path, "Loading kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig {}", path))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .with_context(|| format!("invalid kubeconfig {}", path))?
        }
        (None, Some(root)) => Config::new(
            root.parse()
                .with_context(|| format!("invalid API root {}", root))?,
        ),
        (None, None) => Config::infer()
            .await
            .context("no kubeconfig given and no cluster configuration found")?,
    };

    let policy = &conf.policy;
    if let Some(root) = policy.api_root() {
        config.cluster_url = root
            .parse()
            .with_context(|| format!("invalid API root {}", root))?;
    }
    if let Some(cert) = policy.client_certificate() {
        config.auth_info.client_certificate = Some(cert.to_string());
    }
    if let Some(key) = policy.client_key() {
        config.auth_info.client_key = Some(key.to_string());
    }
    if let Some(ca) = policy.certificate_authority() {
        let pem = std::fs::read(ca).with_context(|| format!("failed to read CA {}", ca))?;
        config.root_cert = Some(load_certificates(&pem)?);
    }
    if let Some(token) = policy.auth_token() {
        config.auth_info.token = token_auth(token)?.token;
    }

    if let Some(root) = conf.kubernetes.api_root() {
        config.cluster_url = root
            .parse()
            .with_context(|| format!("invalid API root {}", root))?;
    }
    debug!(url = %config.cluster_url, "Kubernetes client configured");
    Ok(config)
}

pub async fn kube_client(conf: &GenieConf) -> Result<Client> {
    let config = kube_config(conf).await?;
    Ok(Client::try_from(config)?)
}

/// DER certificates of a PEM bundle
fn load_certificates(pem: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut reader = BufReader::new(pem);
    let certs = certs(&mut reader)
        .map(|cert| cert.map(|der| der.to_vec()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("failed to parse certificates: {}", e))?;
    if certs.is_empty() {
        return Err(anyhow!("no certificates in CA bundle"));
    }
    Ok(certs)
}

fn token_auth(token: &str) -> Result<AuthInfo> {
    Ok(serde_json::from_value(serde_json::json!({ "token": token }))?)
}
