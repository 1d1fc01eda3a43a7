use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use genie_core::netconf::DEFAULT_CNI_VERSION;
use genie_core::{
    ClusterApi, CniArgs, CniCommand, CniDir, CniError, CniErrorCode, ConfiguredDefault,
    DefaultSelector, ExecDelegate, GenieConf, GenieController, GenieError, UsageSelector,
};
use genie_kube::KubeCluster;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

const SUPPORTED_VERSIONS: [&str; 4] = ["0.3.0", "0.3.1", "0.4.0", "1.0.0"];
const MAX_STDIN: u64 = 1 << 20;

fn init_tracing() {
    let filter = EnvFilter::try_from_env("GENIE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // stdout is reserved for the CNI result
    if std::env::var("GENIE_LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut stdin = Vec::new();
    std::io::stdin()
        .take(MAX_STDIN + 1)
        .read_to_end(&mut stdin)
        .context("failed to read stdin")?;
    if stdin.len() as u64 > MAX_STDIN {
        return Err(GenieError::InvalidEnvelope(format!(
            "network configuration exceeds {} bytes",
            MAX_STDIN
        ))
        .into());
    }
    Ok(stdin)
}

fn version_output(cni_version: &str) -> Vec<u8> {
    serde_json::json!({
        "cniVersion": cni_version,
        "supportedVersions": SUPPORTED_VERSIONS,
    })
    .to_string()
    .into_bytes()
}

fn selector(conf: &GenieConf) -> Arc<dyn DefaultSelector> {
    let Some(addr) = conf.cadvisor_addr() else {
        return Arc::new(ConfiguredDefault);
    };
    match UsageSelector::new(addr, conf.cadvisor_num_stats) {
        Ok(selector) => Arc::new(selector),
        Err(e) => {
            warn!(addr, error = %e, "cAdvisor client unavailable, using configured default");
            Arc::new(ConfiguredDefault)
        }
    }
}

fn bin_dirs(args: &CniArgs, conf: &GenieConf) -> Vec<PathBuf> {
    let mut dirs = args.path.clone();
    let configured = conf.bin_dir();
    if !dirs.contains(&configured) {
        dirs.push(configured);
    }
    dirs
}

async fn run(args: &CniArgs, conf: GenieConf) -> Result<Vec<u8>> {
    let cluster: Option<Arc<dyn ClusterApi>> = if args.k8s_args()?.pod().is_some() {
        Some(Arc::new(KubeCluster::from_conf(&conf).await?))
    } else {
        None
    };

    let bin_dirs = bin_dirs(args, &conf);
    let cni_dir = CniDir::new(conf.net_dir(), bin_dirs.clone());
    let exec = Arc::new(ExecDelegate::new(bin_dirs));
    let selector = selector(&conf);
    let controller = GenieController::new(conf, cni_dir, cluster, exec, selector);

    match args.command {
        CniCommand::Add => {
            let result = controller.add(args).await?;
            Ok(result.to_output(&controller.conf().cni_version)?)
        }
        CniCommand::Del => {
            controller.del(args).await?;
            Ok(Vec::new())
        }
        CniCommand::Check => {
            controller.check(args).await?;
            Ok(Vec::new())
        }
        CniCommand::Version => Ok(version_output(&controller.conf().cni_version)),
    }
}

/// CNI error for anything that escaped the controller
fn cni_error(e: &anyhow::Error) -> CniError {
    match e.downcast_ref::<GenieError>() {
        Some(genie) => genie.to_cni_error(),
        None => CniError::new(CniErrorCode::TryAgainLater, "genie initialization failed")
            .with_details(&format!("{:#}", e)),
    }
}

fn invoke(stdin: Vec<u8>) -> (Result<Vec<u8>>, String) {
    let args = match CniArgs::from_env(stdin) {
        Ok(args) => args,
        Err(e) => return (Err(e.into()), DEFAULT_CNI_VERSION.to_string()),
    };
    if args.command == CniCommand::Version && args.stdin.iter().all(u8::is_ascii_whitespace) {
        return (Ok(version_output(DEFAULT_CNI_VERSION)), DEFAULT_CNI_VERSION.to_string());
    }
    let conf = match GenieConf::parse(&args.stdin) {
        Ok(conf) => conf,
        Err(e) => return (Err(e.into()), DEFAULT_CNI_VERSION.to_string()),
    };
    let version = conf.cni_version.clone();
    debug!(command = %args.command, container = %args.container_id, "Invoked");

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return (Err(e.into()), version),
    };
    (runtime.block_on(run(&args, conf)), version)
}

fn main() -> ExitCode {
    init_tracing();

    let (outcome, version) = match read_stdin() {
        Ok(stdin) => invoke(stdin),
        Err(e) => (Err(e), DEFAULT_CNI_VERSION.to_string()),
    };

    let mut stdout = std::io::stdout();
    match outcome {
        Ok(output) => {
            if stdout.write_all(&output).and_then(|_| stdout.flush()).is_err() {
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Invocation failed");
            let _ = writeln!(stdout, "{}", cni_error(&e).to_json(&version));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_output() {
        let value: serde_json::Value = serde_json::from_slice(&version_output("0.4.0")).unwrap();
        assert_eq!(value["cniVersion"], "0.4.0");
        assert_eq!(value["supportedVersions"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_initialization_error_code() {
        let e = anyhow::anyhow!("no kubeconfig");
        assert_eq!(cni_error(&e).code(), CniErrorCode::TryAgainLater as u32);

        let e: anyhow::Error = GenieError::InvalidAnnotation("cni: empty entry".into()).into();
        assert_eq!(cni_error(&e).code(), CniErrorCode::InvalidAnnotation as u32);
    }

    #[test]
    fn test_bin_dirs_append_configured() {
        let args = CniArgs {
            command: CniCommand::Add,
            container_id: "c1".to_string(),
            netns: "/var/run/netns/c1".to_string(),
            ifname: "eth0".to_string(),
            args: String::new(),
            path: vec![PathBuf::from("/opt/cni/bin"), PathBuf::from("/usr/libexec/cni")],
            stdin: b"{}".to_vec(),
        };
        let conf = GenieConf::default();
        assert_eq!(
            bin_dirs(&args, &conf),
            vec![PathBuf::from("/opt/cni/bin"), PathBuf::from("/usr/libexec/cni")]
        );
    }
}
