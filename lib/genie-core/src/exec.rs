//! Delegate execution through plugin binaries

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::args::CniCommand;
use crate::delegate::{DelegateExec, RuntimeConf};
use crate::error::{CniError, CniErrorCode, GenieError, Result};

/// Runs plugins found on the CNI binary search path
#[derive(Debug, Clone)]
pub struct ExecDelegate {
    bin_dirs: Vec<PathBuf>,
}

impl ExecDelegate {
    pub fn new(bin_dirs: Vec<PathBuf>) -> Self {
        Self { bin_dirs }
    }

    fn find(&self, plugin_type: &str) -> Option<PathBuf> {
        self.bin_dirs
            .iter()
            .map(|dir| dir.join(plugin_type))
            .find(|path| path.is_file())
    }

    fn cni_path(&self) -> String {
        self.bin_dirs
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(":")
    }
}

#[async_trait]
impl DelegateExec for ExecDelegate {
    async fn exec(
        &self,
        plugin_type: &str,
        command: CniCommand,
        runtime: &RuntimeConf,
        stdin: &[u8],
    ) -> Result<Vec<u8>> {
        let path = self
            .find(plugin_type)
            .ok_or_else(|| GenieError::PluginBinaryMissing {
                plugin: plugin_type.to_string(),
                dir: self.cni_path(),
            })?;
        debug!(
            plugin = plugin_type,
            command = %command,
            interface = %runtime.ifname,
            path = %path.display(),
            "Executing delegate"
        );

        // CNI_IFNAME and friends are set per child, never on this process
        let mut child = Command::new(&path)
            .env("CNI_COMMAND", command.as_str())
            .env("CNI_CONTAINERID", &runtime.container_id)
            .env("CNI_NETNS", &runtime.netns)
            .env("CNI_IFNAME", &runtime.ifname)
            .env("CNI_ARGS", runtime.cni_args())
            .env("CNI_PATH", self.cni_path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut pipe) = child.stdin.take() {
            // a plugin may exit without reading its config
            if let Err(e) = pipe.write_all(stdin).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let source = serde_json::from_slice::<CniError>(&output.stdout).unwrap_or_else(|_| {
            CniError::new(
                CniErrorCode::DelegateExecFailed,
                &format!("{} exited with {}", plugin_type, output.status),
            )
            .with_details(stderr.trim())
        });
        Err(GenieError::DelegateFailed {
            plugin: plugin_type.to_string(),
            interface: runtime.ifname.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn script(dir: &TempDir, name: &str, body: &str) {
        let path = dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn runtime() -> RuntimeConf {
        RuntimeConf {
            container_id: "c1".to_string(),
            netns: "/var/run/netns/c1".to_string(),
            ifname: "eth3".to_string(),
            args: vec![("IgnoreUnknown".to_string(), "1".to_string())],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_exec_passes_env_and_stdin() {
        let dir = TempDir::new().unwrap();
        script(
            &dir,
            "echo-plugin",
            r#"read conf
printf '{"cniVersion":"0.3.1","interfaces":[{"name":"%s"}],"dns":{"domain":"%s"},"ips":[],"routes":[],"conf":%s}' "$CNI_IFNAME" "$CNI_COMMAND" "$conf""#,
        );
        let exec = ExecDelegate::new(vec![dir.path().to_path_buf()]);

        let out = exec
            .exec("echo-plugin", CniCommand::Add, &runtime(), b"{\"type\":\"echo-plugin\"}\n")
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["interfaces"][0]["name"], "eth3");
        assert_eq!(value["dns"]["domain"], "ADD");
        assert_eq!(value["conf"]["type"], "echo-plugin");
    }

    #[tokio::test]
    async fn test_exec_reports_plugin_error() {
        let dir = TempDir::new().unwrap();
        script(
            &dir,
            "failing",
            r#"echo '{"cniVersion":"0.4.0","code":3,"msg":"no such container"}'; exit 1"#,
        );
        let exec = ExecDelegate::new(vec![dir.path().to_path_buf()]);

        let err = exec
            .exec("failing", CniCommand::Del, &runtime(), b"{}")
            .await
            .unwrap_err();
        match err {
            GenieError::DelegateFailed { source, interface, .. } => {
                assert!(source.is_unknown_container());
                assert_eq!(interface, "eth3");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exec_without_cni_error_json() {
        let dir = TempDir::new().unwrap();
        script(&dir, "crashing", "echo boom >&2; exit 2");
        let exec = ExecDelegate::new(vec![dir.path().to_path_buf()]);

        let err = exec
            .exec("crashing", CniCommand::Add, &runtime(), b"{}")
            .await
            .unwrap_err();
        let cni = err.to_cni_error();
        assert_eq!(cni.code(), CniErrorCode::DelegateExecFailed as u32);
        assert_eq!(cni.details(), Some("boom"));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let exec = ExecDelegate::new(vec![PathBuf::from("/nonexistent/bin")]);
        let err = exec
            .exec("flannel", CniCommand::Add, &runtime(), b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, GenieError::PluginBinaryMissing { .. }));
    }
}
