//! Ordered delegation of attachments to underlying CNI plugins
//!
//! ADD is all-or-nothing across attachments: a failure rolls back the
//! attachments that already succeeded, newest first. DEL sweeps every
//! attachment and reports the first error.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::args::CniCommand;
use crate::conflist::ConfList;
use crate::error::{GenieError, Result};
use crate::resolver::ResolvedAttachment;
use crate::result::CniResult;

/// Executes one plugin binary following the CNI execution contract
#[async_trait]
pub trait DelegateExec: Send + Sync {
    /// Run `plugin_type` with `stdin`, returning its stdout.
    ///
    /// A plugin reporting an error yields `GenieError::DelegateFailed`
    /// carrying the plugin's CNI error.
    async fn exec(
        &self,
        plugin_type: &str,
        command: CniCommand,
        runtime: &RuntimeConf,
        stdin: &[u8],
    ) -> Result<Vec<u8>>;
}

/// Sandbox identity shared by every attachment of one invocation
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    pub container_id: String,
    pub netns: String,
    pub pod_namespace: Option<String>,
    pub pod_name: Option<String>,
    /// `CNI_ARGS` pairs genie was invoked with
    pub args: Vec<(String, String)>,
}

/// Per-delegate runtime parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConf {
    pub container_id: String,
    pub netns: String,
    pub ifname: String,
    /// `CNI_ARGS` pairs in order
    pub args: Vec<(String, String)>,
    pub ips: Vec<String>,
    pub mac: Option<String>,
}

impl RuntimeConf {
    pub fn for_attachment(sandbox: &Sandbox, attachment: &ResolvedAttachment) -> Self {
        let mut args: Vec<(String, String)> = sandbox
            .args
            .iter()
            .filter(|(k, _)| k != "IgnoreUnknown")
            .cloned()
            .collect();
        args.insert(0, ("IgnoreUnknown".to_string(), "1".to_string()));
        if let (Some(namespace), Some(name)) = (&sandbox.pod_namespace, &sandbox.pod_name) {
            set_arg(&mut args, "K8S_POD_NAMESPACE", namespace);
            set_arg(&mut args, "K8S_POD_NAME", name);
            if !args.iter().any(|(k, _)| k == "K8S_POD_INFRA_CONTAINER_ID") {
                set_arg(&mut args, "K8S_POD_INFRA_CONTAINER_ID", &sandbox.container_id);
            }
        }
        for (key, value) in &attachment.request.args {
            set_arg(&mut args, key, value);
        }

        Self {
            container_id: sandbox.container_id.clone(),
            netns: sandbox.netns.clone(),
            ifname: attachment.request.interface.clone(),
            args,
            ips: attachment.request.ips.clone(),
            mac: attachment.request.mac.clone(),
        }
    }

    /// `CNI_ARGS` value
    pub fn cni_args(&self) -> String {
        self.args
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// `runtimeConfig` entries for the capabilities a plugin declares
    fn runtime_config(&self, capabilities: &[&str]) -> Map<String, Value> {
        let mut config = Map::new();
        if capabilities.contains(&"ips") && !self.ips.is_empty() {
            config.insert("ips".to_string(), Value::from(self.ips.clone()));
        }
        if let Some(mac) = self.mac.as_ref().filter(|_| capabilities.contains(&"mac")) {
            config.insert("mac".to_string(), Value::String(mac.clone()));
        }
        config
    }
}

/// Replace `key` in place, or append it
fn set_arg(args: &mut Vec<(String, String)>, key: &str, value: &str) {
    match args.iter_mut().find(|(k, _)| k == key) {
        Some(pair) => pair.1 = value.to_string(),
        None => args.push((key.to_string(), value.to_string())),
    }
}

/// Stdin for plugin `idx` of `list`
fn plugin_stdin(
    list: &ConfList,
    idx: usize,
    runtime: &RuntimeConf,
    prev_result: Option<&Value>,
) -> Result<Vec<u8>> {
    let mut conf = list.plugins[idx].clone();
    conf.insert("name".to_string(), Value::String(list.name.clone()));
    conf.insert(
        "cniVersion".to_string(),
        Value::String(list.cni_version().to_string()),
    );
    if let Some(prev) = prev_result {
        conf.insert("prevResult".to_string(), prev.clone());
    }
    let runtime_config = runtime.runtime_config(&list.capabilities(idx));
    if !runtime_config.is_empty() {
        conf.insert("runtimeConfig".to_string(), Value::Object(runtime_config));
    }
    Ok(serde_json::to_vec(&conf)?)
}

pub struct Delegator<'a> {
    exec: &'a dyn DelegateExec,
}

impl<'a> Delegator<'a> {
    pub fn new(exec: &'a dyn DelegateExec) -> Self {
        Self { exec }
    }

    /// ADD every plugin of `list` in order, chaining results
    pub async fn add_list(&self, list: &ConfList, runtime: &RuntimeConf) -> Result<CniResult> {
        let mut prev: Option<Value> = None;
        for (idx, plugin_type) in list.plugin_types().into_iter().enumerate() {
            let stdin = plugin_stdin(list, idx, runtime, prev.as_ref())?;
            let out = self
                .exec
                .exec(plugin_type, CniCommand::Add, runtime, &stdin)
                .await?;
            // plugins that only adjust the host may print nothing
            if out.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let result = CniResult::from_bytes(&out)?;
            prev = Some(serde_json::to_value(&result)?);
        }

        match prev {
            Some(prev) => Ok(serde_json::from_value(prev)?),
            None => Ok(CniResult {
                cni_version: list.cni_version().to_string(),
                ..Default::default()
            }),
        }
    }

    /// DEL every plugin of `list` in reverse order
    ///
    /// A plugin that no longer knows the container counts as deleted.
    pub async fn del_list(&self, list: &ConfList, runtime: &RuntimeConf) -> Result<()> {
        let types = list.plugin_types();
        for (idx, plugin_type) in types.into_iter().enumerate().rev() {
            let stdin = plugin_stdin(list, idx, runtime, None)?;
            match self
                .exec
                .exec(plugin_type, CniCommand::Del, runtime, &stdin)
                .await
            {
                Ok(_) => {}
                Err(GenieError::DelegateFailed { source, .. }) if source.is_unknown_container() => {
                    debug!(plugin = plugin_type, interface = %runtime.ifname, "Container already gone");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Attach everything in order; on failure detach what succeeded, newest first
    pub async fn add_all(
        &self,
        sandbox: &Sandbox,
        attachments: &[ResolvedAttachment],
    ) -> Result<Vec<CniResult>> {
        let mut results = Vec::with_capacity(attachments.len());
        for (n, attachment) in attachments.iter().enumerate() {
            let runtime = RuntimeConf::for_attachment(sandbox, attachment);
            match self.add_list(&attachment.conflist, &runtime).await {
                Ok(result) => {
                    info!(
                        plugin = attachment.plugin(),
                        interface = attachment.interface(),
                        default = n == 0,
                        "Attached interface"
                    );
                    results.push(result);
                }
                Err(e) => {
                    error!(
                        plugin = attachment.plugin(),
                        interface = attachment.interface(),
                        error = %e,
                        "Attachment failed, rolling back"
                    );
                    self.rollback(sandbox, &attachments[..n]).await;
                    return Err(e);
                }
            }
        }
        Ok(results)
    }

    async fn rollback(&self, sandbox: &Sandbox, attached: &[ResolvedAttachment]) {
        for attachment in attached.iter().rev() {
            let runtime = RuntimeConf::for_attachment(sandbox, attachment);
            if let Err(e) = self.del_list(&attachment.conflist, &runtime).await {
                warn!(
                    plugin = attachment.plugin(),
                    interface = attachment.interface(),
                    error = %e,
                    "Rollback of attachment failed"
                );
            }
        }
    }

    /// Detach every attachment, continuing past failures; returns the first error
    pub async fn del_all(&self, sandbox: &Sandbox, attachments: &[ResolvedAttachment]) -> Result<()> {
        let mut first_error = None;
        for attachment in attachments {
            let runtime = RuntimeConf::for_attachment(sandbox, attachment);
            match self.del_list(&attachment.conflist, &runtime).await {
                Ok(()) => debug!(
                    plugin = attachment.plugin(),
                    interface = attachment.interface(),
                    "Detached interface"
                ),
                Err(e) => {
                    warn!(
                        plugin = attachment.plugin(),
                        interface = attachment.interface(),
                        error = %e,
                        "Detach failed, continuing"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CniError, CniErrorCode};
    use crate::intent::AttachmentRequest;
    use crate::testing::FakeExec;

    fn attachment(conflist: &str, ifname: &str) -> ResolvedAttachment {
        let conflist = ConfList::parse(conflist.as_bytes()).unwrap();
        ResolvedAttachment {
            request: AttachmentRequest::plugin(conflist.primary_type()).with_interface(ifname),
            conflist,
            subnet: None,
        }
    }

    fn sandbox() -> Sandbox {
        Sandbox {
            container_id: "c1".to_string(),
            netns: "/var/run/netns/c1".to_string(),
            pod_namespace: Some("default".to_string()),
            pod_name: Some("web".to_string()),
            args: Vec::new(),
        }
    }

    const FLANNEL: &str = r#"{"cniVersion": "0.3.1", "name": "cbr0", "plugins": [{"type": "flannel"}]}"#;
    const WEAVE: &str = r#"{"cniVersion": "0.3.1", "name": "weave", "plugins": [{"type": "weave-net"}, {"type": "portmap", "capabilities": {"portMappings": true}}]}"#;
    const MACVLAN: &str = r#"{"cniVersion": "0.4.0", "name": "mv", "plugins": [{"type": "macvlan", "capabilities": {"ips": true, "mac": true}}]}"#;

    #[test]
    fn test_cni_args() {
        let runtime = RuntimeConf::for_attachment(&sandbox(), &attachment(FLANNEL, "eth0"));
        assert_eq!(
            runtime.cni_args(),
            "IgnoreUnknown=1;K8S_POD_NAMESPACE=default;K8S_POD_NAME=web;K8S_POD_INFRA_CONTAINER_ID=c1"
        );
    }

    #[test]
    fn test_cni_args_keep_invocation_pairs() {
        let mut sandbox = sandbox();
        sandbox.args = vec![
            ("K8S_POD_NAMESPACE".to_string(), "default".to_string()),
            ("K8S_POD_NAME".to_string(), "web".to_string()),
            ("K8S_POD_INFRA_CONTAINER_ID".to_string(), "pause-1".to_string()),
            ("K8S_POD_UID".to_string(), "7f3a".to_string()),
            ("IgnoreUnknown".to_string(), "true".to_string()),
        ];
        let mut att = attachment(MACVLAN, "net1");
        att.request.args.insert("mac".to_string(), "c2:b0:57:49:47:f1".to_string());
        att.request.args.insert("K8S_POD_UID".to_string(), "override".to_string());

        let runtime = RuntimeConf::for_attachment(&sandbox, &att);
        assert_eq!(
            runtime.cni_args(),
            "IgnoreUnknown=1;K8S_POD_NAMESPACE=default;K8S_POD_NAME=web;\
             K8S_POD_INFRA_CONTAINER_ID=pause-1;K8S_POD_UID=override;mac=c2:b0:57:49:47:f1"
        );
    }

    #[tokio::test]
    async fn test_add_list_chains_prev_result() {
        let exec = FakeExec::default();
        let delegator = Delegator::new(&exec);
        let att = attachment(WEAVE, "eth1");
        let runtime = RuntimeConf::for_attachment(&sandbox(), &att);

        let result = delegator.add_list(&att.conflist, &runtime).await.unwrap();
        assert_eq!(result.interfaces[0].name, "eth1");

        let calls = exec.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].stdin["name"], "weave");
        assert!(calls[0].stdin.get("prevResult").is_none());
        assert_eq!(calls[1].plugin_type, "portmap");
        assert_eq!(calls[1].stdin["prevResult"]["interfaces"][0]["name"], "eth1");
    }

    #[tokio::test]
    async fn test_runtime_config_follows_capabilities() {
        let exec = FakeExec::default();
        let delegator = Delegator::new(&exec);
        let mut att = attachment(MACVLAN, "net1");
        att.request.ips = vec!["10.1.1.11/24".to_string()];
        att.request.mac = Some("c2:b0:57:49:47:f1".to_string());
        let runtime = RuntimeConf::for_attachment(&sandbox(), &att);

        delegator.add_list(&att.conflist, &runtime).await.unwrap();
        let stdin = &exec.calls()[0].stdin;
        assert_eq!(stdin["runtimeConfig"]["ips"][0], "10.1.1.11/24");
        assert_eq!(stdin["runtimeConfig"]["mac"], "c2:b0:57:49:47:f1");
        assert_eq!(stdin["cniVersion"], "0.4.0");
    }

    #[tokio::test]
    async fn test_add_all_rolls_back_in_reverse() {
        let exec = FakeExec::default();
        exec.fail(
            "macvlan",
            CniCommand::Add,
            CniError::from_raw(11, "no master"),
        );
        let delegator = Delegator::new(&exec);
        let attachments = vec![
            attachment(FLANNEL, "eth0"),
            attachment(WEAVE, "eth1"),
            attachment(MACVLAN, "eth2"),
        ];

        let err = delegator.add_all(&sandbox(), &attachments).await.unwrap_err();
        assert_eq!(err.to_cni_error().code(), 11);

        let summary = exec.summary();
        let dels: Vec<_> = summary
            .iter()
            .filter(|(cmd, _, _)| *cmd == CniCommand::Del)
            .map(|(_, plugin, ifname)| (plugin.as_str(), ifname.as_str()))
            .collect();
        assert_eq!(
            dels,
            vec![("portmap", "eth1"), ("weave-net", "eth1"), ("flannel", "eth0")]
        );
    }

    #[tokio::test]
    async fn test_del_all_continues_and_returns_first_error() {
        let exec = FakeExec::default();
        exec.fail("flannel", CniCommand::Del, CniError::from_raw(5, "flannel down"));
        exec.fail("macvlan", CniCommand::Del, CniError::from_raw(7, "bad config"));
        let delegator = Delegator::new(&exec);
        let attachments = vec![
            attachment(FLANNEL, "eth0"),
            attachment(WEAVE, "eth1"),
            attachment(MACVLAN, "eth2"),
        ];

        let err = delegator.del_all(&sandbox(), &attachments).await.unwrap_err();
        assert_eq!(err.to_cni_error().code(), 5);
        assert_eq!(exec.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_del_unknown_container_is_success() {
        let exec = FakeExec::default();
        exec.fail(
            "flannel",
            CniCommand::Del,
            CniError::new(CniErrorCode::UnknownContainer, "gone"),
        );
        let delegator = Delegator::new(&exec);
        delegator
            .del_all(&sandbox(), &[attachment(FLANNEL, "eth0")])
            .await
            .unwrap();
    }
}
