//! ADD / DEL / CHECK pipeline
//!
//! envelope -> pod -> intent -> resolution -> delegation -> status

use std::collections::BTreeMap;
use std::sync::Arc;

use genie_api::annotations::CNI_ANNOTATION;
use tracing::{debug, info, warn};

use crate::args::CniArgs;
use crate::cluster::ClusterApi;
use crate::cnidir::CniDir;
use crate::delegate::{DelegateExec, Delegator, Sandbox};
use crate::error::{GenieError, Result};
use crate::intent::{AttachmentRequest, Intent, IntentParser, DEFAULT_INTERFACE};
use crate::netconf::GenieConf;
use crate::resolver::{ResolvedAttachment, Resolver};
use crate::result::CniResult;
use crate::selector::{DefaultSelector, SelectionContext};
use crate::status;

/// The pod an invocation is for
struct PodContext {
    namespace: String,
    name: String,
    annotations: BTreeMap<String, String>,
}

/// Attachment plan plus anything the status write must add
struct Plan {
    requests: Vec<AttachmentRequest>,
    selected_default: Option<String>,
}

pub struct GenieController {
    conf: GenieConf,
    cni_dir: CniDir,
    cluster: Option<Arc<dyn ClusterApi>>,
    exec: Arc<dyn DelegateExec>,
    selector: Arc<dyn DefaultSelector>,
}

impl GenieController {
    /// `cluster` is only needed for invocations that name a pod
    pub fn new(
        conf: GenieConf,
        cni_dir: CniDir,
        cluster: Option<Arc<dyn ClusterApi>>,
        exec: Arc<dyn DelegateExec>,
        selector: Arc<dyn DefaultSelector>,
    ) -> Self {
        Self {
            conf,
            cni_dir,
            cluster,
            exec,
            selector,
        }
    }

    pub fn conf(&self) -> &GenieConf {
        &self.conf
    }

    fn cluster(&self) -> Result<&dyn ClusterApi> {
        self.cluster.as_deref().ok_or_else(|| {
            GenieError::InvalidEnvelope("no Kubernetes client configured".to_string())
        })
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver::new(
            self.cluster.as_deref(),
            &self.cni_dir,
            self.conf.default_plugin(),
            self.conf.persist_synthesized_configs,
        )
    }

    fn sandbox(&self, args: &CniArgs, pod: Option<&PodContext>) -> Sandbox {
        Sandbox {
            container_id: args.container_id.clone(),
            netns: args.netns.clone(),
            pod_namespace: pod.map(|p| p.namespace.clone()),
            pod_name: pod.map(|p| p.name.clone()),
            args: args.arg_pairs(),
        }
    }

    async fn lookup_pod(&self, args: &CniArgs) -> Result<Option<PodContext>> {
        let k8s = args.k8s_args()?;
        let Some((namespace, name)) = k8s.pod() else {
            debug!(container = %args.container_id, "No pod in CNI_ARGS");
            return Ok(None);
        };
        let pod = self.cluster()?.get_pod(namespace, name).await?;
        Ok(Some(PodContext {
            namespace: namespace.to_string(),
            name: name.to_string(),
            annotations: pod.metadata.annotations.unwrap_or_default(),
        }))
    }

    fn default_plan(plugin: &str) -> Vec<AttachmentRequest> {
        vec![AttachmentRequest::plugin(plugin).with_interface(DEFAULT_INTERFACE)]
    }

    async fn plan_add(&self, pod: Option<&PodContext>) -> Result<Plan> {
        let intent = match pod {
            Some(pod) => IntentParser::new(&pod.namespace, &self.cni_dir).parse(&pod.annotations)?,
            None => Intent::Default,
        };
        match intent {
            Intent::Requests(requests) => Ok(Plan {
                requests,
                selected_default: None,
            }),
            Intent::Default => {
                let ctx = SelectionContext {
                    conf: &self.conf,
                    cni_dir: &self.cni_dir,
                };
                let plugin = self.selector.pick(&ctx).await?;
                info!(plugin = %plugin, "No networking annotations, using default plugin");
                Ok(Plan {
                    requests: Self::default_plan(&plugin),
                    selected_default: Some(plugin).filter(|_| self.selector.is_dynamic()),
                })
            }
        }
    }

    pub async fn add(&self, args: &CniArgs) -> Result<CniResult> {
        debug!(container = %args.container_id, hint = %args.ifname, "ADD");
        let pod = self.lookup_pod(args).await?;
        let plan = self.plan_add(pod.as_ref()).await?;
        let attachments = self.resolver().resolve_all(plan.requests).await?;

        let delegator = Delegator::new(self.exec.as_ref());
        let sandbox = self.sandbox(args, pod.as_ref());
        let results = delegator.add_all(&sandbox, &attachments).await?;
        let merged = CniResult::merge(&results, &self.conf.cni_version);

        if let Some(pod) = &pod {
            self.write_status(pod, &attachments, &results, plan.selected_default)
                .await;
        }
        info!(
            container = %args.container_id,
            attachments = attachments.len(),
            "ADD complete"
        );
        Ok(merged)
    }

    async fn write_status(
        &self,
        pod: &PodContext,
        attachments: &[ResolvedAttachment],
        results: &[CniResult],
        selected_default: Option<String>,
    ) {
        let Ok(cluster) = self.cluster() else {
            return;
        };
        let mut annotations =
            match status::status_annotations(&pod.annotations, attachments, results) {
                Ok(annotations) => annotations,
                Err(e) => {
                    warn!(error = %e, "Unable to encode pod network status");
                    return;
                }
            };
        if let Some(plugin) = selected_default {
            annotations.insert(CNI_ANNOTATION.to_string(), plugin);
        }
        status::write_status(cluster, &pod.namespace, &pod.name, annotations).await;
    }

    /// Tear down every attachment the pod's annotations describe
    ///
    /// A missing pod or unreadable annotations fall back to the default
    /// plugin; attachments that no longer resolve are skipped.
    pub async fn del(&self, args: &CniArgs) -> Result<()> {
        debug!(container = %args.container_id, "DEL");
        let pod = match self.lookup_pod(args).await {
            Ok(pod) => pod,
            Err(GenieError::PodNotFound { namespace, name }) => {
                warn!(pod = %format!("{}/{}", namespace, name), "Pod gone, deleting default network");
                None
            }
            Err(e) => return Err(e),
        };

        let requests = match &pod {
            Some(pod) => {
                match IntentParser::new(&pod.namespace, &self.cni_dir).parse(&pod.annotations) {
                    Ok(Intent::Requests(requests)) => requests,
                    Ok(Intent::Default) => Self::default_plan(self.conf.default_plugin()),
                    Err(e) => {
                        warn!(error = %e, "Unreadable pod annotations, deleting default network");
                        Self::default_plan(self.conf.default_plugin())
                    }
                }
            }
            None => Self::default_plan(self.conf.default_plugin()),
        };

        let resolver = self.resolver();
        let mut attachments = Vec::with_capacity(requests.len());
        for request in requests {
            let interface = request.interface.clone();
            match resolver.resolve(request).await {
                Ok(attachment) => attachments.push(attachment),
                Err(e) => warn!(interface = %interface, error = %e, "Skipping unresolvable attachment"),
            }
        }

        let delegator = Delegator::new(self.exec.as_ref());
        let sandbox = self.sandbox(args, pod.as_ref());
        delegator.del_all(&sandbox, &attachments).await?;
        info!(container = %args.container_id, attachments = attachments.len(), "DEL complete");
        Ok(())
    }

    pub async fn check(&self, args: &CniArgs) -> Result<()> {
        debug!(container = %args.container_id, "CHECK");
        args.k8s_args()?;
        Ok(())
    }
}
