//! CNI configuration lists
//!
//! Plugin entries are kept as opaque JSON objects so that delegated
//! configuration reaches the plugin untouched apart from the explicit
//! subnet and NIC overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GenieError, Result};
use crate::netconf::DEFAULT_CNI_VERSION;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfList {
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,

    #[serde(default)]
    pub name: String,

    pub plugins: Vec<Map<String, Value>>,

    /// Top-level keys genie does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConfList {
    /// Parse a `.conflist` document
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let list: ConfList = serde_json::from_slice(bytes)
            .map_err(|e| GenieError::InvalidConfig(format!("invalid conflist: {}", e)))?;
        list.validate()?;
        Ok(list)
    }

    /// Parse a single-plugin `.conf` document and wrap it into a list
    pub fn from_conf_bytes(bytes: &[u8]) -> Result<Self> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(conf)) => Self::from_conf(conf),
            Ok(_) => Err(GenieError::InvalidConfig(
                "network configuration is not a JSON object".to_string(),
            )),
            Err(e) => Err(GenieError::InvalidConfig(format!("invalid conf: {}", e))),
        }
    }

    pub fn from_conf(conf: Map<String, Value>) -> Result<Self> {
        let str_field = |key: &str| {
            conf.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let list = ConfList {
            cni_version: str_field("cniVersion"),
            name: str_field("name"),
            plugins: vec![conf],
            extra: Map::new(),
        };
        list.validate()?;
        Ok(list)
    }

    /// Parse either form, defaulting `name` to `fallback_name` when absent
    pub fn parse_any(bytes: &[u8], fallback_name: &str) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| GenieError::InvalidConfig(format!("invalid network config: {}", e)))?;
        let mut list = match value {
            Value::Object(obj) if obj.contains_key("plugins") => {
                let list: ConfList = serde_json::from_value(Value::Object(obj))
                    .map_err(|e| GenieError::InvalidConfig(format!("invalid conflist: {}", e)))?;
                list.validate()?;
                list
            }
            Value::Object(obj) => Self::from_conf(obj)?,
            _ => {
                return Err(GenieError::InvalidConfig(
                    "network configuration is not a JSON object".to_string(),
                ))
            }
        };
        if list.name.trim().is_empty() {
            list.name = fallback_name.to_string();
        }
        Ok(list)
    }

    /// Load a `.conflist` or `.conf` file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let parsed = if path.extension().and_then(|e| e.to_str()) == Some("conflist") {
            Self::parse(&bytes)
        } else {
            Self::from_conf_bytes(&bytes)
        };
        parsed.map_err(|e| match e {
            GenieError::InvalidConfig(msg) => {
                GenieError::InvalidConfig(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn validate(&self) -> Result<()> {
        if self.plugins.is_empty() {
            return Err(GenieError::InvalidConfig(format!(
                "network {:?} has no plugins",
                self.name
            )));
        }
        for (idx, plugin) in self.plugins.iter().enumerate() {
            let plugin_type = plugin.get("type").and_then(Value::as_str).unwrap_or_default();
            if plugin_type.trim().is_empty() {
                return Err(GenieError::InvalidConfig(format!(
                    "network {:?} plugin {} has no type",
                    self.name, idx
                )));
            }
        }
        Ok(())
    }

    pub fn cni_version(&self) -> &str {
        match self.cni_version.trim() {
            "" => DEFAULT_CNI_VERSION,
            version => version,
        }
    }

    pub fn plugin_types(&self) -> Vec<&str> {
        self.plugins
            .iter()
            .filter_map(|p| p.get("type").and_then(Value::as_str))
            .collect()
    }

    /// Type of the first plugin, which names the attachment
    pub fn primary_type(&self) -> &str {
        self.plugin_types().first().copied().unwrap_or_default()
    }

    /// Rewrite the first plugin's `ipam.subnet`, keeping other ipam keys
    pub fn set_subnet(&mut self, subnet: &str) {
        let Some(plugin) = self.plugins.first_mut() else {
            return;
        };
        let ipam = plugin
            .entry("ipam")
            .or_insert_with(|| Value::Object(Map::new()));
        if !ipam.is_object() {
            *ipam = Value::Object(Map::new());
        }
        if let Value::Object(ipam) = ipam {
            ipam.insert("subnet".to_string(), Value::String(subnet.to_string()));
        }
    }

    /// Point the first plugin at `nic` when it already declares a `master`
    pub fn set_master(&mut self, nic: &str) -> bool {
        match self.plugins.first_mut() {
            Some(plugin) if plugin.contains_key("master") => {
                plugin.insert("master".to_string(), Value::String(nic.to_string()));
                true
            }
            _ => false,
        }
    }

    /// Capabilities declared by plugin `idx`
    pub fn capabilities(&self, idx: usize) -> Vec<&str> {
        self.plugins
            .get(idx)
            .and_then(|p| p.get("capabilities"))
            .and_then(Value::as_object)
            .map(|caps| {
                caps.iter()
                    .filter(|(_, enabled)| enabled.as_bool() == Some(true))
                    .map(|(cap, _)| cap.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WEAVE_CONFLIST: &str = r#"{
        "cniVersion": "0.3.0",
        "name": "weave",
        "disableCheck": true,
        "plugins": [
            {"type": "weave-net", "hairpinMode": true, "ipam": {"type": "host-local", "routes": [{"dst": "0.0.0.0/0"}]}},
            {"type": "portmap", "capabilities": {"portMappings": true}, "snat": true}
        ]
    }"#;

    #[test]
    fn test_roundtrip_preserves_order_and_extras() {
        let list = ConfList::parse(WEAVE_CONFLIST.as_bytes()).unwrap();
        assert_eq!(list.plugin_types(), vec!["weave-net", "portmap"]);

        let reparsed = ConfList::parse(&list.to_bytes().unwrap()).unwrap();
        assert_eq!(reparsed, list);
        assert_eq!(reparsed.extra["disableCheck"], json!(true));
        assert_eq!(reparsed.plugins[0]["hairpinMode"], json!(true));
    }

    #[test]
    fn test_rejects_empty_or_untyped_plugins() {
        assert!(ConfList::parse(br#"{"name": "x", "plugins": []}"#).is_err());
        assert!(ConfList::parse(br#"{"name": "x", "plugins": [{"type": ""}]}"#).is_err());
        assert!(ConfList::from_conf_bytes(br#"{"name": "x"}"#).is_err());
    }

    #[test]
    fn test_conf_wrapped_into_list() {
        let list =
            ConfList::from_conf_bytes(br#"{"cniVersion": "0.3.1", "name": "cbr0", "type": "flannel"}"#)
                .unwrap();
        assert_eq!(list.name, "cbr0");
        assert_eq!(list.cni_version(), "0.3.1");
        assert_eq!(list.primary_type(), "flannel");
    }

    #[test]
    fn test_parse_any_defaults_name() {
        let list = ConfList::parse_any(br#"{"type": "macvlan", "master": "eth0"}"#, "nad1").unwrap();
        assert_eq!(list.name, "nad1");

        let list = ConfList::parse_any(WEAVE_CONFLIST.as_bytes(), "nad2").unwrap();
        assert_eq!(list.name, "weave");
    }

    #[test]
    fn test_set_subnet_merges_ipam() {
        let mut list = ConfList::parse(WEAVE_CONFLIST.as_bytes()).unwrap();
        list.set_subnet("10.32.20.0/24");

        let ipam = &list.plugins[0]["ipam"];
        assert_eq!(ipam["subnet"], "10.32.20.0/24");
        assert_eq!(ipam["type"], "host-local");
        assert!(ipam["routes"].is_array());
        assert!(list.plugins[1].get("ipam").is_none());
    }

    #[test]
    fn test_set_subnet_creates_ipam() {
        let mut list = ConfList::from_conf_bytes(br#"{"name": "b", "type": "bridge"}"#).unwrap();
        list.set_subnet("10.10.0.0/16");
        assert_eq!(list.plugins[0]["ipam"], json!({"subnet": "10.10.0.0/16"}));
    }

    #[test]
    fn test_set_master_only_when_declared() {
        let mut macvlan =
            ConfList::from_conf_bytes(br#"{"name": "m", "type": "macvlan", "master": "eth0"}"#)
                .unwrap();
        assert!(macvlan.set_master("eth1"));
        assert_eq!(macvlan.plugins[0]["master"], "eth1");

        let mut weave = ConfList::parse(WEAVE_CONFLIST.as_bytes()).unwrap();
        assert!(!weave.set_master("eth1"));
        assert!(weave.plugins[0].get("master").is_none());
    }

    #[test]
    fn test_capabilities() {
        let list = ConfList::parse(WEAVE_CONFLIST.as_bytes()).unwrap();
        assert!(list.capabilities(0).is_empty());
        assert_eq!(list.capabilities(1), vec!["portMappings"]);
    }
}
