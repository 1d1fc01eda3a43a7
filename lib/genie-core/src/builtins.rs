//! Built-in configurations synthesized for plugins with no file in the
//! CNI directory

use serde_json::{json, Value};

pub const BUILTIN_PLUGINS: [&str; 3] = ["bridge", "macvlan", "sriov"];

pub fn is_builtin(plugin: &str) -> bool {
    BUILTIN_PLUGINS.contains(&plugin)
}

/// File name a synthesized config is persisted under
pub fn file_name(plugin: &str) -> String {
    format!("10-{}.conf", plugin)
}

pub fn synthesize(plugin: &str) -> Option<Value> {
    let conf = match plugin {
        "bridge" => json!({
            "name": "mybridgenet",
            "type": "bridge",
            "ipam": {
                "type": "host-local",
                "subnet": "10.10.0.1/16"
            }
        }),
        "macvlan" => json!({
            "name": "macvlannet",
            "type": "macvlan",
            "master": "eth0",
            "ipam": {
                "type": "host-local",
                "subnet": "10.10.0.0/16"
            }
        }),
        "sriov" => json!({
            "name": "sriovnet",
            "type": "sriov",
            "master": "eth0",
            "ipam": {
                "type": "fixipam",
                "subnet": "10.55.206.0/26",
                "routes": [{"dst": "0.0.0.0/0"}],
                "gateway": "10.55.206.1"
            }
        }),
        _ => return None,
    };
    Some(conf)
}
