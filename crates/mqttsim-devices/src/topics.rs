//! Topic namespace.
//!
//! | purpose   | topic                        |
//! |-----------|------------------------------|
//! | command   | `{ns}/{type}/{id}/set`       |
//! | state     | `{ns}/{type}/{id}/state`     |
//! | status    | `{ns}/{type}/{id}/status`    |
//! | discovery | `{ns}/discovery/{type}/{id}` |

use serde::{Deserialize, Serialize};

/// Topic builder bound to one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    ns: String,
}

/// All topics of a single device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTopics {
    pub cmd: String,
    pub state: String,
    pub status: String,
    pub discovery: String,
}

impl Topics {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            ns: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.ns
    }

    pub fn cmd(&self, device_type: &str, id: &str) -> String {
        format!("{}/{}/{}/set", self.ns, device_type, id)
    }

    pub fn state(&self, device_type: &str, id: &str) -> String {
        format!("{}/{}/{}/state", self.ns, device_type, id)
    }

    pub fn status(&self, device_type: &str, id: &str) -> String {
        format!("{}/{}/{}/status", self.ns, device_type, id)
    }

    pub fn discovery(&self, device_type: &str, id: &str) -> String {
        format!("{}/discovery/{}/{}", self.ns, device_type, id)
    }

    pub fn device(&self, device_type: &str, id: &str) -> DeviceTopics {
        DeviceTopics {
            cmd: self.cmd(device_type, id),
            state: self.state(device_type, id),
            status: self.status(device_type, id),
            discovery: self.discovery(device_type, id),
        }
    }

    /// Subscription pattern matching every device command topic.
    pub fn command_wildcard(&self) -> String {
        format!("{}/+/+/set", self.ns)
    }

    pub fn service_status(&self) -> String {
        format!("{}/service/status", self.ns)
    }

    pub fn service_birth(&self) -> String {
        format!("{}/service/birth", self.ns)
    }

    /// Split a command topic into `(type, id)`.
    ///
    /// Returns `None` for anything that is not `{ns}/{type}/{id}/set`.
    pub fn parse_command<'a>(&self, topic: &'a str) -> Option<(&'a str, &'a str)> {
        let parts: Vec<&str> = topic.split('/').collect();
        match parts.as_slice() {
            [ns, device_type, id, "set"]
                if *ns == self.ns && !device_type.is_empty() && !id.is_empty() =>
            {
                Some((*device_type, *id))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_topics() {
        let t = Topics::new("sim");
        let d = t.device("sensor.temp", "abc");
        assert_eq!(d.cmd, "sim/sensor.temp/abc/set");
        assert_eq!(d.state, "sim/sensor.temp/abc/state");
        assert_eq!(d.status, "sim/sensor.temp/abc/status");
        assert_eq!(d.discovery, "sim/discovery/sensor.temp/abc");
        assert_eq!(t.command_wildcard(), "sim/+/+/set");
        assert_eq!(t.service_status(), "sim/service/status");
        assert_eq!(t.service_birth(), "sim/service/birth");
    }

    #[test]
    fn test_parse_command() {
        let t = Topics::new("sim");
        assert_eq!(t.parse_command("sim/light/abc/set"), Some(("light", "abc")));
        assert_eq!(t.parse_command("sim/light/abc/state"), None);
        assert_eq!(t.parse_command("other/light/abc/set"), None);
        assert_eq!(t.parse_command("sim/light/set"), None);
        assert_eq!(t.parse_command("sim/light/abc/extra/set"), None);
        assert_eq!(t.parse_command("sim//abc/set"), None);
    }
}
