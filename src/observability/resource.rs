//! Attributes describing the process that produces telemetry.

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::config::ServiceConfig;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resource {
    attributes: Vec<(String, String)>,
}

impl Resource {
    /// `service.name` and `service.version` first, then the configured
    /// `key=value` pairs. A configured pair overrides a built-in key.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, String> {
        let mut resource = Self::default();
        resource.set("service.name", &config.name);
        resource.set("service.version", &config.version);
        for (key, value) in parse_attributes(&config.resource_attributes)? {
            resource.set(&key, &value);
        }
        Ok(resource)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.attributes.push((key.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn service_name(&self) -> &str {
        self.get("service.name").unwrap_or("unknown_service")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.attributes.len()))?;
        for (key, value) in &self.attributes {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Parse `key1=value1,key2=value2`. Whitespace around items is ignored and
/// empty items are skipped.
pub fn parse_attributes(raw: &str) -> Result<Vec<(String, String)>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(format!("invalid resource attribute '{}', expected key=value", item)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attributes() {
        let parsed = parse_attributes(" env=prod, region = eu-1 ,,").unwrap();
        assert_eq!(
            parsed,
            vec![
                ("env".to_string(), "prod".to_string()),
                ("region".to_string(), "eu-1".to_string())
            ]
        );
        assert!(parse_attributes("").unwrap().is_empty());
        assert!(parse_attributes("novalue").is_err());
        assert!(parse_attributes("=x").is_err());
    }

    #[test]
    fn test_configured_pairs_override_builtins() {
        let config = ServiceConfig {
            name: "echo-server".to_string(),
            version: "1.0.0".to_string(),
            resource_attributes: "service.name=renamed,team=obs".to_string(),
        };
        let resource = Resource::from_config(&config).unwrap();
        assert_eq!(resource.service_name(), "renamed");
        assert_eq!(resource.get("team"), Some("obs"));
        assert_eq!(
            serde_json::to_value(&resource).unwrap()["service.version"],
            "1.0.0"
        );
    }
}
