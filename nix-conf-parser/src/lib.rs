//! Parse the evaluator configuration reported by `nix config show`.
//!
//! Both output formats are supported:
//!
//! - the plain `key = value` listing, closely following the upstream parser
//!   (<https://github.com/NixOS/nix/blob/acb60fc3594edcc54dae9a10d2a0dc3f3b3be0da/src/libutil/config.cc#L104-L161>),
//!   minus includes, which `nix config show` never prints;
//! - the `--json` form, where every setting is an object with a `value` field.
//!
//! Either way the result is an ordered map of settings, with typed accessors for the
//! settings the evaluation cache cares about.
use indexmap::IndexMap;
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NixConf {
    settings: IndexMap<String, String>,
}

impl NixConf {
    pub fn parse_stdout(input: &[u8]) -> Result<Self, ParseError> {
        let input = String::from_utf8_lossy(input);
        Self::parse_str(&input)
    }

    /// Parse `key = value` lines into an ordered map of settings.
    pub fn parse_str(input: &str) -> Result<Self, ParseError> {
        let mut settings = IndexMap::new();

        for mut line in input.lines() {
            if let Some(pos) = line.find('#') {
                line = &line[..pos];
            }

            let tokens = line.split_whitespace().collect::<Vec<_>>();
            if tokens.is_empty() {
                continue;
            }

            if tokens.len() < 2 {
                return Err(ParseError::IllegalConfiguration(line.to_string()));
            }

            match tokens[0] {
                "include" | "!include" => continue,
                _ => {}
            }

            if tokens[1] != "=" {
                return Err(ParseError::IllegalConfiguration(line.to_string()));
            }

            settings.insert(tokens[0].to_string(), tokens[2..].join(" "));
        }

        Ok(Self { settings })
    }

    /// Parse the output of `nix config show --json`.
    ///
    /// Lists are flattened to space-separated strings and booleans to `true`/`false`,
    /// matching the plain listing.
    pub fn parse_json(input: &[u8]) -> Result<Self, ParseError> {
        let raw: IndexMap<String, serde_json::Value> =
            serde_json::from_slice(input).map_err(|e| ParseError::Json(e.to_string()))?;

        let mut settings = IndexMap::new();
        for (name, setting) in raw {
            let value = match setting.get("value") {
                Some(value) => value,
                None => return Err(ParseError::MissingValue(name)),
            };
            settings.insert(name, flatten(value));
        }

        Ok(Self { settings })
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.settings.get(key)
    }

    /// A whitespace-separated list setting, merged with its `extra-` counterpart.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        [key.to_string(), format!("extra-{key}")]
            .iter()
            .filter_map(|k| self.settings.get(k))
            .flat_map(|value| value.split_whitespace().map(str::to_string))
            .collect()
    }

    pub fn settings(&self) -> &IndexMap<String, String> {
        &self.settings
    }

    /// The typed view of the settings relevant to evaluation.
    pub fn to_config(&self) -> NixConfig {
        NixConfig {
            store: self.get("store").cloned().unwrap_or_else(|| "auto".to_string()),
            substituters: self.get_list("substituters"),
            trusted_public_keys: self.get_list("trusted-public-keys"),
            experimental_features: self.get_list("experimental-features"),
            system: self.get("system").cloned(),
            raw: self.clone(),
        }
    }
}

/// Evaluator configuration as reported by `nix config show`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NixConfig {
    /// The store URI, `auto` when unset.
    pub store: String,
    pub substituters: Vec<String>,
    pub trusted_public_keys: Vec<String>,
    pub experimental_features: Vec<String>,
    pub system: Option<String>,
    pub raw: NixConf,
}

impl NixConfig {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.experimental_features.iter().any(|f| f == feature)
    }
}

fn flatten(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(flatten)
            .collect::<Vec<_>>()
            .join(" "),
        serde_json::Value::Null => String::new(),
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}={}", flatten(v)))
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

#[derive(Debug, Diagnostic, Error)]
pub enum ParseError {
    #[error("illegal configuration line '{0}'")]
    IllegalConfiguration(String),
    #[error("invalid configuration JSON: {0}")]
    Json(String),
    #[error("setting '{0}' has no value")]
    MissingValue(String),
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse() {
        let input = r#"
            # This is a comment
            include /etc/nixos/hardware-configuration.nix
            !include /etc/nixos/hardware-configuration.nix
            single = foo
            space  =  foo   bar 
            list = foo bar baz
            comment = foo # comment
            tab =	 foo 
        "#;
        let nix_conf = NixConf::parse_str(input).unwrap();
        assert_eq!(nix_conf.get("single"), Some(&"foo".into()));
        assert_eq!(nix_conf.get("space"), Some(&"foo bar".into()));
        assert_eq!(nix_conf.get("list"), Some(&"foo bar baz".into()));
        assert_eq!(nix_conf.get("comment"), Some(&"foo".into()));
        assert_eq!(nix_conf.get("tab"), Some(&"foo".into()));
    }

    #[test]
    fn test_parse_stdout_is_lossy() {
        let conf = NixConf::parse_stdout(b"cores = 4\nsystem = x86_64-linux\n").unwrap();
        assert_eq!(conf.get("cores").map(String::as_str), Some("4"));

        let conf = NixConf::parse_stdout(b"name = caf\xe9\n").unwrap();
        assert_eq!(conf.get("name").map(String::as_str), Some("caf\u{fffd}"));
    }

    #[test]
    fn test_illegal_line() {
        assert!(matches!(
            NixConf::parse_str("lonely"),
            Err(ParseError::IllegalConfiguration(_))
        ));
        assert!(matches!(
            NixConf::parse_str("a : b"),
            Err(ParseError::IllegalConfiguration(_))
        ));
    }

    #[test]
    fn test_parse_json() {
        let input = br#"{
            "store": { "value": "daemon", "defaultValue": "auto", "description": "" },
            "substituters": { "value": ["https://cache.nixos.org/"], "defaultValue": [] },
            "extra-substituters": { "value": ["https://example.cachix.org"] },
            "experimental-features": { "value": ["flakes", "nix-command"] },
            "sandbox": { "value": true },
            "max-jobs": { "value": 8 }
        }"#;
        let conf = NixConf::parse_json(input).unwrap();
        assert_eq!(conf.get("sandbox"), Some(&"true".into()));
        assert_eq!(conf.get("max-jobs"), Some(&"8".into()));

        let config = conf.to_config();
        assert_eq!(config.store, "daemon");
        assert_eq!(
            config.substituters,
            vec!["https://cache.nixos.org/", "https://example.cachix.org"]
        );
        assert!(config.has_feature("flakes"));
        assert!(!config.has_feature("ca-derivations"));
    }

    #[test]
    fn test_parse_json_missing_value() {
        assert!(matches!(
            NixConf::parse_json(br#"{ "store": { "description": "" } }"#),
            Err(ParseError::MissingValue(name)) if name == "store"
        ));
        assert!(matches!(
            NixConf::parse_json(b"not json"),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn test_config_defaults() {
        let config = NixConf::parse_str("experimental-features = nix-command flakes")
            .unwrap()
            .to_config();
        assert_eq!(config.store, "auto");
        assert!(config.substituters.is_empty());
        assert_eq!(config.experimental_features, vec!["nix-command", "flakes"]);
    }
}
