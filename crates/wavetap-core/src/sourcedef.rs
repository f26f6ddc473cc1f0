//! Source definition strings: `interface:key1=value1,key2=value2,...`.
//!
//! The interface names the radio or input; the options tune the capture.
//! Unrecognized keys are retained and ignored so definitions stay forward
//! compatible across capture binaries.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceDefError {
    #[error("empty source definition")]
    Empty,
    #[error("source option {key:?} has a malformed value {value:?}")]
    BadValue { key: String, value: String },
}

/// A parsed source definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceDefinition {
    pub interface: String,
    options: Vec<(String, String)>,
}

impl SourceDefinition {
    /// Split on the first `:`, then split the tail on `,` into key=value
    /// pairs.  Values are opaque strings; a bare word becomes a key with an
    /// empty value.
    pub fn parse(definition: &str) -> Result<Self, SourceDefError> {
        let definition = definition.trim();
        if definition.is_empty() {
            return Err(SourceDefError::Empty);
        }

        let (interface, tail) = match definition.split_once(':') {
            Some((interface, tail)) => (interface, Some(tail)),
            None => (definition, None),
        };

        if interface.is_empty() {
            return Err(SourceDefError::Empty);
        }

        let mut options = Vec::new();
        if let Some(tail) = tail {
            for part in tail.split(',') {
                if part.is_empty() {
                    continue;
                }
                match part.split_once('=') {
                    Some((key, value)) => {
                        options.push((key.trim().to_string(), value.trim().to_string()));
                    }
                    None => options.push((part.trim().to_string(), String::new())),
                }
            }
        }

        Ok(Self {
            interface: interface.to_string(),
            options,
        })
    }

    /// First value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Boolean option: `true`/`false`, defaulting when absent.  Malformed
    /// values are an error rather than silently defaulting.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, SourceDefError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) if value.eq_ignore_ascii_case("true") => Ok(true),
            Some(value) if value.eq_ignore_ascii_case("false") => Ok(false),
            Some(value) => Err(SourceDefError::BadValue {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    pub fn get_u32(&self, key: &str) -> Result<Option<u32>, SourceDefError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| SourceDefError::BadValue {
                    key: key.to_string(),
                    value: value.to_string(),
                }),
        }
    }

    pub fn get_f64(&self, key: &str) -> Result<Option<f64>, SourceDefError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| SourceDefError::BadValue {
                    key: key.to_string(),
                    value: value.to_string(),
                }),
        }
    }

    /// All options in definition order, for logging.
    pub fn options(&self) -> &[(String, String)] {
        &self.options
    }
}

impl std::fmt::Display for SourceDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.interface)?;
        for (i, (key, value)) in self.options.iter().enumerate() {
            write!(f, "{}{key}={value}", if i == 0 { ':' } else { ',' })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_definition_parses() {
        let def = SourceDefinition::parse(
            "wlan0:name=office,channel=6,fcsfail=true,uuid=aaaa-bbbb,pps=100",
        )
        .unwrap();

        assert_eq!(def.interface, "wlan0");
        assert_eq!(def.get("name"), Some("office"));
        assert_eq!(def.get("channel"), Some("6"));
        assert!(def.get_bool("fcsfail", false).unwrap());
        assert_eq!(def.get_u32("pps").unwrap(), Some(100));
        assert_eq!(def.get("missing"), None);
    }

    #[test]
    fn bare_interface_is_valid() {
        let def = SourceDefinition::parse("rtl433-0").unwrap();
        assert_eq!(def.interface, "rtl433-0");
        assert!(def.options().is_empty());
    }

    #[test]
    fn unknown_keys_are_kept_and_ignored() {
        let def = SourceDefinition::parse("hci0:frobnicate=9,device=/dev/ttyUSB0").unwrap();
        assert_eq!(def.get("frobnicate"), Some("9"));
        assert_eq!(def.get("device"), Some("/dev/ttyUSB0"));
    }

    #[test]
    fn malformed_values_are_errors() {
        let def = SourceDefinition::parse("wlan0:fcsfail=maybe,pps=lots").unwrap();
        assert!(def.get_bool("fcsfail", false).is_err());
        assert!(def.get_u32("pps").is_err());
        assert!(def.get_bool("plcpfail", true).unwrap());
    }

    #[test]
    fn empty_definitions_are_rejected() {
        assert!(SourceDefinition::parse("").is_err());
        assert!(SourceDefinition::parse("   ").is_err());
        assert!(SourceDefinition::parse(":name=x").is_err());
    }

    #[test]
    fn display_round_trips() {
        let text = "wlan0:name=office,channel=6";
        let def = SourceDefinition::parse(text).unwrap();
        assert_eq!(def.to_string(), text);
        assert_eq!(SourceDefinition::parse(&def.to_string()).unwrap(), def);
    }
}
