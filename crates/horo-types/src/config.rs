use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::resource::ResourceClass;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HoroConfig {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub notifications: NotificationPrefs,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub platform: Platform,
    /// Sound name attached to delivered notifications.
    #[serde(default)]
    pub sound: Option<String>,
}

/// Runtime target. Chosen once at startup; decides which notification sink
/// the relay uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Has an OS-level local-notification facility.
    #[default]
    Native,
    /// Browser-like target without one. Delivery degrades to a no-op.
    Web,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Web => write!(f, "web"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(Self::Native),
            "web" => Ok(Self::Web),
            _ => Err(ParseError::new("platform", s)),
        }
    }
}

/// User-facing notification switches: a master toggle plus one per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPrefs {
    pub enabled: bool,
    pub daily: bool,
    pub weekly: bool,
    pub monthly: bool,
}

impl NotificationPrefs {
    pub fn allows(&self, resource: ResourceClass) -> bool {
        self.enabled
            && match resource {
                ResourceClass::Daily => self.daily,
                ResourceClass::Weekly => self.weekly,
                ResourceClass::Monthly => self.monthly,
            }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Native,
            sound: Some("default".to_string()),
        }
    }
}

impl Default for NotificationPrefs {
    fn default() -> Self {
        Self {
            enabled: true,
            daily: true,
            weekly: true,
            monthly: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_allow_everything() {
        let prefs = NotificationPrefs::default();
        for rc in ResourceClass::ALL {
            assert!(prefs.allows(rc));
        }
    }

    #[test]
    fn master_switch_overrides_classes() {
        let prefs = NotificationPrefs {
            enabled: false,
            ..NotificationPrefs::default()
        };
        assert!(!prefs.allows(ResourceClass::Daily));
    }

    #[test]
    fn per_class_switch() {
        let prefs = NotificationPrefs {
            weekly: false,
            ..NotificationPrefs::default()
        };
        assert!(prefs.allows(ResourceClass::Daily));
        assert!(!prefs.allows(ResourceClass::Weekly));
        assert!(prefs.allows(ResourceClass::Monthly));
    }

    #[test]
    fn platform_parses() {
        assert_eq!("web".parse::<Platform>().unwrap(), Platform::Web);
        assert!("ios".parse::<Platform>().is_err());
    }
}
