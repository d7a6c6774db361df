//! Configuration loading and validation.
//!
//! Besides the manager and logging knobs, a configuration file can describe
//! interfaces and routes declaratively; [`SimpleNetlink::apply`] converges the
//! kernel onto that description.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use validator::{Validate, ValidationError};

use crate::kernel::{DEFAULT_NETNS_DIR, KernelTransport};
use crate::transport::NetlinkTransport;
use crate::types::{InterfaceKind, InterfaceSpec, IpvlanParams, KindName, LinkState, Namespace};
use crate::{DEFAULT_SETTLE_DELAY, Settings, SimpleNetlink};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl From<ConfigError> for common::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::IoError(e) => common::Error::Io(e),
            other => common::Error::config(other),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub manager: ManagerSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,

    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.manager.validate()?;
        self.logging.validate()?;
        for interface in &self.interfaces {
            interface.validate()?;
        }
        Ok(())
    }
}

/// Manager-specific settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ManagerSettings {
    /// Sleep after a namespace is deleted.
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_settle_delay")]
    pub settle_delay: Duration,

    /// Directory holding the bind-mounted namespace files.
    #[validate(custom = "validate_netns_dir")]
    pub netns_dir: PathBuf,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct LoggingSettings {
    pub level: Option<String>,
    #[validate(custom = "validate_log_format")]
    pub format: Option<String>,
}

/// One declared interface, mirroring the `ensure_interface_exists` inputs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InterfaceConfig {
    #[validate(length(min = 1, max = 15))]
    pub name: String,

    /// `tagged` or `ipvlan`. Without it the interface must already exist.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub parent_interface: Option<String>,

    #[serde(default)]
    #[validate(range(min = 1, max = 4094))]
    pub vlan_id: Option<u16>,

    #[serde(default)]
    pub namespace: Option<String>,

    /// `down` (any case) keeps the link down, anything else brings it up.
    #[serde(default)]
    pub link_state: Option<String>,

    #[serde(default)]
    pub ipv4: Vec<String>,
}

/// One declared static route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub prefix: Ipv4Net,
    pub nexthop: Ipv4Addr,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            netns_dir: PathBuf::from(DEFAULT_NETNS_DIR),
        }
    }
}

// Custom validators

fn validate_settle_delay(delay: &Duration) -> Result<(), ValidationError> {
    if *delay > Duration::from_secs(10) {
        return Err(ValidationError::new("settle_delay_out_of_range"));
    }
    Ok(())
}

fn validate_netns_dir(dir: &Path) -> Result<(), ValidationError> {
    if !dir.is_absolute() {
        return Err(ValidationError::new("netns_dir_not_absolute"));
    }
    Ok(())
}

fn validate_log_format(format: &str) -> Result<(), ValidationError> {
    match format.to_ascii_lowercase().as_str() {
        "json" | "text" => Ok(()),
        _ => Err(ValidationError::new("log_format_unknown")),
    }
}

// Configuration loading implementation

impl Config {
    /// Load configuration from default search paths
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/simple-netlink/config.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./simple-netlink.yaml"));

        paths.into_iter().find(|p| p.is_file())
    }

    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/simple-netlink/config.yaml"))
    }

    pub fn to_settings(&self) -> Settings {
        Settings {
            settle_delay: self.manager.settle_delay,
        }
    }

    /// Install the tracing subscriber described by the `logging` section.
    /// RUST_LOG still takes precedence over `logging.level`.
    pub fn init_logging(&self) {
        common::logging::init_with(self.logging.level.as_deref(), self.logging.format.as_deref());
    }

    /// Every declared interface as an [`InterfaceSpec`].
    pub fn interface_specs(&self) -> common::Result<Vec<InterfaceSpec>> {
        self.interfaces.iter().map(InterfaceSpec::try_from).collect()
    }
}

impl TryFrom<&InterfaceConfig> for InterfaceSpec {
    type Error = common::Error;

    fn try_from(config: &InterfaceConfig) -> common::Result<Self> {
        let kind = match config.kind.as_deref() {
            None => None,
            Some(name) => {
                let parent = config.parent_interface.clone().ok_or_else(|| {
                    common::Error::config(format!(
                        "parent_interface is required for {} interface {}",
                        name, config.name
                    ))
                })?;
                Some(match name.parse::<KindName>()? {
                    KindName::Tagged => {
                        let vlan_id = config.vlan_id.ok_or_else(|| {
                            common::Error::config(format!(
                                "vlan_id is required for tagged interface {}",
                                config.name
                            ))
                        })?;
                        InterfaceKind::tagged(parent, vlan_id)
                    }
                    KindName::Ipvlan => InterfaceKind::Ipvlan(IpvlanParams::new(parent)),
                })
            }
        };

        let ipv4 = config
            .ipv4
            .iter()
            .map(|prefix| {
                prefix.parse::<Ipv4Net>().map_err(|e| {
                    common::Error::config(format!(
                        "invalid IPv4 prefix '{}' on {}: {}",
                        prefix, config.name, e
                    ))
                })
            })
            .collect::<common::Result<Vec<_>>>()?;

        Ok(InterfaceSpec {
            name: config.name.clone(),
            kind,
            namespace: Namespace::from(config.namespace.clone()),
            link_state: LinkState::from_directive(config.link_state.as_deref()),
            ipv4,
        })
    }
}

impl SimpleNetlink<KernelTransport> {
    /// Create a root-namespace handle using the manager settings of `config`.
    pub fn from_config(config: &Config) -> common::Result<Self> {
        Self::with_transport(
            KernelTransport::new(config.manager.netns_dir.clone()),
            config.to_settings(),
            &Namespace::Root,
        )
    }
}

impl<T: NetlinkTransport> SimpleNetlink<T> {
    /// Ensure every declared interface, then add every declared route in its
    /// namespace.
    ///
    /// All interface entries are converted before anything is touched, so a
    /// malformed entry leaves the kernel unchanged. Route additions run in a
    /// scoped switch and leave the current namespace as it was.
    pub fn apply(&mut self, config: &Config) -> common::Result<()> {
        let specs = config.interface_specs()?;
        for spec in &specs {
            let location = self.ensure_interface_exists(spec)?;
            info!(interface = %spec.name, location = %location, "Interface converged");
        }

        for route in &config.routes {
            let namespace = Namespace::from(route.namespace.clone());
            let mut scope = self.with_namespace(&namespace)?;
            scope.add_route(route.prefix, route.nexthop)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::types::IpvlanMode;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.manager.settle_delay, Duration::from_millis(100));
        assert_eq!(config.manager.netns_dir, PathBuf::from("/var/run/netns"));
    }

    #[test]
    fn test_full_yaml_parsing() {
        let yaml = r#"
manager:
  settle_delay: 250ms
  netns_dir: /run/netns

logging:
  level: debug
  format: json

interfaces:
  - name: vlan100
    type: tagged
    parent_interface: eth0
    vlan_id: 100
    namespace: ns1
    ipv4:
      - 10.0.0.1/24
  - name: ipvl0
    type: ipvlan
    parent_interface: eth0
    link_state: DOWN

routes:
  - prefix: 0.0.0.0/0
    nexthop: 10.0.0.254
    namespace: ns1
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.manager.settle_delay, Duration::from_millis(250));
        assert_eq!(config.logging.format.as_deref(), Some("json"));

        let specs = config.interface_specs().unwrap();
        assert_eq!(specs[0].kind, Some(InterfaceKind::tagged("eth0", 100)));
        assert_eq!(specs[0].namespace, Namespace::named("ns1"));
        assert_eq!(specs[0].ipv4, vec!["10.0.0.1/24".parse::<Ipv4Net>().unwrap()]);

        assert_eq!(specs[1].namespace, Namespace::Root);
        assert_eq!(specs[1].link_state, LinkState::Down);
        match &specs[1].kind {
            Some(InterfaceKind::Ipvlan(params)) => assert_eq!(params.mode, IpvlanMode::L2),
            other => panic!("unexpected kind {:?}", other),
        }

        assert_eq!(config.routes[0].nexthop, "10.0.0.254".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
manager:
  settle_delay: 1s
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.manager.netns_dir, PathBuf::from(DEFAULT_NETNS_DIR));
        assert!(config.interfaces.is_empty());
        assert_eq!(config.to_settings().settle_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_settle_delay_too_large() {
        let yaml = r#"
manager:
  settle_delay: 15s  # Invalid: > 10s
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relative_netns_dir_is_rejected() {
        let yaml = r#"
manager:
  netns_dir: run/netns
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        assert!(validate_log_format("json").is_ok());
        assert!(validate_log_format("Text").is_ok());
        assert!(validate_log_format("xml").is_err());
    }

    #[test]
    fn test_vlan_id_out_of_range() {
        let yaml = r#"
interfaces:
  - name: vlan5000
    type: tagged
    parent_interface: eth0
    vlan_id: 5000
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tagged_without_vlan_id_is_config_error() {
        let yaml = r#"
interfaces:
  - name: vlan100
    type: tagged
    parent_interface: eth0
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.interface_specs().unwrap_err();
        assert!(matches!(err, common::Error::Config(_)));
        assert!(err.to_string().contains("vlan_id"));
    }

    #[test]
    fn test_missing_parent_is_config_error() {
        let yaml = r#"
interfaces:
  - name: ipvl0
    type: ipvlan
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.interface_specs().unwrap_err();
        assert!(err.to_string().contains("parent_interface"));
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let yaml = r#"
interfaces:
  - name: br0
    type: bridge
    parent_interface: eth0
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.interface_specs().unwrap_err();
        assert!(matches!(err, common::Error::Config(_)));
        assert!(err.to_string().contains("bridge"));
    }

    #[test]
    fn test_bad_prefix_is_config_error() {
        let yaml = r#"
interfaces:
  - name: eth1
    ipv4: [10.0.0.300/24]
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.interface_specs().unwrap_err();
        assert!(matches!(err, common::Error::Config(_)));
    }

    #[test]
    fn test_init_logging_from_config() {
        let yaml = r#"
logging:
  level: debug
  format: json
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        config.init_logging();
        assert!(tracing::dispatcher::has_been_set());

        // a second subscriber is ignored
        Config::default().init_logging();
        assert!(tracing::dispatcher::has_been_set());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "manager:\n  settle_delay: 50ms\ninterfaces:\n  - name: eth0\n    namespace: ns2"
        )
        .unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.manager.settle_delay, Duration::from_millis(50));
        assert_eq!(config.interfaces[0].namespace.as_deref(), Some("ns2"));
    }

    #[test]
    fn test_load_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "manager:\n  settle_delay: 1m").unwrap();

        let err = Config::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(matches!(common::Error::from(err), common::Error::Config(_)));
    }
}
