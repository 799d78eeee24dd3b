//! JSON configuration files: the tag list and the role mapping.

use scada_core::{
    DescriptorError, Endpoint, Layout, RegionKind, Role, RoleMap, Slot, TagDescriptor,
    TagRegistry, ValueKind,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const TAG_FILE_VERSION: &str = "1.0";
pub const ROLE_FILE_VERSION: &str = "1.1";
pub const DEFAULT_TAG_FILE: &str = "plc_tags_config.json";
pub const DEFAULT_ROLE_FILE: &str = "gasificado_config.json";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("tag {name}: {source}")]
    Tag {
        name: String,
        #[source]
        source: DescriptorError,
    },
    #[error("tag {name}: unknown {field} {code:?}")]
    UnknownCode {
        name: String,
        field: &'static str,
        code: String,
    },
    #[error("tag {0} is defined more than once")]
    DuplicateTag(String),
    #[error("missing required role(s): {}", .0.join(", "))]
    MissingRoles(Vec<&'static str>),
}

fn now_stamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|err| ConfigError::Malformed {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let text = serde_json::to_string_pretty(value).map_err(|err| ConfigError::Malformed {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    std::fs::write(path, text).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlcConnectionConfig {
    #[serde(default = "default_ip")]
    pub ip_address: String,
    #[serde(default)]
    pub rack: u16,
    #[serde(default = "default_slot")]
    pub slot: u16,
}

fn default_ip() -> String {
    "192.168.0.1".to_string()
}

fn default_slot() -> u16 {
    1
}

impl Default for PlcConnectionConfig {
    fn default() -> Self {
        Self {
            ip_address: default_ip(),
            rack: 0,
            slot: default_slot(),
        }
    }
}

impl PlcConnectionConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip_address.clone(), self.rack, self.slot)
    }
}

/// One row of the tag file, as written on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntry {
    pub name: String,
    pub tag_type: String,
    pub address: u32,
    pub data_type: String,
    #[serde(default)]
    pub bit: Option<u8>,
    #[serde(default)]
    pub db_number: Option<u16>,
}

impl TagEntry {
    pub fn to_descriptor(&self) -> Result<TagDescriptor, ConfigError> {
        let unknown = |field: &'static str, code: &str| ConfigError::UnknownCode {
            name: self.name.clone(),
            field,
            code: code.to_string(),
        };
        let region = RegionKind::from_code(&self.tag_type)
            .ok_or_else(|| unknown("tag_type", &self.tag_type))?;
        let value = ValueKind::from_code(&self.data_type)
            .ok_or_else(|| unknown("data_type", &self.data_type))?;
        TagDescriptor::new(
            self.name.clone(),
            region,
            value,
            self.address,
            self.bit,
            self.db_number,
        )
        .map_err(|source| ConfigError::Tag {
            name: self.name.clone(),
            source,
        })
    }

    pub fn from_descriptor(descriptor: &TagDescriptor) -> Self {
        Self {
            name: descriptor.name().to_string(),
            tag_type: descriptor.region_kind().code().to_string(),
            address: descriptor.byte_offset(),
            data_type: descriptor.value_kind().code().to_string(),
            bit: descriptor.bit_offset(),
            db_number: descriptor.block_number(),
        }
    }
}

/// `plc_tags_config.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagConfigFile {
    #[serde(default)]
    pub plc_connection: Option<PlcConnectionConfig>,
    #[serde(default)]
    pub tags: Vec<TagEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_saved: Option<String>,
}

impl TagConfigFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file: Self = read_json(path)?;
        info!(path = %path.display(), tags = file.tags.len(), "tag configuration loaded");
        Ok(file)
    }

    /// Writes pretty JSON stamped with the current version and local time.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        self.version = Some(TAG_FILE_VERSION.to_string());
        self.last_saved = Some(now_stamp());
        write_json(path, self)?;
        info!(path = %path.display(), tags = self.tags.len(), "tag configuration saved");
        Ok(())
    }

    /// Validates every entry and builds the registry, keeping file order.
    pub fn registry(&self) -> Result<TagRegistry, ConfigError> {
        let mut registry = TagRegistry::new();
        for entry in &self.tags {
            let descriptor = entry.to_descriptor()?;
            if registry.contains(descriptor.name()) {
                return Err(ConfigError::DuplicateTag(descriptor.name().to_string()));
            }
            registry.insert_or_replace(descriptor);
        }
        Ok(registry)
    }

    pub fn from_registry(registry: &TagRegistry, connection: Option<PlcConnectionConfig>) -> Self {
        Self {
            plc_connection: connection,
            tags: registry.iter().map(TagEntry::from_descriptor).collect(),
            version: Some(TAG_FILE_VERSION.to_string()),
            last_saved: None,
        }
    }
}

/// Distinguishes a key written as `null` from a key left out.
fn present<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Option<String>>, D::Error> {
    Option::<String>::deserialize(de).map(Some)
}

/// The six role keys of one chamber (or of the single-chamber screen).
///
/// Outer `None`: key absent from the file. `Some(None)`: explicitly cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignments {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub start_tag: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub stop_tag: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub ppm_tag: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub alerta_tag: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub confirm_tag: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub set1_tag: Option<Option<String>>,
}

impl RoleAssignments {
    fn field(&self, role: Role) -> &Option<Option<String>> {
        match role {
            Role::Start => &self.start_tag,
            Role::Stop => &self.stop_tag,
            Role::Ppm => &self.ppm_tag,
            Role::Alarm => &self.alerta_tag,
            Role::Confirm => &self.confirm_tag,
            Role::Setpoint => &self.set1_tag,
        }
    }

    /// The tag named for `role`, if any. Empty names count as unassigned.
    pub fn get(&self, role: Role) -> Option<&str> {
        self.entry(role).flatten()
    }

    /// `None` when the key is absent, `Some(None)` when it is cleared.
    pub fn entry(&self, role: Role) -> Option<Option<&str>> {
        self.field(role)
            .as_ref()
            .map(|tag| tag.as_deref().filter(|name| !name.is_empty()))
    }

    /// Writes the key explicitly; `None` saves as `null`.
    pub fn set(&mut self, role: Role, tag: Option<String>) {
        let field = match role {
            Role::Start => &mut self.start_tag,
            Role::Stop => &mut self.stop_tag,
            Role::Ppm => &mut self.ppm_tag,
            Role::Alarm => &mut self.alerta_tag,
            Role::Confirm => &mut self.confirm_tag,
            Role::Setpoint => &mut self.set1_tag,
        };
        *field = Some(tag);
    }
}

/// `gasificado_config.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMappingFile {
    #[serde(flatten)]
    pub single: RoleAssignments,
    /// Per-chamber overrides keyed by chamber number. A listed chamber takes
    /// its roles from here only; unlisted chambers follow the naming
    /// convention.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub chambers: BTreeMap<u8, RoleAssignments>,
    #[serde(default)]
    pub plc_connection: Option<PlcConnectionConfig>,
    #[serde(default)]
    pub last_saved: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl RoleMappingFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file: Self = read_json(path)?;
        debug!(path = %path.display(), "role mapping loaded");
        Ok(file)
    }

    /// A missing file is not an error: defaults apply.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Option<Self>, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "no role mapping file, using defaults");
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        self.version = Some(ROLE_FILE_VERSION.to_string());
        self.last_saved = Some(now_stamp());
        write_json(path, self)?;
        info!(path = %path.display(), "role mapping saved");
        Ok(())
    }

    /// Builds the role map for `layout`, starting from the defaults.
    ///
    /// Single-chamber keys override the defaults one at a time: a key left
    /// out of the file keeps its default, a `null` key clears it.
    pub fn role_map(&self, layout: Layout, registry: &TagRegistry) -> RoleMap {
        match layout {
            Layout::Single | Layout::Tags => {
                let mut map = RoleMap::single_defaults(registry);
                for role in Role::ALL {
                    let slot = Slot::single(role);
                    match self.single.entry(role) {
                        Some(Some(tag)) => {
                            map.assign(slot, tag);
                        }
                        Some(None) => {
                            map.unassign(slot);
                        }
                        None => {}
                    }
                }
                map
            }
            Layout::Chambers(n) => {
                let mut map = RoleMap::conventional(n, registry);
                for (&chamber, roles) in self.chambers.iter().filter(|(c, _)| (1..=n).contains(*c)) {
                    for role in Role::ALL {
                        let slot = Slot::chamber(chamber, role);
                        match roles.get(role) {
                            Some(tag) => map.assign(slot, tag),
                            None => map.unassign(slot),
                        };
                    }
                }
                map
            }
        }
    }

    /// Captures `roles` for saving, keeping the connection block.
    ///
    /// Single-chamber layouts write all six keys so an unassigned role
    /// reloads as unassigned rather than falling back to its default.
    pub fn from_role_map(
        roles: &RoleMap,
        layout: Layout,
        connection: Option<PlcConnectionConfig>,
    ) -> Self {
        let mut file = Self {
            plc_connection: connection,
            ..Self::default()
        };
        if layout.is_single_mapping() {
            for role in Role::ALL {
                file.single.set(role, None);
            }
        }
        for (slot, tag) in roles.iter() {
            match slot.chamber {
                None => file.single.set(slot.role, Some(tag.to_string())),
                Some(chamber) => file
                    .chambers
                    .entry(chamber)
                    .or_default()
                    .set(slot.role, Some(tag.to_string())),
            }
        }
        file
    }

    /// Single-chamber mappings must name start, alarm and confirm tags.
    pub fn validate_single(&self) -> Result<(), ConfigError> {
        let missing: Vec<&'static str> = [Role::Start, Role::Alarm, Role::Confirm]
            .into_iter()
            .filter(|role| self.single.get(*role).is_none())
            .map(Role::mapping_key)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingRoles(missing))
        }
    }
}
