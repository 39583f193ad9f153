//! Built-in stage handlers
//!
//! Reference implementations for every capability. They work purely on the
//! request data; nothing here talks to a hypervisor.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::StageHandler;
use crate::models::{Context, Stage, StageOutput};
use crate::state::Capability;
use crate::utils::errors::{FlowError, HandlerError, Result};

/// VM naming rule
pub const VM_NAME_PATTERN: &str = r"^[a-zA-Z][a-zA-Z0-9_-]*$";

pub const DEFAULT_VM_NAME: &str = "provisionflow-vm-001";
pub const DEFAULT_OS_TYPE: &str = "ubuntu";
pub const DEFAULT_CPU_CORES: i64 = 2;
pub const DEFAULT_MEMORY_GB: i64 = 4;
pub const DEFAULT_DISK_GB: i64 = 20;

const REQUIRED_FIELDS: [&str; 5] = ["vm_name", "os_type", "cpu_cores", "memory_gb", "disk_gb"];

const CPU_CORES_RANGE: (i64, i64) = (1, 64);
const MEMORY_GB_RANGE: (i64, i64) = (1, 512);
const DISK_GB_RANGE: (i64, i64) = (10, 4096);

type HandlerResult = std::result::Result<StageOutput, HandlerError>;

fn output<I>(pairs: I) -> StageOutput
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Look a key up in the input first, then in the context
fn lookup<'a>(input: &'a Value, context: &'a Context, key: &str) -> Option<&'a Value> {
    input
        .get(key)
        .filter(|value| !value.is_null())
        .or_else(|| context.get(key))
}

fn string_field(input: &Value, context: &Context, key: &str) -> Option<String> {
    lookup(input, context, key).and_then(Value::as_str).map(str::to_string)
}

fn int_field(input: &Value, context: &Context, key: &str) -> Option<i64> {
    lookup(input, context, key).and_then(Value::as_i64)
}

/// Collects the VM request, filling defaults for anything not supplied
#[derive(Debug, Clone, Default)]
pub struct DataCollectionHandler;

impl DataCollectionHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageHandler for DataCollectionHandler {
    fn capability(&self) -> Capability {
        Capability::DataCollection
    }

    async fn handle(&self, stage: Stage, context: &Context, input: &Value) -> HandlerResult {
        if !(input.is_object() || input.is_null()) {
            return Err(HandlerError::retry("request input must be a JSON object"));
        }

        // values from the start request survive a later advance without input
        let field = |key: &str, default: Value| lookup(input, context, key).cloned().unwrap_or(default);

        let collected = output([
            ("vm_name", field("vm_name", json!(DEFAULT_VM_NAME))),
            ("os_type", field("os_type", json!(DEFAULT_OS_TYPE))),
            ("cpu_cores", field("cpu_cores", json!(DEFAULT_CPU_CORES))),
            ("memory_gb", field("memory_gb", json!(DEFAULT_MEMORY_GB))),
            ("disk_gb", field("disk_gb", json!(DEFAULT_DISK_GB))),
            ("software", field("software", json!([]))),
            ("collection_status", json!("completed")),
        ]);

        debug!(stage = %stage, fields = collected.len(), "Collected VM request");
        Ok(collected)
    }
}

/// Checks the request against naming and resource rules
#[derive(Debug, Clone)]
pub struct ValidationHandler {
    name_pattern: Regex,
}

impl ValidationHandler {
    pub fn new() -> Result<Self> {
        let name_pattern = Regex::new(VM_NAME_PATTERN)
            .map_err(|e| FlowError::Config(format!("Invalid VM name pattern: {}", e)))?;
        Ok(Self { name_pattern })
    }

    /// Every rule violation found in the request
    pub fn issues(&self, context: &Context, input: &Value) -> Vec<String> {
        let mut issues = Vec::new();

        for field in REQUIRED_FIELDS {
            if lookup(input, context, field).is_none() {
                issues.push(format!("{} is required", field));
            }
        }

        if let Some(name) = lookup(input, context, "vm_name") {
            match name.as_str() {
                Some(name) if self.name_pattern.is_match(name) => {}
                Some(name) => issues.push(format!(
                    "vm_name {:?} must start with a letter and contain only letters, digits, '-' or '_'",
                    name
                )),
                None => issues.push("vm_name must be a string".to_string()),
            }
        }

        for (field, (min, max)) in [
            ("cpu_cores", CPU_CORES_RANGE),
            ("memory_gb", MEMORY_GB_RANGE),
            ("disk_gb", DISK_GB_RANGE),
        ] {
            let Some(value) = lookup(input, context, field) else {
                continue;
            };
            match value.as_i64() {
                Some(n) if (min..=max).contains(&n) => {}
                Some(n) => issues.push(format!("{} must be between {} and {}, got {}", field, min, max, n)),
                None => issues.push(format!("{} must be an integer", field)),
            }
        }

        issues
    }
}

#[async_trait]
impl StageHandler for ValidationHandler {
    fn capability(&self) -> Capability {
        Capability::Validation
    }

    async fn handle(&self, stage: Stage, context: &Context, input: &Value) -> HandlerResult {
        let issues = self.issues(context, input);
        if !issues.is_empty() {
            return Err(HandlerError::retry(issues.join("; ")));
        }

        let mut validated = output([
            ("validation_status", json!("passed")),
            ("validated_fields", json!(REQUIRED_FIELDS)),
        ]);
        // corrections supplied at this stage replace the collected values
        for field in REQUIRED_FIELDS {
            if let Some(value) = input.get(field).filter(|v| !v.is_null()) {
                validated.insert(field.to_string(), value.clone());
            }
        }

        debug!(stage = %stage, "VM request validated");
        Ok(validated)
    }
}

/// Generates the VM placement configuration
#[derive(Debug, Clone)]
pub struct ConfigurationHandler {
    node: String,
    base_vm_id: i64,
}

impl ConfigurationHandler {
    pub fn new() -> Self {
        Self {
            node: "pve-node1".to_string(),
            base_vm_id: 1000,
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }
}

impl Default for ConfigurationHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageHandler for ConfigurationHandler {
    fn capability(&self) -> Capability {
        Capability::Configuration
    }

    async fn handle(&self, stage: Stage, context: &Context, input: &Value) -> HandlerResult {
        let (Some(name), Some(os_type)) = (
            string_field(input, context, "vm_name"),
            string_field(input, context, "os_type"),
        ) else {
            return Err(HandlerError::fatal("validated request is missing vm_name or os_type"));
        };

        let cores = int_field(input, context, "cpu_cores").unwrap_or(DEFAULT_CPU_CORES);
        let memory_gb = int_field(input, context, "memory_gb").unwrap_or(DEFAULT_MEMORY_GB);
        let disk_gb = int_field(input, context, "disk_gb").unwrap_or(DEFAULT_DISK_GB);
        let node = string_field(input, context, "node").unwrap_or_else(|| self.node.clone());
        let vm_id = int_field(input, context, "vm_id").unwrap_or(self.base_vm_id + 1);

        info!(stage = %stage, vm_name = %name, node = %node, vm_id = vm_id, "Generated VM configuration");
        Ok(output([
            (
                "vm_config",
                json!({
                    "vm_id": vm_id,
                    "name": name,
                    "node": node,
                    "template": format!("{}-cloud", os_type),
                    "cores": cores,
                    "memory_mb": memory_gb.saturating_mul(1024),
                    "disk": format!("{}G", disk_gb),
                }),
            ),
            ("config_status", json!("generated")),
        ]))
    }
}

/// Plans the packages to install on the machine
#[derive(Debug, Clone, Default)]
pub struct SoftwareProvisioningHandler;

impl SoftwareProvisioningHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageHandler for SoftwareProvisioningHandler {
    fn capability(&self) -> Capability {
        Capability::SoftwareProvisioning
    }

    async fn handle(&self, stage: Stage, context: &Context, input: &Value) -> HandlerResult {
        let software = match lookup(input, context, "software") {
            None => Vec::new(),
            Some(Value::Array(items)) => {
                let mut packages = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_str() {
                        Some(name) if !name.trim().is_empty() => packages.push(name.trim().to_string()),
                        _ => return Err(HandlerError::retry("software entries must be non-empty package names")),
                    }
                }
                packages
            }
            Some(_) => return Err(HandlerError::retry("software must be a list of package names")),
        };

        let name = string_field(input, context, "vm_name").unwrap_or_else(|| DEFAULT_VM_NAME.to_string());

        debug!(stage = %stage, packages = software.len(), "Planned software provisioning");
        Ok(output([
            ("software", json!(software)),
            ("playbook", json!(format!("{}-playbook.yml", name))),
            ("provision_status", json!("planned")),
        ]))
    }
}

/// Produces the list of generated documentation files
#[derive(Debug, Clone, Default)]
pub struct DocumentationHandler;

impl DocumentationHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageHandler for DocumentationHandler {
    fn capability(&self) -> Capability {
        Capability::Documentation
    }

    async fn handle(&self, stage: Stage, context: &Context, input: &Value) -> HandlerResult {
        let name = string_field(input, context, "vm_name").unwrap_or_else(|| DEFAULT_VM_NAME.to_string());

        debug!(stage = %stage, vm_name = %name, "Generated documentation");
        Ok(output([
            (
                "documentation_files",
                json!([format!("{}-setup-guide.md", name), format!("{}-config.yaml", name)]),
            ),
            ("documentation_formats", json!(["markdown", "yaml"])),
            ("documentation_status", json!("generated")),
        ]))
    }
}
