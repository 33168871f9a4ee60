//! Tool registry: the callable surface shared by the HTTP server and embedders.
//!
//! Every decision-support operation is exposed as a [`Tool`] with a JSON
//! Schema for its parameters. The server lists them at `GET /tools/list`
//! and dispatches `POST /tools/{name}` through [`ToolRegistry::find`].
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 ToolRegistry                  │
//! │ check_interactions   suggest_prescription     │
//! │ generate_instructions  search_history         │
//! │ ask_about_patient      backend_status         │
//! │ + custom (Rust)                               │
//! └──────────────────────┬────────────────────────┘
//!                        ▼
//!          ToolContext → ClinicalAssistant
//! ```
//!
//! # Usage
//!
//! ```rust
//! use clinical_assist::traits::ToolRegistry;
//!
//! let mut tools = ToolRegistry::with_builtins();
//! // tools.register(Box::new(MyTool::new()));
//! assert_eq!(tools.len(), 6);
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::assistant::ClinicalAssistant;
use crate::models::{MedicalRecord, PrescriptionRequest};

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// A named operation callers can discover and invoke.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use serde_json::{json, Value};
/// use clinical_assist::traits::{Tool, ToolContext};
///
/// pub struct ModelCountTool;
///
/// #[async_trait]
/// impl Tool for ModelCountTool {
///     fn name(&self) -> &str { "model_count" }
///     fn description(&self) -> &str { "Number of models the backend serves" }
///
///     fn parameters_schema(&self) -> Value {
///         json!({ "type": "object", "properties": {} })
///     }
///
///     async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
///         let status = ctx.assistant().status().await;
///         Ok(json!({ "models": status.models.map(|m| m.len()).unwrap_or(0) }))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route segment for `POST /tools/{name}`; lowercase with underscores.
    fn name(&self) -> &str;

    /// One-line description for discovery.
    fn description(&self) -> &str;

    /// Built-in tools are marked `"builtin": true` in `GET /tools/list`.
    fn is_builtin(&self) -> bool {
        false
    }

    /// JSON Schema object (`type: "object"`, `properties`, optional `required`).
    fn parameters_schema(&self) -> Value;

    /// Run with parameters already checked by [`validate_params`].
    ///
    /// Errors whose message contains `must not be empty` or `invalid`
    /// are reported to HTTP callers as `400`, anything else as `500`.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Shared state handed to every tool invocation.
pub struct ToolContext {
    assistant: Arc<ClinicalAssistant>,
}

impl ToolContext {
    pub fn new(assistant: Arc<ClinicalAssistant>) -> Self {
        Self { assistant }
    }

    pub fn assistant(&self) -> &ClinicalAssistant {
        &self.assistant
    }
}

/// Serializable tool info for the `/tools/list` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub builtin: bool,
    pub parameters: Value,
}

impl ToolInfo {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            builtin: tool.is_builtin(),
            parameters: tool.parameters_schema(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter Validation
// ═══════════════════════════════════════════════════════════════════════

/// Validate incoming JSON parameters against a tool's schema.
///
/// Checks required fields, type compatibility, and enum constraints, and
/// injects defaults for missing optional fields. A `null` body counts as `{}`.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => bail!("parameters must be a JSON object, got {}", json_type_name(other)),
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for field in &required {
        if !params_obj.contains_key(*field) {
            bail!("missing required parameter: {}", field);
        }
    }

    let mut result = params_obj.clone();

    for (prop_name, prop_schema) in &properties {
        let Some(value) = params_obj.get(prop_name) else {
            if let Some(default) = prop_schema.get("default") {
                result.insert(prop_name.clone(), default.clone());
            }
            continue;
        };

        if let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str()) {
            let type_ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !type_ok {
                bail!(
                    "parameter '{}' must be of type '{}', got {}",
                    prop_name,
                    expected,
                    json_type_name(value)
                );
            }
        }

        if let Some(allowed) = prop_schema.get("enum").and_then(|e| e.as_array()) {
            if !allowed.contains(value) {
                let allowed: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
                bail!(
                    "parameter '{}' must be one of [{}], got {}",
                    prop_name,
                    allowed.join(", "),
                    value
                );
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Decode validated parameters into a typed struct.
fn parse_params<T: DeserializeOwned>(tool: &str, params: Value) -> Result<T> {
    serde_json::from_value(params).with_context(|| format!("invalid parameters for {}", tool))
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{} must not be empty", field);
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in Tools
// ═══════════════════════════════════════════════════════════════════════

fn string_list(description: &str) -> Value {
    json!({ "type": "array", "items": { "type": "string" }, "description": description })
}

fn records_schema() -> Value {
    json!({
        "type": "array",
        "description": "Patient history records: {id, record_type, title, content, record_date, embedding}",
        "items": { "type": "object" }
    })
}

pub struct CheckInteractionsTool;

#[derive(Deserialize)]
struct CheckInteractionsParams {
    medications: Vec<String>,
    #[serde(default)]
    allergies: Vec<String>,
    #[serde(default = "default_true")]
    use_llm: bool,
}

fn default_true() -> bool {
    true
}

#[async_trait]
impl Tool for CheckInteractionsTool {
    fn name(&self) -> &str {
        "check_interactions"
    }

    fn description(&self) -> &str {
        "Check a medication list for drug-drug and drug-allergy interactions"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "medications": string_list("Medication names"),
                "allergies": string_list("Documented allergies"),
                "use_llm": { "type": "boolean", "description": "Also ask the generative backend", "default": true }
            },
            "required": ["medications"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: CheckInteractionsParams = parse_params(self.name(), params)?;
        let verdict = ctx
            .assistant()
            .check_interactions(&p.medications, &p.allergies, p.use_llm)
            .await;
        Ok(serde_json::to_value(verdict)?)
    }
}

pub struct SuggestPrescriptionTool;

#[async_trait]
impl Tool for SuggestPrescriptionTool {
    fn name(&self) -> &str {
        "suggest_prescription"
    }

    fn description(&self) -> &str {
        "Suggest a prescription for a diagnosis, with guideline fallback"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "diagnosis": { "type": "string", "description": "Primary diagnosis" },
                "age": { "type": "integer", "description": "Patient age in years" },
                "allergies": string_list("Known drug allergies"),
                "current_medications": string_list("Medications the patient already takes"),
                "conditions": string_list("Other medical conditions")
            },
            "required": ["diagnosis"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let request: PrescriptionRequest = parse_params(self.name(), params)?;
        require_text("diagnosis", &request.diagnosis)?;
        let response = ctx.assistant().suggest_prescription(&request).await;
        Ok(serde_json::to_value(response)?)
    }
}

pub struct GenerateInstructionsTool;

#[derive(Deserialize)]
struct InstructionsParams {
    medication: String,
    dosage: String,
    diagnosis: String,
    #[serde(default)]
    age: Option<u32>,
}

#[async_trait]
impl Tool for GenerateInstructionsTool {
    fn name(&self) -> &str {
        "generate_instructions"
    }

    fn description(&self) -> &str {
        "Write patient-friendly instructions for a prescription"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "medication": { "type": "string" },
                "dosage": { "type": "string" },
                "diagnosis": { "type": "string" },
                "age": { "type": "integer" }
            },
            "required": ["medication", "dosage", "diagnosis"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: InstructionsParams = parse_params(self.name(), params)?;
        require_text("medication", &p.medication)?;
        let response = ctx
            .assistant()
            .generate_instructions(&p.medication, &p.dosage, &p.diagnosis, p.age)
            .await;
        Ok(serde_json::to_value(response)?)
    }
}

pub struct SearchHistoryTool;

#[derive(Deserialize)]
struct SearchHistoryParams {
    query: String,
    records: Vec<MedicalRecord>,
    #[serde(default)]
    patient_name: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
}

#[async_trait]
impl Tool for SearchHistoryTool {
    fn name(&self) -> &str {
        "search_history"
    }

    fn description(&self) -> &str {
        "Find the records relevant to a query and summarize them"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Free-text query" },
                "records": records_schema(),
                "patient_name": { "type": "string" },
                "top_k": { "type": "integer", "description": "Max records" }
            },
            "required": ["query", "records"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: SearchHistoryParams = parse_params(self.name(), params)?;
        require_text("query", &p.query)?;
        let response = ctx
            .assistant()
            .search_history(&p.query, &p.records, p.patient_name.as_deref(), p.top_k)
            .await;
        Ok(serde_json::to_value(response)?)
    }
}

pub struct AskAboutPatientTool;

#[derive(Deserialize)]
struct AskParams {
    question: String,
    records: Vec<MedicalRecord>,
    #[serde(default)]
    patient_name: Option<String>,
}

#[async_trait]
impl Tool for AskAboutPatientTool {
    fn name(&self) -> &str {
        "ask_about_patient"
    }

    fn description(&self) -> &str {
        "Answer a question from the patient's records only"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" },
                "records": records_schema(),
                "patient_name": { "type": "string" }
            },
            "required": ["question", "records"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: AskParams = parse_params(self.name(), params)?;
        require_text("question", &p.question)?;
        let response = ctx
            .assistant()
            .ask_about_patient(&p.question, &p.records, p.patient_name.as_deref())
            .await;
        Ok(serde_json::to_value(response)?)
    }
}

pub struct BackendStatusTool;

#[async_trait]
impl Tool for BackendStatusTool {
    fn name(&self) -> &str {
        "backend_status"
    }

    fn description(&self) -> &str {
        "Generative backend availability, models, and enabled features"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        Ok(serde_json::to_value(ctx.assistant().status().await)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry for built-in and custom tools. Names are unique; the first
/// registration of a name wins on lookup.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CheckInteractionsTool));
        registry.register(Box::new(SuggestPrescriptionTool));
        registry.register(Box::new(GenerateInstructionsTool));
        registry.register(Box::new(SearchHistoryTool));
        registry.register(Box::new(AskAboutPatientTool));
        registry.register(Box::new(BackendStatusTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools.iter().map(|t| ToolInfo::of(t.as_ref())).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
