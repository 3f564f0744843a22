use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a registered step.
///
/// Derived from the step's code location with [`StepId::derive`] so the same
/// file always routes to the same id, which is what makes hot reload a code
/// swap instead of a re-registration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Canonical id for a code location: the extension is dropped and path
    /// separators become `-`.
    ///
    /// `"steps/orders/create_invoice.py"` becomes
    /// `"steps-orders-create_invoice"`.
    #[must_use]
    pub fn derive(code_location: &str) -> Self {
        let trimmed = code_location.trim().trim_start_matches("./");
        let without_ext = strip_extension(trimmed);
        let slug: String = without_ext
            .chars()
            .map(|c| if matches!(c, '/' | '\\') { '-' } else { c })
            .collect();
        Self(slug.trim_matches('-').to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn strip_extension(path: &str) -> &str {
    let file_start = path.rfind(['/', '\\']).map_or(0, |idx| idx + 1);
    match path[file_start..].rfind('.') {
        Some(rel) if rel > 0 => &path[..file_start + rel],
        _ => path,
    }
}

/// File stem of a code location, used as the default human-readable name.
fn file_stem(path: &str) -> &str {
    let without_ext = strip_extension(path);
    match without_ext.rfind(['/', '\\']) {
        Some(idx) => &without_ext[idx + 1..],
        None => without_ext,
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StepId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl AsRef<str> for StepId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Declarative description of one step: what it listens to, what it claims
/// to emit, and where its code runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub id: StepId,
    /// Human-readable name for dashboards. Defaults to the code file stem.
    pub name: String,
    /// Topic patterns this step reacts to.
    #[serde(default)]
    pub subscribes: Vec<String>,
    /// Topics this step declares it may emit. Informational: used for the
    /// workflow description, never enforced at emission time.
    #[serde(default)]
    pub emits: Vec<String>,
    /// Worker endpoint the step runs on, or `None`/`"local"` for in-process
    /// execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Path of the step's source, also the basis of its id.
    pub code_location: String,
    /// Optional flow grouping label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
}

impl StepDefinition {
    /// Endpoint sentinel meaning "runs in this process".
    pub const LOCAL_ENDPOINT: &'static str = "local";

    /// Builds a definition for a code location, deriving id and name.
    pub fn new(code_location: impl Into<String>) -> Self {
        let code_location = code_location.into();
        Self {
            id: StepId::derive(&code_location),
            name: file_stem(&code_location).to_owned(),
            subscribes: Vec::new(),
            emits: Vec::new(),
            endpoint: None,
            code_location,
            flow: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds a subscription pattern.
    #[must_use]
    pub fn subscribe_to(mut self, pattern: impl Into<String>) -> Self {
        self.subscribes.push(pattern.into());
        self
    }

    /// Declares a topic this step emits.
    #[must_use]
    pub fn emits_topic(mut self, topic: impl Into<String>) -> Self {
        self.emits.push(topic.into());
        self
    }

    /// Assigns the step to a named worker endpoint.
    #[must_use]
    pub fn on_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn in_flow(mut self, flow: impl Into<String>) -> Self {
        self.flow = Some(flow.into());
        self
    }

    /// Whether the step executes in this process.
    #[must_use]
    pub fn runs_locally(&self) -> bool {
        matches!(self.endpoint.as_deref(), None | Some(Self::LOCAL_ENDPOINT))
    }

    /// Worker endpoint name, if the step runs remotely.
    #[must_use]
    pub fn endpoint_name(&self) -> Option<&str> {
        match self.endpoint.as_deref() {
            None | Some(Self::LOCAL_ENDPOINT) => None,
            Some(name) => Some(name),
        }
    }

    /// Label for the workflow description: `"local"` or the endpoint name.
    #[must_use]
    pub fn runtime_label(&self) -> &str {
        self.endpoint_name().unwrap_or(Self::LOCAL_ENDPOINT)
    }
}
