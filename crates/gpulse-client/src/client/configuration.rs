//! Client-side options: identity, document scope and synchronisation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::selector::DocumentSelector;

/// A notification family the client forwards on the server's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFeature {
    /// Settings pushed with `workspace/didChangeConfiguration` after the
    /// handshake and returned for `workspace/configuration`.
    Configuration,
    /// Forwarding of `textDocument/didSave`; the value is
    /// `{"includeText": bool}`.
    Save,
}

/// Feature settings keyed by [`SyncFeature`]. Absent features are disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SynchronizationOptions {
    settings: BTreeMap<SyncFeature, Value>,
}

impl SynchronizationOptions {
    /// No features enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables `feature` with `value`.
    #[must_use]
    pub fn with(mut self, feature: SyncFeature, value: Value) -> Self {
        self.settings.insert(feature, value);
        self
    }

    /// Raw value for `feature`.
    #[must_use]
    pub fn get(&self, feature: SyncFeature) -> Option<&Value> {
        self.settings.get(&feature)
    }

    /// Settings pushed to the server, if configuration sync is enabled.
    #[must_use]
    pub fn configuration(&self) -> Option<&Value> {
        self.get(SyncFeature::Configuration)
    }

    /// `None` when saves are not forwarded, otherwise whether the document
    /// text is included.
    #[must_use]
    pub fn save_include_text(&self) -> Option<bool> {
        self.get(SyncFeature::Save).map(|value| {
            value
                .get("includeText")
                .and_then(Value::as_bool)
                .unwrap_or(false)
        })
    }
}

/// Identity and scope of one language client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfiguration {
    id: String,
    name: String,
    document_selector: DocumentSelector,
    synchronization: SynchronizationOptions,
    initialization_options: Option<Value>,
}

impl ClientConfiguration {
    /// A client named `name` (shown in logs) serving `document_selector`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        document_selector: DocumentSelector,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            document_selector,
            synchronization: SynchronizationOptions::default(),
            initialization_options: None,
        }
    }

    /// Sets the synchronisation features.
    #[must_use]
    pub fn with_synchronization(mut self, synchronization: SynchronizationOptions) -> Self {
        self.synchronization = synchronization;
        self
    }

    /// Sets `initializationOptions` sent with `initialize`.
    #[must_use]
    pub fn with_initialization_options(mut self, options: Value) -> Self {
        self.initialization_options = Some(options);
        self
    }

    /// Stable client identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable client name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Documents the client attaches to.
    #[must_use]
    pub fn document_selector(&self) -> &DocumentSelector {
        &self.document_selector
    }

    /// Enabled synchronisation features.
    #[must_use]
    pub fn synchronization(&self) -> &SynchronizationOptions {
        &self.synchronization
    }

    /// Options passed through to the server at initialisation.
    #[must_use]
    pub fn initialization_options(&self) -> Option<&Value> {
        self.initialization_options.as_ref()
    }
}
