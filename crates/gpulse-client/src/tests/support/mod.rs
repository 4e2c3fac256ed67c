//! Shared fixtures and helpers for client tests.

mod fake_server;
mod world;

use std::str::FromStr;
use std::time::Duration;

use gpulse_config::TransportKind;
use lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, TextDocumentContentChangeEvent, TextDocumentIdentifier,
    TextDocumentItem, Uri, VersionedTextDocumentIdentifier,
};
use serde_json::json;

pub use fake_server::{FakeSpawner, ServerBehaviour};
pub use world::{LifecycleWorld, lifecycle_world};

use crate::client::{
    ClientConfiguration, ClientManager, ClientTimeouts, SyncFeature, SynchronizationOptions,
};
use crate::launcher::ServerDescriptor;
use crate::selector::{DocumentFilter, DocumentSelector};

/// Timeouts short enough to keep failing tests quick.
pub fn test_timeouts() -> ClientTimeouts {
    ClientTimeouts::new(Duration::from_secs(5), Duration::from_millis(500))
}

/// A manager backed by a fresh in-memory spawner.
pub fn fake_manager(behaviour: ServerBehaviour) -> (FakeSpawner, ClientManager<FakeSpawner>) {
    let spawner = FakeSpawner::default();
    spawner.set_behaviour(behaviour);
    let manager = ClientManager::new(spawner.clone(), test_timeouts());
    (spawner, manager)
}

/// Descriptor for the stdio server used by every lifecycle test.
pub fn descriptor() -> ServerDescriptor {
    ServerDescriptor::new("/opt/gpulse/bin/gpulse_exe", TransportKind::Stdio)
}

/// The `{file, wgsl}` client with save forwarding (without text) and a
/// configuration push.
pub fn wgsl_client() -> ClientConfiguration {
    ClientConfiguration::new(
        "gpulse",
        "gpulse language server",
        DocumentSelector::new(vec![DocumentFilter::new("file", "wgsl")]),
    )
    .with_synchronization(
        SynchronizationOptions::new()
            .with(SyncFeature::Save, json!({"includeText": false}))
            .with(SyncFeature::Configuration, json!({"gpulse": {"lint": true}})),
    )
}

pub fn uri(value: &str) -> Uri {
    Uri::from_str(value).expect("invalid test URI")
}

pub fn open_params(document: &str, language: &str) -> DidOpenTextDocumentParams {
    DidOpenTextDocumentParams {
        text_document: TextDocumentItem {
            uri: uri(document),
            language_id: language.to_owned(),
            version: 1,
            text: String::from("@compute @workgroup_size(1) fn main() {}"),
        },
    }
}

pub fn change_params(document: &str) -> DidChangeTextDocumentParams {
    DidChangeTextDocumentParams {
        text_document: VersionedTextDocumentIdentifier {
            uri: uri(document),
            version: 2,
        },
        content_changes: vec![TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text: String::from("fn main() {}"),
        }],
    }
}

pub fn save_params(document: &str) -> DidSaveTextDocumentParams {
    DidSaveTextDocumentParams {
        text_document: TextDocumentIdentifier {
            uri: uri(document),
        },
        text: Some(String::from("fn main() {}")),
    }
}

pub fn close_params(document: &str) -> DidCloseTextDocumentParams {
    DidCloseTextDocumentParams {
        text_document: TextDocumentIdentifier {
            uri: uri(document),
        },
    }
}
