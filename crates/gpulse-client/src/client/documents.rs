//! Document synchronisation scoped by the client's selector.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, Uri,
};
use tracing::trace;

use super::CLIENT_TARGET;
use super::connection::LanguageClient;
use crate::errors::ClientError;
use crate::selector::DocumentRef;

/// Whether a document event reached the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Forwarding {
    /// The notification was sent.
    Forwarded,
    /// The document is outside the client's scope (or, for saves, save
    /// forwarding is disabled); nothing was sent.
    Filtered,
}

/// URIs whose `didOpen` was forwarded.
#[derive(Debug, Default)]
pub(crate) struct OpenDocuments {
    uris: Mutex<HashSet<String>>,
}

impl OpenDocuments {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.uris
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn contains(&self, uri: &Uri) -> bool {
        self.lock().contains(uri.as_str())
    }

    fn insert(&self, uri: &Uri) {
        self.lock().insert(uri.as_str().to_owned());
    }

    fn remove(&self, uri: &Uri) -> bool {
        self.lock().remove(uri.as_str())
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

impl LanguageClient {
    pub(crate) async fn did_open(
        &self,
        params: DidOpenTextDocumentParams,
    ) -> Result<Forwarding, ClientError> {
        let document = &params.text_document;
        let reference = DocumentRef::new(document.uri.as_str(), &document.language_id);
        if !self.configuration().document_selector().matches(&reference) {
            trace!(
                target: CLIENT_TARGET,
                uri = document.uri.as_str(),
                language = %document.language_id,
                "document outside client scope"
            );
            return Ok(Forwarding::Filtered);
        }

        self.connection()
            .notify("textDocument/didOpen", &params)
            .await?;
        self.documents.insert(&params.text_document.uri);
        Ok(Forwarding::Forwarded)
    }

    pub(crate) async fn did_change(
        &self,
        params: DidChangeTextDocumentParams,
    ) -> Result<Forwarding, ClientError> {
        if !self.documents.contains(&params.text_document.uri) {
            return Ok(Forwarding::Filtered);
        }
        self.connection()
            .notify("textDocument/didChange", &params)
            .await?;
        Ok(Forwarding::Forwarded)
    }

    pub(crate) async fn did_save(
        &self,
        mut params: DidSaveTextDocumentParams,
    ) -> Result<Forwarding, ClientError> {
        let Some(include_text) = self.configuration().synchronization().save_include_text() else {
            return Ok(Forwarding::Filtered);
        };
        if !self.documents.contains(&params.text_document.uri) {
            return Ok(Forwarding::Filtered);
        }
        if !include_text {
            params.text = None;
        }
        self.connection()
            .notify("textDocument/didSave", &params)
            .await?;
        Ok(Forwarding::Forwarded)
    }

    pub(crate) async fn did_close(
        &self,
        params: DidCloseTextDocumentParams,
    ) -> Result<Forwarding, ClientError> {
        if !self.documents.remove(&params.text_document.uri) {
            return Ok(Forwarding::Filtered);
        }
        self.connection()
            .notify("textDocument/didClose", &params)
            .await?;
        Ok(Forwarding::Forwarded)
    }
}
