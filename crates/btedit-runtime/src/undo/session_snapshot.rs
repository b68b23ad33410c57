#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use btedit_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::document::TreeDocument;

/// Value copy of everything undo restores: which tree is main, which tab
/// is active, and every open document as `serde_json` bytes.
///
/// Equality is structural over all fields and drives history dedup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub main_tree_name: Option<String>,
    pub active_document_name: Option<String>,
    pub per_document: BTreeMap<String, Vec<u8>>,
    /// Node types each document uses, collapsed placeholders included.
    /// Lets the registry keep models alive for as long as undo can bring
    /// their nodes back, without decoding the document bytes.
    #[serde(default)]
    pub referenced_types: BTreeMap<String, BTreeSet<String>>,
}

impl SessionSnapshot {
    pub fn capture(
        main_tree_name: Option<&str>,
        active_document_name: Option<&str>,
        documents: &BTreeMap<String, TreeDocument>,
    ) -> Result<Self> {
        let per_document = documents
            .iter()
            .map(|(name, doc)| Ok((name.clone(), doc.to_bytes()?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let referenced_types = documents
            .iter()
            .map(|(name, doc)| {
                let types = doc.referenced_types().into_iter().map(str::to_owned).collect();
                (name.clone(), types)
            })
            .collect();
        Ok(Self {
            main_tree_name: main_tree_name.map(str::to_owned),
            active_document_name: active_document_name.map(str::to_owned),
            per_document,
            referenced_types,
        })
    }

    /// First document (in name order) whose nodes use `type_name`.
    #[must_use]
    pub fn user_of(&self, type_name: &str) -> Option<&str> {
        self.referenced_types
            .iter()
            .find(|(_, types)| types.contains(type_name))
            .map(|(document, _)| document.as_str())
    }

    /// Decode every document. Fails without partial results.
    pub fn documents(&self) -> Result<BTreeMap<String, TreeDocument>> {
        let mut documents = BTreeMap::new();
        for (name, bytes) in &self.per_document {
            let doc = TreeDocument::from_bytes(bytes)?;
            if doc.name() != name {
                return Err(Error::Snapshot(format!(
                    "document stored as `{name}` is named `{}`",
                    doc.name()
                )));
            }
            documents.insert(name.clone(), doc);
        }
        for designated in [&self.main_tree_name, &self.active_document_name]
            .into_iter()
            .flatten()
        {
            if !documents.contains_key(designated) {
                return Err(Error::Snapshot(format!(
                    "snapshot designates missing document `{designated}`"
                )));
            }
        }
        Ok(documents)
    }

    /// Total size of the stored document bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.per_document.values().map(Vec::len).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Snapshot(e.to_string()))
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::Snapshot(e.to_string()))
    }
}
