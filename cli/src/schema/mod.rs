//! Protobuf schema registry.
//!
//! Wraps a `prost-reflect` [`DescriptorPool`] built from `.proto` sources
//! parsed at runtime with `protox-parse`. The registry grows one batch at a
//! time through [`SchemaRegistry::load`]:
//!
//! 1. Collect the batch: supplied documents plus every transitive import
//!    that is neither loaded nor supplied (fetched through an
//!    [`ImportFetcher`]).
//! 2. Order the batch so imports precede importers.
//! 3. Parse every document.
//! 4. Add the whole batch to a copy of the pool, which resolves every
//!    cross-document reference in one pass.
//! 5. Commit the copy, record the loaded identifiers, rebuild the type index.
//!
//! Any failure leaves the registry exactly as it was before the call.

// Rust guideline compliant 2026-02

pub mod imports;

use std::collections::{HashMap, VecDeque};

use indexmap::{IndexMap, IndexSet};
use prost::Message as _;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor};

pub use imports::{extract_imports, HttpImportFetcher, ImportFetcher};

/// One schema source supplied by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDocument {
    /// Identifier used for deduplication and for matching `import` paths.
    pub name: String,
    /// `.proto` source text.
    pub source: String,
}

impl SchemaDocument {
    /// Create a document.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// Why a load batch was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaLoadError {
    /// An import was not supplied and could not be fetched.
    #[error("failed to fetch import {path} (required by {required_by}): {message}")]
    Fetch {
        /// Import path.
        path: String,
        /// Document that declared the import.
        required_by: String,
        /// Fetcher diagnostic.
        message: String,
    },
    /// A document is not valid `.proto` syntax.
    #[error("failed to parse {file}: {message}")]
    Parse {
        /// Document identifier.
        file: String,
        /// Parser diagnostic.
        message: String,
    },
    /// Documents import each other.
    #[error("import cycle involving {0}")]
    Cycle(String),
    /// A referenced type or import could not be resolved.
    #[error("failed to resolve schema: {0}")]
    Resolve(String),
}

/// Outcome of a successful load batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Documents merged by this batch, imports first.
    pub merged: Vec<String>,
    /// Subset of `merged` fetched through the import fetcher.
    pub fetched: Vec<String>,
    /// Supplied documents skipped because they were already loaded.
    pub skipped: Vec<String>,
}

/// Parsed and resolved message types, indexed by name.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    pool: DescriptorPool,
    loaded: IndexSet<String>,
    /// Full name -> descriptor, in registry order.
    types: IndexMap<String, MessageDescriptor>,
    /// Lowercased full and short names -> position in `types` (first wins).
    by_folded_name: HashMap<String, usize>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            pool: DescriptorPool::new(),
            loaded: IndexSet::new(),
            types: IndexMap::new(),
            by_folded_name: HashMap::new(),
        }
    }

    /// Identifiers of every merged document, in merge order.
    pub fn loaded_documents(&self) -> impl Iterator<Item = &str> {
        self.loaded.iter().map(String::as_str)
    }

    /// Whether `name` has been merged.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains(name)
    }

    /// Whether no message type is registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Fully qualified names of all message types, in registry order.
    pub fn type_names(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }

    /// Look up a message type.
    ///
    /// Tries the exact fully qualified name first, then a case-insensitive
    /// match on the full or short name. Among types sharing a short name the
    /// first in registry order wins.
    pub fn lookup_type(&self, name: &str) -> Option<MessageDescriptor> {
        let name = name.trim_start_matches('.');
        if let Some(descriptor) = self.types.get(name) {
            return Some(descriptor.clone());
        }
        let position = *self.by_folded_name.get(&name.to_lowercase())?;
        self.types.get_index(position).map(|(_, d)| d.clone())
    }

    /// First message type in registry order.
    pub fn first_type(&self) -> Option<MessageDescriptor> {
        self.types.first().map(|(_, d)| d.clone())
    }

    /// Merge a batch of documents. All-or-nothing.
    pub async fn load(
        &mut self,
        documents: Vec<SchemaDocument>,
        fetcher: &dyn ImportFetcher,
    ) -> Result<LoadReport, SchemaLoadError> {
        let mut report = LoadReport::default();

        let mut supplied: IndexMap<String, String> = IndexMap::new();
        for doc in documents {
            supplied.entry(doc.name).or_insert(doc.source);
        }

        let mut queue: VecDeque<(String, Option<String>)> = VecDeque::new();
        for name in supplied.keys() {
            if self.loaded.contains(name) {
                log::debug!("[Schema] {} already loaded, skipping", name);
                report.skipped.push(name.clone());
            } else {
                queue.push_back((name.clone(), None));
            }
        }

        let mut staged: IndexMap<String, String> = IndexMap::new();
        while let Some((name, required_by)) = queue.pop_front() {
            if self.loaded.contains(&name) || staged.contains_key(&name) {
                continue;
            }
            let source = if let Some(source) = supplied.get(&name) {
                source.clone()
            } else {
                let source = fetcher.fetch(&name).await.map_err(|e| SchemaLoadError::Fetch {
                    path: name.clone(),
                    required_by: required_by.clone().unwrap_or_default(),
                    message: format!("{e:#}"),
                })?;
                report.fetched.push(name.clone());
                source
            };
            for import in extract_imports(&source) {
                if !self.loaded.contains(&import) && !staged.contains_key(&import) {
                    queue.push_back((import, Some(name.clone())));
                }
            }
            staged.insert(name, source);
        }

        if staged.is_empty() {
            return Ok(report);
        }

        let order = import_order(&staged)?;
        let mut files = Vec::with_capacity(order.len());
        for name in &order {
            let file = protox_parse::parse(name, &staged[name]).map_err(|e| SchemaLoadError::Parse {
                file: name.clone(),
                message: e.to_string(),
            })?;
            files.push(file);
        }

        let mut pool = self.pool.clone();
        pool.add_file_descriptor_protos(files)
            .map_err(|e| SchemaLoadError::Resolve(e.to_string()))?;

        self.pool = pool;
        self.loaded.extend(order.iter().cloned());
        self.rebuild_index();
        log::info!(
            "[Schema] Merged {} document(s); {} type(s) registered",
            order.len(),
            self.types.len()
        );

        report.merged = order;
        Ok(report)
    }

    fn rebuild_index(&mut self) {
        self.types.clear();
        self.by_folded_name.clear();
        for descriptor in self.pool.all_messages() {
            if descriptor.is_map_entry() {
                continue;
            }
            let position = self.types.len();
            self.by_folded_name
                .entry(descriptor.full_name().to_lowercase())
                .or_insert(position);
            self.by_folded_name
                .entry(descriptor.name().to_lowercase())
                .or_insert(position);
            self.types
                .insert(descriptor.full_name().to_string(), descriptor);
        }
    }
}

/// Order staged documents so every import precedes its importer.
fn import_order(staged: &IndexMap<String, String>) -> Result<Vec<String>, SchemaLoadError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        name: &str,
        staged: &IndexMap<String, String>,
        marks: &mut HashMap<String, Mark>,
        order: &mut Vec<String>,
    ) -> Result<(), SchemaLoadError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(SchemaLoadError::Cycle(name.to_string())),
            None => {}
        }
        marks.insert(name.to_string(), Mark::Visiting);
        if let Some(source) = staged.get(name) {
            for import in extract_imports(source) {
                if staged.contains_key(&import) {
                    visit(&import, staged, marks, order)?;
                }
            }
        }
        marks.insert(name.to_string(), Mark::Done);
        order.push(name.to_string());
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut order = Vec::with_capacity(staged.len());
    for name in staged.keys() {
        visit(name, staged, &mut marks, &mut order)?;
    }
    Ok(order)
}

/// Validate a JSON value against `descriptor`, producing the typed message.
///
/// Uses the protobuf JSON mapping; unknown fields and mistyped values are
/// rejected with the deserializer's diagnostic.
pub fn verify(
    descriptor: &MessageDescriptor,
    value: &serde_json::Value,
) -> Result<DynamicMessage, String> {
    DynamicMessage::deserialize(descriptor.clone(), value).map_err(|e| e.to_string())
}

/// Binary protobuf encoding of `message`.
pub fn encode(message: &DynamicMessage) -> Vec<u8> {
    message.encode_to_vec()
}

/// Decode `bytes` as `descriptor`.
pub fn decode(
    descriptor: &MessageDescriptor,
    bytes: &[u8],
) -> Result<DynamicMessage, prost::DecodeError> {
    DynamicMessage::decode(descriptor.clone(), bytes)
}

/// Pretty-printed JSON mapping of `message`.
pub fn to_pretty_json(message: &DynamicMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serves imports from a fixed table and records what was asked for.
    #[derive(Default)]
    struct TableFetcher {
        files: HashMap<String, String>,
        requests: Mutex<Vec<String>>,
    }

    impl TableFetcher {
        fn with(mut self, name: &str, source: &str) -> Self {
            self.files.insert(name.to_string(), source.to_string());
            self
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ImportFetcher for TableFetcher {
        async fn fetch(&self, path: &str) -> anyhow::Result<String> {
            self.requests.lock().unwrap().push(path.to_string());
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 Not Found"))
        }
    }

    const CHAT: &str = r#"
        syntax = "proto3";
        package chat;
        message ChatMessage {
            string sender = 1;
            string text = 2;
            int32 priority = 3;
        }
    "#;

    const COMMON: &str = r#"
        syntax = "proto3";
        package common;
        message Meta { string trace_id = 1; }
    "#;

    const ENVELOPE: &str = r#"
        syntax = "proto3";
        package chat;
        import "common.proto";
        message Envelope {
            common.Meta meta = 1;
            map<string, string> labels = 2;
        }
    "#;

    #[tokio::test]
    async fn test_load_single_document() {
        let mut registry = SchemaRegistry::new();
        let fetcher = TableFetcher::default();
        let report = registry
            .load(vec![SchemaDocument::new("chat.proto", CHAT)], &fetcher)
            .await
            .unwrap();

        assert_eq!(report.merged, vec!["chat.proto"]);
        assert!(report.fetched.is_empty());
        assert_eq!(registry.type_names(), vec!["chat.ChatMessage"]);
        assert!(registry.is_loaded("chat.proto"));
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive_and_accepts_full_names() {
        let mut registry = SchemaRegistry::new();
        registry
            .load(vec![SchemaDocument::new("chat.proto", CHAT)], &TableFetcher::default())
            .await
            .unwrap();

        for name in ["chat.ChatMessage", ".chat.ChatMessage", "ChatMessage", "chatmessage", "CHAT.CHATMESSAGE"] {
            let found = registry.lookup_type(name).unwrap();
            assert_eq!(found.full_name(), "chat.ChatMessage", "lookup {name}");
        }
        assert!(registry.lookup_type("Missing").is_none());
    }

    #[tokio::test]
    async fn test_import_supplied_in_same_batch_in_any_order() {
        let mut registry = SchemaRegistry::new();
        let fetcher = TableFetcher::default();
        let report = registry
            .load(
                vec![
                    SchemaDocument::new("envelope.proto", ENVELOPE),
                    SchemaDocument::new("common.proto", COMMON),
                ],
                &fetcher,
            )
            .await
            .unwrap();

        assert_eq!(report.merged, vec!["common.proto", "envelope.proto"]);
        assert!(fetcher.requests().is_empty());
        assert!(registry.lookup_type("Envelope").is_some());
        assert!(!registry.type_names().iter().any(|n| n.contains("LabelsEntry")));
    }

    #[tokio::test]
    async fn test_missing_import_is_fetched_once() {
        let mut registry = SchemaRegistry::new();
        let fetcher = TableFetcher::default().with("common.proto", COMMON);

        let report = registry
            .load(vec![SchemaDocument::new("envelope.proto", ENVELOPE)], &fetcher)
            .await
            .unwrap();
        assert_eq!(report.fetched, vec!["common.proto"]);
        assert_eq!(report.merged, vec!["common.proto", "envelope.proto"]);

        let again = registry
            .load(vec![SchemaDocument::new("common.proto", COMMON)], &fetcher)
            .await
            .unwrap();
        assert_eq!(again.skipped, vec!["common.proto"]);
        assert!(again.merged.is_empty());
        assert_eq!(fetcher.requests(), vec!["common.proto"]);
        assert_eq!(registry.loaded_documents().count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_registry_untouched() {
        let mut registry = SchemaRegistry::new();
        let fetcher = TableFetcher::default();
        registry
            .load(vec![SchemaDocument::new("chat.proto", CHAT)], &fetcher)
            .await
            .unwrap();

        let err = registry
            .load(vec![SchemaDocument::new("envelope.proto", ENVELOPE)], &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            SchemaLoadError::Fetch { path, required_by, .. }
                if path == "common.proto" && required_by == "envelope.proto"
        ));
        assert_eq!(registry.loaded_documents().collect::<Vec<_>>(), vec!["chat.proto"]);
        assert!(registry.lookup_type("Envelope").is_none());
    }

    #[tokio::test]
    async fn test_parse_failure_rolls_back_whole_batch() {
        let mut registry = SchemaRegistry::new();
        let err = registry
            .load(
                vec![
                    SchemaDocument::new("chat.proto", CHAT),
                    SchemaDocument::new("broken.proto", "message { nope"),
                ],
                &TableFetcher::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SchemaLoadError::Parse { ref file, .. } if file == "broken.proto"));
        assert!(registry.is_empty());
        assert_eq!(registry.loaded_documents().count(), 0);
    }

    #[tokio::test]
    async fn test_unresolved_type_reference_fails() {
        let mut registry = SchemaRegistry::new();
        let source = r#"
            syntax = "proto3";
            message Broken { Nowhere ref = 1; }
        "#;
        let err = registry
            .load(vec![SchemaDocument::new("broken.proto", source)], &TableFetcher::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaLoadError::Resolve(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_import_cycle_is_rejected() {
        let a = "syntax = \"proto3\";\nimport \"b.proto\";\nmessage A {}";
        let b = "syntax = \"proto3\";\nimport \"a.proto\";\nmessage B {}";
        let mut registry = SchemaRegistry::new();
        let err = registry
            .load(
                vec![SchemaDocument::new("a.proto", a), SchemaDocument::new("b.proto", b)],
                &TableFetcher::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaLoadError::Cycle(_)));
    }

    #[tokio::test]
    async fn test_verify_encode_decode() {
        let mut registry = SchemaRegistry::new();
        registry
            .load(vec![SchemaDocument::new("chat.proto", CHAT)], &TableFetcher::default())
            .await
            .unwrap();
        let descriptor = registry.lookup_type("ChatMessage").unwrap();

        let value = serde_json::json!({ "sender": "ana", "text": "hi", "priority": 2 });
        let message = verify(&descriptor, &value).unwrap();
        let bytes = encode(&message);
        let decoded = decode(&descriptor, &bytes).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(encode(&decoded), bytes);

        let json: serde_json::Value = serde_json::from_str(&to_pretty_json(&decoded).unwrap()).unwrap();
        assert_eq!(json, value);
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_field_type_and_unknown_field() {
        let mut registry = SchemaRegistry::new();
        registry
            .load(vec![SchemaDocument::new("chat.proto", CHAT)], &TableFetcher::default())
            .await
            .unwrap();
        let descriptor = registry.lookup_type("ChatMessage").unwrap();

        assert!(verify(&descriptor, &serde_json::json!({ "priority": "high" })).is_err());
        assert!(verify(&descriptor, &serde_json::json!({ "colour": "red" })).is_err());
    }

    #[tokio::test]
    async fn test_decode_garbage_fails() {
        let mut registry = SchemaRegistry::new();
        assert!(registry.first_type().is_none());
        registry
            .load(vec![SchemaDocument::new("chat.proto", CHAT)], &TableFetcher::default())
            .await
            .unwrap();
        let descriptor = registry.first_type().unwrap();
        assert!(decode(&descriptor, &[0xff, 0xff, 0xff]).is_err());
    }
}
