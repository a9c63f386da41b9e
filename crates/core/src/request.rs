//! Operation documents and requests.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::ShakeError;
use crate::hash_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentHash {
    pub algorithm: String,
    pub value: String,
}

impl DocumentHash {
    pub fn sha256(bytes: &[u8]) -> Self {
        Self { algorithm: "sha256".to_string(), value: hex::encode(Sha256::digest(bytes)) }
    }
}

/// A GraphQL operation document. Generated client code keeps one per operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Document {
    kind: OperationKind,
    body: Arc<str>,
    hash: DocumentHash,
}

impl Document {
    pub fn new(kind: OperationKind, body: impl Into<Arc<str>>) -> Self {
        let body = body.into();
        let hash = DocumentHash::sha256(body.as_bytes());
        Self { kind, body, hash }
    }

    /// Use a precomputed hash (e.g. the id a persisted-query server knows).
    pub fn with_hash(kind: OperationKind, body: impl Into<Arc<str>>, hash: DocumentHash) -> Self {
        Self { kind, body: body.into(), hash }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn hash(&self) -> &DocumentHash {
        &self.hash
    }
}

/// How the transport ships the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStrategy {
    #[default]
    Default,
    PersistedQuery,
    AutomaticPersistedQuery,
}

impl FromStr for RequestStrategy {
    type Err = ShakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "persisted-query" | "persisted" => Ok(Self::PersistedQuery),
            "automatic-persisted-query" | "apq" => Ok(Self::AutomaticPersistedQuery),
            other => Err(ShakeError::Argument {
                name: "strategy",
                reason: format!("unknown request strategy {other:?}"),
            }),
        }
    }
}

/// One query/mutation/subscription plus its variables. Used as the operation cache key.
///
/// Equality and hashing cover `(id, name, document, variables)`. Sequence
/// variables compare element by element, so `[1, 2, 3]` and `[3, 2, 1]`
/// are different requests. Extensions, context data and the request
/// strategy ride along but never affect identity.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    id: Option<String>,
    name: String,
    document: Arc<Document>,
    variables: BTreeMap<String, Value>,
    extensions: Option<Arc<Map<String, Value>>>,
    context_data: Option<Arc<Map<String, Value>>>,
    strategy: RequestStrategy,
    hash: OnceCell<String>,
}

impl OperationRequest {
    pub fn new(name: impl Into<String>, document: Arc<Document>) -> Self {
        Self {
            id: None,
            name: name.into(),
            document,
            variables: BTreeMap::new(),
            extensions: None,
            context_data: None,
            strategy: RequestStrategy::Default,
            hash: OnceCell::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self.hash = OnceCell::new();
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self.hash = OnceCell::new();
        self
    }

    pub fn with_variables(mut self, variables: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.variables.extend(variables);
        self.hash = OnceCell::new();
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let map = self.extensions.get_or_insert_with(Default::default);
        Arc::make_mut(map).insert(key.into(), value.into());
        self
    }

    pub fn with_context_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let map = self.context_data.get_or_insert_with(Default::default);
        Arc::make_mut(map).insert(key.into(), value.into());
        self
    }

    pub fn with_strategy(mut self, strategy: RequestStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    /// Extensions; empty until one is set.
    pub fn extensions(&self) -> Option<&Map<String, Value>> {
        self.extensions.as_deref()
    }

    pub fn context_data(&self) -> Option<&Map<String, Value>> {
        self.context_data.as_deref()
    }

    pub fn strategy(&self) -> RequestStrategy {
        self.strategy
    }

    /// SHA-256 (lowercase hex) of the canonical request payload, extensions excluded.
    ///
    /// Computed once per request value.
    pub fn persisted_hash(&self) -> &str {
        self.hash.get_or_init(|| {
            let payload = serde_json::json!({
                "id": self.id,
                "operationName": self.name,
                "query": self.document.body(),
                "variables": self.variables,
            });
            hex::encode(Sha256::digest(payload.to_string().as_bytes()))
        })
    }
}

impl PartialEq for OperationRequest {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && (Arc::ptr_eq(&self.document, &other.document) || self.document == other.document)
            && self.variables == other.variables
    }
}

impl Eq for OperationRequest {}

impl Hash for OperationRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.name.hash(state);
        self.document.hash.value.hash(state);
        self.variables.len().hash(state);
        for (k, v) in &self.variables {
            k.hash(state);
            hash_value(v, state);
        }
    }
}
