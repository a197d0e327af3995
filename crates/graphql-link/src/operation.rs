use crate::{Error, Map};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use xxhash_rust::xxh3::Xxh3;

/// Operation is one GraphQL request flowing through a link chain.
///
/// Clones of an Operation share a single [`Context`]: links which fork an
/// Operation into multiple forwarded requests observe each other's context
/// writes. Two Operations built independently never share a Context.
#[derive(Debug, Clone)]
pub struct Operation {
    /// GraphQL query document. Links treat it as opaque text.
    pub query: String,
    /// Variables of the query document.
    pub variables: Map,
    /// Name of the operation to execute, if the document has several.
    pub operation_name: Option<String>,
    /// Protocol extensions which accompany the operation to its transport.
    pub extensions: Map,
    context: Context,
}

impl Operation {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: Map::new(),
            operation_name: None,
            extensions: Map::new(),
            context: Context::default(),
        }
    }

    pub fn with_variables(self, variables: Map) -> Self {
        Self { variables, ..self }
    }

    pub fn with_operation_name(self, operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: Some(operation_name.into()),
            ..self
        }
    }

    pub fn with_extensions(self, extensions: Map) -> Self {
        Self { extensions, ..self }
    }

    /// Attach a fresh Context holding `initial`, detaching from any Context
    /// this Operation previously shared.
    pub fn with_context(self, initial: Map) -> Self {
        Self {
            context: Context::new(initial),
            ..self
        }
    }

    /// Build an Operation from a typed `graphql_client` query body.
    pub fn from_query_body<V: serde::Serialize>(
        body: graphql_client::QueryBody<V>,
    ) -> crate::Result<Self> {
        let variables = match serde_json::to_value(&body.variables) {
            Ok(Value::Object(variables)) => variables,
            Ok(Value::Null) => Map::new(),
            Ok(other) => {
                let err = <serde_json::Error as serde::ser::Error>::custom(format!(
                    "expected an object but found {other}"
                ));
                return Err(Error::Variables(Arc::new(err)));
            }
            Err(err) => return Err(Error::Variables(Arc::new(err))),
        };

        Ok(Self::new(body.query)
            .with_variables(variables)
            .with_operation_name(body.operation_name))
    }

    /// Context of this Operation, for link-to-link communication.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Name used when logging this Operation.
    pub fn display_name(&self) -> &str {
        self.operation_name.as_deref().unwrap_or("<anonymous>")
    }

    /// Content-derived identity of this Operation.
    ///
    /// The key covers the query document, variables, and operation name.
    /// Object keys of variables are hashed in sorted order so that their
    /// insertion order never changes the key. Extensions and context are
    /// not part of the key.
    pub fn key(&self) -> OperationKey {
        let mut hasher = Xxh3::new();

        hash_str(&mut hasher, &self.query);
        hash_map(&mut hasher, &self.variables);
        match &self.operation_name {
            Some(name) => hash_str(&mut hasher, name),
            None => hasher.update(b"~"),
        }

        OperationKey(hasher.digest128())
    }

    /// Request body which is sent to a transport. The Context is never part of it.
    pub fn body(&self) -> RequestBody<'_> {
        RequestBody {
            query: &self.query,
            variables: &self.variables,
            operation_name: self.operation_name.as_deref(),
            extensions: &self.extensions,
        }
    }
}

/// OperationKey identifies Operations having equivalent content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationKey(pub u128);

impl std::fmt::Display for OperationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// RequestBody is the wire shape of an Operation, as conventionally POSTed
/// to a GraphQL endpoint.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody<'o> {
    pub query: &'o str,
    pub variables: &'o Map,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<&'o str>,
    #[serde(skip_serializing_if = "is_empty")]
    pub extensions: &'o Map,
}

fn is_empty(map: &&Map) -> bool {
    map.is_empty()
}

/// Context is a mutable key/value map attached to an Operation.
///
/// It's shared by reference with every clone of the Operation, and is used
/// only for communication between links within one execution.
/// Context is never sent to a transport.
#[derive(Clone, Default)]
pub struct Context(Arc<Mutex<Map>>);

impl Context {
    pub fn new(initial: Map) -> Self {
        Self(Arc::new(Mutex::new(initial)))
    }

    /// Current contents of the Context.
    pub fn get(&self) -> Map {
        self.lock().clone()
    }

    /// Current value of a single `key`.
    pub fn value(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Replace the Context with `next`.
    pub fn set(&self, next: Map) {
        *self.lock() = next;
    }

    /// Replace the Context with the map returned by `f`, given the previous map.
    /// `f` is called while the Context is locked, and must not access it.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&Map) -> Map,
    {
        let mut guard = self.lock();
        let next = f(&guard);
        *guard = next;
    }

    /// Shallow-merge `next` into the Context, overwriting keys it shares.
    pub fn merge(&self, next: Map) {
        self.lock().extend(next);
    }

    /// Write a single `key`, returning its previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.lock().insert(key.into(), value.into())
    }

    /// Are `self` and `other` the same shared Context?
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn lock(&self) -> MutexGuard<'_, Map> {
        // A panicking writer cannot leave a Map half-updated, so poisoning is ignored.
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Context").field(&*self.lock()).finish()
    }
}

fn hash_str(hasher: &mut Xxh3, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_map(hasher: &mut Xxh3, map: &Map) {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_unstable_by(|(l, _), (r, _)| l.cmp(r));

    hasher.update(b"{");
    for (key, value) in entries {
        hash_str(hasher, key);
        hash_value(hasher, value);
    }
    hasher.update(b"}");
}

fn hash_value(hasher: &mut Xxh3, value: &Value) {
    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(true) => hasher.update(b"t"),
        Value::Bool(false) => hasher.update(b"f"),
        Value::Number(n) => {
            hasher.update(b"#");
            hash_str(hasher, &n.to_string());
        }
        Value::String(s) => {
            hasher.update(b"s");
            hash_str(hasher, s);
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                hash_value(hasher, item);
            }
            hasher.update(b"]");
        }
        Value::Object(map) => hash_map(hasher, map),
    }
}
