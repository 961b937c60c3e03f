//! Document repository seams
//!
//! The pipeline reaches documents only through these traits: a
//! [`Repository`] validates queries, scrolls matching ids and opens sessions;
//! a [`PermissionChecker`] answers access questions for a principal.
//!
//! [`InMemoryRepository`] is a complete implementation over a map of
//! documents, understanding `SELECT * FROM Document` optionally followed by
//! `WHERE prop = value [AND prop = value ...]`, where values are quoted
//! strings, numbers or booleans.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::command::ExecutionTarget;
use super::errors::RepositoryError;

/// Properties of one document
pub type Document = BTreeMap<String, Value>;

#[async_trait]
pub trait Repository: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Reject queries the repository cannot run
    fn validate_query(&self, query: &str) -> Result<(), RepositoryError>;

    /// Start scrolling the ids matched by `query`
    async fn scroll(
        &self,
        query: &str,
        target: &ExecutionTarget,
        batch_size: usize,
    ) -> Result<Box<dyn IdScroll>, RepositoryError>;

    /// Open a session whose writes become visible on `commit`
    async fn open_session(
        &self,
        target: &ExecutionTarget,
    ) -> Result<Box<dyn RepositorySession>, RepositoryError>;
}

/// Cursor over matched document ids
#[async_trait]
pub trait IdScroll: Send {
    /// Next batch of ids; `None` once exhausted
    async fn next_batch(&mut self) -> Result<Option<Vec<String>>, RepositoryError>;
}

#[async_trait]
pub trait RepositorySession: Send + Sync {
    async fn exists(&self, id: &str) -> Result<bool, RepositoryError>;

    async fn get_property(&self, id: &str, name: &str) -> Result<Option<Value>, RepositoryError>;

    async fn set_property(&mut self, id: &str, name: &str, value: Value) -> Result<(), RepositoryError>;

    async fn commit(&mut self) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait PermissionChecker: Send + Sync + 'static {
    /// True when `principal` holds `permission` on every id
    async fn can_perform(&self, principal: &str, ids: &[String], permission: &str) -> bool;
}

/// Grants everything except explicitly denied (principal, document) pairs
#[derive(Debug, Default)]
pub struct StaticPermissions {
    denied: RwLock<HashSet<(String, String)>>,
}

impl StaticPermissions {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn deny(self, principal: impl Into<String>, id: impl Into<String>) -> Self {
        self.denied.write().insert((principal.into(), id.into()));
        self
    }
}

#[async_trait]
impl PermissionChecker for StaticPermissions {
    async fn can_perform(&self, principal: &str, ids: &[String], _permission: &str) -> bool {
        let denied = self.denied.read();
        !ids
            .iter()
            .any(|id| denied.contains(&(principal.to_string(), id.clone())))
    }
}

/// Parsed form of the in-memory query grammar
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    conditions: Vec<(String, Value)>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Symbol(char),
}

fn tokenize(query: &str) -> Result<Vec<Token>, RepositoryError> {
    let mut tokens = Vec::new();
    let mut chars = query.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '\'' {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    // '' escapes a quote inside a literal
                    Some('\'') if chars.peek() == Some(&'\'') => {
                        chars.next();
                        text.push('\'');
                    }
                    Some('\'') => break,
                    Some(ch) => text.push(ch),
                    None => {
                        return Err(RepositoryError::InvalidQuery(
                            "unterminated string literal".to_string(),
                        ))
                    }
                }
            }
            tokens.push(Token::Quoted(text));
        } else if c == '=' || c == '*' {
            chars.next();
            tokens.push(Token::Symbol(c));
        } else if c.is_alphanumeric() || matches!(c, '_' | ':' | '.' | '-') {
            let mut word = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || matches!(ch, '_' | ':' | '.' | '-') {
                    word.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Word(word));
        } else {
            return Err(RepositoryError::InvalidQuery(format!(
                "unexpected character '{c}'"
            )));
        }
    }
    Ok(tokens)
}

impl DocumentQuery {
    pub fn parse(query: &str) -> Result<Self, RepositoryError> {
        let tokens = tokenize(query)?;
        let mut tokens = tokens.into_iter();

        let mut expect_keyword = |keyword: &str, tokens: &mut std::vec::IntoIter<Token>| match tokens.next() {
            Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword) => Ok(()),
            other => Err(RepositoryError::InvalidQuery(format!(
                "expected {keyword}, found {}",
                describe(other.as_ref())
            ))),
        };

        expect_keyword("SELECT", &mut tokens)?;
        match tokens.next() {
            Some(Token::Symbol('*')) => {}
            other => {
                return Err(RepositoryError::InvalidQuery(format!(
                    "expected *, found {}",
                    describe(other.as_ref())
                )))
            }
        }
        expect_keyword("FROM", &mut tokens)?;
        expect_keyword("Document", &mut tokens)?;

        let mut conditions = Vec::new();
        match tokens.next() {
            None => return Ok(Self { conditions }),
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("WHERE") => {}
            other => {
                return Err(RepositoryError::InvalidQuery(format!(
                    "expected WHERE or end of query, found {}",
                    describe(other.as_ref())
                )))
            }
        }

        loop {
            let property = match tokens.next() {
                Some(Token::Word(word)) => word,
                other => {
                    return Err(RepositoryError::InvalidQuery(format!(
                        "expected property name, found {}",
                        describe(other.as_ref())
                    )))
                }
            };
            match tokens.next() {
                Some(Token::Symbol('=')) => {}
                other => {
                    return Err(RepositoryError::InvalidQuery(format!(
                        "expected =, found {}",
                        describe(other.as_ref())
                    )))
                }
            }
            let value = match tokens.next() {
                Some(Token::Quoted(text)) => Value::String(text),
                Some(Token::Word(word)) if word.eq_ignore_ascii_case("true") => Value::Bool(true),
                Some(Token::Word(word)) if word.eq_ignore_ascii_case("false") => Value::Bool(false),
                Some(Token::Word(word)) => serde_json::from_str::<serde_json::Number>(&word)
                    .map(Value::Number)
                    .map_err(|_| {
                        RepositoryError::InvalidQuery(format!("invalid literal {word}"))
                    })?,
                other => {
                    return Err(RepositoryError::InvalidQuery(format!(
                        "expected value, found {}",
                        describe(other.as_ref())
                    )))
                }
            };
            conditions.push((property, value));

            match tokens.next() {
                None => return Ok(Self { conditions }),
                Some(Token::Word(word)) if word.eq_ignore_ascii_case("AND") => {}
                other => {
                    return Err(RepositoryError::InvalidQuery(format!(
                        "expected AND or end of query, found {}",
                        describe(other.as_ref())
                    )))
                }
            }
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.conditions
            .iter()
            .all(|(property, expected)| document.get(property) == Some(expected))
    }
}

fn describe(token: Option<&Token>) -> String {
    match token {
        None => "end of query".to_string(),
        Some(Token::Word(word)) => format!("'{word}'"),
        Some(Token::Quoted(text)) => format!("string '{text}'"),
        Some(Token::Symbol(c)) => format!("'{c}'"),
    }
}

type DocumentMap = Arc<RwLock<BTreeMap<String, Document>>>;

/// Repository over an in-process document map
///
/// ```rust
/// use serde_json::json;
/// use tasker_bulk::bulk::{Document, ExecutionTarget, InMemoryRepository, Repository};
///
/// # tokio_test::block_on(async {
/// let repository = InMemoryRepository::default();
/// repository.insert("doc-1", Document::from([("kind".to_string(), json!("note"))]));
/// repository.insert("doc-2", Document::from([("kind".to_string(), json!("invoice"))]));
///
/// let mut scroll = repository
///     .scroll("SELECT * FROM Document WHERE kind = 'note'", &ExecutionTarget::default(), 100)
///     .await
///     .unwrap();
/// assert_eq!(scroll.next_batch().await.unwrap(), Some(vec!["doc-1".to_string()]));
/// assert_eq!(scroll.next_batch().await.unwrap(), None);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryRepository {
    name: String,
    documents: DocumentMap,
    commits: Arc<AtomicU64>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new("default")
    }
}

impl InMemoryRepository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: Arc::new(RwLock::new(BTreeMap::new())),
            commits: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn insert(&self, id: impl Into<String>, document: Document) {
        self.documents.write().insert(id.into(), document);
    }

    pub fn document(&self, id: &str) -> Option<Document> {
        self.documents.read().get(id).cloned()
    }

    pub fn property(&self, id: &str, name: &str) -> Option<Value> {
        self.documents.read().get(id).and_then(|d| d.get(name).cloned())
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Successful session commits so far
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    fn check_target(&self, target: &ExecutionTarget) -> Result<(), RepositoryError> {
        if target.repository != self.name {
            return Err(RepositoryError::Unavailable(format!(
                "unknown repository {}",
                target.repository
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate_query(&self, query: &str) -> Result<(), RepositoryError> {
        DocumentQuery::parse(query).map(|_| ())
    }

    async fn scroll(
        &self,
        query: &str,
        target: &ExecutionTarget,
        batch_size: usize,
    ) -> Result<Box<dyn IdScroll>, RepositoryError> {
        self.check_target(target)?;
        let query = DocumentQuery::parse(query)?;
        let ids: Vec<String> = self
            .documents
            .read()
            .iter()
            .filter(|(_, document)| query.matches(document))
            .map(|(id, _)| id.clone())
            .collect();
        Ok(Box::new(SnapshotScroll {
            ids: ids.into_iter(),
            batch_size: batch_size.max(1),
        }))
    }

    async fn open_session(
        &self,
        target: &ExecutionTarget,
    ) -> Result<Box<dyn RepositorySession>, RepositoryError> {
        self.check_target(target)?;
        Ok(Box::new(InMemorySession {
            documents: Arc::clone(&self.documents),
            commits: Arc::clone(&self.commits),
            pending: BTreeMap::new(),
        }))
    }
}

/// Ids matched when the scroll started
struct SnapshotScroll {
    ids: std::vec::IntoIter<String>,
    batch_size: usize,
}

#[async_trait]
impl IdScroll for SnapshotScroll {
    async fn next_batch(&mut self) -> Result<Option<Vec<String>>, RepositoryError> {
        let batch: Vec<String> = self.ids.by_ref().take(self.batch_size).collect();
        Ok((!batch.is_empty()).then_some(batch))
    }
}

struct InMemorySession {
    documents: DocumentMap,
    commits: Arc<AtomicU64>,
    /// Staged writes per document
    pending: BTreeMap<String, Document>,
}

#[async_trait]
impl RepositorySession for InMemorySession {
    async fn exists(&self, id: &str) -> Result<bool, RepositoryError> {
        Ok(self.documents.read().contains_key(id))
    }

    async fn get_property(&self, id: &str, name: &str) -> Result<Option<Value>, RepositoryError> {
        if let Some(value) = self.pending.get(id).and_then(|staged| staged.get(name)) {
            return Ok(Some(value.clone()));
        }
        let documents = self.documents.read();
        let document = documents
            .get(id)
            .ok_or_else(|| RepositoryError::DocumentNotFound(id.to_string()))?;
        Ok(document.get(name).cloned())
    }

    async fn set_property(&mut self, id: &str, name: &str, value: Value) -> Result<(), RepositoryError> {
        if !self.documents.read().contains_key(id) {
            return Err(RepositoryError::DocumentNotFound(id.to_string()));
        }
        self.pending
            .entry(id.to_string())
            .or_default()
            .insert(name.to_string(), value);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), RepositoryError> {
        let pending = std::mem::take(&mut self.pending);
        let mut documents = self.documents.write();
        for (id, changes) in pending {
            if let Some(document) = documents.get_mut(&id) {
                document.extend(changes);
            }
        }
        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
