//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Key-value proxy
//!
//! Sessions never open stores themselves. Each [`KvCommand`] is executed on a
//! blocking worker against a JSON-backed table at
//! `{data_dir}/{schema}/{table}.json`, and the engine queues the replies for
//! the session: one message for a single-value call, or a start marker, one
//! message per item and an end marker for a streamed call.
//! Any failure is reported as a single exception message.
//!
//! Tables are ordered maps, so iteration is key-sorted and stable across
//! rewrites of the backing file.

use crate::error::{StoreError, StoreResult};
use crate::message::{DbReply, KvCommand};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, trace, warn};

/// Store methods available to sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvMethod {
    /// `contains(key) -> bool`
    Contains,
    /// `get(key, default = null)`
    Get,
    /// `set(key, value)`
    Set,
    /// `delete(key)`; fails if absent
    Delete,
    /// `pop(key, default?)`; fails if absent without a default
    Pop,
    /// `setdefault(key, default = null)`
    SetDefault,
    /// `update(object)`
    Update,
    /// `clear()`
    Clear,
    /// `length() -> number`
    Length,
    /// `keys() -> array`
    Keys,
    /// `values() -> array`
    Values,
    /// `items() -> array of [key, value]`
    Items,
    /// Streamed keys
    IterKeys,
    /// Streamed values
    IterValues,
    /// Streamed `[key, value]` pairs
    IterItems,
}

impl FromStr for KvMethod {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "contains" | "__contains__" => KvMethod::Contains,
            "get" | "__getitem__" => KvMethod::Get,
            "set" | "__setitem__" => KvMethod::Set,
            "delete" | "__delitem__" => KvMethod::Delete,
            "pop" => KvMethod::Pop,
            "setdefault" => KvMethod::SetDefault,
            "update" => KvMethod::Update,
            "clear" => KvMethod::Clear,
            "length" | "len" | "__len__" => KvMethod::Length,
            "keys" => KvMethod::Keys,
            "values" => KvMethod::Values,
            "items" => KvMethod::Items,
            "iterkeys" => KvMethod::IterKeys,
            "itervalues" => KvMethod::IterValues,
            "iteritems" => KvMethod::IterItems,
            other => return Err(StoreError::UnknownMethod(other.to_string())),
        })
    }
}

impl KvMethod {
    fn mutates(self) -> bool {
        matches!(
            self,
            KvMethod::Set
                | KvMethod::Delete
                | KvMethod::Pop
                | KvMethod::SetDefault
                | KvMethod::Update
                | KvMethod::Clear
        )
    }
}

/// Result of executing a command
#[derive(Debug, Clone, PartialEq)]
pub enum KvOutcome {
    /// One value
    Value(Value),
    /// A sequence of items in table order
    Stream(Vec<Value>),
}

/// One table loaded from disk
#[derive(Debug)]
pub struct KvTable {
    path: PathBuf,
    data: BTreeMap<String, Value>,
}

impl KvTable {
    /// Load a table, or start empty if its file does not exist
    pub fn open(path: PathBuf) -> StoreResult<Self> {
        let data = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, data })
    }

    /// Write the table through a temporary file and rename it into place
    pub fn save(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.data)?;
        let temp_path = self.path.with_extension(format!("json.tmp-{}", std::process::id()));
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &self.path)?;
        trace!(path = %self.path.display(), entries = self.data.len(), "Saved table");
        Ok(())
    }

    /// Run one catalogue method
    ///
    /// A mutation that cannot be written to disk is undone, so the table in
    /// memory never holds data the file does not.
    pub fn execute(&mut self, method: KvMethod, args: &[Value]) -> StoreResult<KvOutcome> {
        if !method.mutates() {
            return self.apply(method, args);
        }
        let before = self.data.clone();
        let outcome = self.apply(method, args).and_then(|outcome| {
            self.save()?;
            Ok(outcome)
        });
        if outcome.is_err() {
            self.data = before;
        }
        outcome
    }

    fn apply(&mut self, method: KvMethod, args: &[Value]) -> StoreResult<KvOutcome> {
        let name = format!("{method:?}").to_ascii_lowercase();
        let bad = |reason: &str| StoreError::BadArguments {
            method: name.clone(),
            reason: reason.to_string(),
        };
        let key = |index: usize| -> StoreResult<String> {
            match args.get(index) {
                Some(Value::String(key)) => Ok(key.clone()),
                Some(_) => Err(bad("key must be a string")),
                None => Err(bad("missing key")),
            }
        };
        let arity = |min: usize, max: usize| -> StoreResult<()> {
            if args.len() < min || args.len() > max {
                Err(bad(&format!("expected {min}..={max} arguments, got {}", args.len())))
            } else {
                Ok(())
            }
        };

        let outcome = match method {
            KvMethod::Contains => {
                arity(1, 1)?;
                KvOutcome::Value(Value::Bool(self.data.contains_key(&key(0)?)))
            }
            KvMethod::Get => {
                arity(1, 2)?;
                let default = args.get(1).cloned().unwrap_or(Value::Null);
                KvOutcome::Value(self.data.get(&key(0)?).cloned().unwrap_or(default))
            }
            KvMethod::Set => {
                arity(2, 2)?;
                self.data.insert(key(0)?, args[1].clone());
                KvOutcome::Value(Value::Null)
            }
            KvMethod::Delete => {
                arity(1, 1)?;
                let key = key(0)?;
                self.data
                    .remove(&key)
                    .ok_or(StoreError::KeyNotFound(key))?;
                KvOutcome::Value(Value::Null)
            }
            KvMethod::Pop => {
                arity(1, 2)?;
                let key = key(0)?;
                match (self.data.remove(&key), args.get(1)) {
                    (Some(value), _) => KvOutcome::Value(value),
                    (None, Some(default)) => KvOutcome::Value(default.clone()),
                    (None, None) => return Err(StoreError::KeyNotFound(key)),
                }
            }
            KvMethod::SetDefault => {
                arity(1, 2)?;
                let default = args.get(1).cloned().unwrap_or(Value::Null);
                KvOutcome::Value(self.data.entry(key(0)?).or_insert(default).clone())
            }
            KvMethod::Update => {
                arity(1, 1)?;
                let Value::Object(entries) = &args[0] else {
                    return Err(bad("argument must be an object"));
                };
                for (key, value) in entries {
                    self.data.insert(key.clone(), value.clone());
                }
                KvOutcome::Value(Value::Null)
            }
            KvMethod::Clear => {
                arity(0, 0)?;
                self.data.clear();
                KvOutcome::Value(Value::Null)
            }
            KvMethod::Length => {
                arity(0, 0)?;
                KvOutcome::Value(Value::from(self.data.len()))
            }
            KvMethod::Keys => {
                arity(0, 0)?;
                KvOutcome::Value(Value::Array(self.keys()))
            }
            KvMethod::Values => {
                arity(0, 0)?;
                KvOutcome::Value(Value::Array(self.values()))
            }
            KvMethod::Items => {
                arity(0, 0)?;
                KvOutcome::Value(Value::Array(self.items()))
            }
            KvMethod::IterKeys => {
                arity(0, 0)?;
                KvOutcome::Stream(self.keys())
            }
            KvMethod::IterValues => {
                arity(0, 0)?;
                KvOutcome::Stream(self.values())
            }
            KvMethod::IterItems => {
                arity(0, 0)?;
                KvOutcome::Stream(self.items())
            }
        };
        Ok(outcome)
    }

    fn keys(&self) -> Vec<Value> {
        self.data.keys().cloned().map(Value::String).collect()
    }

    fn values(&self) -> Vec<Value> {
        self.data.values().cloned().collect()
    }

    fn items(&self) -> Vec<Value> {
        self.data
            .iter()
            .map(|(key, value)| Value::Array(vec![Value::String(key.clone()), value.clone()]))
            .collect()
    }
}

type TableKey = (String, String);

/// Executes key-value commands off the reactor
#[derive(Debug, Clone)]
pub struct KvProxy {
    inner: Arc<KvInner>,
}

#[derive(Debug)]
struct KvInner {
    root: PathBuf,
    /// Serializes loading tables from disk
    open_guard: Mutex<()>,
    tables: DashMap<TableKey, Arc<Mutex<KvTable>>>,
}

impl KvProxy {
    /// Serve tables stored under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(KvInner {
                root: root.into(),
                open_guard: Mutex::new(()),
                tables: DashMap::new(),
            }),
        }
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    fn table(&self, schema: &str, table: &str) -> StoreResult<Arc<Mutex<KvTable>>> {
        validate_name(schema)?;
        validate_name(table)?;
        let key = (schema.to_string(), table.to_string());
        if let Some(table) = self.inner.tables.get(&key) {
            return Ok(table.clone());
        }
        let _guard = self.inner.open_guard.lock();
        if let Some(table) = self.inner.tables.get(&key) {
            return Ok(table.clone());
        }
        let path = self.inner.root.join(schema).join(format!("{table}.json"));
        debug!(path = %path.display(), "Opening table");
        let opened = Arc::new(Mutex::new(KvTable::open(path)?));
        self.inner.tables.insert(key, opened.clone());
        Ok(opened)
    }

    /// Execute a command on the calling thread
    pub fn execute(&self, command: &KvCommand) -> StoreResult<KvOutcome> {
        let method = command.method.parse::<KvMethod>()?;
        let table = self.table(&command.schema, &command.table)?;
        let mut table = table.lock();
        table.execute(method, &command.args)
    }

    /// Execute a command and shape the full reply sequence
    ///
    /// Blocking; the engine runs it on a blocking worker. Failures become a
    /// single exception reply.
    pub fn replies(&self, command: &KvCommand) -> Vec<DbReply> {
        counter!("termgate.kv.commands").increment(1);
        match self.execute(command) {
            Ok(outcome) => replies_for(outcome, command.streaming),
            Err(e) => {
                counter!("termgate.kv.failures").increment(1);
                warn!(
                    schema = %command.schema,
                    table = %command.table,
                    method = %command.method,
                    error = %e,
                    "Key-value command failed"
                );
                vec![DbReply::Exception(e.to_string())]
            }
        }
    }
}

/// Shape an outcome into the reply sequence the caller asked for
fn replies_for(outcome: KvOutcome, streaming: bool) -> Vec<DbReply> {
    match (outcome, streaming) {
        (KvOutcome::Value(value), false) => vec![DbReply::Value(value)],
        (KvOutcome::Stream(items), false) => vec![DbReply::Value(Value::Array(items))],
        (outcome, true) => {
            let items = match outcome {
                KvOutcome::Stream(items) | KvOutcome::Value(Value::Array(items)) => items,
                KvOutcome::Value(value) => vec![value],
            };
            let mut replies = Vec::with_capacity(items.len() + 2);
            replies.push(DbReply::StreamStart);
            replies.extend(items.into_iter().map(DbReply::Item));
            replies.push(DbReply::StreamEnd);
            replies
        }
    }
}

/// Schema and table names become path components
fn validate_name(name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::BadArguments {
            method: "open".to_string(),
            reason: format!("invalid store name '{name}'"),
        })
    }
}

/// Per-(schema, table) locks for multi-step atomicity
///
/// Independent of the proxy's own serialization of single commands. The
/// guard releases on drop, so every exit path of the holder releases it.
#[derive(Debug, Clone, Default)]
pub struct KvLocks {
    locks: Arc<DashMap<TableKey, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held table lock
#[derive(Debug)]
pub struct TableLock {
    _guard: OwnedMutexGuard<()>,
}

impl KvLocks {
    /// Create an empty lock set
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `(schema, table)`
    pub async fn lock(&self, schema: &str, table: &str) -> TableLock {
        let mutex = self
            .locks
            .entry((schema.to_string(), table.to_string()))
            .or_default()
            .clone();
        TableLock {
            _guard: mutex.lock_owned().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn command(method: &str, args: Vec<Value>, streaming: bool) -> KvCommand {
        KvCommand {
            schema: "bbs".into(),
            table: "users".into(),
            method: method.into(),
            args,
            streaming,
        }
    }

    #[test]
    fn test_catalogue() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = KvProxy::new(dir.path());
        let run = |method: &str, args: Vec<Value>| proxy.execute(&command(method, args, false));

        assert_eq!(run("set", vec![json!("bob"), json!({"level": 3})]).unwrap(), KvOutcome::Value(Value::Null));
        assert_eq!(run("contains", vec![json!("bob")]).unwrap(), KvOutcome::Value(json!(true)));
        assert_eq!(run("get", vec![json!("bob")]).unwrap(), KvOutcome::Value(json!({"level": 3})));
        assert_eq!(run("get", vec![json!("amy"), json!(0)]).unwrap(), KvOutcome::Value(json!(0)));
        assert_eq!(run("setdefault", vec![json!("amy"), json!(1)]).unwrap(), KvOutcome::Value(json!(1)));
        assert_eq!(run("update", vec![json!({"cat": 2})]).unwrap(), KvOutcome::Value(Value::Null));
        assert_eq!(run("length", vec![]).unwrap(), KvOutcome::Value(json!(3)));
        assert_eq!(run("keys", vec![]).unwrap(), KvOutcome::Value(json!(["amy", "bob", "cat"])));
        assert_eq!(run("pop", vec![json!("cat")]).unwrap(), KvOutcome::Value(json!(2)));
        assert_eq!(run("pop", vec![json!("cat"), json!("gone")]).unwrap(), KvOutcome::Value(json!("gone")));
        assert_eq!(
            run("iteritems", vec![]).unwrap(),
            KvOutcome::Stream(vec![json!(["amy", 1]), json!(["bob", {"level": 3}])])
        );
        assert_eq!(run("clear", vec![]).unwrap(), KvOutcome::Value(Value::Null));
        assert_eq!(run("values", vec![]).unwrap(), KvOutcome::Value(json!([])));
    }

    #[test]
    fn test_errors() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = KvProxy::new(dir.path());
        let err = proxy.execute(&command("delete", vec![json!("nobody")], false)).unwrap_err();
        assert!(matches!(err, StoreError::KeyNotFound(ref key) if key == "nobody"));
        let err = proxy.execute(&command("frobnicate", vec![], false)).unwrap_err();
        assert!(matches!(err, StoreError::UnknownMethod(_)));
        let err = proxy.execute(&command("get", vec![json!(7)], false)).unwrap_err();
        assert!(matches!(err, StoreError::BadArguments { .. }));

        let mut bad = command("keys", vec![], false);
        bad.schema = "../etc".into();
        assert!(proxy.execute(&bad).is_err());
    }

    #[test]
    fn test_writes_persist_to_json_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let proxy = KvProxy::new(dir.path());
            proxy.execute(&command("set", vec![json!("k"), json!("v")], false)).unwrap();
        }
        let path = dir.path().join("bbs").join("users.json");
        let on_disk: BTreeMap<String, Value> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.get("k"), Some(&json!("v")));

        let reopened = KvProxy::new(dir.path());
        assert_eq!(
            reopened.execute(&command("get", vec![json!("k")], false)).unwrap(),
            KvOutcome::Value(json!("v"))
        );
    }

    #[test]
    fn test_failed_write_leaves_table_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = KvProxy::new(dir.path());
        proxy.execute(&command("set", vec![json!("kept"), json!(1)], false)).unwrap();

        // a regular file where the schema directory should be makes every save fail
        let schema_dir = dir.path().join("bbs");
        fs::remove_dir_all(&schema_dir).unwrap();
        fs::write(&schema_dir, b"not a directory").unwrap();

        assert!(proxy.execute(&command("set", vec![json!("k"), json!("v")], false)).is_err());
        assert!(proxy.execute(&command("pop", vec![json!("kept")], false)).is_err());
        assert!(proxy.execute(&command("clear", vec![], false)).is_err());

        let run = |method: &str, args: Vec<Value>| proxy.execute(&command(method, args, false));
        assert_eq!(run("get", vec![json!("k")]).unwrap(), KvOutcome::Value(Value::Null));
        assert_eq!(run("get", vec![json!("kept")]).unwrap(), KvOutcome::Value(json!(1)));
        assert_eq!(run("keys", vec![]).unwrap(), KvOutcome::Value(json!(["kept"])));
    }

    #[test]
    fn test_reply_shapes() {
        assert_eq!(
            replies_for(KvOutcome::Stream(vec![json!("a"), json!("b")]), true),
            vec![
                DbReply::StreamStart,
                DbReply::Item(json!("a")),
                DbReply::Item(json!("b")),
                DbReply::StreamEnd
            ]
        );
        assert_eq!(
            replies_for(KvOutcome::Stream(vec![]), true),
            vec![DbReply::StreamStart, DbReply::StreamEnd]
        );
        assert_eq!(
            replies_for(KvOutcome::Stream(vec![json!(1)]), false),
            vec![DbReply::Value(json!([1]))]
        );
    }

    #[test]
    fn test_replies_stream_keys() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = KvProxy::new(dir.path());
        proxy.execute(&command("update", vec![json!({"b": 2, "a": 1})], false)).unwrap();
        assert_eq!(
            proxy.replies(&command("iterkeys", vec![], true)),
            vec![
                DbReply::StreamStart,
                DbReply::Item(json!("a")),
                DbReply::Item(json!("b")),
                DbReply::StreamEnd
            ]
        );
    }

    #[test]
    fn test_replies_report_exception() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = KvProxy::new(dir.path());
        assert_eq!(
            proxy.replies(&command("pop", vec![json!("x")], true)),
            vec![DbReply::Exception("KeyError: x".into())]
        );
    }

    #[tokio::test]
    async fn test_table_lock_is_exclusive() {
        let locks = KvLocks::new();
        let held = locks.lock("bbs", "users").await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _lock = locks.lock("bbs", "users").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(held);
        waiter.await.unwrap();
        // other tables are unaffected
        let _other = locks.lock("bbs", "messages").await;
    }
}
