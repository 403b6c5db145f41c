// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A single-writer, multi-reader transactional table over [`Route`] rows.
//!
//! Writers serialize on a per-table mutex and publish immutable snapshots
//! atomically on commit; readers clone the current snapshot and keep a
//! stable view for as long as they like without ever blocking the writer.
//! Every read query also yields an edge-triggered, one-shot [`Watch`]
//! scoped to that query's index key, and a named [`ChangeTracker`] lets a
//! reader observe deletions that happened after its registration point
//! even though the deleted rows are no longer in the table.

use crate::tables::Route;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// A binary index key.
pub type Key = Vec<u8>;

/// A monotonically increasing per-table modification counter.
pub type Revision = u64;

/// One named index over the table: a function from row to binary key.
#[derive(Clone, Copy)]
pub struct IndexDef {
    /// The index name queries refer to.
    pub name: &'static str,
    /// Extract the index key from a row.
    pub key_of: fn(&Route) -> Key,
}

/// The shape of a table: a unique primary index plus any number of
/// non-unique secondary indices.
#[derive(Clone, Copy)]
pub struct TableSchema {
    /// The table name (diagnostics only).
    pub name: &'static str,
    /// The unique primary index; inserts upsert by this key.
    pub primary: IndexDef,
    /// The non-unique secondary indices.
    pub secondary: &'static [IndexDef],
}

/// A read query: an index name plus the key to look up.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Query {
    index: &'static str,
    key: Key,
}

impl Query {
    /// Build a query against the named index.
    #[must_use]
    pub fn new(index: &'static str, key: Key) -> Self {
        Query { index, key }
    }
}

#[derive(Clone)]
struct Row {
    route: Route,
    revision: Revision,
}

#[derive(Clone, Default)]
struct TableState {
    revision: Revision,
    rows: BTreeMap<Key, Row>,
    indexes: HashMap<&'static str, BTreeMap<Key, Key>>,
    graveyard: BTreeMap<Revision, Route>,
}

/// A stable point-in-time view of a table, unaffected by later commits.
#[derive(Clone)]
pub struct Snapshot {
    state: Arc<TableState>,
}

impl Snapshot {
    /// The table revision this snapshot was taken at.
    #[must_use]
    pub fn revision(&self) -> Revision {
        self.state.revision
    }

    /// The number of rows in this snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.rows.len()
    }

    /// True when this snapshot holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.rows.is_empty()
    }
}

/// A handle that resolves when the query it was returned with may have a
/// different answer.
///
/// One-shot: after it fires, re-run the query to obtain a fresh watch.
/// The watch covers commits that happen after the query call that
/// returned it.
#[derive(Debug)]
pub struct Watch(watch::Receiver<()>);

impl Watch {
    /// Wait for the watch to fire.
    pub async fn wait(mut self) {
        let _ = self.0.changed().await;
    }

    /// Non-blocking probe: has the watch fired since it was created?
    pub fn has_fired(&mut self) -> bool {
        self.0.has_changed().unwrap_or(true)
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum WatchScope {
    Table,
    Key { index: &'static str, key: Key },
}

#[derive(Default)]
struct WatchRegistry {
    scopes: Mutex<HashMap<WatchScope, watch::Sender<()>>>,
}

impl WatchRegistry {
    fn subscribe(&self, scope: WatchScope) -> Watch {
        let mut scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = scopes.entry(scope).or_insert_with(|| watch::channel(()).0);
        Watch(sender.subscribe())
    }

    /// Fire the table-wide scope and every touched key scope, dropping
    /// scopes nobody subscribes to anymore.
    fn notify(&self, touched: &HashSet<WatchScope>) {
        let mut scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
        scopes.retain(|scope, sender| {
            if matches!(scope, WatchScope::Table) || touched.contains(scope) {
                let _ = sender.send(());
            }
            sender.receiver_count() > 0
        });
    }
}

fn composite_key(secondary: &[u8], primary: &[u8]) -> Key {
    let mut key = Vec::with_capacity(2 + secondary.len() + primary.len());
    key.extend_from_slice(&(secondary.len() as u16).to_be_bytes());
    key.extend_from_slice(secondary);
    key.extend_from_slice(primary);
    key
}

fn scan_prefix(secondary: &[u8]) -> Key {
    let mut key = Vec::with_capacity(2 + secondary.len());
    key.extend_from_slice(&(secondary.len() as u16).to_be_bytes());
    key.extend_from_slice(secondary);
    key
}

/// A transactional table over [`Route`] rows.
pub struct Table {
    schema: TableSchema,
    published: watch::Sender<Snapshot>,
    writer: Mutex<()>,
    watchers: WatchRegistry,
    trackers: Arc<Mutex<HashMap<&'static str, Revision>>>,
}

impl Table {
    /// Build an empty table with the given schema.
    #[must_use]
    pub fn new(schema: TableSchema) -> Table {
        let mut state = TableState::default();
        for index in schema.secondary {
            state.indexes.insert(index.name, BTreeMap::new());
        }
        let snapshot = Snapshot {
            state: Arc::new(state),
        };
        Table {
            schema,
            published: watch::channel(snapshot).0,
            writer: Mutex::new(()),
            watchers: WatchRegistry::default(),
            trackers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The table name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.schema.name
    }

    /// The current snapshot. Stable: later commits do not affect it.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.published.borrow().clone()
    }

    /// Open a write transaction, serializing with other writers.
    ///
    /// The returned transaction must not be held across `.await`.
    pub fn write(&self) -> WriteTxn<'_> {
        let guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let state = (*self.published.borrow().state).clone();
        WriteTxn {
            table: self,
            state,
            touched: HashSet::new(),
            _guard: guard,
        }
    }

    /// A table-wide watch: fires on the next commit that changes anything.
    #[must_use]
    pub fn watch(&self) -> Watch {
        self.watchers.subscribe(WatchScope::Table)
    }

    /// The rows matching `query` in `snapshot`, in primary-key order,
    /// plus a watch scoped to the query's index key.
    pub fn get(&self, snapshot: &Snapshot, query: &Query) -> (Vec<Route>, Watch) {
        let watch = self.watchers.subscribe(WatchScope::Key {
            index: query.index,
            key: query.key.clone(),
        });
        (self.collect(snapshot, query), watch)
    }

    /// The first row matching `query` in primary-key order, if any.
    pub fn first(&self, snapshot: &Snapshot, query: &Query) -> (Option<Route>, Watch) {
        let (mut routes, watch) = self.get(snapshot, query);
        if routes.is_empty() {
            (None, watch)
        } else {
            (Some(routes.swap_remove(0)), watch)
        }
    }

    /// Every row in `snapshot`, in primary-key order, plus a table-wide
    /// watch.
    pub fn all(&self, snapshot: &Snapshot) -> (Vec<Route>, Watch) {
        let watch = self.watch();
        let routes = snapshot
            .state
            .rows
            .values()
            .map(|row| row.route.clone())
            .collect();
        (routes, watch)
    }

    fn collect(&self, snapshot: &Snapshot, query: &Query) -> Vec<Route> {
        if query.index == self.schema.primary.name {
            return snapshot
                .state
                .rows
                .get(&query.key)
                .map(|row| row.route.clone())
                .into_iter()
                .collect();
        }
        let Some(index) = snapshot.state.indexes.get(query.index) else {
            panic!(
                "unknown index {index} on table {table}",
                index = query.index,
                table = self.schema.name
            );
        };
        let prefix = scan_prefix(&query.key);
        index
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(_, primary)| snapshot.state.rows.get(primary))
            .map(|row| row.route.clone())
            .collect()
    }
}

/// A write transaction. Inserts and deletes staged here become visible
/// atomically at [`WriteTxn::commit`]; dropping the transaction without
/// committing discards them.
pub struct WriteTxn<'t> {
    table: &'t Table,
    state: TableState,
    touched: HashSet<WatchScope>,
    _guard: MutexGuard<'t, ()>,
}

impl WriteTxn<'_> {
    /// Upsert `route` by primary key, returning the replaced row if any.
    pub fn insert(&mut self, route: Route) -> Option<Route> {
        let primary = (self.table.schema.primary.key_of)(&route);
        let new_secondary: Vec<(&'static str, Key)> = self
            .table
            .schema
            .secondary
            .iter()
            .map(|index| (index.name, (index.key_of)(&route)))
            .collect();

        self.state.revision += 1;
        let revision = self.state.revision;
        for &(name, ref secondary) in &new_secondary {
            self.touched.insert(WatchScope::Key {
                index: name,
                key: secondary.clone(),
            });
            if let Some(index) = self.state.indexes.get_mut(name) {
                index.insert(composite_key(secondary, &primary), primary.clone());
            }
        }
        self.touched.insert(WatchScope::Key {
            index: self.table.schema.primary.name,
            key: primary.clone(),
        });

        let old = self
            .state
            .rows
            .insert(primary.clone(), Row { route, revision })
            .map(|row| row.route);

        if let Some(old_route) = &old {
            // drop index entries the replaced row held under other keys
            for (index, &(name, ref new_key)) in
                self.table.schema.secondary.iter().zip(&new_secondary)
            {
                let old_key = (index.key_of)(old_route);
                if old_key != *new_key {
                    if let Some(map) = self.state.indexes.get_mut(name) {
                        map.remove(&composite_key(&old_key, &primary));
                    }
                    self.touched.insert(WatchScope::Key {
                        index: name,
                        key: old_key,
                    });
                }
            }
        }
        old
    }

    /// Delete the row sharing `route`'s primary key, returning it if it
    /// was present.
    pub fn delete(&mut self, route: &Route) -> Option<Route> {
        let primary = (self.table.schema.primary.key_of)(route);
        let removed = self.state.rows.remove(&primary)?;

        self.state.revision += 1;
        let revision = self.state.revision;
        for index in self.table.schema.secondary {
            let secondary = (index.key_of)(&removed.route);
            if let Some(map) = self.state.indexes.get_mut(index.name) {
                map.remove(&composite_key(&secondary, &primary));
            }
            self.touched.insert(WatchScope::Key {
                index: index.name,
                key: secondary,
            });
        }
        self.touched.insert(WatchScope::Key {
            index: self.table.schema.primary.name,
            key: primary,
        });
        self.state
            .graveyard
            .insert(revision, removed.route.clone());
        Some(removed.route)
    }

    /// Register a named change tracker positioned before every row in the
    /// table, so its first drain delivers the full current contents.
    pub fn register_tracker(&mut self, name: &'static str) -> ChangeTracker {
        self.table
            .trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, 0);
        ChangeTracker {
            name,
            cursor: 0,
            registry: Arc::clone(&self.table.trackers),
        }
    }

    /// Publish the staged changes atomically and fire the affected
    /// watches. A transaction that staged nothing publishes nothing.
    pub fn commit(mut self) {
        if self.touched.is_empty() {
            return;
        }
        let floor = self
            .table
            .trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .min()
            .copied();
        match floor {
            None => self.state.graveyard.clear(),
            Some(floor) => self.state.graveyard.retain(|revision, _| *revision > floor),
        }
        let snapshot = Snapshot {
            state: Arc::new(std::mem::take(&mut self.state)),
        };
        self.table.published.send_replace(snapshot);
        self.table.watchers.notify(&self.touched);
    }
}

/// One insert/update or delete observed through a [`ChangeTracker`].
#[derive(Clone, Debug)]
pub struct Change {
    /// The row as inserted, or as it was before deletion.
    pub route: Route,
    /// True when this change is a deletion.
    pub deleted: bool,
    /// The revision the change was committed at.
    pub revision: Revision,
}

/// A durable cursor over a table's modifications.
///
/// Deleted rows are retained (in a bounded graveyard) until every
/// registered tracker has observed them; dropping the tracker releases
/// that retention.
pub struct ChangeTracker {
    name: &'static str,
    cursor: Revision,
    registry: Arc<Mutex<HashMap<&'static str, Revision>>>,
}

impl ChangeTracker {
    /// Collect every change committed since the previous call (or since
    /// registration), in commit order, plus a watch that fires on the
    /// next commit.
    pub fn changes(&mut self, table: &Table) -> (Vec<Change>, Watch) {
        // subscribe before reading so a commit racing this call is never
        // missed: it either shows up in the snapshot or fires the watch
        let watch = table.watch();
        let snapshot = table.snapshot();

        let mut changes: Vec<Change> = Vec::new();
        for row in snapshot.state.rows.values() {
            if row.revision > self.cursor {
                changes.push(Change {
                    route: row.route.clone(),
                    deleted: false,
                    revision: row.revision,
                });
            }
        }
        for (revision, route) in snapshot.state.graveyard.range((self.cursor + 1)..) {
            changes.push(Change {
                route: route.clone(),
                deleted: true,
                revision: *revision,
            });
        }
        changes.sort_by_key(|change| change.revision);

        self.cursor = snapshot.revision();
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.name, self.cursor);
        (changes, watch)
    }
}

impl Drop for ChangeTracker {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.name);
    }
}
