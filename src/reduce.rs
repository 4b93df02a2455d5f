//! ReduceEngine - merges the partial index results of one flush into
//! persisted index rows.
//!
//! Map descriptors write every mapped row directly. Reduce descriptors
//! partition their partial results by group key and by state, merge new
//! rows with the persisted row of the group, subtract deleted documents,
//! apply updates, and emit exactly one create, update or delete command per
//! touched group.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use crate::backend::{Filter, Row, Statement, Transaction};
use crate::collection::TableNames;
use crate::commands::{Bridge, IndexCommand};
use crate::error::{Result, StoreError};
use crate::index::{Grouping, IndexDescriptor, IndexRecord, MapState, MapStateKind};

/// Partial results of one group, split by state.
#[derive(Default)]
struct GroupStates {
    key: Value,
    new: Vec<IndexRecord>,
    update: Vec<IndexRecord>,
    delete: Vec<IndexRecord>,
}

pub struct ReduceEngine<'a> {
    names: &'a TableNames,
}

impl<'a> ReduceEngine<'a> {
    pub fn new(names: &'a TableNames) -> Self {
        Self { names }
    }

    /// Turn collected map states into index commands. Persisted reduce rows
    /// are read through `tx`.
    pub async fn run(&self, tx: &mut dyn Transaction, states: Vec<MapState>) -> Result<Vec<IndexCommand>> {
        let mut commands = Vec::new();
        for (descriptor, states) in by_descriptor(states) {
            if descriptor.is_reduce() {
                self.reduce(tx, &descriptor, states, &mut commands).await?;
            } else {
                self.map(&descriptor, states, &mut commands)?;
            }
        }
        Ok(commands)
    }

    fn map(&self, descriptor: &IndexDescriptor, states: Vec<MapState>, commands: &mut Vec<IndexCommand>) -> Result<()> {
        let table = self.names.index(descriptor.name());
        let mut deleted = BTreeSet::new();
        for state in states {
            let IndexRecord {
                id,
                mut row,
                added_documents,
                removed_documents,
            } = state.index;
            match state.state {
                MapStateKind::Delete => {
                    for document_id in removed_documents {
                        if deleted.insert(document_id) {
                            commands.push(IndexCommand::DeleteMapIndex {
                                table: table.clone(),
                                document_id,
                            });
                        }
                    }
                }
                MapStateKind::New | MapStateKind::Update => {
                    if let Some(document_id) = added_documents.iter().next() {
                        row.insert("DocumentId".into(), Value::from(*document_id));
                    }
                    commands.push(match id {
                        None => IndexCommand::CreateIndex {
                            table: table.clone(),
                            row,
                            bridge: None,
                            added_documents: BTreeSet::new(),
                        },
                        Some(id) => IndexCommand::UpdateIndex {
                            table: table.clone(),
                            id,
                            row,
                            bridge: None,
                            added_documents: BTreeSet::new(),
                            removed_documents: BTreeSet::new(),
                        },
                    });
                }
            }
        }
        Ok(())
    }

    async fn reduce(
        &self,
        tx: &mut dyn Transaction,
        descriptor: &IndexDescriptor,
        states: Vec<MapState>,
        commands: &mut Vec<IndexCommand>,
    ) -> Result<()> {
        let group_key = descriptor.group_key().ok_or_else(|| {
            StoreError::Configuration(format!(
                "reduce index {} declares no group key",
                descriptor.name()
            ))
        })?;
        let table = self.names.index(descriptor.name());
        let bridge = Bridge::new(self.names, descriptor.name());

        for (_, group) in partition(descriptor, group_key, states)? {
            let GroupStates {
                key,
                new,
                update,
                delete,
            } = group;

            let added: BTreeSet<i64> = new.iter().flat_map(|r| r.added_documents.iter().copied()).collect();
            let removed: BTreeSet<i64> = delete
                .iter()
                .flat_map(|r| r.removed_documents.iter().copied())
                .collect();

            let candidate = if new.is_empty() {
                None
            } else {
                let rows = new.into_iter().map(|r| r.row).collect();
                Some(reduce_one(descriptor, &key, rows)?)
            };

            let persisted = load_persisted(tx, &table, group_key, &key).await?;
            let persisted_id = persisted.as_ref().map(|(id, _)| *id);

            let mut working = match (persisted, candidate) {
                (Some((_, stored)), Some(candidate)) => {
                    Some(reduce_one(descriptor, &key, vec![stored, candidate])?)
                }
                (Some((_, stored)), None) => Some(stored),
                (None, candidate) => candidate,
            };

            if !delete.is_empty() {
                if let Some(index) = working.take() {
                    let rows = delete.into_iter().map(|r| r.row).collect();
                    working = descriptor.delete(index, Grouping::new(key.clone(), rows))?;
                }
            }

            if !update.is_empty() {
                if let Some(index) = working.take() {
                    let rows = update.into_iter().map(|r| r.row).collect();
                    working = Some(descriptor.update(index, Grouping::new(key.clone(), rows))?);
                }
            }

            trace!(
                index = descriptor.name(),
                key = %key,
                persisted = persisted_id.is_some(),
                remains = working.is_some(),
                "reduced group"
            );

            match (persisted_id, working) {
                (Some(id), None) => commands.push(IndexCommand::DeleteReduceIndex {
                    table: table.clone(),
                    id,
                    bridge: bridge.clone(),
                }),
                (None, Some(row)) => commands.push(IndexCommand::CreateIndex {
                    table: table.clone(),
                    row,
                    bridge: Some(bridge.clone()),
                    added_documents: added,
                }),
                (Some(id), Some(row)) => commands.push(IndexCommand::UpdateIndex {
                    table: table.clone(),
                    id,
                    row,
                    bridge: Some(bridge.clone()),
                    added_documents: added,
                    removed_documents: removed,
                }),
                (None, None) => {}
            }
        }
        Ok(())
    }
}

/// Group states by descriptor, keeping first-seen order.
fn by_descriptor(states: Vec<MapState>) -> Vec<(Arc<IndexDescriptor>, Vec<MapState>)> {
    let mut groups: Vec<(Arc<IndexDescriptor>, Vec<MapState>)> = Vec::new();
    for state in states {
        match groups.iter_mut().find(|(d, _)| Arc::ptr_eq(d, &state.descriptor)) {
            Some((_, bucket)) => bucket.push(state),
            None => groups.push((state.descriptor.clone(), vec![state])),
        }
    }
    groups
}

fn partition(
    descriptor: &IndexDescriptor,
    group_key: &str,
    states: Vec<MapState>,
) -> Result<BTreeMap<String, GroupStates>> {
    let mut groups: BTreeMap<String, GroupStates> = BTreeMap::new();
    for state in states {
        let key = state.index.row.get(group_key).cloned().ok_or_else(|| {
            StoreError::Configuration(format!(
                "index {} rows have no group key column {}",
                descriptor.name(),
                group_key
            ))
        })?;
        let group = groups.entry(key.to_string()).or_insert_with(|| GroupStates {
            key,
            ..GroupStates::default()
        });
        match state.state {
            MapStateKind::New => group.new.push(state.index),
            MapStateKind::Update => group.update.push(state.index),
            MapStateKind::Delete => group.delete.push(state.index),
        }
    }
    Ok(groups)
}

/// Reduce a group that must collapse into exactly one row.
fn reduce_one(descriptor: &IndexDescriptor, key: &Value, rows: Vec<Row>) -> Result<Row> {
    let count = rows.len();
    descriptor
        .reduce(Grouping::new(key.clone(), rows))?
        .ok_or_else(|| {
            StoreError::InvariantViolation(format!(
                "reduce of {} rows in {} for key {} produced no row",
                count,
                descriptor.name(),
                key
            ))
        })
}

/// The persisted row of a group with its `Id` split off.
async fn load_persisted(
    tx: &mut dyn Transaction,
    table: &str,
    group_key: &str,
    key: &Value,
) -> Result<Option<(i64, Row)>> {
    let rows = tx
        .query(&Statement::select(table, Filter::eq(group_key, key.clone())))
        .await?;
    if rows.len() > 1 {
        return Err(StoreError::InvariantViolation(format!(
            "{} rows in {} share group key {}",
            rows.len(),
            table,
            key
        )));
    }
    match rows.into_iter().next() {
        None => Ok(None),
        Some(mut row) => {
            let id = row
                .remove("Id")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| StoreError::Backend(format!("row of {} has no Id", table)))?;
            Ok(Some((id, row)))
        }
    }
}
