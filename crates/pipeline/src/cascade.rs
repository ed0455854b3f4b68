//! Cascade delete engine.
//!
//! A cascade starts at a removed root row and walks the hierarchy
//! breadth-first: every level is resolved from the index before the next one
//! is read. Deletion then runs over the levels in reverse, so no parent is
//! deleted while one of its children is still present. Siblings within a
//! level run concurrently up to the configured limit and each level is a
//! barrier for the one above it.
//!
//! A failure to resolve or delete an entity is recorded in the
//! [`CascadeReport`] and only holds back that entity's ancestors; unrelated
//! siblings carry on.

use crate::error::PipelineError;
use crate::metrics;
use crate::resolver::RelationshipResolver;
use crate::writer::{DeleteOutcome, IdempotentWriter};
use arbor_core::{BlobLocation, EntityId, EntityKind, EntityRef};
use futures::StreamExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Where in the cascade an entity failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Resolve,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedEntity {
    pub entity: EntityRef,
    pub stage: FailureStage,
    pub error: String,
    pub transient: bool,
}

/// Result of one cascade invocation.
#[derive(Clone, Debug, Serialize)]
pub struct CascadeReport {
    pub root: EntityRef,
    /// Descendants found per kind.
    pub resolved: BTreeMap<EntityKind, usize>,
    /// Rows removed by this invocation per kind.
    pub deleted: BTreeMap<EntityKind, usize>,
    /// Rows that were already gone when their delete ran.
    pub already_absent: usize,
    pub blobs_deleted: usize,
    pub failed: Vec<FailedEntity>,
    /// Data rows whose row and blob deletes disagreed.
    pub inconsistencies: Vec<EntityId>,
    /// Entities not attempted because a descendant failed.
    pub retained: Vec<EntityRef>,
}

impl CascadeReport {
    fn new(root: EntityRef) -> Self {
        Self {
            root,
            resolved: BTreeMap::new(),
            deleted: BTreeMap::new(),
            already_absent: 0,
            blobs_deleted: 0,
            failed: Vec::new(),
            inconsistencies: Vec::new(),
            retained: Vec::new(),
        }
    }

    /// Every descendant is gone.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.retained.is_empty()
    }

    pub fn deleted_total(&self) -> usize {
        self.deleted.values().sum()
    }

    pub fn into_result(self) -> Result<Self, PipelineError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(PipelineError::CascadeIncomplete {
                failed: self.failed.len(),
                root: self.root,
            })
        }
    }
}

#[derive(Clone, Debug)]
struct Node {
    id: EntityId,
    /// Index of the parent in the previous level.
    parent: usize,
    s3_location: Option<BlobLocation>,
    /// Set when this node or one of its descendants could not be handled.
    blocked: bool,
}

struct Level {
    kind: EntityKind,
    nodes: Vec<Node>,
}

pub struct CascadeEngine {
    resolver: Arc<RelationshipResolver>,
    writer: Arc<IdempotentWriter>,
    concurrency: usize,
}

impl CascadeEngine {
    pub fn new(
        resolver: Arc<RelationshipResolver>,
        writer: Arc<IdempotentWriter>,
        concurrency: usize,
    ) -> Self {
        Self {
            resolver,
            writer,
            concurrency: concurrency.max(1),
        }
    }

    /// Remove every descendant of `root`. The root row itself is expected to
    /// be gone already; it is what triggered the cascade.
    #[tracing::instrument(skip(self), fields(root = %root))]
    pub async fn run(&self, root: EntityRef) -> CascadeReport {
        let mut report = CascadeReport::new(root.clone());
        let levels = self.resolve(&root, &mut report).await;
        self.delete_bottom_up(levels, &mut report).await;

        if report.is_complete() {
            metrics::CASCADES_COMPLETED.inc();
            tracing::info!(
                deleted = report.deleted_total(),
                blobs_deleted = report.blobs_deleted,
                already_absent = report.already_absent,
                inconsistencies = report.inconsistencies.len(),
                "Cascade complete"
            );
        } else {
            metrics::CASCADES_FAILED.inc();
            tracing::warn!(
                failed = report.failed.len(),
                retained = report.retained.len(),
                "Cascade incomplete"
            );
        }
        report
    }

    /// Top-down resolution. Level 0 holds only the root.
    async fn resolve(&self, root: &EntityRef, report: &mut CascadeReport) -> Vec<Level> {
        let mut levels = vec![Level {
            kind: root.kind,
            nodes: vec![Node {
                id: root.id.clone(),
                parent: 0,
                s3_location: None,
                blocked: false,
            }],
        }];

        let mut kind = root.kind;
        while let Some(child_kind) = kind.child() {
            let parents = levels.last().map(|l| l.nodes.clone()).unwrap_or_default();
            let parent_ids: Vec<EntityId> = parents.iter().map(|n| n.id.clone()).collect();
            let mut results: Vec<_> = futures::stream::iter(parent_ids.into_iter().enumerate())
                .map(|(i, id): (usize, EntityId)| async move {
                    (i, self.resolver.children(&id, child_kind).await)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
            results.sort_by_key(|(i, _)| *i);

            let mut children = Vec::new();
            for (i, result) in results {
                match result {
                    Ok(rows) => children.extend(rows.into_iter().map(|row| Node {
                        id: row.id,
                        parent: i,
                        s3_location: row.s3_location,
                        blocked: false,
                    })),
                    Err(e) => {
                        let parent_kind = kind;
                        let parent = &parents[i];
                        tracing::warn!(
                            parent_kind = %parent_kind,
                            parent_id = %parent.id,
                            child_kind = %child_kind,
                            error = %e,
                            "Failed to resolve children"
                        );
                        report.failed.push(FailedEntity {
                            entity: EntityRef::new(parent_kind, parent.id.clone()),
                            stage: FailureStage::Resolve,
                            transient: e.is_transient(),
                            error: e.to_string(),
                        });
                        if let Some(level) = levels.last_mut() {
                            level.nodes[i].blocked = true;
                        }
                    }
                }
            }

            report.resolved.insert(child_kind, children.len());
            if children.is_empty() {
                break;
            }
            levels.push(Level {
                kind: child_kind,
                nodes: children,
            });
            kind = child_kind;
        }
        levels
    }

    /// Bottom-up deletion, one level at a time.
    async fn delete_bottom_up(&self, mut levels: Vec<Level>, report: &mut CascadeReport) {
        for depth in (1..levels.len()).rev() {
            let kind = levels[depth].kind;
            let candidates: Vec<(usize, Node)> = levels[depth]
                .nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| !n.blocked)
                .map(|(i, n)| (i, n.clone()))
                .collect();

            for node in levels[depth].nodes.iter().filter(|n| n.blocked) {
                report.retained.push(EntityRef::new(kind, node.id.clone()));
            }

            let outcomes: Vec<_> = futures::stream::iter(candidates)
                .map(|(i, node): (usize, Node)| async move {
                    let outcome = self.delete_node(kind, &node).await;
                    (i, node, outcome)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for (i, node, outcome) in outcomes {
                match outcome.row {
                    Ok(DeleteOutcome::Deleted) => {
                        *report.deleted.entry(kind).or_default() += 1;
                    }
                    Ok(DeleteOutcome::AlreadyAbsent) => report.already_absent += 1,
                    Err(e) => {
                        tracing::warn!(
                            kind = %kind,
                            id = %node.id,
                            error = %e,
                            "Failed to delete row"
                        );
                        report.failed.push(FailedEntity {
                            entity: EntityRef::new(kind, node.id.clone()),
                            stage: FailureStage::Delete,
                            transient: e.is_transient(),
                            error: e.to_string(),
                        });
                        levels[depth].nodes[i].blocked = true;
                    }
                }
                if outcome.blob_deleted {
                    report.blobs_deleted += 1;
                }
                if outcome.inconsistent {
                    report.inconsistencies.push(node.id.clone());
                }
            }

            // Hold back every parent with a blocked child.
            let blocked_parents: Vec<usize> = levels[depth]
                .nodes
                .iter()
                .filter(|n| n.blocked)
                .map(|n| n.parent)
                .collect();
            for parent in blocked_parents {
                levels[depth - 1].nodes[parent].blocked = true;
            }
        }
    }

    async fn delete_node(&self, kind: EntityKind, node: &Node) -> NodeOutcome {
        if kind == EntityKind::Data {
            let outcome = self
                .writer
                .delete_data(&node.id, node.s3_location.as_ref())
                .await;
            let inconsistent = outcome.is_inconsistent();
            let blob_deleted = matches!(outcome.blob, Some(Ok(DeleteOutcome::Deleted)));
            NodeOutcome {
                row: outcome.row,
                blob_deleted,
                inconsistent,
            }
        } else {
            NodeOutcome {
                row: self.writer.delete_row(kind, &node.id).await,
                blob_deleted: false,
                inconsistent: false,
            }
        }
    }
}

struct NodeOutcome {
    row: Result<DeleteOutcome, PipelineError>,
    blob_deleted: bool,
    inconsistent: bool,
}
