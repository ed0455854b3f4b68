//! Relationship resolver: parent id to child ids via secondary indexes.

use crate::error::{PipelineError, PipelineResult};
use crate::retry::{RetryPolicy, with_retry};
use arbor_core::{EntityId, EntityKind};
use arbor_metadata::{IndexRow, MetadataStore, PageRequest};
use std::sync::Arc;

pub struct RelationshipResolver {
    store: Arc<dyn MetadataStore>,
    page_size: u32,
    retry: RetryPolicy,
}

impl RelationshipResolver {
    pub fn new(store: Arc<dyn MetadataStore>, page_size: u32, retry: RetryPolicy) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
            retry,
        }
    }

    /// Every child of `parent` of kind `child_kind`, following continuation
    /// cursors until the index is exhausted. Rows come back in id order.
    ///
    /// Each page query is retried on transient failures.
    #[tracing::instrument(skip(self), fields(parent = %parent, child_kind = %child_kind))]
    pub async fn children(
        &self,
        parent: &EntityId,
        child_kind: EntityKind,
    ) -> PipelineResult<Vec<IndexRow>> {
        let index = child_kind.parent_index().ok_or_else(|| {
            PipelineError::InvalidInput(format!("{child_kind} rows have no parent index"))
        })?;

        let mut rows = Vec::new();
        let mut request = PageRequest::first(self.page_size);
        let mut pages = 0u32;
        loop {
            let page = with_retry(&self.retry, index.as_str(), || {
                self.store.query_index(index, parent, request.clone())
            })
            .await?;
            pages += 1;
            rows.extend(page.rows);
            match page.next {
                Some(cursor) => request = PageRequest::after(self.page_size, cursor),
                None => break,
            }
        }

        tracing::trace!(pages, children = rows.len(), "Resolved children");
        Ok(rows)
    }

    /// Child ids only.
    pub async fn child_ids(
        &self,
        parent: &EntityId,
        child_kind: EntityKind,
    ) -> PipelineResult<Vec<EntityId>> {
        Ok(self
            .children(parent, child_kind)
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect())
    }
}
