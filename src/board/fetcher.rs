use std::sync::Arc;

use tracing::debug;

use super::models::{Lead, PageQuery};
use crate::errors::BoardError;
use crate::store::LeadStore;

/// A page as seen by a column: rows, the filtered stage total and the offset
/// the page was requested at.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub leads: Vec<Lead>,
    pub total_count: usize,
    pub offset: usize,
}

impl FetchedPage {
    pub fn has_more(&self) -> bool {
        self.offset + self.leads.len() < self.total_count
    }
}

/// Issues single bounded stage fetches against the lead store.
#[derive(Clone)]
pub struct PageFetcher {
    store: Arc<dyn LeadStore>,
}

impl PageFetcher {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self { store }
    }

    pub async fn fetch(&self, query: PageQuery) -> Result<FetchedPage, BoardError> {
        let page = self
            .store
            .fetch_page(&query)
            .await
            .map_err(|source| BoardError::FetchFailed {
                stage_id: query.stage_id.clone(),
                source,
            })?;
        debug!(
            stage_id = %query.stage_id,
            offset = query.offset,
            rows = page.leads.len(),
            total = page.total_count,
            "page fetched"
        );
        Ok(FetchedPage {
            leads: page.leads,
            total_count: page.total_count,
            offset: query.offset,
        })
    }
}
