//! The per-record run: every artifact goes into the record's staging area.

use tracing::{debug, info};

use super::{KeywordContext, PipelineServices, ReferenceContext};
use super::reference::build_references;
use crate::config::ReferenceConfig;
use crate::download::Downloader;
use crate::error::PipelineError;
use crate::staging::{StagingArea, canonical_name, keyword_artifact_name, search_artifact_name};
use crate::types::{Record, SearchHit};

/// Enriches one record at a time with web evidence
#[derive(Clone, Debug)]
pub struct Pipeline {
    services: PipelineServices,
    downloader: Downloader,
    config: ReferenceConfig,
}

impl Pipeline {
    /// Create a pipeline over `services`, fetching PDFs with `downloader`.
    pub fn new(services: PipelineServices, downloader: Downloader, config: ReferenceConfig) -> Self {
        Self {
            services,
            downloader,
            config,
        }
    }

    /// The downloader used for PDFs.
    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// Enrich `record`, writing every artifact into `area`.
    ///
    /// For each turn: derive keywords, search (or reuse cached results left in
    /// `area` by an earlier run), then build the turn's references. The
    /// canonical artifact is written last; its presence means the run finished.
    /// Keyword or search failures fail the record; reference failures only
    /// drop the reference.
    pub async fn run(&self, area: &StagingArea, mut record: Record) -> Result<Record, PipelineError> {
        let id = record.conversation_hash.clone();
        let lang = record.conversations.lang.clone();
        let ctx = ReferenceContext {
            services: &self.services,
            downloader: &self.downloader,
            config: &self.config,
        };

        for turn in 0..record.conversations.contents.len() {
            let context = KeywordContext::for_turn(&record.conversations, turn);
            let keywords = self
                .services
                .keywords
                .derive_keywords(&context)
                .await
                .map_err(|e| PipelineError::Keywords {
                    turn,
                    reason: e.to_string(),
                })?;
            area.write_json(&keyword_artifact_name(&id, turn), &keywords)
                .await?;

            let hits = self.search(area, turn, &keywords, &lang).await?;
            let question = record.conversations.contents[turn].query.clone();
            let references = build_references(&ctx, area, &hits, &question, &lang).await;
            debug!(record_id = %id, turn, references = references.len(), "turn enriched");
            record.conversations.contents[turn].references = references;
        }

        area.write_json(&canonical_name(&id), &record).await?;
        info!(record_id = %id, turns = record.conversations.contents.len(), "record pipeline finished");
        Ok(record)
    }

    async fn search(
        &self,
        area: &StagingArea,
        turn: usize,
        keywords: &str,
        lang: &crate::types::Language,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        let cache = search_artifact_name(area.id(), turn);
        if let Some(hits) = area.read_json::<Vec<SearchHit>>(&cache).await {
            debug!(record_id = %area.id(), turn, "reusing cached search results");
            return Ok(hits);
        }

        let hits = self
            .services
            .search
            .search(keywords, lang.locale())
            .await
            .map_err(|e| PipelineError::Search {
                turn,
                reason: e.to_string(),
            })?;
        area.write_json(&cache, &hits).await?;
        Ok(hits)
    }
}
