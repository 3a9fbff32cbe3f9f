//! Turning search hits into references: fetch, extract, summarize.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::ReferenceContext;
use crate::download::DownloadOutcome;
use crate::error::PipelineError;
use crate::staging::StagingArea;
use crate::types::{Language, Reference, ReferenceKind, SearchHit, is_irrelevant_verdict};
use crate::utils::{generate_ref_id, random_file_name};

/// Build the references of one turn from its search hits.
///
/// Hits whose content cannot be fetched, extracted or summarized are dropped,
/// and so are hits the summarizer judges irrelevant to the question. Only the
/// first `max_summaries` references are sent to the summarizer; later ones are
/// kept with an empty summary.
pub(crate) async fn build_references(
    ctx: &ReferenceContext<'_>,
    area: &StagingArea,
    hits: &[SearchHit],
    question: &str,
    lang: &Language,
) -> Vec<Reference> {
    let mut references = Vec::with_capacity(hits.len());
    let mut summarized = 0;

    for (idx, hit) in hits.iter().enumerate() {
        let kind = ReferenceKind::classify(&hit.link);
        let Acquired { main_body, file } = match acquire(ctx, area, &hit.link, kind).await {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(record_id = %area.id(), error = %e, "dropping reference");
                continue;
            }
        };

        let summary = if summarized < ctx.config.max_summaries {
            match ctx
                .services
                .summarizer
                .summarize(question, &hit.title, &main_body, lang)
                .await
            {
                Ok(summary) if is_irrelevant_verdict(&summary) => {
                    summarized += 1;
                    debug!(record_id = %area.id(), url = %hit.link, "summarizer judged reference irrelevant");
                    if let Some(file) = file {
                        discard(&file).await;
                    }
                    continue;
                }
                Ok(summary) => {
                    summarized += 1;
                    summary
                }
                Err(e) => {
                    let e = PipelineError::reference(&hit.link, format!("summarization failed: {e}"));
                    warn!(record_id = %area.id(), error = %e, "dropping reference");
                    if let Some(file) = file {
                        discard(&file).await;
                    }
                    continue;
                }
            }
        } else {
            String::new()
        };

        references.push(Reference {
            ref_id: generate_ref_id(),
            idx,
            index: hit.position,
            title: hit.title.clone(),
            snippet: hit.snippet.clone(),
            url: hit.link.clone(),
            kind,
            main_body,
            summary,
        });
    }

    debug!(
        record_id = %area.id(),
        hits = hits.len(),
        kept = references.len(),
        summarized,
        "references built"
    );
    references
}

/// Text of a reference, plus the staged file it came from (PDFs only)
struct Acquired {
    main_body: String,
    file: Option<PathBuf>,
}

/// Fetch the content behind `url` and reduce it to text.
async fn acquire(
    ctx: &ReferenceContext<'_>,
    area: &StagingArea,
    url: &str,
    kind: ReferenceKind,
) -> Result<Acquired, PipelineError> {
    match url::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        Ok(parsed) => {
            return Err(PipelineError::reference(
                url,
                format!("unsupported scheme {}", parsed.scheme()),
            ));
        }
        Err(e) => return Err(PipelineError::reference(url, e)),
    }

    let (main_body, file) = match kind {
        ReferenceKind::Pdf => {
            let (text, path) = fetch_pdf(ctx, area, url).await?;
            (text, Some(path))
        }
        ReferenceKind::Text | ReferenceKind::Markdown => (fetch_page(ctx, url).await?, None),
        ReferenceKind::WebPage => {
            let html = fetch_page(ctx, url).await?;
            let text = ctx
                .services
                .extractor
                .html_to_text(&html)
                .await
                .map_err(|e| PipelineError::reference(url, format!("extraction failed: {e}")))?;
            (text, None)
        }
    };
    Ok(Acquired { main_body, file })
}

/// One GET bounded by the page timeout, decoded as text.
async fn fetch_page(ctx: &ReferenceContext<'_>, url: &str) -> Result<String, PipelineError> {
    let _permit = ctx
        .downloader
        .network_permit(url)
        .await
        .map_err(|e| PipelineError::reference(url, e))?;

    let response = ctx
        .downloader
        .client()
        .get(url)
        .timeout(ctx.config.page_timeout)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| PipelineError::reference(url, e))?;

    response
        .text()
        .await
        .map_err(|e| PipelineError::reference(url, e))
}

/// Download a PDF into the staging area and extract its text.
///
/// Anything short of a complete, readable download is discarded so it is
/// never committed.
async fn fetch_pdf(
    ctx: &ReferenceContext<'_>,
    area: &StagingArea,
    url: &str,
) -> Result<(String, PathBuf), PipelineError> {
    let destination = area.artifact_path(&random_file_name("pdf"));
    let report = ctx.downloader.download(url, &destination).await;

    let path = match report.outcome {
        DownloadOutcome::Success(path) => path,
        DownloadOutcome::PartialButUsable(path) => {
            discard(&path).await;
            return Err(PipelineError::reference(url, "download ended before declared length"));
        }
        DownloadOutcome::Failed(e) => {
            discard(&destination).await;
            return Err(PipelineError::reference(url, e));
        }
    };

    match ctx.services.extractor.pdf_to_text(&path).await {
        Ok(text) => Ok((text, path)),
        Err(e) => {
            discard(&path).await;
            Err(PipelineError::reference(url, format!("extraction failed: {e}")))
        }
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), error = %e, "could not remove invalid download");
        }
        _ => {}
    }
}
