use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tantivy::postings::Postings;
use tantivy::schema::{self, IndexRecordOption, Schema, TextFieldIndexing, TextOptions};
use tantivy::tokenizer::{TextAnalyzer, WhitespaceTokenizer};
use tantivy::{doc, DocSet, Index, IndexWriter, TERMINATED};
use uuid::Uuid;

/// Analyzed terms are joined with spaces before indexing, so the scratch
/// index only needs to split on whitespace.
const TERMS_TOKENIZER: &str = "storefront_terms";
/// Tantivy's minimum writer budget.
const WRITER_HEAP_BYTES: usize = 15_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct TermStat {
    pub term: String,
    pub term_freq: u32,
    pub doc_freq: u64,
}

/// Frequency statistics for one scored text.
#[derive(Debug, Clone, PartialEq)]
pub struct TermStats {
    pub terms: Vec<TermStat>,
    pub doc_len: u32,
    pub num_docs: u64,
    pub avg_doc_len: f32,
}

/// Backend that turns an analyzed term list into frequency statistics.
pub trait TermStatistics: Send + Sync {
    fn collect(&self, terms: &[String]) -> Result<TermStats>;
}

/// Uniquely named scratch directory, removed when dropped.
pub struct ScratchIndex {
    path: PathBuf,
}

impl ScratchIndex {
    pub fn create(root: &Path) -> Result<Self> {
        let path = root.join(format!("scratch-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create scratch index at {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchIndex {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove scratch index"
            );
        }
    }
}

/// Term statistics from a throwaway single-document Tantivy index.
pub struct TantivyTermStatistics {
    scratch_root: PathBuf,
}

impl TantivyTermStatistics {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
        }
    }

    fn build_schema() -> (Schema, schema::Field) {
        let indexing = TextFieldIndexing::default()
            .set_tokenizer(TERMS_TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqs);
        let mut sb = Schema::builder();
        let body = sb.add_text_field("body", TextOptions::default().set_indexing_options(indexing));
        (sb.build(), body)
    }
}

impl TermStatistics for TantivyTermStatistics {
    fn collect(&self, terms: &[String]) -> Result<TermStats> {
        // Declared first so it is dropped after the index handles below.
        let scratch = ScratchIndex::create(&self.scratch_root)?;

        let (schema, body) = Self::build_schema();
        let index = Index::create_in_dir(scratch.path(), schema)
            .context("Failed to create scratch Tantivy index")?;
        index.tokenizers().register(
            TERMS_TOKENIZER,
            TextAnalyzer::builder(WhitespaceTokenizer::default()).build(),
        );

        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .context("Failed to create scratch Tantivy writer")?;
        writer.add_document(doc!(body => terms.join(" ")))?;
        writer.commit().context("Scratch Tantivy commit failed")?;

        let reader = index
            .reader()
            .context("Failed to create scratch Tantivy reader")?;
        let searcher = reader.searcher();
        let num_docs = searcher.num_docs();

        let mut stats = Vec::new();
        for segment_reader in searcher.segment_readers() {
            let inverted = segment_reader.inverted_index(body)?;
            let mut stream = inverted.terms().stream()?;
            while stream.advance() {
                let term = String::from_utf8_lossy(stream.key()).into_owned();
                let info = stream.value().clone();
                let mut postings =
                    inverted.read_postings_from_terminfo(&info, IndexRecordOption::WithFreqs)?;
                let mut term_freq = 0u32;
                while postings.doc() != TERMINATED {
                    term_freq += postings.term_freq();
                    postings.advance();
                }
                stats.push(TermStat {
                    term,
                    term_freq,
                    doc_freq: info.doc_freq as u64,
                });
            }
        }

        let doc_len = terms.len() as u32;
        let avg_doc_len = if num_docs > 0 {
            doc_len as f32 / num_docs as f32
        } else {
            0.0
        };

        Ok(TermStats {
            terms: stats,
            doc_len,
            num_docs,
            avg_doc_len,
        })
    }
}
