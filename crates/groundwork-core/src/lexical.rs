//! Lexical index: BM25 over chunk text, backed by an in-memory tantivy index.
//!
//! Built directly from the chunk store, independent of embeddings, so
//! keyword retrieval keeps working when the semantic index is missing.
//! Only chunks sharing at least one term with the query are returned, and
//! equal scores are ordered by chunk ID.

use std::cmp::Ordering;
use std::fmt;

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer};
use tantivy::{doc, Index, IndexReader, IndexWriter, TantivyDocument};

use crate::error::Result;
use crate::models::{ranked, Chunk, RetrievalCandidate};

/// Indexing heap for the single writer thread.
const WRITER_HEAP_BYTES: usize = 50_000_000;

pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    chunk_id: Field,
    body: Field,
    len: usize,
}

impl fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LexicalIndex").field("len", &self.len).finish()
    }
}

impl LexicalIndex {
    pub fn build(chunks: &[Chunk]) -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let chunk_id = schema_builder.add_text_field("chunk_id", STRING | STORED);
        let body = schema_builder.add_text_field("body", TEXT);
        let index = Index::create_in_ram(schema_builder.build());

        let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        for chunk in chunks {
            writer.add_document(doc!(
                chunk_id => chunk.id.clone(),
                body => chunk.text.clone(),
            ))?;
        }
        writer.commit()?;

        let reader = index.reader()?;
        Ok(Self {
            index,
            reader,
            chunk_id,
            body,
            len: chunks.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Top-`k` chunks for `query` by BM25, ties broken by chunk ID.
    ///
    /// The question is reduced to its analyzed terms before parsing, so
    /// punctuation or query-syntax characters never fail a search.
    pub fn query(&self, query: &str, k: usize) -> Result<Vec<RetrievalCandidate>> {
        let terms = tokenize(query);
        if self.len == 0 || k == 0 || terms.is_empty() {
            return Ok(Vec::new());
        }

        let parser = QueryParser::for_index(&self.index, vec![self.body]);
        let (parsed, _errors) = parser.parse_query_lenient(&terms.join(" "));

        let searcher = self.reader.searcher();
        // Every match is collected so the chunk ID tie-break also holds at the cut-off.
        let hits = searcher.search(&parsed, &TopDocs::with_limit(self.len))?;

        let mut scored = Vec::with_capacity(hits.len());
        for (score, address) in hits {
            if score <= 0.0 {
                continue;
            }
            let stored: TantivyDocument = searcher.doc(address)?;
            if let Some(id) = stored.get_first(self.chunk_id).and_then(|v| v.as_str()) {
                scored.push((id.to_string(), score as f64));
            }
        }
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(ranked(scored))
    }
}

/// Split text into lowercase terms the same way the index does.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .build();
    let mut stream = analyzer.token_stream(text);
    let mut terms = Vec::new();
    while stream.advance() {
        terms.push(stream.token().text.clone());
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            doc_id: id.split('#').next().unwrap_or_default().to_string(),
            source_path: String::new(),
            source_type: SourceType::Flat,
            page: None,
            heading_path: vec![],
            text: text.to_string(),
            created_at: String::new(),
            hash: String::new(),
        }
    }

    fn corpus() -> LexicalIndex {
        LexicalIndex::build(&[
            chunk("a#0", "Heat pumps move heat from outside air into the house."),
            chunk("b#0", "Insulating the attic reduces heat loss in winter."),
            chunk("c#0", "Solar panels generate electricity on sunny days."),
            chunk("d#0", "Heat heat heat everywhere, heat pumps and heat pumps."),
        ])
        .unwrap()
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Heat-pump's COP: 3.5!"),
            vec!["heat", "pump", "s", "cop", "3", "5"]
        );
    }

    #[test]
    fn test_only_matching_chunks_returned() {
        let hits = corpus().query("solar electricity", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c#0");
        assert_eq!(hits[0].rank, 1);
    }

    #[test]
    fn test_rare_term_outweighs_common_term() {
        let hits = corpus().query("attic heat", 10).unwrap();
        assert_eq!(hits[0].chunk_id, "b#0");
    }

    #[test]
    fn test_term_frequency_raises_score() {
        let hits = corpus().query("pumps", 10).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["d#0", "a#0"]);
    }

    #[test]
    fn test_ties_break_by_chunk_id() {
        let idx =
            LexicalIndex::build(&[chunk("z#0", "same words"), chunk("a#0", "same words")]).unwrap();
        let hits = idx.query("same", 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "a#0");
    }

    #[test]
    fn test_question_punctuation_is_tolerated() {
        let hits = corpus().query("Do (solar) panels: work?^2", 10).unwrap();
        assert_eq!(hits[0].chunk_id, "c#0");
    }

    #[test]
    fn test_empty_index_and_empty_query() {
        assert!(LexicalIndex::build(&[]).unwrap().query("anything", 5).unwrap().is_empty());
        assert!(corpus().query("  ", 5).unwrap().is_empty());
        assert!(corpus().query("?!", 5).unwrap().is_empty());
        assert!(corpus().query("heat", 0).unwrap().is_empty());
    }

    #[test]
    fn test_truncates_to_k() {
        assert_eq!(corpus().query("heat", 2).unwrap().len(), 2);
    }
}
