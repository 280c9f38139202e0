//! Property tests for the chunkers.

use std::sync::Arc;

use docqa_rag::chunking::{Chunker, FixedSizeChunker, RecursiveChunker, SemanticChunker};
use docqa_rag::document::Document;
use docqa_rag::mock::MockEmbeddingProvider;
use proptest::prelude::*;

fn arb_sizes() -> impl Strategy<Value = (usize, usize)> {
    (1usize..60).prop_flat_map(|size| (Just(size), 0..size))
}

/// *For any* text and valid size/overlap, fixed-size chunks SHALL cover the
/// text exactly: the first chunk followed by every later chunk minus its
/// `overlap` leading characters reproduces the input.
mod prop_fixed_size_coverage {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn chunks_reassemble_to_the_input(
            text in "[a-zé ]{0,400}",
            (size, overlap) in arb_sizes(),
        ) {
            let chunker = FixedSizeChunker::new(size, overlap).unwrap();
            let document = Document::new(text.clone(), "doc.txt");
            let chunks: Vec<_> = chunker.split(&document).collect();

            if text.is_empty() {
                prop_assert!(chunks.is_empty());
                return Ok(());
            }

            let mut rebuilt = String::new();
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.chunk_index, i);
                prop_assert!(chunk.text.chars().count() <= size);
                if i == 0 {
                    rebuilt.push_str(&chunk.text);
                } else {
                    rebuilt.extend(chunk.text.chars().skip(overlap));
                }
            }
            prop_assert_eq!(rebuilt, text);
        }
    }
}

/// *For any* text, recursive chunks SHALL be non-empty, trimmed and no longer
/// than `chunk_size` characters.
mod prop_recursive_bounds {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn chunks_bounded_and_trimmed(
            text in "[a-z]{1,12}( [a-z]{1,12}){0,40}(\n\n[a-z]{1,12}( [a-z]{1,12}){0,20}){0,3}",
            (size, overlap) in arb_sizes(),
        ) {
            let chunker = RecursiveChunker::new(size, overlap).unwrap();
            let document = Document::new(text, "doc.txt");
            let rt = tokio::runtime::Runtime::new().unwrap();
            let chunks = rt.block_on(chunker.chunk(&document)).unwrap();

            prop_assert!(!chunks.is_empty());
            for chunk in &chunks {
                prop_assert!(!chunk.text.is_empty());
                prop_assert_eq!(chunk.text.trim(), chunk.text.as_str());
                prop_assert!(chunk.text.chars().count() <= size);
            }
        }
    }
}

#[test]
fn fixed_size_windows_on_three_thousand_characters() {
    let text: String = (0..3000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let chunker = FixedSizeChunker::new(1500, 200).unwrap();
    let chunks: Vec<_> = chunker.split(&Document::new(text.clone(), "report.pdf")).collect();

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].text, text[0..1500]);
    assert_eq!(chunks[1].text, text[1300..2800]);
    assert_eq!(chunks[2].text, text[2600..3000]);
    assert!(chunks.iter().all(|c| c.source_id == "report.pdf"));
}

#[test]
fn text_shorter_than_chunk_size_is_one_chunk() {
    let chunker = FixedSizeChunker::new(1500, 200).unwrap();
    let chunks: Vec<_> = chunker.split(&Document::new("short note", "n.txt")).collect();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "short note");
}

#[tokio::test]
async fn semantic_chunks_keep_every_sentence_in_order() {
    let embedder = Arc::new(MockEmbeddingProvider::new(64));
    let chunker = SemanticChunker::new(embedder.clone());
    let text = "Rust has ownership. Borrowing is checked at compile time. \
                Sourdough needs a starter. Bread rises overnight. Ovens must be hot.";
    let chunks = chunker.chunk(&Document::new(text, "mixed.txt")).await.unwrap();

    let joined = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join(" ");
    assert_eq!(joined, text);
    assert!(chunks.iter().enumerate().all(|(i, c)| c.chunk_index == i));
    assert_eq!(embedder.calls(), 1);
}

#[tokio::test]
async fn semantic_chunker_propagates_embedding_failure() {
    let chunker = SemanticChunker::new(Arc::new(MockEmbeddingProvider::new(8).failing()));
    let err = chunker
        .chunk(&Document::new("First sentence. Second sentence.", "a.txt"))
        .await
        .unwrap_err();
    assert!(!err.is_config());
}
