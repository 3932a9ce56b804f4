//! Muni RAG - Retrieval and answer generation
//!
//! The `Retriever` embeds a question and pulls the top-k most similar
//! sections from the persisted store; the `Assistant` wraps retrieval and
//! generation into an interactive question loop. Each question is answered
//! independently, with no conversation memory across turns.

use std::io::{BufRead, Write};
use std::sync::Arc;

use muni_core::{Result, ScoredSection};
use muni_vector::{EmbeddingClient, SectionStore};

pub mod llm;

pub use llm::{create_llm_client, LlmClient, OllamaChat, OpenAiChat};

// ============================================================================
// Retriever
// ============================================================================

/// Fetches the sections most similar to a question.
///
/// The question is embedded with the same client configuration used at
/// ingestion time; the store manifest rejects a mismatched model before
/// any search runs.
pub struct Retriever {
    store: Arc<dyn SectionStore>,
    embeddings: Arc<dyn EmbeddingClient>,
    collection: String,
    top_k: usize,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn SectionStore>,
        embeddings: Arc<dyn EmbeddingClient>,
        collection: impl Into<String>,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            embeddings,
            collection: collection.into(),
            top_k,
        }
    }

    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredSection>> {
        let query = self.embeddings.embed(question).await?;
        self.store
            .similarity_search(&self.collection, &query, self.top_k)
    }
}

// ============================================================================
// Prompt
// ============================================================================

/// Build the generation prompt: the model is constrained to the retrieved
/// context and told to say so when the context is insufficient.
pub fn build_prompt(sources: &[ScoredSection], question: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are an expert assistant on municipal codes. \
         Your task is to answer questions based ONLY on the following context.\n",
    );
    prompt.push_str(
        "If the context does not contain the answer, state that the information \
         is not available in the provided documents.\n",
    );
    prompt.push_str("Do not use any outside knowledge.\n\n");

    prompt.push_str("CONTEXT:\n");
    for source in sources {
        prompt.push_str(&format!("Section {}:\n", source.section.label()));
        prompt.push_str(&source.section.content);
        prompt.push_str("\n\n");
    }

    prompt.push_str("QUESTION:\n");
    prompt.push_str(question);
    prompt.push_str("\n\nANSWER:\n");

    prompt
}

// ============================================================================
// Assistant
// ============================================================================

/// One answered question: the retrieved sources and the generated text.
#[derive(Debug)]
pub struct Answer {
    pub sources: Vec<ScoredSection>,
    pub answer: String,
}

/// Interactive question-answering over the persisted store.
pub struct Assistant {
    retriever: Retriever,
    llm: Arc<dyn LlmClient>,
}

impl Assistant {
    pub fn new(retriever: Retriever, llm: Arc<dyn LlmClient>) -> Self {
        Self { retriever, llm }
    }

    /// Answer a single question: retrieve, prompt, generate.
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let sources = self.retriever.retrieve(question).await?;
        let prompt = build_prompt(&sources, question);
        tracing::debug!("Prompt length: {} chars", prompt.len());
        let answer = self.llm.generate(&prompt).await?;

        Ok(Answer { sources, answer })
    }

    /// Run the interactive loop: one question per line until the
    /// case-insensitive literal `exit` (or end of input). Typing `exit`
    /// first terminates before any retrieval or generation call is made.
    pub async fn run(&self, mut input: impl BufRead, mut output: impl Write) -> Result<()> {
        loop {
            write!(output, "\nYour question: ")?;
            output.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                break;
            }

            let question = line.trim();
            if question.is_empty() {
                continue;
            }
            if question.eq_ignore_ascii_case("exit") {
                break;
            }

            let response = self.answer(question).await?;

            writeln!(output, "\n--- Sources ---")?;
            for (i, source) in response.sources.iter().enumerate() {
                writeln!(output, "{}. Section: {}", i + 1, source.section.label())?;
                writeln!(output, "   Content: {}", source.section.preview(200))?;
            }

            writeln!(output, "\nAssistant's Answer:")?;
            writeln!(output, "{}", response.answer)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use muni_core::{MuniError, Section};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeEmbedding {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingClient for FakeEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_id(&self) -> &str {
            "fake-embed-v1"
        }
    }

    struct FakeStore {
        sections: Vec<Section>,
    }

    impl SectionStore for FakeStore {
        fn list_collections(&self) -> Result<Vec<muni_vector::CollectionInfo>> {
            Ok(vec![])
        }

        fn count(&self, _collection: &str) -> Result<usize> {
            Ok(self.sections.len())
        }

        fn similarity_search(
            &self,
            _collection: &str,
            _query: &[f32],
            k: usize,
        ) -> Result<Vec<ScoredSection>> {
            Ok(self
                .sections
                .iter()
                .take(k)
                .map(|s| ScoredSection {
                    section: s.clone(),
                    score: 0.9,
                })
                .collect())
        }
    }

    struct FakeLlm {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for FakeLlm {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if prompt.contains("CONTEXT:") {
                Ok("Generated answer.".to_string())
            } else {
                Err(MuniError::Llm("prompt missing context".to_string()))
            }
        }
    }

    fn assistant(sections: Vec<Section>) -> (Assistant, Arc<FakeEmbedding>, Arc<FakeLlm>) {
        let embeddings = Arc::new(FakeEmbedding {
            calls: AtomicUsize::new(0),
        });
        let llm = Arc::new(FakeLlm {
            calls: AtomicUsize::new(0),
        });
        let retriever = Retriever::new(
            Arc::new(FakeStore { sections }),
            embeddings.clone(),
            "sections",
            3,
        );
        (Assistant::new(retriever, llm.clone()), embeddings, llm)
    }

    #[test]
    fn test_prompt_contains_context_and_question() {
        let sources = vec![ScoredSection {
            section: Section::new("12.04.010", "No fences over 6 feet."),
            score: 0.9,
        }];
        let prompt = build_prompt(&sources, "How tall may a fence be?");

        assert!(prompt.contains("ONLY on the following context"));
        assert!(prompt.contains("Section 12.04.010:"));
        assert!(prompt.contains("No fences over 6 feet."));
        assert!(prompt.contains("How tall may a fence be?"));
        assert!(prompt.ends_with("ANSWER:\n"));
    }

    #[test]
    fn test_prompt_labels_chunks_without_identifier() {
        let sources = vec![ScoredSection {
            section: Section::chunk("some chunk"),
            score: 0.5,
        }];
        let prompt = build_prompt(&sources, "q");
        assert!(prompt.contains("Section N/A:"));
    }

    #[tokio::test]
    async fn test_exit_first_makes_no_collaborator_calls() {
        let (assistant, embeddings, llm) = assistant(vec![]);
        let mut out = Vec::new();

        assistant
            .run(Cursor::new("exit\n"), &mut out)
            .await
            .unwrap();

        assert_eq!(embeddings.calls.load(Ordering::SeqCst), 0);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exit_is_case_insensitive() {
        let (assistant, embeddings, _) = assistant(vec![]);
        let mut out = Vec::new();

        assistant
            .run(Cursor::new("EXIT\n"), &mut out)
            .await
            .unwrap();

        assert_eq!(embeddings.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_end_of_input_terminates_loop() {
        let (assistant, _, _) = assistant(vec![]);
        let mut out = Vec::new();
        assistant.run(Cursor::new(""), &mut out).await.unwrap();
    }

    #[tokio::test]
    async fn test_question_prints_sources_then_answer() {
        let sections = vec![
            Section::new("12.04.010", "No fences over 6 feet."),
            Section::new("12.04.020", "Permits required."),
        ];
        let (assistant, embeddings, llm) = assistant(sections);
        let mut out = Vec::new();

        assistant
            .run(Cursor::new("fence height?\nexit\n"), &mut out)
            .await
            .unwrap();

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("--- Sources ---"));
        assert!(printed.contains("1. Section: 12.04.010"));
        assert!(printed.contains("2. Section: 12.04.020"));
        assert!(printed.contains("Assistant's Answer:"));
        assert!(printed.contains("Generated answer."));

        // One turn, one embedding and one generation call
        assert_eq!(embeddings.calls.load(Ordering::SeqCst), 1);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_turns_are_independent() {
        let (assistant, embeddings, llm) = assistant(vec![Section::new("1.1.1", "rule")]);
        let mut out = Vec::new();

        assistant
            .run(Cursor::new("first?\nsecond?\nexit\n"), &mut out)
            .await
            .unwrap();

        assert_eq!(embeddings.calls.load(Ordering::SeqCst), 2);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }
}
