//! Muni CLI - municipal code RAG pipeline
//!
//! Usage:
//!   muni extract        OCR the source PDF into the text cache
//!   muni load           split the cached text and rebuild the vector store
//!   muni check          inspect the persisted store
//!   muni ask            interactive question answering
//!
//! Behavior is controlled by environment variables (loaded from .env at
//! startup) or a TOML file named by MUNI_CONFIG; the subcommands take no
//! flags.

use std::io::Write;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use muni_core::{AppConfig, MuniError};
use muni_ocr::UnstructuredClient;
use muni_parser::SectionSplitter;
use muni_rag::{create_llm_client, Assistant, Retriever};
use muni_vector::{create_embedding_client, rebuild_index, LocalStore, SectionStore};

/// Fixed query used when verifying a freshly rebuilt store.
const LOAD_SAMPLE_QUERY: &str = "fence height";

/// Fixed query used by the inspector's retrieval check.
const CHECK_SAMPLE_QUERY: &str = "selling ice";

/// Fixed question used for the retriever smoke test before the ask loop.
const ASK_SMOKE_QUESTION: &str = "What is the rule for fence height?";

#[derive(Parser)]
#[command(name = "muni")]
#[command(about = "Municipal code RAG assistant")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// OCR the source PDF and cache the extracted text
    Extract,
    /// Split the cached text into sections and rebuild the vector store
    Load,
    /// Inspect the persisted vector store
    Check,
    /// Ask questions interactively against the store
    Ask,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    match cli.command {
        Commands::Extract => extract(&config).await?,
        Commands::Load => load(&config).await?,
        Commands::Check => check(&config, &mut std::io::stdout()).await?,
        Commands::Ask => ask(&config).await?,
    }

    Ok(())
}

fn load_config() -> anyhow::Result<AppConfig> {
    match std::env::var("MUNI_CONFIG") {
        Ok(path) => Ok(AppConfig::from_file(path)?),
        Err(_) => Ok(AppConfig::from_env()?),
    }
}

/// `muni extract`: OCR cache loader entry point.
async fn extract(config: &AppConfig) -> anyhow::Result<()> {
    let partitioner = UnstructuredClient::new(&config.ocr);

    let Some(text) =
        muni_ocr::get_text(&config.paths.pdf_path, &config.paths.ocr_cache, &partitioner).await?
    else {
        println!(
            "Error: the file '{}' was not found.",
            config.paths.pdf_path.display()
        );
        println!("Place the source PDF there or set MUNI_PDF_PATH.");
        return Ok(());
    };

    println!("\n--- Verification ---");
    println!("Successfully retrieved {} characters.", text.chars().count());
    let sample: String = text.chars().take(400).collect();
    println!("Sample: {sample}...");
    Ok(())
}

/// `muni load`: full ingestion, from cached text to rebuilt vector store.
async fn load(config: &AppConfig) -> anyhow::Result<()> {
    println!("Starting database loading process...");

    if !config.paths.ocr_cache.exists() {
        println!(
            "Error: text file not found at '{}'. Run `muni extract` first.",
            config.paths.ocr_cache.display()
        );
        return Ok(());
    }

    println!("Loading text from '{}'...", config.paths.ocr_cache.display());
    let text = std::fs::read_to_string(&config.paths.ocr_cache)?;

    println!("Parsing text into sections...");
    let splitter = SectionSplitter::new(config.splitter.clone());
    let sections = splitter.split(&text);
    println!("Created {} documents.", sections.len());

    let embeddings = create_embedding_client(&config.llm)?;

    println!(
        "Rebuilding database at '{}'. This will take a while...",
        config.paths.db_path.display()
    );
    let report = rebuild_index(
        &sections,
        embeddings.as_ref(),
        &config.paths.db_path,
        &config.retrieval.collection,
        LOAD_SAMPLE_QUERY,
    )
    .await?;

    println!("Database has {} documents.", report.count);
    println!("\nRunning a test search for '{LOAD_SAMPLE_QUERY}'...");
    if report.sample_results.is_empty() {
        println!("Test search returned no results.");
    } else {
        for result in &report.sample_results {
            println!(
                "   Result: Section {} | {}",
                result.section.label(),
                result.section.preview(100)
            );
        }
    }

    println!("\nCOMPLETE! Database is ready.");
    Ok(())
}

/// `muni check`: two independent read-only inspections. Each reports its
/// own errors; one failing never aborts the other. Writes to a generic
/// sink so the report shapes stay testable.
async fn check(config: &AppConfig, out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "Running comprehensive database check...")?;

    writeln!(out, "\n--- Method 1: Direct store check ---")?;
    if let Err(e) = check_direct(config, out) {
        writeln!(out, "An error occurred with the direct check: {e}")?;
    }

    writeln!(out, "\n--- Method 2: Retrieval wrapper check ---")?;
    if let Err(e) = check_retrieval(config, out).await {
        writeln!(out, "An error occurred with the retrieval check: {e}")?;
    }

    writeln!(out, "\nDatabase check complete.")?;
    Ok(())
}

fn check_direct(config: &AppConfig, out: &mut impl Write) -> muni_core::Result<()> {
    let store = match LocalStore::open(&config.paths.db_path) {
        Ok(store) => store,
        Err(MuniError::MissingInput(_)) => {
            writeln!(
                out,
                "Error: database directory not found at '{}'",
                config.paths.db_path.display()
            )?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let collections = store.list_collections()?;
    if collections.is_empty() {
        writeln!(out, "No collections found in the database.")?;
        return Ok(());
    }

    writeln!(out, "Found {} collections:", collections.len())?;
    for collection in &collections {
        writeln!(
            out,
            "   - Collection '{}': {} documents",
            collection.name, collection.count
        )?;
    }
    Ok(())
}

async fn check_retrieval(config: &AppConfig, out: &mut impl Write) -> muni_core::Result<()> {
    let embeddings: Arc<dyn muni_vector::EmbeddingClient> =
        create_embedding_client(&config.llm)?.into();
    let store = LocalStore::open(&config.paths.db_path)?
        .with_expected_model(config.llm.embedding_model.clone());

    let retriever = Retriever::new(
        Arc::new(store),
        embeddings,
        config.retrieval.collection.clone(),
        config.retrieval.top_k,
    );

    writeln!(out, "Running a test search for '{CHECK_SAMPLE_QUERY}'...")?;
    let results = retriever.retrieve(CHECK_SAMPLE_QUERY).await?;

    for (i, result) in results.iter().enumerate() {
        writeln!(
            out,
            "   {}. Section {}: {}",
            i + 1,
            result.section.label(),
            result.section.preview(150)
        )?;
    }
    Ok(())
}

/// `muni ask`: interactive question answering.
async fn ask(config: &AppConfig) -> anyhow::Result<()> {
    println!("Initializing AI assistant...");

    let embeddings: Arc<dyn muni_vector::EmbeddingClient> =
        create_embedding_client(&config.llm)?.into();
    let store = match LocalStore::open(&config.paths.db_path) {
        Ok(store) => store.with_expected_model(config.llm.embedding_model.clone()),
        Err(MuniError::MissingInput(msg)) => {
            println!("{msg}. Run `muni load` first.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let retriever = Retriever::new(
        Arc::new(store),
        embeddings,
        config.retrieval.collection.clone(),
        config.retrieval.top_k,
    );

    println!("\n--- Testing the retriever ---");
    let docs = retriever.retrieve(ASK_SMOKE_QUESTION).await?;
    println!("Retriever found {} documents.", docs.len());
    if let Some(top) = docs.first() {
        println!("Top result preview:");
        println!("{}", top.section.preview(400));
    }
    println!("{}", "-".repeat(25));

    let llm: Arc<dyn muni_rag::LlmClient> = create_llm_client(&config.llm)?.into();
    let assistant = Assistant::new(retriever, llm);

    println!("\nAI assistant is ready. Ask a question or type 'exit' to quit.");
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    assistant.run(stdin.lock(), stdout.lock()).await?;

    Ok(())
}
