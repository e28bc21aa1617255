//! Command-line entry points, one subcommand per pipeline step.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::index::KnowledgeIndex;
use crate::models::glossary::GlossaryEntry;
use crate::models::question::ExamQuestion;
use crate::models::session::QuestionBank;
use crate::services::ai_service::{glossary_prompt_block, AIService};
use crate::services::embed_service::EmbedService;
use crate::services::glossary_service::{load_glossary_files, merge_glossaries, sorted_by_term};
use crate::services::index_service::{vectorize, IndexOptions};
use crate::services::pdf_service::PdfService;
use crate::services::report_service::{
    apply_patch, parse_report, run_undecided_analysis, AnalysisOptions, PatchEntry,
};
use crate::services::retrieval_service::HybridRetriever;
use crate::services::scrape_service::{GlossaryFormat, ScrapeService};
use crate::services::verification_service::{PipelineOptions, VerificationService};
use crate::utils::yaml_file::{read_yaml, read_yaml_or_default, write_yaml};
use crate::{router, AppState};

#[derive(Parser)]
#[command(name = "exam-assistant")]
#[command(about = "Exam question scraping, AI verification and a quiz API")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scrape exam question pages into the questions YAML
    ScrapeExam {
        /// Exam listing page URLs
        #[arg(required = true)]
        urls: Vec<String>,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Scrape a documentation site by following its sidebar link tree
    ScrapeDocs {
        start_url: String,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Scrape a bilingual glossary from its Japanese and English pages
    ScrapeGlossary {
        ja_url: String,
        en_url: String,
        #[arg(short, long, value_enum, default_value = "text")]
        format: GlossaryFormat,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Merge glossary files into the master glossary
    MergeGlossaries {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Extract sections from every PDF in a directory
    ParsePdfs {
        dir: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Chunk, embed and index document YAML files
    Vectorize {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
    },

    /// Translate explanations and verify answers against the index
    Preprocess {
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        #[arg(long, value_name = "FILE")]
        glossary: Option<PathBuf>,
        #[arg(long, value_name = "DIR")]
        index_dir: Option<PathBuf>,
    },

    /// Deep-dive analysis of indeterminate questions into the markdown report
    AnalyzeUndecided {
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,
        #[arg(short, long, value_name = "FILE")]
        report: Option<PathBuf>,
        /// Questions analysed per run, 0 for all
        #[arg(long, default_value_t = 20)]
        max_questions: usize,
    },

    /// Turn the analysis report into a patch file
    CreatePatch {
        #[arg(short, long, value_name = "FILE")]
        report: Option<PathBuf>,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Merge a patch file into the processed questions
    ApplyPatch {
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,
        #[arg(short, long, value_name = "FILE")]
        patch: Option<PathBuf>,
        /// Defaults to overwriting the input
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Serve the quiz API
    Serve {
        #[arg(short, long, value_name = "FILE")]
        questions: Option<PathBuf>,
        #[arg(short, long, value_name = "ADDR")]
        address: Option<String>,
    },
}

fn http_client(config: &Config) -> Result<Client> {
    Ok(Client::builder().timeout(config.http_timeout()).build()?)
}

fn scrape_service(config: &Config) -> Result<ScrapeService> {
    Ok(ScrapeService::new(
        http_client(config)?,
        config.http_timeout(),
        config.max_concurrent_tasks,
    ))
}

pub async fn run(cli: Cli, config: &Config) -> Result<()> {
    match cli.command {
        Commands::ScrapeExam { urls, output } => {
            let scraper = scrape_service(config)?;
            let questions = scraper.scrape_exam(&urls).await;
            if questions.is_empty() {
                bail!("no questions found on {} page(s)", urls.len());
            }
            let path = output.unwrap_or_else(|| config.exam_questions_file());
            write_yaml(&path, &questions)?;
            tracing::info!(
                questions = questions.len(),
                path = %path.display(),
                "Saved exam questions"
            );
        }

        Commands::ScrapeDocs { start_url, output } => {
            let scraper = scrape_service(config)?;
            let docs = scraper.scrape_docs(&start_url).await?;
            write_yaml(&output, &docs)?;
            tracing::info!(documents = docs.len(), path = %output.display(), "Saved documentation");
        }

        Commands::ScrapeGlossary { ja_url, en_url, format, output } => {
            let scraper = scrape_service(config)?;
            let entries = scraper.scrape_glossary(&ja_url, &en_url, format).await?;
            write_yaml(&output, &entries)?;
            tracing::info!(entries = entries.len(), path = %output.display(), "Saved glossary");
        }

        Commands::MergeGlossaries { inputs, output } => {
            let merged = sorted_by_term(merge_glossaries(load_glossary_files(&inputs)));
            let path = output.unwrap_or_else(|| config.glossary_file());
            write_yaml(&path, &merged)?;
            tracing::info!(entries = merged.len(), path = %path.display(), "Saved master glossary");
        }

        Commands::ParsePdfs { dir, output } => {
            let sections = PdfService::new()?.parse_directory(&dir)?;
            write_yaml(&output, &sections)?;
            tracing::info!(
                sections = sections.len(),
                path = %output.display(),
                "Saved PDF sections"
            );
        }

        Commands::Vectorize { inputs, out_dir } => {
            let embedder = EmbedService::from_config(config, http_client(config)?)?;
            let options = IndexOptions {
                chunk_size: config.chunk_size,
                chunk_overlap: config.chunk_overlap,
                batch_size: config.embed_batch_size,
                batch_delay: config.request_delay(),
            };
            let dir = out_dir.unwrap_or_else(|| config.index_dir());
            let index = vectorize(&embedder, &inputs, &options, &dir).await?;
            tracing::info!(chunks = index.len(), dir = %dir.display(), "Index saved");
        }

        Commands::Preprocess { input, output, glossary, index_dir } => {
            let client = http_client(config)?;
            let ai = AIService::from_config(config, client.clone(), &config.generation_model)?;
            let embedder = EmbedService::from_config(config, client)?;

            let input = input.unwrap_or_else(|| config.exam_questions_file());
            let output = output.unwrap_or_else(|| config.processed_questions_file());
            let questions: Vec<ExamQuestion> = read_yaml(&input)?;
            let processed: Vec<ExamQuestion> = read_yaml_or_default(&output)?;
            let glossary: Vec<GlossaryEntry> =
                read_yaml_or_default(&glossary.unwrap_or_else(|| config.glossary_file()))?;
            if glossary.is_empty() {
                tracing::warn!("No glossary entries, translating without one");
            }
            let index = KnowledgeIndex::load(&index_dir.unwrap_or_else(|| config.index_dir()))?;

            let retriever = HybridRetriever::new(
                Arc::new(index),
                embedder,
                config.bm25_top_n,
                config.final_top_k,
            );
            let service = VerificationService::new(ai, retriever, glossary_prompt_block(&glossary));
            let options = PipelineOptions {
                max_concurrent: config.max_concurrent_tasks,
                dispatch_delay: config.request_delay(),
            };
            let (merged, summary) = service.run_pipeline(&questions, processed, options).await;
            write_yaml(&output, &merged)?;
            tracing::info!(
                total = summary.total_questions,
                already_processed = summary.already_processed,
                submitted = summary.submitted,
                succeeded = summary.succeeded,
                errored = ?summary.errored,
                path = %output.display(),
                "Preprocessing finished"
            );
        }

        Commands::AnalyzeUndecided { input, report, max_questions } => {
            let ai = AIService::from_config(config, http_client(config)?, &config.analysis_model)?;
            let questions: Vec<ExamQuestion> =
                read_yaml(&input.unwrap_or_else(|| config.processed_questions_file()))?;
            let report = report.unwrap_or_else(|| config.report_file());
            let options = AnalysisOptions {
                max_questions,
                max_concurrent: config.max_concurrent_tasks,
                dispatch_delay: config.request_delay(),
            };
            let ids = run_undecided_analysis(&ai, &questions, &report, options).await?;
            tracing::info!(analyzed = ids.len(), "Undecided analysis finished");
        }

        Commands::CreatePatch { report, output } => {
            let report = report.unwrap_or_else(|| config.report_file());
            let text = std::fs::read_to_string(&report)
                .with_context(|| format!("reading {}", report.display()))?;
            let patch = parse_report(&text);
            if patch.is_empty() {
                bail!("no analysed questions found in {}", report.display());
            }
            let path = output.unwrap_or_else(|| config.patch_file());
            write_yaml(&path, &patch)?;
            tracing::info!(entries = patch.len(), path = %path.display(), "Saved patch");
        }

        Commands::ApplyPatch { input, patch, output } => {
            let input = input.unwrap_or_else(|| config.processed_questions_file());
            let mut questions: Vec<ExamQuestion> = read_yaml(&input)?;
            let patch: Vec<PatchEntry> = read_yaml(&patch.unwrap_or_else(|| config.patch_file()))?;
            let applied = apply_patch(&mut questions, &patch);
            let path = output.unwrap_or(input);
            write_yaml(&path, &questions)?;
            tracing::info!(applied = applied.len(), path = %path.display(), "Patch applied");
        }

        Commands::Serve { questions, address } => {
            let path = questions.unwrap_or_else(|| config.processed_questions_file());
            let questions: Vec<ExamQuestion> = read_yaml(&path)
                .with_context(|| format!("run preprocess first, {} is required", path.display()))?;
            let bank = QuestionBank::new(questions);
            tracing::info!(questions = bank.len(), "Question bank loaded");

            let app = router(AppState::new(bank))
                .layer(CorsLayer::permissive())
                .layer(TraceLayer::new_for_http());

            let addr: SocketAddr = address.as_deref().unwrap_or(&config.server_address).parse()?;
            tracing::info!("Server listening on {}", addr);
            let listener = TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }
    Ok(())
}
