mod config;

use crate::config::{Config, EXAM_DURATION, EXTERNAL_CALL_TIMEOUT};
use anyhow::{Context, Result};
use clap::Parser;
use meister_core::examiner::ExaminerClient;
use meister_core::question_bank;
use meister_core::report;
use meister_core::session::{ExamSession, SessionConfig, SessionError, SubmitOutcome};
use meister_core::transcribe::{EXAM_LANGUAGE, Transcriber, WhisperClient};
use meister_core::{Message, Role};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::time::ChronoLocal;

/// Prefix for feeding a recorded answer through the transcription service
/// instead of typing it.
const AUDIO_COMMAND: &str = "!audio ";

#[derive(Parser)]
#[command(about = "Mündlicher Prüfungstrainer für die Schweißtechnik")]
struct Cli {
    /// Number of questions asked before grading
    #[arg(long)]
    max_questions: Option<usize>,
    /// URL of the question list (one question per line)
    #[arg(long)]
    questions_url: Option<String>,
    /// URL of the reference answer list (one answer per line)
    #[arg(long)]
    answers_url: Option<String>,
    /// Where the exam report is written
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();
    if let Some(n) = args.max_questions {
        config.max_questions = config::parse_max_questions(&n.to_string())?;
    }
    if let Some(url) = args.questions_url {
        config.questions_url = url;
    }
    if let Some(url) = args.answers_url {
        config.answers_url = url;
    }
    if let Some(path) = args.report {
        config.report_path = path;
    }
    if config.questions_url.is_empty() {
        anyhow::bail!("No question list configured; set QUESTIONS_URL or pass --questions-url");
    }
    if config.answers_url.is_empty() {
        anyhow::bail!("No answer list configured; set ANSWERS_URL or pass --answers-url");
    }

    // --- 4. Load the Question Bank ---
    // The client-level timeout is the shell's guard around every external
    // call; a timed-out examiner request surfaces as ServiceUnavailable.
    let http = reqwest::Client::builder()
        .timeout(EXTERNAL_CALL_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;
    let bank = question_bank::load_bank(&http, &config.questions_url, &config.answers_url).await;
    tracing::info!("Loaded question bank with {} questions", bank.len());

    // --- 5. Initialize API Clients ---
    let examiner = ExaminerClient::with_client(
        http.clone(),
        config.openai_api_key.clone(),
        config.chat_model.clone(),
    );
    let transcriber = WhisperClient::with_client(http, config.openai_api_key.clone());

    // --- 6. Start the Session ---
    let session_config = SessionConfig {
        max_questions: config.max_questions,
        ..SessionConfig::default()
    };
    let mut session = ExamSession::new(bank, session_config)
        .context("Cannot start the exam")?;

    println!("Prüfung gestartet. Begrüße den Prüfer, um zu beginnen.");
    println!("(Antworten eintippen, oder `!audio datei.wav` für eine gesprochene Antwort.)");
    let mut printed = 0;
    printed = print_new_messages(session.transcript(), printed);

    let mut time_warned = false;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while !session.is_finished() {
        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            println!("Eingabe beendet, die Prüfung wird abgebrochen.");
            return Ok(());
        };

        // A completed transcription is one input event, same as a typed line.
        let input = if let Some(path) = line.strip_prefix(AUDIO_COMMAND) {
            let audio = match std::fs::read(path.trim()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    println!("(Audiodatei nicht lesbar: {e})");
                    continue;
                }
            };
            match transcriber.transcribe(&audio, EXAM_LANGUAGE).await {
                Ok(text) => {
                    println!("Du (transkribiert): {text}");
                    text
                }
                Err(e) => {
                    tracing::error!("Transcription failed: {e:#}");
                    println!("(Die Transkription ist gerade nicht erreichbar, bitte erneut versuchen.)");
                    continue;
                }
            }
        } else {
            line
        };

        match session.submit_input(&input, &examiner).await {
            Ok(SubmitOutcome::Duplicate) => {
                println!("(Eingabe übersprungen: leer oder bereits verarbeitet.)");
            }
            Ok(SubmitOutcome::Pending) => {
                println!("(Noch keine Prüfungsfrage gestellt. Begrüße zuerst den Prüfer.)");
            }
            Ok(_) => {}
            Err(SessionError::ServiceUnavailable(reason)) => {
                tracing::error!("Examiner call failed: {reason}");
                println!("(Der Prüfungsdienst ist gerade nicht erreichbar, bitte erneut senden.)");
            }
            Err(e) => return Err(e).context("The exam cannot continue"),
        }
        printed = print_new_messages(session.transcript(), printed);

        if !time_warned && session.elapsed() > EXAM_DURATION {
            println!(
                "(Hinweis: die Prüfungszeit von {} Minuten ist überschritten.)",
                EXAM_DURATION.as_secs() / 60
            );
            time_warned = true;
        }
    }

    // --- 7. Grade and Write the Report ---
    let grade = session
        .finalize(&examiner)
        .await
        .context("Failed to grade the exam")?;
    println!();
    println!("{}", grade.grade_text);
    tracing::info!(
        "Exam finished: {} answers, {} words, average response {:?}s",
        grade.summary.answer_count,
        grade.summary.total_words,
        grade.summary.average_answer_secs,
    );

    let document = report::render_report(session.transcript(), &grade.grade_text);
    std::fs::write(&config.report_path, &document).with_context(|| {
        format!(
            "Failed to write exam report to {}",
            config.report_path.display()
        )
    })?;
    println!("Protokoll gespeichert: {}", config.report_path.display());
    Ok(())
}

/// Prints the examiner messages appended since the previous event and
/// returns the new high-water mark.
fn print_new_messages(transcript: &[Message], from: usize) -> usize {
    for msg in &transcript[from..] {
        if msg.role == Role::Assistant {
            println!("Prüfer: {}", msg.content);
        }
    }
    transcript.len()
}
