use std::time::Duration;

use rand::Rng;
use rand::seq::IteratorRandom;

/// Timeout for fetching one question list. Network failure is soft: the
/// loader yields an empty list and the session constructor refuses to start.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionEntry {
    pub question: String,
    pub reference_answer: String,
}

/// The fixed set of exam questions with their reference answers. Immutable
/// once built; question texts are unique and keep their source order.
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    entries: Vec<QuestionEntry>,
}

impl QuestionBank {
    /// Zips two parallel line sequences into a bank. A trailing question
    /// without a matching answer gets an empty reference answer; a repeated
    /// question text is dropped so membership stays unambiguous.
    pub fn from_lines(questions: Vec<String>, answers: Vec<String>) -> Self {
        let mut entries: Vec<QuestionEntry> = Vec::with_capacity(questions.len());
        let mut answers = answers.into_iter();
        for question in questions {
            let reference_answer = answers.next().unwrap_or_default();
            if entries.iter().any(|e| e.question == question) {
                tracing::warn!("Dropping duplicate question from bank: {question}");
                continue;
            }
            entries.push(QuestionEntry {
                question,
                reference_answer,
            });
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn questions(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.question.as_str())
    }

    pub fn reference_answer(&self, question: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.question == question)
            .map(|e| e.reference_answer.as_str())
    }
}

/// Uniform draw over the questions not yet used. Pure given the RNG, so the
/// selection policy can be tested apart from the session mutation that
/// records the pick. `None` means the unused subset is exhausted; the caller
/// decides whether that is terminal.
pub fn pick_unused<'a, R: Rng + ?Sized>(
    bank: &'a QuestionBank,
    used: &[String],
    rng: &mut R,
) -> Option<&'a str> {
    bank.questions()
        .filter(|q| !used.iter().any(|u| u == q))
        .choose(rng)
}

/// Fetches one line-per-entry text list. Fails soft: any network error or
/// timeout is logged and yields an empty list.
pub async fn fetch_lines(client: &reqwest::Client, url: &str) -> Vec<String> {
    match fetch(client, url).await {
        Ok(lines) => lines,
        Err(e) => {
            tracing::warn!("Failed to fetch question list from {url}: {e:#}");
            Vec::new()
        }
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> anyhow::Result<Vec<String>> {
    let body = client
        .get(url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

/// Loads and zips the question and answer lists from their two URLs.
pub async fn load_bank(
    client: &reqwest::Client,
    questions_url: &str,
    answers_url: &str,
) -> QuestionBank {
    let questions = fetch_lines(client, questions_url).await;
    let answers = fetch_lines(client, answers_url).await;
    QuestionBank::from_lines(questions, answers)
}
