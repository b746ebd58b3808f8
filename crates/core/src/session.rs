use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;

use crate::examiner::Examiner;
use crate::message::{Message, Role};
use crate::question_bank::{QuestionBank, pick_unused};
use crate::timing::Timings;

/// System persona seeded into every transcript.
const PERSONA_PROMPT: &str = "Du bist ein strenger, aber fairer Prüfer für Schweißtechnik. \
     Du stellst Prüfungsfragen, reagierst auf die Antworten des Schülers und bewertest am Ende \
     die gesamte Prüfung.";

/// Greeting-like phrases that get an acknowledgement instead of grading.
const SMALL_TALK_KEYWORDS: &[&str] = &[
    "hallo",
    "hi",
    "guten morgen",
    "servus",
    "ja gerne",
    "okay",
    "klar",
];

/// Domain vocabulary an on-topic answer is expected to touch.
const DOMAIN_KEYWORDS: &[&str] = &[
    "schweißen",
    "punkt",
    "lichtbogen",
    "naht",
    "material",
    "werkstoff",
    "verbindung",
    "verfahren",
];

const ACKNOWLEDGEMENT: &str = "Alles klar, lass uns mit der Prüfung fortfahren.";
const DEFLECTION: &str = "Danke für deine Rückmeldung. Lass uns zur Frage zurückkommen.";
const FIRST_QUESTION_PREFIX: &str = "Erste Prüfungsfrage: ";
const NEXT_QUESTION_PREFIX: &str = "Neue Prüfungsfrage: ";

const REACT_INSTRUCTION: &str = "Du bist der Prüfer. Reagiere wertschätzend und fachlich korrekt \
     auf die letzte Schülerantwort. Stelle keine neue Frage.";
const CLOSING_INSTRUCTION: &str = "Die Prüfung ist beendet. Verabschiede den Schüler kurz und \
     freundlich, ohne eine neue Frage zu stellen.";

/// Behavioral knobs of the exam. The source variants (5 vs 7 questions,
/// with or without small-talk gating and the off-topic filter) collapse
/// into this one configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_questions: usize,
    pub enable_small_talk: bool,
    pub enable_off_topic_filter: bool,
    pub small_talk_keywords: Vec<String>,
    pub domain_keywords: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_questions: 5,
            enable_small_talk: true,
            enable_off_topic_filter: true,
            small_talk_keywords: SMALL_TALK_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            domain_keywords: DOMAIN_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("the question bank is empty; refusing to start an exam")]
    EmptyQuestionBank,
    #[error("question bank exhausted after {asked} questions, {required} required")]
    QuestionBankExhausted { asked: usize, required: usize },
    #[error("examiner service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("the exam is still running; no grade can be produced yet")]
    NotFinished,
}

/// What a single accepted (or rejected) input amounted to. Duplicate,
/// pending, and off-topic inputs are outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Empty input or a literal repeat of the previous one; nothing changed.
    Duplicate,
    /// No question has been issued yet, the input is held without a reply.
    Pending,
    /// The exam is already over; the input was ignored.
    Finished,
    /// A greeting, answered with the canned acknowledgement.
    SmallTalk(String),
    /// An off-topic input, answered with the canned deflection.
    Deflection(String),
    /// A graded answer with the examiner's evaluative reply.
    Reply(String),
}

/// Summary statistics handed to the grading rubric alongside the transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamSummary {
    pub answer_count: usize,
    pub total_words: usize,
    pub average_words: f64,
    pub average_answer_secs: Option<f64>,
}

/// The final grade together with the statistics it was based on. The grade
/// text is opaque to the core; only the report renderer consumes it.
#[derive(Debug, Clone)]
pub struct GradeReport {
    pub summary: ExamSummary,
    pub grade_text: String,
}

/// One student's exam attempt. Owns the transcript, tracks which questions
/// have been asked, decides per input whether it is small talk, an answer,
/// or noise, and latches `finished` once the configured number of questions
/// has been answered.
pub struct ExamSession {
    config: SessionConfig,
    bank: QuestionBank,
    transcript: Vec<Message>,
    asked_questions: Vec<String>,
    current_question: Option<String>,
    last_input: Option<String>,
    finished: bool,
    timings: Timings,
}

impl ExamSession {
    /// Starts a new attempt. Refuses an empty bank outright rather than
    /// failing later on an empty draw. Without small-talk gating there is no
    /// greeting phase and the first question is issued immediately.
    pub fn new(bank: QuestionBank, config: SessionConfig) -> Result<Self, SessionError> {
        if bank.is_empty() {
            return Err(SessionError::EmptyQuestionBank);
        }
        let mut session = Self {
            config,
            bank,
            transcript: vec![Message::system(PERSONA_PROMPT)],
            asked_questions: Vec::new(),
            current_question: None,
            last_input: None,
            finished: false,
            timings: Timings::start(),
        };
        if !session.config.enable_small_talk {
            session.issue_question(FIRST_QUESTION_PREFIX)?;
        }
        Ok(session)
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn asked_questions(&self) -> &[String] {
        &self.asked_questions
    }

    pub fn current_question(&self) -> Option<&str> {
        self.current_question.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Advisory wall-clock time since the attempt started.
    pub fn elapsed(&self) -> Duration {
        self.timings.elapsed()
    }

    /// Processes one input event to completion. Exactly one event is in
    /// flight at a time; the caller awaits the result before delivering the
    /// next one.
    pub async fn submit_input<E>(
        &mut self,
        raw: &str,
        examiner: &E,
    ) -> Result<SubmitOutcome, SessionError>
    where
        E: Examiner + Send + Sync,
    {
        if self.finished {
            return Ok(SubmitOutcome::Finished);
        }
        let input = raw.trim();
        if input.is_empty() || self.last_input.as_deref() == Some(input) {
            return Ok(SubmitOutcome::Duplicate);
        }

        let previous_input = self.last_input.replace(input.to_string());
        self.transcript.push(Message::user(input));
        self.timings.record_answer();

        if self.config.enable_small_talk
            && contains_keyword(input, &self.config.small_talk_keywords)
        {
            self.transcript.push(Message::assistant(ACKNOWLEDGEMENT));
            if self.asked_questions.is_empty() {
                self.issue_question(FIRST_QUESTION_PREFIX)?;
            }
            return Ok(SubmitOutcome::SmallTalk(ACKNOWLEDGEMENT.to_string()));
        }

        // Can't answer before being asked: hold the input until a question
        // exists.
        if self.current_question.is_none() {
            return Ok(SubmitOutcome::Pending);
        }

        if self.config.enable_off_topic_filter
            && !contains_keyword(input, &self.config.domain_keywords)
        {
            self.transcript.push(Message::assistant(DEFLECTION));
            return Ok(SubmitOutcome::Deflection(DEFLECTION.to_string()));
        }

        let instruction = Message::system(REACT_INSTRUCTION);
        let reply = match examiner.complete(&self.transcript, &instruction).await {
            Ok(reply) => reply,
            Err(e) => {
                // The grading step never happened; the transcript must not
                // record it and resubmission must not be blocked.
                self.transcript.pop();
                self.timings.discard_last();
                self.last_input = previous_input;
                return Err(SessionError::ServiceUnavailable(format!("{e:#}")));
            }
        };
        self.transcript.push(Message::assistant(reply.clone()));

        if self.asked_questions.len() < self.config.max_questions {
            self.issue_question(NEXT_QUESTION_PREFIX)?;
        } else {
            self.finish(examiner).await;
        }
        Ok(SubmitOutcome::Reply(reply))
    }

    /// Draws the next unused question, records the pick, and emits it as an
    /// assistant message with a zero-delta timing marker.
    fn issue_question(&mut self, prefix: &str) -> Result<(), SessionError> {
        let question = pick_unused(&self.bank, &self.asked_questions, &mut rand::thread_rng())
            .ok_or(SessionError::QuestionBankExhausted {
                asked: self.asked_questions.len(),
                required: self.config.max_questions,
            })?
            .to_string();
        self.asked_questions.push(question.clone());
        self.transcript
            .push(Message::assistant(format!("{prefix}{question}")));
        self.current_question = Some(question);
        self.timings.record_question_marker();
        Ok(())
    }

    /// Latches the terminal state and asks the examiner for one closing
    /// remark. The remark is best effort: the exam is over either way, so a
    /// failed remark is logged and skipped rather than surfaced.
    async fn finish<E>(&mut self, examiner: &E)
    where
        E: Examiner + Send + Sync,
    {
        self.finished = true;
        self.current_question = None;
        let instruction = Message::system(CLOSING_INSTRUCTION);
        match examiner.complete(&self.transcript, &instruction).await {
            Ok(remark) => self.transcript.push(Message::assistant(remark)),
            Err(e) => tracing::warn!("Closing remark unavailable, skipping it: {e:#}"),
        }
    }

    /// Computes the summary statistics the grading rubric weighs: answer
    /// count, word volume, and mean response latency with question markers
    /// excluded.
    pub fn summary(&self) -> ExamSummary {
        let answers: Vec<&Message> = self
            .transcript
            .iter()
            .filter(|m| m.role == Role::User)
            .collect();
        let answer_count = answers.len();
        let total_words: usize = answers.iter().map(|m| m.word_count()).sum();
        let average_words = if answer_count == 0 {
            0.0
        } else {
            total_words as f64 / answer_count as f64
        };
        ExamSummary {
            answer_count,
            total_words,
            average_words,
            average_answer_secs: self
                .timings
                .average_answer_delta()
                .map(|d| d.as_secs_f64()),
        }
    }

    /// Requests the final grade once the exam is over. The rubric weighs
    /// correctness 60 %, answer volume 25 %, and response latency 15 %; the
    /// returned text is not parsed or validated here.
    pub async fn finalize<E>(&self, examiner: &E) -> Result<GradeReport, SessionError>
    where
        E: Examiner + Send + Sync,
    {
        if !self.finished {
            return Err(SessionError::NotFinished);
        }
        let summary = self.summary();
        let instruction = Message::system(self.grading_instruction(&summary));
        let grade_text = examiner
            .complete(&self.transcript, &instruction)
            .await
            .map_err(|e| SessionError::ServiceUnavailable(format!("{e:#}")))?;
        Ok(GradeReport {
            summary,
            grade_text,
        })
    }

    fn grading_instruction(&self, summary: &ExamSummary) -> String {
        let mut reference = String::new();
        for question in &self.asked_questions {
            let answer = self.bank.reference_answer(question).unwrap_or("");
            let _ = writeln!(reference, "Frage: {question}\nMusterantwort: {answer}");
        }
        let latency = match summary.average_answer_secs {
            Some(secs) => format!("{secs:.1} Sekunden"),
            None => "unbekannt".to_string(),
        };
        format!(
            "Die Prüfung ist vorbei. Bewerte die gesamte Prüfung mit einer Schulnote von 1 bis 6 \
             und begründe die Note kurz. Gewichtung: fachliche Korrektheit 60%, Umfang der \
             Antworten 25%, Antwortzeit 15%. Antworten insgesamt: {}, Wörter insgesamt: {}, \
             Wörter pro Antwort: {:.1}, mittlere Antwortzeit: {latency}. \
             Musterantworten nur intern zur Bewertung:\n{reference}",
            summary.answer_count, summary.total_words, summary.average_words,
        )
    }
}

/// Case-insensitive substring test, the observed classification behavior.
fn contains_keyword(input: &str, keywords: &[String]) -> bool {
    let lowered = input.to_lowercase();
    keywords.iter().any(|k| lowered.contains(&k.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::examiner::MockExaminer;
    use crate::question_bank::QuestionBank;

    fn bank_of(n: usize) -> QuestionBank {
        let questions = (1..=n)
            .map(|i| format!("Prüfungsfrage Nummer {i}?"))
            .collect();
        let answers = (1..=n).map(|i| format!("Musterantwort Nummer {i}.")).collect();
        QuestionBank::from_lines(questions, answers)
    }

    fn config(max_questions: usize) -> SessionConfig {
        SessionConfig {
            max_questions,
            ..SessionConfig::default()
        }
    }

    /// An examiner that always answers with the same reply.
    fn canned_examiner(reply: &'static str) -> MockExaminer {
        let mut mock = MockExaminer::new();
        mock.expect_complete()
            .returning(move |_transcript, _instruction| {
                Box::pin(async move { Ok(reply.to_string()) })
            });
        mock
    }

    /// An examiner whose every call fails, for the no-call and rollback cases.
    fn failing_examiner() -> MockExaminer {
        let mut mock = MockExaminer::new();
        mock.expect_complete()
            .returning(|_t, _i| Box::pin(async { Err(anyhow::anyhow!("connection refused")) }));
        mock
    }

    fn on_topic(i: usize) -> String {
        format!("Beim Schweißen zählt der Lichtbogen, Beispiel Nummer {i}.")
    }

    #[test]
    fn empty_bank_is_refused() {
        let result = ExamSession::new(QuestionBank::default(), config(5));
        assert!(matches!(result, Err(SessionError::EmptyQuestionBank)));
    }

    #[test]
    fn disabled_small_talk_issues_first_question_immediately() {
        let session = ExamSession::new(
            bank_of(5),
            SessionConfig {
                enable_small_talk: false,
                ..config(5)
            },
        )
        .unwrap();
        assert_eq!(session.asked_questions().len(), 1);
        assert!(session.current_question().is_some());
    }

    #[tokio::test]
    async fn greeting_issues_acknowledgement_and_first_question() {
        let mut session = ExamSession::new(bank_of(5), config(5)).unwrap();
        // No expectations set: any examiner call would panic the test.
        let examiner = MockExaminer::new();

        let outcome = session.submit_input("hallo", &examiner).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::SmallTalk(ACKNOWLEDGEMENT.to_string()));
        assert_eq!(session.asked_questions().len(), 1);

        let assistant_texts: Vec<&str> = session
            .transcript()
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(assistant_texts.len(), 2);
        assert_eq!(assistant_texts[0], ACKNOWLEDGEMENT);
        assert!(assistant_texts[1].starts_with(FIRST_QUESTION_PREFIX));
    }

    #[tokio::test]
    async fn input_before_any_question_is_held_pending() {
        let mut session = ExamSession::new(bank_of(5), config(5)).unwrap();
        let examiner = MockExaminer::new();

        let outcome = session
            .submit_input(&on_topic(1), &examiner)
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Pending);
        assert!(session.asked_questions().is_empty());
    }

    #[tokio::test]
    async fn literal_duplicate_is_a_silent_no_op() {
        let mut session = ExamSession::new(bank_of(5), config(5)).unwrap();
        let examiner = canned_examiner("Gut erklärt.");
        session.submit_input("hallo", &examiner).await.unwrap();

        let answer = on_topic(1);
        session.submit_input(&answer, &examiner).await.unwrap();
        let before = session.transcript().len();

        let outcome = session.submit_input(&answer, &examiner).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Duplicate);
        assert_eq!(session.transcript().len(), before);
        let recorded = session
            .transcript()
            .iter()
            .filter(|m| m.role == Role::User && m.content == answer)
            .count();
        assert_eq!(recorded, 1);
    }

    #[tokio::test]
    async fn off_topic_answer_is_deflected_without_advancing() {
        let mut session = ExamSession::new(bank_of(5), config(5)).unwrap();
        let examiner = MockExaminer::new();
        session.submit_input("hallo", &examiner).await.unwrap();
        assert_eq!(session.asked_questions().len(), 1);

        let outcome = session
            .submit_input("Das kann man so sagen.", &examiner)
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Deflection(DEFLECTION.to_string()));
        assert_eq!(session.asked_questions().len(), 1);
    }

    #[tokio::test]
    async fn five_answers_finish_a_five_question_exam() {
        let mut session = ExamSession::new(bank_of(5), config(5)).unwrap();
        let examiner = canned_examiner("Gut erklärt.");
        session.submit_input("hallo", &examiner).await.unwrap();

        for i in 1..=5 {
            assert!(session.asked_questions().len() <= 5);
            let outcome = session
                .submit_input(&on_topic(i), &examiner)
                .await
                .unwrap();
            assert_eq!(outcome, SubmitOutcome::Reply("Gut erklärt.".to_string()));
        }

        assert!(session.is_finished());
        assert_eq!(session.asked_questions().len(), 5);
        let issued = session
            .transcript()
            .iter()
            .filter(|m| {
                m.content.starts_with(FIRST_QUESTION_PREFIX)
                    || m.content.starts_with(NEXT_QUESTION_PREFIX)
            })
            .count();
        assert_eq!(issued, 5);

        // No question text repeats within the session.
        let mut asked = session.asked_questions().to_vec();
        asked.sort();
        asked.dedup();
        assert_eq!(asked.len(), 5);

        // The terminal state latches: further input is ignored.
        let outcome = session
            .submit_input("noch eine Antwort zum Schweißen", &examiner)
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Finished);
        assert!(session.is_finished());
    }

    #[tokio::test]
    async fn small_bank_exhausts_instead_of_drawing_from_empty_set() {
        let mut session = ExamSession::new(bank_of(3), config(5)).unwrap();
        let examiner = canned_examiner("Gut erklärt.");
        session.submit_input("hallo", &examiner).await.unwrap();

        session.submit_input(&on_topic(1), &examiner).await.unwrap();
        session.submit_input(&on_topic(2), &examiner).await.unwrap();

        let result = session.submit_input(&on_topic(3), &examiner).await;
        assert!(matches!(
            result,
            Err(SessionError::QuestionBankExhausted {
                asked: 3,
                required: 5
            })
        ));
    }

    #[tokio::test]
    async fn failed_grading_call_rolls_the_step_back() {
        let mut session = ExamSession::new(bank_of(5), config(5)).unwrap();
        session
            .submit_input("hallo", &MockExaminer::new())
            .await
            .unwrap();
        let before = session.transcript().len();

        let answer = on_topic(1);
        let result = session.submit_input(&answer, &failing_examiner()).await;
        assert!(matches!(result, Err(SessionError::ServiceUnavailable(_))));
        // No phantom user message or reply, and no advance.
        assert_eq!(session.transcript().len(), before);
        assert_eq!(session.asked_questions().len(), 1);

        // The duplicate guard was rolled back too, so the very same text can
        // be resubmitted once the service recovers.
        let outcome = session
            .submit_input(&answer, &canned_examiner("Gut erklärt."))
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Reply("Gut erklärt.".to_string()));
        assert_eq!(session.asked_questions().len(), 2);
    }

    #[tokio::test]
    async fn finalize_requires_the_terminal_state() {
        let session = ExamSession::new(bank_of(5), config(5)).unwrap();
        let result = session.finalize(&MockExaminer::new()).await;
        assert!(matches!(result, Err(SessionError::NotFinished)));
    }

    #[tokio::test]
    async fn finalize_produces_summary_and_opaque_grade() {
        let mut session = ExamSession::new(bank_of(2), config(2)).unwrap();
        let examiner = canned_examiner("Gut erklärt.");
        session.submit_input("hallo", &examiner).await.unwrap();
        session.submit_input(&on_topic(1), &examiner).await.unwrap();
        session.submit_input(&on_topic(2), &examiner).await.unwrap();
        assert!(session.is_finished());

        let grade = session
            .finalize(&canned_examiner("Note 2, solide Leistung."))
            .await
            .unwrap();
        assert_eq!(grade.grade_text, "Note 2, solide Leistung.");
        // The greeting plus the two answers.
        assert_eq!(grade.summary.answer_count, 3);
        assert!(grade.summary.total_words > 0);
    }

    #[test]
    fn keyword_match_is_case_insensitive_substring() {
        let keywords: Vec<String> = vec!["lichtbogen".into(), "naht".into()];
        assert!(contains_keyword("Der LICHTBOGEN brennt", &keywords));
        assert!(contains_keyword("Eine Schweißnaht hält", &keywords));
        assert!(!contains_keyword("Keine Ahnung", &keywords));
    }
}
