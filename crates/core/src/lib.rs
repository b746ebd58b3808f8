//! Core logic of the oral welding-exam trainer: the session state machine,
//! the question bank with its uniform selection policy, timing bookkeeping,
//! and the traits for the external collaborators (examiner LLM and speech
//! transcription). Runtimes drive a single [`session::ExamSession`] with one
//! input event at a time and render the transcript however they like.

pub mod examiner;
pub mod message;
pub mod question_bank;
pub mod report;
pub mod session;
pub mod timing;
pub mod transcribe;

pub use message::{Message, Role};
pub use question_bank::QuestionBank;
pub use session::{ExamSession, GradeReport, SessionConfig, SessionError, SubmitOutcome};
