//! Fill out PDF and image forms by letting a hosted assistant interview the user.
//!
//! A [`session::ConversationSession`] creates the assistant, uploads the form,
//! and exchanges turns until the assistant signals the form is complete. The
//! answers are then written out by [`answers::AnswerStore`].

pub mod answers;
pub mod chat;
pub mod constants;
pub mod error;
pub mod events;
pub mod interpreter;
pub mod openai;
pub mod runner;
pub mod service;
pub mod session;
pub mod telemetry;
pub mod uploader;
