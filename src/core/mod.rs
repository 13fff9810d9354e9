//! Core streaming speech engines: signed connection URLs, the shared
//! frame codec, and the recognition and synthesis sessions.

pub mod auth;
pub mod protocol;
pub mod recognizer;
pub mod synthesizer;
