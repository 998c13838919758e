//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Host the scripted CRUD and savepoint walkthroughs.

pub mod user_service;
pub mod walkthrough;
