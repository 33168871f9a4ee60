//! # Clinical Assist
//!
//! Decision support over unreliable inputs: a generative backend that may
//! be down, model replies that may not parse, and stored embeddings that
//! may be missing or corrupt. Every operation returns a usable result and
//! says, through flags on that result, which path produced it.
//!
//! ## Architecture
//!
//! ```text
//!                ┌────────────────────────┐
//!                │   ClinicalAssistant    │
//!                └──┬─────────┬────────┬──┘
//!                   ▼         ▼        ▼
//!          ┌───────────┐ ┌─────────┐ ┌──────────────┐
//!          │Interaction│ │Prescr.  │ │  Retrieval   │
//!          │ Checker   │ │Advisor  │ │   Engine     │
//!          └──┬─────┬──┘ └─┬────┬──┘ └──────┬───────┘
//!             ▼     │      ▼    │           │
//!        rule store │ guidelines│           │
//!                   ▼           ▼           ▼
//!              ┌────────────────────────────────┐
//!              │  GenerativeBackend (Ollama)    │
//!              └────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cdx interactions --med warfarin --med aspirin --allergy penicillin
//! cdx suggest hypertension --current lisinopril
//! cdx search "cardiac history" --records records.json --patient "Jane Doe"
//! cdx serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Backend and reply-parsing error types |
//! | [`models`] | Records, verdicts, suggestions, response envelopes |
//! | [`backend`] | Generative backend trait, Ollama and disabled backends |
//! | [`embedding`] | Cosine similarity, embedding encode/decode |
//! | [`json_reply`] | JSON extraction from free-form model replies |
//! | [`rules`] | Interaction rule and drug-class tables |
//! | [`guidelines`] | First-line treatment guideline table |
//! | [`retrieval`] | Semantic/keyword search, summaries, Q&A |
//! | [`interactions`] | Drug-drug and drug-allergy interaction checks |
//! | [`suggestion`] | Prescription suggestions and instructions |
//! | [`assistant`] | Facade wiring the above together |
//! | [`traits`] | Tool trait and registry |
//! | [`server`] | HTTP tool server |

pub mod assistant;
pub mod backend;
pub mod config;
pub mod embedding;
pub mod error;
pub mod guidelines;
pub mod interactions;
pub mod json_reply;
pub mod models;
pub mod retrieval;
pub mod rules;
pub mod server;
pub mod suggestion;
pub mod traits;
