//! # Vakil
//!
//! Retrieval-augmented legal counsel over a corpus of Indian law.
//!
//! Vakil ingests a legal knowledge base into a SQLite vector index and
//! serves two flows over HTTP: risk analysis of uploaded NDAs (flagging,
//! among others, restraint-of-trade clauses void under Section 27 of the
//! Indian Contract Act) and conversational questions about a document.
//!
//! ## Architecture
//!
//! ```text
//!  ingestion                          serving
//! ┌──────────┐  ┌───────┐  ┌────────┐        ┌──────────┐   ┌──────────┐
//! │  Corpus  │─▶│ Chunk │─▶│ Embed  │        │  /chat   │   │ /analyze │
//! │  Loader  │  │       │  │        │        └────┬─────┘   └────┬─────┘
//! └──────────┘  └───────┘  └───┬────┘             │   ┌──────────┤
//!                              ▼                  │   ▼          │
//!                         ┌─────────┐        ┌────┴──────┐       │
//!                         │ SQLite  │◀───────│ Retriever │       │
//!                         │ vectors │        └───────────┘       ▼
//!                         └─────────┘      prompt ─▶ model ─▶ extractor
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vakil init                            # create database
//! vakil ingest                          # index the legal corpus
//! vakil search "restraint of trade"     # inspect retrieval
//! vakil analyze ./nda.pdf               # analyse a local file
//! vakil serve                           # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`corpus`] | Corpus file loading |
//! | [`chunk`] | Recursive character text splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retrieval`] | Similarity retrieval and context joining |
//! | [`prompt`] | Analysis and chat prompt assembly |
//! | [`llm`] | Chat-completion clients |
//! | [`response`] | Analysis JSON extraction and repair |
//! | [`document`] | Upload staging and text extraction |
//! | [`counsel`] | Analysis and chat flows |
//! | [`server`] | HTTP server |
//! | [`search`] | `vakil search` command |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`telemetry`] | Tracing setup |

pub mod chunk;
pub mod config;
pub mod corpus;
pub mod counsel;
pub mod db;
pub mod document;
pub mod embedding;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod prompt;
pub mod response;
pub mod retrieval;
pub mod search;
pub mod server;
pub mod telemetry;
