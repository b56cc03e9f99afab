#![forbid(unsafe_code)]

//! Core clinical logic for the resus decision-support engine.
//!
//! This crate provides:
//! - Domain types (patient context, doses, steps, pathways, sessions)
//! - Weight-scaled dose calculation and weight-for-age estimation
//! - The pathway registry and the fixed-pathway state machine
//! - The letter-by-letter primary survey with threat and safety rules
//! - A shared `ClinicalEngine` interface over both engines
//! - Persistence (snapshot store, JSONL event sink, audit and CSV export)

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod dose;
pub mod weight;
pub mod pathways;
pub mod machine;
pub mod survey;
pub mod engine;
pub mod audit;
pub mod sink;
pub mod store;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::{Config, EngineKind};
pub use dose::{calculate_dose, CalculatedDose};
pub use weight::{estimate_weight_from_age, parse_age};
pub use pathways::{get_default_registry, PathwayRegistry};
pub use machine::{create_session, transition, transition_at};
pub use engine::{ClinicalEngine, PathwayEngine, Prompt, SurveyEngine};
pub use sink::{EventSink, JsonlEventSink};
