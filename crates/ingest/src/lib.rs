#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: 수집 에러 (`IngestError`)
//! - [`classifier`]: 파일 형식 분류 (`classify_path`, `classify_bytes`)
//! - [`identity`]: 호스트 식별자 → 자산 해석 (`IdentityResolver`)
//! - [`deconflict`]: 상태 병합 정책과 노트 누적 (`DeconflictPolicy`, `Deconflictor`)
//! - [`context`]: 파서 실행 컨텍스트 (`IngestContext`, `HostReport`)
//! - [`parser`]: 형식 파서 (`FormatParser` trait, 형식별 구현)
//! - [`layout`]: 작업 디렉토리와 보관 디렉토리 (`HoldingLayout`)
//! - [`worker`]: 파일 하나의 수집 수명주기 (`run`)

pub mod classifier;
pub mod context;
pub mod deconflict;
pub mod error;
pub mod identity;
pub mod layout;
pub mod parser;
pub mod worker;

// --- Public API Re-exports ---

// Worker
pub use worker::{WorkerOutcome, WorkerRequest};

// Error
pub use error::IngestError;

// Classifier
pub use classifier::{classify_bytes, classify_path};

// Identity / deconfliction
pub use deconflict::{DeconflictPolicy, Deconflictor, MergeInput, NoteOrder};
pub use identity::{HostIdentity, IdentityResolver};

// Parser
pub use context::{FindingDraft, HostReport, IngestContext, IngestStats};
pub use parser::{FormatParser, parser_for};

// Layout
pub use layout::{Holding, HoldingLayout};
