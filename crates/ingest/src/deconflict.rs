//! 발견 항목 병합 엔진
//!
//! 같은 (자산, PDI)에 대한 상충하는 보고를 하나의 상태로 결정합니다.
//!
//! # 정책
//!
//! - 계층 경계는 고정: flagged {Open, Exception} > resolved {NF, NA} > unknown {NR}
//! - 계층 안의 순서는 [`DeconflictPolicy`]로 설정
//! - 상태가 바뀔 때만 `iteration` 증가
//! - `scan_id`/`source`는 항상 가장 최근 스캔
//! - 노트는 덮어쓰지 않고 소스 태그를 붙여 누적하며, 같은 내용은 다시 넣지 않음

use stigpost_core::config::DeconflictionConfig;
use stigpost_core::types::{Category, FindingStatus, StatusTier};
use stigpost_store::{FindingRow, Store, StoreError};

/// 노트 구분자
const NOTE_SEPARATOR: &str = "\n\n";

/// flagged 계층 내 우선 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlaggedPrecedence {
    #[default]
    Open,
    Exception,
}

/// resolved 계층 내 우선 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolvedPrecedence {
    /// 가장 최근 보고가 이김
    #[default]
    Latest,
    NotAFinding,
    NotApplicable,
}

/// 계층 내 우선순위 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeconflictPolicy {
    pub flagged: FlaggedPrecedence,
    pub resolved: ResolvedPrecedence,
}

impl DeconflictPolicy {
    /// 설정 섹션에서 정책을 만듭니다. 검증된 설정을 전제로 하며 알 수 없는 값은 기본값.
    pub fn from_config(config: &DeconflictionConfig) -> Self {
        let flagged = match config.flagged_precedence.as_str() {
            "exception" => FlaggedPrecedence::Exception,
            _ => FlaggedPrecedence::Open,
        };
        let resolved = match config.resolved_precedence.as_str() {
            "not_a_finding" => ResolvedPrecedence::NotAFinding,
            "not_applicable" => ResolvedPrecedence::NotApplicable,
            _ => ResolvedPrecedence::Latest,
        };
        Self { flagged, resolved }
    }

    /// 기존 상태와 새 상태를 병합합니다.
    pub fn resolve(&self, existing: FindingStatus, incoming: FindingStatus) -> FindingStatus {
        match existing.tier().cmp(&incoming.tier()) {
            std::cmp::Ordering::Greater => existing,
            std::cmp::Ordering::Less => incoming,
            std::cmp::Ordering::Equal => {
                if existing == incoming {
                    return existing;
                }
                match existing.tier() {
                    StatusTier::Flagged => match self.flagged {
                        FlaggedPrecedence::Open => FindingStatus::Open,
                        FlaggedPrecedence::Exception => FindingStatus::Exception,
                    },
                    StatusTier::Resolved => match self.resolved {
                        ResolvedPrecedence::Latest => incoming,
                        ResolvedPrecedence::NotAFinding => FindingStatus::NotAFinding,
                        ResolvedPrecedence::NotApplicable => FindingStatus::NotApplicable,
                    },
                    StatusTier::Unknown => existing,
                }
            }
        }
    }
}

/// 노트 누적 방향 (형식별로 고정)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoteOrder {
    #[default]
    Append,
    Prepend,
}

/// 병합 입력 한 건
#[derive(Debug, Clone, PartialEq)]
pub struct MergeInput {
    pub status: FindingStatus,
    pub cat_override: Option<Category>,
    /// 태그가 붙지 않은 노트 원문
    pub note: Option<String>,
    pub scan_id: i64,
    /// 소스 레이블 (예: "Nessus", "SCC")
    pub source: String,
}

/// 소스 태그를 붙인 노트 문자열
pub fn tag_note(source: &str, note: &str) -> String {
    format!("[{source}] {}", note.trim())
}

/// 누적 노트에 새 노트를 더합니다. 이미 같은 노트가 있으면 그대로 둡니다.
pub fn accumulate_notes(history: &str, tagged: &str, order: NoteOrder) -> String {
    if tagged.is_empty() || history.split(NOTE_SEPARATOR).any(|n| n == tagged) {
        return history.to_owned();
    }
    if history.is_empty() {
        return tagged.to_owned();
    }
    match order {
        NoteOrder::Append => format!("{history}{NOTE_SEPARATOR}{tagged}"),
        NoteOrder::Prepend => format!("{tagged}{NOTE_SEPARATOR}{history}"),
    }
}

/// 순수 병합 함수. 저장소 없이 정책만 적용합니다.
pub fn merge(
    existing: Option<FindingRow>,
    input: &MergeInput,
    policy: &DeconflictPolicy,
    order: NoteOrder,
) -> FindingRow {
    let tagged = input
        .note
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|n| tag_note(&input.source, n))
        .unwrap_or_default();

    match existing {
        None => FindingRow {
            target_id: 0,
            pdi_id: 0,
            status: input.status,
            cat_override: input.cat_override,
            notes: tagged,
            iteration: 1,
            scan_id: input.scan_id,
            source: input.source.clone(),
            partial: false,
        },
        Some(prev) => {
            let status = policy.resolve(prev.status, input.status);
            let iteration = if status != prev.status {
                prev.iteration + 1
            } else {
                prev.iteration
            };
            FindingRow {
                target_id: prev.target_id,
                pdi_id: prev.pdi_id,
                status,
                cat_override: input.cat_override.or(prev.cat_override),
                notes: accumulate_notes(&prev.notes, &tagged, order),
                iteration,
                scan_id: input.scan_id,
                source: input.source.clone(),
                partial: false,
            }
        }
    }
}

/// 저장소에 병합을 적용하는 엔진
#[derive(Debug, Clone, Copy, Default)]
pub struct Deconflictor {
    policy: DeconflictPolicy,
    order: NoteOrder,
}

impl Deconflictor {
    pub fn new(policy: DeconflictPolicy, order: NoteOrder) -> Self {
        Self { policy, order }
    }

    pub fn policy(&self) -> &DeconflictPolicy {
        &self.policy
    }

    /// `(asset, pdi)`에 입력을 병합하고 저장된 결과를 반환합니다.
    pub fn apply(
        &self,
        store: &Store,
        asset_id: i64,
        pdi_id: i64,
        input: &MergeInput,
    ) -> Result<FindingRow, StoreError> {
        store.merge_finding(asset_id, pdi_id, |existing| {
            merge(existing, input, &self.policy, self.order)
        })
    }
}
