//! 형식 파서 -- Nessus, SCC XCCDF, CKL, NMAP, eChecklist, MBSA
//!
//! [`FormatParser`] trait은 각 스캐너 출력 형식의 파서가 구현해야 하는 인터페이스입니다.
//! 모든 파서는 같은 모양을 가집니다: 스트리밍 디스패처([`xml::XmlDispatcher`] 또는
//! [`text::LineDispatcher`])가 "현재 호스트"와 "현재 결과"를 파서 상태에 누적하고,
//! 호스트 블록이 끝나면 [`IngestContext::commit_host`]를 한 번 호출합니다.
//!
//! # 지원 형식
//!
//! | SourceType | 파서 | 노트 방향 |
//! |---|---|---|
//! | `nessus` | [`NessusParser`] | append |
//! | `scc` | [`XccdfParser`] | append |
//! | `ckl` | [`CklParser`] | prepend |
//! | `nmap-xml` | [`NmapXmlParser`] | append |
//! | `nmap-text` | [`NmapTextParser`] | append |
//! | `nmap-grep` | [`NmapGrepParser`] | append |
//! | `echecklist` | [`EChecklistParser`] | prepend |
//! | `mbsa` | [`MbsaParser`] | append |

pub mod ckl;
pub mod echecklist;
pub mod mbsa;
pub mod nessus;
pub mod nessus_quirks;
pub mod nmap_grep;
pub mod nmap_text;
pub mod nmap_xml;
pub mod text;
pub mod xccdf;
pub mod xml;

use std::path::Path;

use stigpost_core::types::{Category, SourceType};

pub use ckl::CklParser;
pub use echecklist::EChecklistParser;
pub use mbsa::MbsaParser;
pub use nessus::NessusParser;
pub use nmap_grep::NmapGrepParser;
pub use nmap_text::NmapTextParser;
pub use nmap_xml::NmapXmlParser;
pub use xccdf::XccdfParser;

use crate::context::IngestContext;
use crate::deconflict::NoteOrder;
use crate::error::IngestError;

/// 형식 파서 trait
pub trait FormatParser: Send + Sync {
    /// 이 파서가 담당하는 형식
    fn source(&self) -> SourceType;

    /// 노트 누적 방향. 형식마다 고정입니다.
    fn note_order(&self) -> NoteOrder {
        NoteOrder::Append
    }

    /// 파일을 처리합니다. 호스트마다 `ctx.commit_host`를 호출합니다.
    ///
    /// 같은 파일을 다시 처리해도 중복 자산/발견 항목이 생기지 않아야 합니다.
    fn parse(&self, path: &Path, ctx: &mut IngestContext<'_>) -> Result<(), IngestError>;
}

/// 형식에 맞는 파서를 반환합니다. `Unsupported`면 `None`.
pub fn parser_for(source: SourceType) -> Option<Box<dyn FormatParser>> {
    let parser: Box<dyn FormatParser> = match source {
        SourceType::Nessus => Box::new(NessusParser),
        SourceType::SccXccdf => Box::new(XccdfParser),
        SourceType::StigViewer => Box::new(CklParser),
        SourceType::NmapXml => Box::new(NmapXmlParser),
        SourceType::NmapText => Box::new(NmapTextParser),
        SourceType::NmapGrep => Box::new(NmapGrepParser),
        SourceType::EChecklist => Box::new(EChecklistParser),
        SourceType::Mbsa => Box::new(MbsaParser),
        SourceType::Unsupported => return None,
    };
    Some(parser)
}

/// 내장 정규식을 컴파일합니다.
pub(crate) fn compile(pattern: &str) -> Result<regex::Regex, IngestError> {
    regex::Regex::new(pattern).map_err(|e| IngestError::Config {
        field: "pattern".to_owned(),
        reason: e.to_string(),
    })
}

/// 스캐너마다 다른 날짜 표기를 `YYYY-MM-DD`로 정규화합니다.
pub(crate) fn normalize_date(raw: &str) -> Option<String> {
    use chrono::{DateTime, NaiveDate, NaiveDateTime};

    let raw = raw.trim();
    let raw = raw
        .strip_suffix(" UTC")
        .or_else(|| raw.strip_suffix(" GMT"))
        .unwrap_or(raw)
        .trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive().to_string());
    }
    const DATETIME_FORMATS: &[&str] = &[
        "%a %b %e %H:%M:%S %Y",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
    ];
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d %b %Y", "%b %d, %Y"];
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok().map(|dt| dt.date()))
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
        })
        .map(|d| d.to_string())
}

/// 빈 문자열이면 `None`
pub(crate) fn opt(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

/// 심각도 이름(high/medium/low, CAT I/II/III)을 범주로 변환
///
/// 숫자 심각도는 형식마다 의미가 달라 각 파서가 직접 처리합니다.
pub(crate) fn category_from_severity(severity: &str) -> Option<Category> {
    let severity = severity.trim();
    if severity.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Category::from_str_loose(severity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_supported_source_has_a_parser() {
        for source in SourceType::SUPPORTED {
            let parser = parser_for(source).unwrap();
            assert_eq!(parser.source(), source);
        }
        assert!(parser_for(SourceType::Unsupported).is_none());
    }

    #[test]
    fn note_orders_are_fixed_per_format() {
        let order = |s| parser_for(s).unwrap().note_order();
        assert_eq!(order(SourceType::StigViewer), NoteOrder::Prepend);
        assert_eq!(order(SourceType::EChecklist), NoteOrder::Prepend);
        assert_eq!(order(SourceType::Nessus), NoteOrder::Append);
    }

    #[test]
    fn dates_are_normalized() {
        assert_eq!(
            normalize_date("Tue Jan 16 10:02:33 2024").as_deref(),
            Some("2024-01-16")
        );
        assert_eq!(normalize_date("2024/1/15 10:02 UTC").as_deref(), Some("2024-01-15"));
        assert_eq!(normalize_date("2023/05/01").as_deref(), Some("2023-05-01"));
        assert_eq!(
            normalize_date("2024-02-03T04:05:06+00:00").as_deref(),
            Some("2024-02-03")
        );
        assert_eq!(normalize_date("yesterday"), None);
        assert_eq!(normalize_date("  "), None);
    }

    #[test]
    fn severity_mapping() {
        assert_eq!(category_from_severity("high"), Some(Category::I));
        assert_eq!(category_from_severity("3"), None);
        assert_eq!(category_from_severity("Medium"), Some(Category::II));
        assert_eq!(category_from_severity("low"), Some(Category::III));
        assert_eq!(category_from_severity("CAT II"), Some(Category::II));
        assert_eq!(category_from_severity("0"), None);
    }
}
