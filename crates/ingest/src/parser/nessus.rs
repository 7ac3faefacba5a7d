//! Nessus v2 (`.nessus`) 파서
//!
//! ```text
//! NessusClientData_v2/Report/ReportHost
//!   HostProperties/tag[@name]     호스트 사실
//!   ReportItem[@pluginID @severity @port @protocol @svc_name]
//!     plugin_output, cve, xref, stig_severity, ...
//!     cm:compliance-*             컴플라이언스 감사 결과
//! ```
//!
//! - 심각도 0은 정보성: 발견 항목으로 병합하지 않지만 플러그인 후처리는 실행
//! - 취약점 결과는 플러그인 id로 정의를 찾거나 만들고 Open으로 병합
//! - 컴플라이언스 결과는 규칙 id → 점검 이름 → 본문 패턴 순으로 정의를 찾고,
//!   모두 실패하면 플러그인/점검 이름 키로 새 정의를 만듦

use std::path::Path;

use regex::Regex;
use stigpost_core::types::{Category, FindingStatus, IdScheme, SourceType};
use stigpost_store::PdiDraft;
use tracing::debug;

use super::nessus_quirks::QuirkRegistry;
use super::xml::{XmlDispatcher, XmlElement};
use super::{FormatParser, category_from_severity, compile, normalize_date, opt};
use crate::context::{FindingDraft, HostReport, IngestContext};
use crate::error::IngestError;
use crate::identity::is_ip;

/// ReportItem 하나의 누적 값
#[derive(Debug, Clone, Default)]
pub struct ReportItem {
    pub plugin_id: u32,
    pub plugin_name: String,
    pub port: u16,
    pub protocol: String,
    pub svc_name: String,
    pub severity: u8,
    pub synopsis: String,
    pub description: String,
    pub solution: String,
    pub output: String,
    pub cves: Vec<String>,
    pub xrefs: Vec<(IdScheme, String)>,
    pub stig_severity: Option<String>,
    pub modified: Option<String>,
    pub compliance: Option<Compliance>,
}

/// `cm:compliance-*` 요소
#[derive(Debug, Clone, Default)]
pub struct Compliance {
    pub check_name: String,
    pub check_id: String,
    pub result: String,
    pub reference: String,
    pub info: String,
    pub actual_value: String,
    pub solution: String,
}

/// 현재 호스트 블록
#[derive(Debug, Clone, Default)]
pub struct HostBlock {
    pub report: HostReport,
    /// 스캔 시작 일시 (원문)
    pub scan_date: Option<String>,
}

/// 본문에 박힌 규칙 식별자 패턴
struct RulePatterns {
    sv_rule: Regex,
    vuln: Regex,
    stig_id: Regex,
}

impl RulePatterns {
    fn new() -> Result<Self, IngestError> {
        Ok(Self {
            sv_rule: compile(r"\b(SV-\d+r\d+_rule)\b")?,
            vuln: compile(r"\b(V-\d{4,})\b")?,
            stig_id: compile(r"^[A-Z][A-Z0-9]*(?:-[A-Z0-9]+)*-\d{5,6}$")?,
        })
    }
}

struct NessusState {
    quirks: QuirkRegistry,
    patterns: RulePatterns,
    host: Option<HostBlock>,
    item: Option<ReportItem>,
    file_date_set: bool,
}

/// Nessus 파서
#[derive(Debug, Clone, Copy, Default)]
pub struct NessusParser;

impl FormatParser for NessusParser {
    fn source(&self) -> SourceType {
        SourceType::Nessus
    }

    fn parse(&self, path: &Path, ctx: &mut IngestContext<'_>) -> Result<(), IngestError> {
        let mut state = NessusState {
            quirks: QuirkRegistry::builtin()?,
            patterns: RulePatterns::new()?,
            host: None,
            item: None,
            file_date_set: false,
        };

        let mut dispatcher = XmlDispatcher::new("NessusClientData_v2")
            .on_open("Report/ReportHost", open_host)
            .on_close("ReportHost/HostProperties/tag", host_tag)
            .on_open("ReportHost/ReportItem", open_item)
            .on_close("ReportHost/ReportItem", close_item)
            .on_close("Report/ReportHost", close_host);
        for child in ITEM_CHILDREN {
            dispatcher = dispatcher.on_close(&format!("ReportItem/{child}"), item_child);
        }
        dispatcher.run(path, &mut state, ctx)
    }
}

const ITEM_CHILDREN: &[&str] = &[
    "synopsis",
    "description",
    "solution",
    "plugin_output",
    "cve",
    "xref",
    "stig_severity",
    "plugin_modification_date",
    "compliance-check-name",
    "compliance-check-id",
    "compliance-result",
    "compliance-reference",
    "compliance-info",
    "compliance-actual-value",
    "compliance-solution",
];

fn open_host(
    state: &mut NessusState,
    _ctx: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    let mut block = HostBlock::default();
    if let Some(name) = el.attr("name") {
        let identity = &mut block.report.identity;
        if is_ip(name) {
            identity.add_ip(name);
        } else if name.contains('.') {
            identity.fqdn = Some(name.to_owned());
        } else {
            identity.hostname = Some(name.to_owned());
        }
    }
    state.host = Some(block);
    Ok(())
}

fn host_tag(
    state: &mut NessusState,
    _ctx: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    let Some(block) = state.host.as_mut() else {
        return Ok(());
    };
    let value = el.text().unwrap_or_default();
    let first_line = value.lines().next().unwrap_or_default();
    let identity = &mut block.report.identity;
    match el.attr("name").unwrap_or_default() {
        "host-ip" => identity.add_ip(value),
        "host-fqdn" => identity.fqdn = opt(value),
        "netbios-name" => identity.netbios = opt(value),
        "hostname" => identity.hostname = opt(value),
        "mac-address" => identity.mac = opt(first_line),
        "operating-system" => block.report.os = opt(first_line),
        "HOST_START" => {
            if block.scan_date.is_none() {
                block.scan_date = opt(value);
            }
        }
        _ => {}
    }
    Ok(())
}

fn open_item(
    state: &mut NessusState,
    _ctx: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    let parse_num = |name: &str| el.attr(name).and_then(|v| v.parse::<u32>().ok());
    state.item = Some(ReportItem {
        plugin_id: parse_num("pluginID").unwrap_or_default(),
        plugin_name: el.attr("pluginName").unwrap_or_default().to_owned(),
        port: parse_num("port")
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or_default(),
        protocol: el.attr("protocol").unwrap_or("tcp").to_owned(),
        svc_name: el.attr("svc_name").unwrap_or_default().to_owned(),
        severity: parse_num("severity")
            .and_then(|s| u8::try_from(s).ok())
            .unwrap_or_default(),
        ..ReportItem::default()
    });
    Ok(())
}

fn item_child(
    state: &mut NessusState,
    _ctx: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    let Some(item) = state.item.as_mut() else {
        return Ok(());
    };
    let text = el.text().unwrap_or_default().to_owned();
    if let Some(field) = el.name.strip_prefix("compliance-") {
        let c = item.compliance.get_or_insert_with(Compliance::default);
        match field {
            "check-name" => c.check_name = text,
            "check-id" => c.check_id = text,
            "result" => c.result = text,
            "reference" => c.reference = text,
            "info" => c.info = text,
            "actual-value" => c.actual_value = text,
            "solution" => c.solution = text,
            _ => {}
        }
        return Ok(());
    }
    match el.name.as_str() {
        "synopsis" => item.synopsis = text,
        "description" => item.description = text,
        "solution" => item.solution = text,
        "plugin_output" => item.output = text,
        "cve" => item.cves.push(text),
        "xref" => {
            if let Some(xref) = parse_xref(&text) {
                item.xrefs.push(xref);
            }
        }
        "stig_severity" => item.stig_severity = opt(&text),
        "plugin_modification_date" => item.modified = normalize_date(&text),
        _ => {}
    }
    Ok(())
}

/// `IAVA:2012-A-0001` 같은 xref 값을 식별자로 변환
fn parse_xref(value: &str) -> Option<(IdScheme, String)> {
    let (kind, id) = value.split_once(':')?;
    let id = id.trim();
    if id.is_empty() {
        return None;
    }
    let scheme = match kind.trim().to_ascii_uppercase().as_str() {
        "IAVA" | "IAVB" | "IAVT" => IdScheme::Iavm,
        "CCE" => IdScheme::Cce,
        "MSFT" | "MSKB" => IdScheme::Advisory,
        "OVAL" => IdScheme::Oval,
        _ => return None,
    };
    Some((scheme, id.to_owned()))
}

fn close_item(
    state: &mut NessusState,
    ctx: &mut IngestContext<'_>,
    _el: &XmlElement,
) -> Result<(), IngestError> {
    let (Some(item), Some(block)) = (state.item.take(), state.host.as_mut()) else {
        return Ok(());
    };
    ctx.record()?;
    state.quirks.apply(&item, block);

    if let Some(compliance) = &item.compliance {
        let finding = compliance_finding(ctx, &state.patterns, &item, compliance)?;
        block.report.findings.push(finding);
        return Ok(());
    }
    if item.severity == 0 {
        return Ok(());
    }

    let mut ids = vec![(IdScheme::Plugin, item.plugin_id.to_string())];
    ids.extend(
        item.xrefs
            .iter()
            .filter(|(scheme, _)| *scheme == IdScheme::Iavm)
            .cloned(),
    );
    let draft = PdiDraft {
        category: item_category(&item),
        short_title: item.plugin_name.clone(),
        group_title: item.plugin_name.clone(),
        description: join_text(&item.synopsis, &item.description),
        check_text: String::new(),
        fix_text: item.solution.clone(),
        updated: item.modified.clone(),
    };
    let pdi_id = ctx.find_or_create_pdi(&ids, &draft)?;
    for cve in &item.cves {
        ctx.store().add_xref(IdScheme::Cve, cve, pdi_id)?;
    }
    for (scheme, id) in item.xrefs.iter().filter(|(s, _)| *s != IdScheme::Iavm) {
        ctx.store().add_xref(*scheme, id, pdi_id)?;
    }

    let note = opt(&item.output).unwrap_or_else(|| item.synopsis.clone());
    block.report.findings.push(FindingDraft {
        pdi_id,
        status: FindingStatus::Open,
        cat_override: None,
        note: opt(&note),
    });
    Ok(())
}

fn item_category(item: &ReportItem) -> Option<Category> {
    if let Some(cat) = item.stig_severity.as_deref().and_then(Category::from_str_loose) {
        return Some(cat);
    }
    match item.severity {
        3 | 4 => Some(Category::I),
        2 => Some(Category::II),
        1 => Some(Category::III),
        _ => None,
    }
}

fn join_text(a: &str, b: &str) -> String {
    match (a.trim().is_empty(), b.trim().is_empty()) {
        (false, false) => format!("{}\n\n{}", a.trim(), b.trim()),
        (false, true) => a.trim().to_owned(),
        _ => b.trim().to_owned(),
    }
}

/// 컴플라이언스 결과 어휘
fn compliance_status(result: &str) -> FindingStatus {
    match result.trim().to_ascii_uppercase().as_str() {
        "PASSED" => FindingStatus::NotAFinding,
        "FAILED" => FindingStatus::Open,
        _ => FindingStatus::NotReviewed,
    }
}

/// 컴플라이언스 항목의 규칙 식별자 후보 (우선순위 순)
///
/// 1. `compliance-reference`의 명시적 Rule-ID / STIG-ID / Vuln-ID
/// 2. 점검 이름 앞머리의 STIG id (`WN10-00-000005 - ...`)
/// 3. 점검 이름/설명 본문의 SV-/V- 패턴
fn compliance_ids(patterns: &RulePatterns, c: &Compliance) -> Vec<(IdScheme, String)> {
    let mut ids: Vec<(IdScheme, String)> = Vec::new();
    let mut push = |scheme: IdScheme, value: &str| {
        let value = value.trim();
        if !value.is_empty() && !ids.iter().any(|(s, v)| *s == scheme && v == value) {
            ids.push((scheme, value.to_owned()));
        }
    };

    for pair in c.reference.split(',') {
        let Some((key, value)) = pair.split_once('|') else {
            continue;
        };
        match key.trim() {
            "Rule-ID" => push(IdScheme::SvRule, value),
            "STIG-ID" => push(IdScheme::Stig, value),
            "Vuln-ID" => push(IdScheme::Vms, value),
            _ => {}
        }
    }

    if let Some(head) = c
        .check_name
        .split(" - ")
        .next()
        .map(str::trim)
        .filter(|h| patterns.stig_id.is_match(h))
    {
        push(IdScheme::Stig, head);
    }

    for text in [&c.check_name, &c.info] {
        for caps in patterns.sv_rule.captures_iter(text) {
            push(IdScheme::SvRule, &caps[1]);
        }
        for caps in patterns.vuln.captures_iter(text) {
            push(IdScheme::Vms, &caps[1]);
        }
    }
    ids
}

fn compliance_finding(
    ctx: &mut IngestContext<'_>,
    patterns: &RulePatterns,
    item: &ReportItem,
    c: &Compliance,
) -> Result<FindingDraft, IngestError> {
    let mut ids = compliance_ids(patterns, c);
    if ids.is_empty() {
        debug!(plugin_id = item.plugin_id, check = %c.check_name, "no rule identifier in compliance result");
    }
    let key = if c.check_id.is_empty() {
        &c.check_name
    } else {
        &c.check_id
    };
    ids.push((IdScheme::Plugin, format!("{}:{}", item.plugin_id, key.trim())));

    let category = c
        .reference
        .split(',')
        .filter_map(|pair| pair.split_once('|'))
        .find(|(k, _)| k.trim() == "CAT")
        .and_then(|(_, v)| Category::from_str_loose(v))
        .or_else(|| {
            item.stig_severity
                .as_deref()
                .and_then(category_from_severity)
        });

    let short_title = c
        .check_name
        .split_once(" - ")
        .map(|(_, title)| title.trim().to_owned())
        .unwrap_or_else(|| c.check_name.clone());
    let draft = PdiDraft {
        category,
        short_title,
        group_title: c.check_name.clone(),
        description: c.info.clone(),
        check_text: String::new(),
        fix_text: c.solution.clone(),
        updated: None,
    };
    let pdi_id = ctx.find_or_create_pdi(&ids, &draft)?;

    let note = [c.actual_value.trim(), item.output.trim()]
        .into_iter()
        .find(|s| !s.is_empty())
        .map(|detail| format!("{}: {detail}", c.result.trim()))
        .or_else(|| opt(&c.result));
    Ok(FindingDraft {
        pdi_id,
        status: compliance_status(&c.result),
        cat_override: None,
        note,
    })
}

fn close_host(
    state: &mut NessusState,
    ctx: &mut IngestContext<'_>,
    _el: &XmlElement,
) -> Result<(), IngestError> {
    let Some(block) = state.host.take() else {
        return Ok(());
    };
    if !state.file_date_set {
        if let Some(raw) = &block.scan_date {
            let date = normalize_date(raw).unwrap_or_else(|| raw.clone());
            ctx.set_file_date(&date)?;
            state.file_date_set = true;
        }
    }
    ctx.commit_host(block.report)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> RulePatterns {
        RulePatterns::new().unwrap()
    }

    #[test]
    fn xref_schemes() {
        assert_eq!(
            parse_xref("IAVA:2012-A-0001"),
            Some((IdScheme::Iavm, "2012-A-0001".to_owned()))
        );
        assert_eq!(
            parse_xref("MSFT:MS17-010"),
            Some((IdScheme::Advisory, "MS17-010".to_owned()))
        );
        assert_eq!(parse_xref("CWE:79"), None);
        assert_eq!(parse_xref("garbage"), None);
    }

    #[test]
    fn explicit_reference_ids_come_first() {
        let c = Compliance {
            check_name: "WN10-00-000005 - Domain-joined systems must use Windows 10 Enterprise"
                .to_owned(),
            reference: "800-53|CM-6,CAT|II,Rule-ID|SV-220697r569187_rule,STIG-ID|WN10-00-000005,Vuln-ID|V-220697"
                .to_owned(),
            ..Compliance::default()
        };
        let ids = compliance_ids(&patterns(), &c);
        assert_eq!(
            ids,
            vec![
                (IdScheme::SvRule, "SV-220697r569187_rule".to_owned()),
                (IdScheme::Stig, "WN10-00-000005".to_owned()),
                (IdScheme::Vms, "V-220697".to_owned()),
            ]
        );
    }

    #[test]
    fn check_name_and_free_text_fallbacks() {
        let c = Compliance {
            check_name: "RHEL-07-010010 - The file permissions must match vendor values".to_owned(),
            info: "See V-71849 for details".to_owned(),
            ..Compliance::default()
        };
        let ids = compliance_ids(&patterns(), &c);
        assert_eq!(
            ids,
            vec![
                (IdScheme::Stig, "RHEL-07-010010".to_owned()),
                (IdScheme::Vms, "V-71849".to_owned()),
            ]
        );

        let plain = Compliance {
            check_name: "Ensure password history is set".to_owned(),
            ..Compliance::default()
        };
        assert!(compliance_ids(&patterns(), &plain).is_empty());
    }

    #[test]
    fn compliance_vocabulary() {
        assert_eq!(compliance_status("PASSED"), FindingStatus::NotAFinding);
        assert_eq!(compliance_status("failed"), FindingStatus::Open);
        assert_eq!(compliance_status("WARNING"), FindingStatus::NotReviewed);
        assert_eq!(compliance_status("ERROR"), FindingStatus::NotReviewed);
    }

    #[test]
    fn severity_to_category() {
        let mut item = ReportItem {
            severity: 4,
            ..ReportItem::default()
        };
        assert_eq!(item_category(&item), Some(Category::I));
        item.severity = 2;
        assert_eq!(item_category(&item), Some(Category::II));
        item.stig_severity = Some("I".to_owned());
        assert_eq!(item_category(&item), Some(Category::I));
    }
}
