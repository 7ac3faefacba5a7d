//! SCC XCCDF 결과 파서 (2 패스)
//!
//! 1. 벤치마크 패스: `Value` 표와 `Group`/`Rule`별 카탈로그 데이터(그룹 id, 규칙 id,
//!    STIG 버전, 심각도, 제목, 설명, 수정/점검 본문, CCE)를 모읍니다.
//! 2. 결과 패스: `TestResult`의 대상 사실과 `rule-result`를 읽어 발견 항목을 만듭니다.
//!
//! 규칙은 카탈로그에서 SV- 규칙 id → V- id → STIG 버전 → CCE 순으로 찾고, 없으면
//! 1패스 표로 정의를 만듭니다. 둘 다 없는 결과는 로그를 남기고 건너뜁니다.

use std::collections::HashMap;
use std::path::Path;

use stigpost_core::types::{FindingStatus, IdScheme, SourceType};
use stigpost_store::PdiDraft;
use tracing::{debug, info, warn};

use super::xml::{XmlDispatcher, XmlElement};
use super::{FormatParser, category_from_severity, normalize_date, opt};
use crate::context::{FindingDraft, HostReport, IngestContext};
use crate::error::IngestError;
use crate::identity::is_ip;

const ROOT: &str = "Benchmark";

/// 1패스에서 모은 규칙 정보
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleInfo {
    pub rule_id: String,
    pub group_id: String,
    pub group_title: String,
    pub version: String,
    pub severity: String,
    pub title: String,
    pub description: String,
    pub fix_text: String,
    pub check_text: String,
    pub cces: Vec<String>,
    /// check-export가 참조하는 Value id
    pub value_refs: Vec<String>,
}

impl RuleInfo {
    fn ids(&self) -> Vec<(IdScheme, String)> {
        let mut ids = vec![
            (IdScheme::SvRule, self.rule_id.clone()),
            (IdScheme::Vms, self.group_id.clone()),
            (IdScheme::Stig, self.version.clone()),
        ];
        ids.extend(self.cces.iter().map(|c| (IdScheme::Cce, c.clone())));
        ids
    }

    fn draft(&self) -> PdiDraft {
        PdiDraft {
            category: category_from_severity(&self.severity),
            short_title: self.title.clone(),
            group_title: self.group_title.clone(),
            description: vuln_discussion(&self.description),
            check_text: self.check_text.clone(),
            fix_text: self.fix_text.clone(),
            updated: None,
        }
    }
}

#[derive(Default)]
struct XccdfState {
    // 1패스
    title: String,
    version: String,
    release: String,
    values: HashMap<String, String>,
    current_value: Option<String>,
    group_id: String,
    group_title: String,
    rule: Option<RuleInfo>,
    rules: HashMap<String, RuleInfo>,
    // 2패스
    checklist_id: Option<i64>,
    host: Option<HostReport>,
    result_idref: String,
    result: String,
    message: String,
    file_date_set: bool,
    unresolved: u64,
}

/// SCC XCCDF 파서
#[derive(Debug, Clone, Copy, Default)]
pub struct XccdfParser;

impl FormatParser for XccdfParser {
    fn source(&self) -> SourceType {
        SourceType::SccXccdf
    }

    fn parse(&self, path: &Path, ctx: &mut IngestContext<'_>) -> Result<(), IngestError> {
        let mut state = XccdfState::default();

        XmlDispatcher::new(ROOT)
            .on_close("Benchmark/title", benchmark_title)
            .on_close("Benchmark/version", benchmark_version)
            .on_close("Benchmark/plain-text", benchmark_release)
            .on_open("Value", open_value)
            .on_close("Value/value", value_text)
            .on_open("Group", open_group)
            .on_close("Group/title", group_title)
            .on_open("Group/Rule", open_rule)
            .on_close("Rule/version", rule_child)
            .on_close("Rule/title", rule_child)
            .on_close("Rule/description", rule_child)
            .on_close("Rule/fixtext", rule_child)
            .on_close("Rule/ident", rule_child)
            .on_close("Rule/check/check-content", rule_child)
            .on_open("Rule/check/check-export", rule_export)
            .on_close("Group/Rule", close_rule)
            .run(path, &mut state, ctx)?;

        let checklist_id = ctx
            .store()
            .find_or_insert_checklist(&state.title, &state.version, &state.release)?;
        state.checklist_id = Some(checklist_id);
        info!(
            benchmark = %state.title,
            rules = state.rules.len(),
            values = state.values.len(),
            "benchmark table built"
        );

        XmlDispatcher::new(ROOT)
            .on_open("TestResult", open_test_result)
            .on_close("TestResult/target", target)
            .on_close("TestResult/target-address", target_address)
            .on_close("TestResult/target-facts/fact", target_fact)
            .on_open("TestResult/rule-result", open_rule_result)
            .on_close("rule-result/result", rule_result_text)
            .on_close("rule-result/message", rule_result_message)
            .on_close("TestResult/rule-result", close_rule_result)
            .on_close("Benchmark/TestResult", close_test_result)
            .run(path, &mut state, ctx)?;

        if state.unresolved > 0 {
            warn!(count = state.unresolved, "rule results without catalog entry were skipped");
        }
        Ok(())
    }
}

/// XCCDF 1.2의 긴 id(`xccdf_mil.disa.stig_rule_SV-1r1_rule`)에서 원래 id를 꺼냅니다.
pub fn short_id(id: &str) -> &str {
    for marker in ["_rule_", "_group_", "_value_"] {
        if id.starts_with("xccdf_") {
            if let Some(pos) = id.find(marker) {
                return &id[pos + marker.len()..];
            }
        }
    }
    id
}

/// 설명의 `<VulnDiscussion>` 부분만 꺼냅니다 (없으면 원문).
fn vuln_discussion(description: &str) -> String {
    const OPEN: &str = "<VulnDiscussion>";
    const CLOSE: &str = "</VulnDiscussion>";
    match (description.find(OPEN), description.find(CLOSE)) {
        (Some(start), Some(end)) if start + OPEN.len() <= end => {
            description[start + OPEN.len()..end].trim().to_owned()
        }
        _ => description.trim().to_owned(),
    }
}

/// 결과 어휘
pub fn result_status(result: &str) -> FindingStatus {
    match result.trim().to_ascii_lowercase().as_str() {
        "pass" | "fixed" => FindingStatus::NotAFinding,
        "fail" => FindingStatus::Open,
        "notapplicable" | "notselected" => FindingStatus::NotApplicable,
        _ => FindingStatus::NotReviewed,
    }
}

// ─── 1패스 ─────────────────────────────────────────────────────────

fn benchmark_title(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    s.title = el.text().unwrap_or_default().to_owned();
    Ok(())
}

fn benchmark_version(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    s.version = el.text().unwrap_or_default().to_owned();
    Ok(())
}

fn benchmark_release(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    if el.attr("id") != Some("release-info") {
        return Ok(());
    }
    // "Release: 5 Benchmark Date: 27 Apr 2023"
    let text = el.text().unwrap_or_default();
    s.release = text
        .strip_prefix("Release:")
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or(text)
        .to_owned();
    Ok(())
}

fn open_value(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    s.current_value = el.attr("id").map(str::to_owned);
    Ok(())
}

fn value_text(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    // selector가 붙은 대체값은 무시하고 기본값만 사용
    if el.attr("selector").is_some() {
        return Ok(());
    }
    if let Some(id) = &s.current_value {
        s.values
            .insert(id.clone(), el.text().unwrap_or_default().to_owned());
    }
    Ok(())
}

fn open_group(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    s.group_id = short_id(el.attr("id").unwrap_or_default()).to_owned();
    s.group_title.clear();
    Ok(())
}

fn group_title(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    s.group_title = el.text().unwrap_or_default().to_owned();
    Ok(())
}

fn open_rule(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    s.rule = Some(RuleInfo {
        rule_id: short_id(el.attr("id").unwrap_or_default()).to_owned(),
        group_id: s.group_id.clone(),
        group_title: s.group_title.clone(),
        severity: el.attr("severity").unwrap_or_default().to_owned(),
        ..RuleInfo::default()
    });
    Ok(())
}

fn rule_child(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    let Some(rule) = s.rule.as_mut() else {
        return Ok(());
    };
    let text = el.text().unwrap_or_default().to_owned();
    match el.name.as_str() {
        "version" => rule.version = text,
        "title" => rule.title = text,
        "description" => rule.description = text,
        "fixtext" => rule.fix_text = text,
        "check-content" => rule.check_text = text,
        "ident" => {
            // CCI는 규칙과 다대다라서 식별자로 쓰지 않음
            let system = el.attr("system").unwrap_or_default().to_ascii_lowercase();
            if system.contains("cce") || text.starts_with("CCE-") {
                rule.cces.push(text);
            }
        }
        _ => {}
    }
    Ok(())
}

fn rule_export(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    if let (Some(rule), Some(value_id)) = (s.rule.as_mut(), el.attr("value-id")) {
        rule.value_refs.push(value_id.to_owned());
    }
    Ok(())
}

fn close_rule(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    _: &XmlElement,
) -> Result<(), IngestError> {
    if let Some(rule) = s.rule.take() {
        if !rule.rule_id.is_empty() {
            s.rules.insert(rule.rule_id.clone(), rule);
        }
    }
    Ok(())
}

// ─── 2패스 ─────────────────────────────────────────────────────────

fn open_test_result(
    s: &mut XccdfState,
    ctx: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    s.host = Some(HostReport::default());
    if !s.file_date_set {
        if let Some(date) = el.attr("start-time").and_then(normalize_date) {
            ctx.set_file_date(&date)?;
            s.file_date_set = true;
        }
    }
    Ok(())
}

fn target(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    let (Some(host), Some(name)) = (s.host.as_mut(), el.text()) else {
        return Ok(());
    };
    if is_ip(name) {
        host.identity.add_ip(name);
    } else if name.contains('.') {
        host.identity.fqdn.get_or_insert_with(|| name.to_owned());
    } else {
        host.identity.hostname = Some(name.to_owned());
    }
    Ok(())
}

fn usable_address(addr: &str) -> bool {
    is_ip(addr) && !matches!(addr, "127.0.0.1" | "::1" | "0.0.0.0" | "::")
}

fn target_address(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    if let (Some(host), Some(addr)) = (s.host.as_mut(), el.text()) {
        if usable_address(addr) {
            host.identity.add_ip(addr);
        }
    }
    Ok(())
}

fn target_fact(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    let (Some(host), Some(value)) = (s.host.as_mut(), el.text()) else {
        return Ok(());
    };
    let name = el.attr("name").unwrap_or_default();
    let key = name.rsplit(':').next().unwrap_or_default();
    match key {
        "fqdn" => host.identity.fqdn = opt(value),
        "host_name" => {
            host.identity.hostname.get_or_insert_with(|| value.to_owned());
        }
        "ipv4" | "ipv6" => {
            if usable_address(value) {
                host.identity.add_ip(value);
            }
        }
        "mac" => {
            if host.identity.mac.is_none() && value != "00:00:00:00:00:00" {
                host.identity.mac = Some(value.to_owned());
            }
        }
        "os_name" => host.os = opt(value),
        "os_version" => {
            if let Some(os) = host.os.as_mut() {
                os.push(' ');
                os.push_str(value);
            }
        }
        _ => {}
    }
    Ok(())
}

fn open_rule_result(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    s.result_idref = short_id(el.attr("idref").unwrap_or_default()).to_owned();
    s.result.clear();
    s.message.clear();
    Ok(())
}

fn rule_result_text(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    s.result = el.text().unwrap_or_default().to_owned();
    Ok(())
}

fn rule_result_message(
    s: &mut XccdfState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    if let Some(text) = el.text() {
        if !s.message.is_empty() {
            s.message.push('\n');
        }
        s.message.push_str(text);
    }
    Ok(())
}

fn close_rule_result(
    s: &mut XccdfState,
    ctx: &mut IngestContext<'_>,
    _: &XmlElement,
) -> Result<(), IngestError> {
    ctx.record()?;
    let idref = std::mem::take(&mut s.result_idref);
    let info = s.rules.get(&idref);
    let ids = match info {
        Some(info) => info.ids(),
        None => vec![(IdScheme::SvRule, idref.clone())],
    };

    let pdi_id = match (ctx.lookup_pdi(&ids)?, info) {
        (Some(id), _) => id,
        (None, Some(info)) => ctx.find_or_create_pdi(&ids, &info.draft())?,
        (None, None) => {
            info!(rule = %idref, "rule result not in benchmark or catalog, skipped");
            s.unresolved += 1;
            return Ok(());
        }
    };
    if let Some(checklist) = s.checklist_id {
        ctx.store().add_pdi_to_checklist(checklist, pdi_id)?;
    }

    let status = result_status(&s.result);
    let mut note = format!("result: {}", s.result.trim());
    if let Some(info) = info {
        for value in info.value_refs.iter().filter_map(|id| s.values.get(id)) {
            note.push_str(&format!("\nexpected value: {value}"));
        }
    }
    if !s.message.is_empty() {
        note.push('\n');
        note.push_str(&s.message);
    }
    debug!(rule = %idref, status = %status, "rule result");

    if let Some(host) = s.host.as_mut() {
        host.findings.push(FindingDraft {
            pdi_id,
            status,
            cat_override: None,
            note: Some(note),
        });
    }
    Ok(())
}

fn close_test_result(
    s: &mut XccdfState,
    ctx: &mut IngestContext<'_>,
    _: &XmlElement,
) -> Result<(), IngestError> {
    let Some(mut host) = s.host.take() else {
        return Ok(());
    };
    if let Some(checklist) = s.checklist_id {
        host.checklists.push(checklist);
    }
    ctx.commit_host(host)?;
    Ok(())
}
