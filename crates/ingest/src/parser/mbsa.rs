//! MBSA(`SecScan`) XML 파서
//!
//! 파일 하나가 호스트 하나입니다. 업데이트 점검(`Check/Detail/UpdateData`)은 보안 게시판
//! id로, 일반 점검은 `MBSA-<check id>`로 식별합니다.

use std::path::Path;

use stigpost_core::types::{Category, FindingStatus, IdScheme, SourceType};
use stigpost_store::PdiDraft;

use super::xml::{XmlDispatcher, XmlElement};
use super::{FormatParser, normalize_date, opt};
use crate::context::{FindingDraft, HostReport, IngestContext};
use crate::error::IngestError;

#[derive(Default)]
struct MbsaState {
    host: HostReport,
    check: CheckState,
    update: UpdateState,
}

#[derive(Default)]
struct CheckState {
    id: String,
    name: String,
    grade: String,
    advice: String,
    updates: usize,
}

#[derive(Default)]
struct UpdateState {
    bulletin: String,
    kb: String,
    title: String,
    installed: bool,
    severity: String,
}

/// 일반 점검 등급 → 상태
pub fn grade_status(grade: &str) -> FindingStatus {
    match grade.trim() {
        "5" => FindingStatus::NotAFinding,
        "2" | "3" => FindingStatus::Open,
        _ => FindingStatus::NotReviewed,
    }
}

/// 게시판 심각도(4 Critical .. 1 Low) → 범주
fn bulletin_category(severity: &str) -> Option<Category> {
    match severity.trim() {
        "4" => Some(Category::I),
        "3" | "2" => Some(Category::II),
        "1" => Some(Category::III),
        _ => None,
    }
}

/// MBSA 파서
#[derive(Debug, Clone, Copy, Default)]
pub struct MbsaParser;

impl FormatParser for MbsaParser {
    fn source(&self) -> SourceType {
        SourceType::Mbsa
    }

    fn parse(&self, path: &Path, ctx: &mut IngestContext<'_>) -> Result<(), IngestError> {
        let mut state = MbsaState::default();
        XmlDispatcher::new("SecScan")
            .on_open("SecScan", sec_scan)
            .on_open("SecScan/Check", open_check)
            .on_close("Check/Advice", advice)
            .on_open("Detail/UpdateData", open_update)
            .on_close("UpdateData/Title", update_title)
            .on_close("Detail/UpdateData", close_update)
            .on_close("SecScan/Check", close_check)
            .run(path, &mut state, ctx)?;
        ctx.commit_host(state.host)?;
        Ok(())
    }
}

fn sec_scan(
    s: &mut MbsaState,
    ctx: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    let identity = &mut s.host.identity;
    // Machine 속성은 "DOMAIN\NAME" 형태일 수 있음
    if let Some(machine) = el.attr("Machine") {
        let name = machine.rsplit('\\').next().unwrap_or(machine);
        identity.netbios = opt(name);
        identity.hostname = opt(name);
    }
    if let Some(ip) = el.attr("IP") {
        for ip in ip.split([',', ' ']).filter(|ip| !ip.is_empty()) {
            identity.add_ip(ip);
        }
    }
    if let (Some(domain), Some(name)) = (el.attr("Domain"), identity.hostname.as_deref()) {
        if domain.contains('.') {
            identity.fqdn = Some(format!("{name}.{domain}").to_lowercase());
        }
    }
    if let Some(date) = el.attr("Date").and_then(normalize_date) {
        ctx.set_file_date(&date)?;
    }
    Ok(())
}

fn open_check(
    s: &mut MbsaState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    s.check = CheckState {
        id: el.attr("ID").unwrap_or_default().to_owned(),
        name: el.attr("Name").unwrap_or_default().to_owned(),
        grade: el.attr("Grade").unwrap_or_default().to_owned(),
        ..CheckState::default()
    };
    Ok(())
}

fn advice(
    s: &mut MbsaState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    s.check.advice = el.text().unwrap_or_default().to_owned();
    Ok(())
}

fn open_update(
    s: &mut MbsaState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    s.update = UpdateState {
        bulletin: el
            .attr("BulletinID")
            .or_else(|| el.attr("ID"))
            .unwrap_or_default()
            .to_owned(),
        kb: el.attr("KBID").unwrap_or_default().to_owned(),
        installed: el
            .attr("IsInstalled")
            .is_some_and(|v| v.eq_ignore_ascii_case("true")),
        severity: el.attr("Severity").unwrap_or_default().to_owned(),
        title: String::new(),
    };
    Ok(())
}

fn update_title(
    s: &mut MbsaState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    s.update.title = el.text().unwrap_or_default().to_owned();
    Ok(())
}

fn close_update(
    s: &mut MbsaState,
    ctx: &mut IngestContext<'_>,
    _: &XmlElement,
) -> Result<(), IngestError> {
    ctx.record()?;
    s.check.updates += 1;
    let update = std::mem::take(&mut s.update);
    if update.bulletin.is_empty() {
        return Ok(());
    }
    let mut ids = vec![(IdScheme::Advisory, update.bulletin.clone())];
    if !update.kb.is_empty() {
        ids.push((IdScheme::Advisory, format!("KB{}", update.kb)));
    }
    let draft = PdiDraft {
        category: bulletin_category(&update.severity),
        short_title: if update.title.is_empty() {
            update.bulletin.clone()
        } else {
            update.title.clone()
        },
        group_title: s.check.name.clone(),
        ..PdiDraft::default()
    };
    let pdi_id = ctx.find_or_create_pdi(&ids, &draft)?;
    let status = if update.installed {
        FindingStatus::NotAFinding
    } else {
        FindingStatus::Open
    };
    s.host.findings.push(FindingDraft {
        pdi_id,
        status,
        cat_override: None,
        note: opt(&update.title),
    });
    Ok(())
}

fn close_check(
    s: &mut MbsaState,
    ctx: &mut IngestContext<'_>,
    _: &XmlElement,
) -> Result<(), IngestError> {
    let check = std::mem::take(&mut s.check);
    if check.updates > 0 || check.id.is_empty() {
        return Ok(());
    }
    ctx.record()?;
    let ids = vec![(IdScheme::Plugin, format!("MBSA-{}", check.id))];
    let draft = PdiDraft {
        short_title: check.name.clone(),
        description: check.advice.clone(),
        ..PdiDraft::default()
    };
    let pdi_id = ctx.find_or_create_pdi(&ids, &draft)?;
    s.host.findings.push(FindingDraft {
        pdi_id,
        status: grade_status(&check.grade),
        cat_override: None,
        note: opt(&check.advice),
    });
    Ok(())
}
