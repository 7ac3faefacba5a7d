//! STIG Viewer 체크리스트(`.ckl`) 파서
//!
//! 파일 하나가 호스트 하나(`ASSET`)를 기술하며, `iSTIG` 블록마다 체크리스트 하나와
//! `VULN` 레코드 목록이 있습니다. VULN 속성은 `STIG_DATA`의 이름/값 쌍으로 표현됩니다.

use std::collections::HashMap;
use std::path::Path;

use stigpost_core::types::{FindingStatus, IdScheme, SourceType};
use stigpost_store::PdiDraft;
use tracing::{debug, warn};

use super::xml::{XmlDispatcher, XmlElement};
use super::{FormatParser, category_from_severity, opt};
use crate::context::{FindingDraft, HostReport, IngestContext};
use crate::deconflict::NoteOrder;
use crate::error::IngestError;
use crate::identity::is_ip;

#[derive(Default)]
struct CklState {
    host: HostReport,
    stig_info: HashMap<String, String>,
    sid_name: String,
    checklist_id: Option<i64>,
    attr_name: String,
    vuln: HashMap<String, Vec<String>>,
    status: String,
    details: String,
    comments: String,
    severity_override: String,
}

impl CklState {
    fn vuln_attr(&self, name: &str) -> String {
        self.vuln
            .get(name)
            .and_then(|v| v.first())
            .cloned()
            .unwrap_or_default()
    }
}

/// 체크리스트 상태 어휘 (대소문자/밑줄 무시)
pub fn ckl_status(value: &str) -> FindingStatus {
    FindingStatus::from_str_loose(value).unwrap_or(FindingStatus::NotReviewed)
}

/// CKL 파서
#[derive(Debug, Clone, Copy, Default)]
pub struct CklParser;

impl FormatParser for CklParser {
    fn source(&self) -> SourceType {
        SourceType::StigViewer
    }

    fn note_order(&self) -> NoteOrder {
        NoteOrder::Prepend
    }

    fn parse(&self, path: &Path, ctx: &mut IngestContext<'_>) -> Result<(), IngestError> {
        let mut state = CklState::default();
        XmlDispatcher::new("CHECKLIST")
            .on_close("ASSET/HOST_NAME", asset_field)
            .on_close("ASSET/HOST_IP", asset_field)
            .on_close("ASSET/HOST_MAC", asset_field)
            .on_close("ASSET/HOST_FQDN", asset_field)
            .on_open("iSTIG/STIG_INFO", open_stig_info)
            .on_close("SI_DATA/SID_NAME", sid_name)
            .on_close("SI_DATA/SID_DATA", sid_data)
            .on_close("iSTIG/STIG_INFO", close_stig_info)
            .on_open("iSTIG/VULN", open_vuln)
            .on_close("STIG_DATA/VULN_ATTRIBUTE", vuln_attribute)
            .on_close("STIG_DATA/ATTRIBUTE_DATA", attribute_data)
            .on_close("VULN/STATUS", vuln_field)
            .on_close("VULN/FINDING_DETAILS", vuln_field)
            .on_close("VULN/COMMENTS", vuln_field)
            .on_close("VULN/SEVERITY_OVERRIDE", vuln_field)
            .on_close("iSTIG/VULN", close_vuln)
            .run(path, &mut state, ctx)?;

        if state.host.identity.is_empty() && ctx.target_name().is_none() {
            warn!(file = %path.display(), "checklist has no host name or address");
        }
        ctx.commit_host(state.host)?;
        Ok(())
    }
}

fn asset_field(
    s: &mut CklState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    let Some(value) = el.text() else {
        return Ok(());
    };
    let identity = &mut s.host.identity;
    match el.name.as_str() {
        "HOST_NAME" => {
            if is_ip(value) {
                identity.add_ip(value);
            } else {
                identity.hostname = Some(value.to_owned());
            }
        }
        "HOST_IP" => {
            for ip in value.split([',', ' ']).filter(|ip| is_ip(ip)) {
                identity.add_ip(ip);
            }
        }
        "HOST_MAC" => identity.mac = opt(value),
        "HOST_FQDN" => identity.fqdn = opt(value),
        _ => {}
    }
    Ok(())
}

fn open_stig_info(
    s: &mut CklState,
    _: &mut IngestContext<'_>,
    _: &XmlElement,
) -> Result<(), IngestError> {
    s.stig_info.clear();
    Ok(())
}

fn sid_name(
    s: &mut CklState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    s.sid_name = el.text().unwrap_or_default().to_owned();
    Ok(())
}

fn sid_data(
    s: &mut CklState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    let name = std::mem::take(&mut s.sid_name);
    if !name.is_empty() {
        s.stig_info
            .insert(name, el.text().unwrap_or_default().to_owned());
    }
    Ok(())
}

fn close_stig_info(
    s: &mut CklState,
    ctx: &mut IngestContext<'_>,
    _: &XmlElement,
) -> Result<(), IngestError> {
    let get = |key: &str| s.stig_info.get(key).map(String::as_str).unwrap_or_default();
    // "Release: 7 Benchmark Date: 26 Jul 2023"
    let release = get("releaseinfo")
        .strip_prefix("Release:")
        .and_then(|r| r.split_whitespace().next())
        .unwrap_or(get("releaseinfo"))
        .to_owned();
    let id = ctx
        .store()
        .find_or_insert_checklist(get("title"), get("version"), &release)?;
    debug!(checklist = %get("title"), id, "checklist block");
    s.checklist_id = Some(id);
    if !s.host.checklists.contains(&id) {
        s.host.checklists.push(id);
    }
    Ok(())
}

fn open_vuln(
    s: &mut CklState,
    _: &mut IngestContext<'_>,
    _: &XmlElement,
) -> Result<(), IngestError> {
    s.vuln.clear();
    s.status.clear();
    s.details.clear();
    s.comments.clear();
    s.severity_override.clear();
    Ok(())
}

fn vuln_attribute(
    s: &mut CklState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    s.attr_name = el.text().unwrap_or_default().to_owned();
    Ok(())
}

fn attribute_data(
    s: &mut CklState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    let name = std::mem::take(&mut s.attr_name);
    if let Some(value) = el.text() {
        s.vuln.entry(name).or_default().push(value.to_owned());
    }
    Ok(())
}

fn vuln_field(
    s: &mut CklState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    let value = el.text().unwrap_or_default().to_owned();
    match el.name.as_str() {
        "STATUS" => s.status = value,
        "FINDING_DETAILS" => s.details = value,
        "COMMENTS" => s.comments = value,
        "SEVERITY_OVERRIDE" => s.severity_override = value,
        _ => {}
    }
    Ok(())
}

fn close_vuln(
    s: &mut CklState,
    ctx: &mut IngestContext<'_>,
    _: &XmlElement,
) -> Result<(), IngestError> {
    ctx.record()?;
    let ids = vec![
        (IdScheme::SvRule, s.vuln_attr("Rule_ID")),
        (IdScheme::Vms, s.vuln_attr("Vuln_Num")),
        (IdScheme::Stig, s.vuln_attr("Rule_Ver")),
    ];
    if ids.iter().all(|(_, v)| v.is_empty()) {
        warn!("VULN without Vuln_Num, Rule_ID or Rule_Ver skipped");
        return Ok(());
    }
    let draft = PdiDraft {
        category: category_from_severity(&s.vuln_attr("Severity")),
        short_title: s.vuln_attr("Rule_Title"),
        group_title: s.vuln_attr("Group_Title"),
        description: s.vuln_attr("Vuln_Discuss"),
        check_text: s.vuln_attr("Check_Content"),
        fix_text: s.vuln_attr("Fix_Text"),
        updated: None,
    };
    let pdi_id = ctx.find_or_create_pdi(&ids, &draft)?;
    if let Some(checklist) = s.checklist_id {
        ctx.store().add_pdi_to_checklist(checklist, pdi_id)?;
    }

    let note = [s.details.trim(), s.comments.trim()]
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    s.host.findings.push(FindingDraft {
        pdi_id,
        status: ckl_status(&s.status),
        cat_override: category_from_severity(&s.severity_override),
        note: opt(&note),
    });
    Ok(())
}
