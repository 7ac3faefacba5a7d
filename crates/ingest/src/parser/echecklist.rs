//! eChecklist 스프레드시트(CSV 내보내기) 파서
//!
//! 헤더 행의 고정 열 뒤에 호스트 열이 이어지고 `Notes` 열로 끝납니다.
//!
//! ```text
//! STIG ID,VMS ID,CAT,IA Controls,Short Title,WEB01,WEB02,Check Procedures,Notes
//! WN19-00-000010,V-93147,II,ECSC-1,Passwords must...,O,NF,Verify...,checked by ops
//! ```
//!
//! 헤더 앞의 제목 행은 건너뜁니다. 호스트 열 수는 행을 읽기 전에 헤더에서 결정합니다.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use stigpost_core::types::{Category, FindingStatus, IdScheme, SourceType};
use stigpost_store::PdiDraft;
use tracing::{debug, info};

use super::{FormatParser, opt};
use crate::context::{FindingDraft, HostReport, IngestContext};
use crate::deconflict::NoteOrder;
use crate::error::IngestError;
use crate::identity::is_ip;

const REQUIRED_COLUMNS: [&str; 5] = ["STIG ID", "VMS ID", "CAT", "IA Controls", "Short Title"];
const NOTES_COLUMN: &str = "Notes";
const CHECK_COLUMN: &str = "Check Procedures";

/// 헤더에서 찾은 열 배치
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLayout {
    stig_id: usize,
    vms_id: usize,
    cat: usize,
    short_title: usize,
    check: Option<usize>,
    notes: usize,
    /// (열 번호, 호스트 이름)
    hosts: Vec<(usize, String)>,
}

impl SheetLayout {
    /// 헤더 행을 해석합니다. 필수 열이 없거나 호스트 열이 너무 많으면 형식 에러.
    pub fn from_header(header: &[&str], max_hosts: usize, path: &str) -> Result<Self, IngestError> {
        let position = |name: &str| header.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
        let mut fixed = [0usize; 5];
        for (slot, name) in fixed.iter_mut().zip(REQUIRED_COLUMNS) {
            *slot = position(name)
                .ok_or_else(|| IngestError::format(path, format!("missing column '{name}'")))?;
        }
        let notes = position(NOTES_COLUMN)
            .ok_or_else(|| IngestError::format(path, "missing column 'Notes'"))?;
        let check = position(CHECK_COLUMN);

        let first_host = fixed.iter().max().map_or(0, |m| m + 1);
        let last_host = check.filter(|c| *c < notes).unwrap_or(notes);
        let hosts: Vec<(usize, String)> = (first_host..last_host)
            .filter_map(|i| header.get(i).and_then(|h| opt(h)).map(|h| (i, h)))
            .collect();
        if hosts.is_empty() {
            return Err(IngestError::format(path, "no host columns"));
        }
        if hosts.len() > max_hosts {
            return Err(IngestError::format(
                path,
                format!("{} host columns (max: {max_hosts})", hosts.len()),
            ));
        }
        Ok(Self {
            stig_id: fixed[0],
            vms_id: fixed[1],
            cat: fixed[2],
            short_title: fixed[4],
            check,
            notes,
            hosts,
        })
    }

    pub fn host_names(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(|(_, name)| name.as_str())
    }
}

/// 셀 값 → 상태
pub fn cell_status(cell: &str) -> FindingStatus {
    match cell.trim().to_ascii_uppercase().as_str() {
        "O" | "X" => FindingStatus::Open,
        "E" => FindingStatus::Exception,
        "" => FindingStatus::NotReviewed,
        other => FindingStatus::from_str_loose(other).unwrap_or(FindingStatus::NotReviewed),
    }
}

/// eChecklist 파서
#[derive(Debug, Clone, Copy, Default)]
pub struct EChecklistParser;

impl FormatParser for EChecklistParser {
    fn source(&self) -> SourceType {
        SourceType::EChecklist
    }

    fn note_order(&self) -> NoteOrder {
        NoteOrder::Prepend
    }

    fn parse(&self, path: &Path, ctx: &mut IngestContext<'_>) -> Result<(), IngestError> {
        let display = path.display().to_string();
        let file = File::open(path).map_err(|source| IngestError::Io {
            path: display.clone(),
            source,
        })?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);
        let csv_err = |e: csv::Error| IngestError::format(display.as_str(), e.to_string());

        let mut layout: Option<SheetLayout> = None;
        let mut reports: HashMap<usize, HostReport> = HashMap::new();
        let mut record = csv::StringRecord::new();

        while reader.read_record(&mut record).map_err(csv_err)? {
            ctx.set_position(reader.position().byte());
            let cells: Vec<&str> = record.iter().collect();

            let Some(sheet) = layout.as_ref() else {
                if cells
                    .first()
                    .is_some_and(|c| c.trim().eq_ignore_ascii_case(REQUIRED_COLUMNS[0]))
                {
                    let sheet = SheetLayout::from_header(
                        &cells,
                        ctx.config().max_host_columns,
                        &display,
                    )?;
                    if sheet.hosts.len() > 1 {
                        ctx.clear_target_override();
                    }
                    debug!(hosts = sheet.hosts.len(), "eChecklist header");
                    reports = sheet
                        .hosts
                        .iter()
                        .map(|(col, name)| (*col, host_report(name)))
                        .collect();
                    layout = Some(sheet);
                }
                continue;
            };

            ctx.record()?;
            let cell = |i: usize| cells.get(i).map(|c| c.trim()).unwrap_or_default();
            let ids = vec![
                (IdScheme::Stig, cell(sheet.stig_id).to_owned()),
                (IdScheme::Vms, cell(sheet.vms_id).to_owned()),
            ];
            if ids.iter().all(|(_, v)| v.is_empty()) {
                continue;
            }
            let draft = PdiDraft {
                category: Category::from_str_loose(cell(sheet.cat)),
                short_title: cell(sheet.short_title).to_owned(),
                check_text: sheet.check.map(cell).unwrap_or_default().to_owned(),
                ..PdiDraft::default()
            };
            let pdi_id = ctx.find_or_create_pdi(&ids, &draft)?;
            let note = opt(cell(sheet.notes));
            for (col, _) in &sheet.hosts {
                if let Some(report) = reports.get_mut(col) {
                    report.findings.push(FindingDraft {
                        pdi_id,
                        status: cell_status(cell(*col)),
                        cat_override: None,
                        note: note.clone(),
                    });
                }
            }
        }

        let Some(sheet) = layout else {
            return Err(IngestError::format(display, "no 'STIG ID' header row"));
        };
        for (col, name) in &sheet.hosts {
            if let Some(report) = reports.remove(col) {
                info!(host = %name, findings = report.findings.len(), "eChecklist host column");
                ctx.commit_host(report)?;
            }
        }
        Ok(())
    }
}

fn host_report(name: &str) -> HostReport {
    let mut report = HostReport::default();
    if is_ip(name) {
        report.identity.add_ip(name);
    } else {
        report.identity.hostname = Some(name.to_owned());
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: [&str; 9] = [
        "STIG ID",
        "VMS ID",
        "CAT",
        "IA Controls",
        "Short Title",
        "WEB01",
        "10.0.0.7",
        "Check Procedures",
        "Notes",
    ];

    #[test]
    fn header_layout() {
        let layout = SheetLayout::from_header(&HEADER, 10, "x.csv").unwrap();
        assert_eq!(layout.host_names().collect::<Vec<_>>(), vec!["WEB01", "10.0.0.7"]);
        assert_eq!(layout.check, Some(7));
        assert_eq!(layout.notes, 8);
    }

    #[test]
    fn header_without_check_procedures() {
        let header = ["STIG ID", "VMS ID", "CAT", "IA Controls", "Short Title", "H1", "Notes"];
        let layout = SheetLayout::from_header(&header, 10, "x.csv").unwrap();
        assert_eq!(layout.host_names().collect::<Vec<_>>(), vec!["H1"]);
        assert_eq!(layout.check, None);
    }

    #[test]
    fn too_many_host_columns() {
        let err = SheetLayout::from_header(&HEADER, 1, "x.csv").unwrap_err();
        assert!(matches!(err, IngestError::Format { .. }));
    }

    #[test]
    fn missing_required_column() {
        let header = ["STIG ID", "CAT", "Short Title", "H1", "Notes"];
        let err = SheetLayout::from_header(&header, 10, "x.csv").unwrap_err();
        assert!(err.to_string().contains("VMS ID"));
    }

    #[test]
    fn cell_vocabulary() {
        assert_eq!(cell_status("O"), FindingStatus::Open);
        assert_eq!(cell_status("x"), FindingStatus::Open);
        assert_eq!(cell_status("Open"), FindingStatus::Open);
        assert_eq!(cell_status("NF"), FindingStatus::NotAFinding);
        assert_eq!(cell_status("Not a Finding"), FindingStatus::NotAFinding);
        assert_eq!(cell_status("NA"), FindingStatus::NotApplicable);
        assert_eq!(cell_status("E"), FindingStatus::Exception);
        assert_eq!(cell_status("Exception"), FindingStatus::Exception);
        assert_eq!(cell_status(""), FindingStatus::NotReviewed);
        assert_eq!(cell_status("NR"), FindingStatus::NotReviewed);
    }
}
