//! NMAP greppable 출력(`-oG`) 파서
//!
//! 한 호스트가 여러 줄(`Status:`, `Ports:`)에 나뉘어 나올 수 있어, 같은 주소가
//! 이어지는 동안 한 호스트로 누적합니다.

use std::path::Path;

use regex::Captures;
use stigpost_core::types::SourceType;
use stigpost_store::{PortRecord, Protocol};

use super::text::LineDispatcher;
use super::{FormatParser, normalize_date, opt};
use crate::context::{HostReport, IngestContext};
use crate::error::IngestError;

#[derive(Default)]
struct NmapGrepState {
    address: String,
    host: Option<HostReport>,
}

impl NmapGrepState {
    fn flush(&mut self, ctx: &mut IngestContext<'_>) -> Result<(), IngestError> {
        if let Some(host) = self.host.take() {
            ctx.commit_host(host)?;
        }
        self.address.clear();
        Ok(())
    }
}

/// NMAP greppable 파서
#[derive(Debug, Clone, Copy, Default)]
pub struct NmapGrepParser;

impl FormatParser for NmapGrepParser {
    fn source(&self) -> SourceType {
        SourceType::NmapGrep
    }

    fn parse(&self, path: &Path, ctx: &mut IngestContext<'_>) -> Result<(), IngestError> {
        let mut state = NmapGrepState::default();
        LineDispatcher::new()
            .rule(r"^# Nmap [\d.]+ scan initiated (.+?) as:", started)?
            .rule(r"^Host: (\S+) \(([^)]*)\)\t(.*)$", host_line)?
            .run(path, &mut state, ctx)?;
        state.flush(ctx)
    }
}

fn started(
    _: &mut NmapGrepState,
    ctx: &mut IngestContext<'_>,
    c: &Captures<'_>,
) -> Result<(), IngestError> {
    if let Some(date) = normalize_date(&c[1]) {
        ctx.set_file_date(&date)?;
    }
    Ok(())
}

fn host_line(
    s: &mut NmapGrepState,
    ctx: &mut IngestContext<'_>,
    c: &Captures<'_>,
) -> Result<(), IngestError> {
    ctx.record()?;
    let address = &c[1];
    if s.address != address {
        s.flush(ctx)?;
        s.address = address.to_owned();
        let mut host = HostReport {
            os_is_guess: true,
            ..HostReport::default()
        };
        host.identity.add_ip(address);
        let name = c[2].trim();
        if name.contains('.') {
            host.identity.fqdn = opt(name);
            host.identity.hostname = name.split('.').next().and_then(opt);
        } else {
            host.identity.hostname = opt(name);
        }
        s.host = Some(host);
    }
    let Some(host) = s.host.as_mut() else {
        return Ok(());
    };

    for field in c[3].split('\t') {
        let Some((key, value)) = field.split_once(": ") else {
            continue;
        };
        match key {
            "Ports" => {
                for port in value.split(", ").filter_map(parse_port) {
                    host.add_port(port);
                }
            }
            "OS" if host.os.is_none() => host.os = opt(value),
            _ => {}
        }
    }
    Ok(())
}

/// `22/open/tcp//ssh//OpenSSH 7.4/` → 열린 포트만
fn parse_port(entry: &str) -> Option<PortRecord> {
    let fields: Vec<&str> = entry.trim().split('/').collect();
    if fields.len() < 5 || fields[1] != "open" {
        return None;
    }
    Some(PortRecord {
        proto: Protocol::from_str_loose(fields[2])?,
        port: fields[0].parse().ok()?,
        service: fields[4].trim_end_matches('?').to_owned(),
        banner: fields.get(6).map(|b| b.trim().to_owned()).unwrap_or_default(),
        notes: String::new(),
        listening: true,
    })
}
