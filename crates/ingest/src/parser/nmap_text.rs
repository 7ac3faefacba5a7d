//! NMAP 일반 출력(`-oN`) 파서
//!
//! ```text
//! Nmap scan report for web01.corp.example (10.0.0.5)
//! PORT    STATE SERVICE VERSION
//! 22/tcp  open  ssh     OpenSSH 7.4 (protocol 2.0)
//! MAC Address: 00:11:22:33:44:55 (Dell)
//! OS details: Linux 3.10 - 4.11
//! ```

use std::path::Path;

use regex::Captures;
use stigpost_core::types::SourceType;
use stigpost_store::{PortRecord, Protocol};

use super::text::LineDispatcher;
use super::{FormatParser, normalize_date, opt};
use crate::context::{HostReport, IngestContext};
use crate::error::IngestError;
use crate::identity::is_ip;

#[derive(Default)]
struct NmapTextState {
    host: Option<HostReport>,
}

impl NmapTextState {
    fn flush(&mut self, ctx: &mut IngestContext<'_>) -> Result<(), IngestError> {
        if let Some(host) = self.host.take() {
            ctx.commit_host(host)?;
        }
        Ok(())
    }
}

/// NMAP 일반 출력 파서
#[derive(Debug, Clone, Copy, Default)]
pub struct NmapTextParser;

impl FormatParser for NmapTextParser {
    fn source(&self) -> SourceType {
        SourceType::NmapText
    }

    fn parse(&self, path: &Path, ctx: &mut IngestContext<'_>) -> Result<(), IngestError> {
        let mut state = NmapTextState::default();
        LineDispatcher::new()
            .rule(r"^# Nmap [\d.]+ scan initiated (.+?) as:", started)?
            .rule(r"^Nmap scan report for (\S+)(?: \(([^)]+)\))?\s*$", report)?
            .rule(
                r"^(\d+)/(tcp|udp)\s+(\S+)\s+(\S+)(?:\s+(.+?))?\s*$",
                port_line,
            )?
            .rule(r"^MAC Address: ([0-9A-Fa-f:]{17})", mac)?
            .rule(r"^(?:OS details|Running(?: \(JUST GUESSING\))?|Aggressive OS guesses): (.+?)\s*$", os)?
            .rule(r"^Service Info: .*OS: ([^;]+)", os)?
            .run(path, &mut state, ctx)?;
        state.flush(ctx)
    }
}

fn started(
    _: &mut NmapTextState,
    ctx: &mut IngestContext<'_>,
    c: &Captures<'_>,
) -> Result<(), IngestError> {
    if let Some(date) = normalize_date(&c[1]) {
        ctx.set_file_date(&date)?;
    }
    Ok(())
}

fn report(
    s: &mut NmapTextState,
    ctx: &mut IngestContext<'_>,
    c: &Captures<'_>,
) -> Result<(), IngestError> {
    s.flush(ctx)?;
    let mut host = HostReport {
        os_is_guess: true,
        ..HostReport::default()
    };
    let first = &c[1];
    match c.get(2) {
        Some(addr) => {
            host.identity.add_ip(addr.as_str());
            set_name(&mut host, first);
        }
        None if is_ip(first) => host.identity.add_ip(first),
        None => set_name(&mut host, first),
    }
    s.host = Some(host);
    Ok(())
}

fn set_name(host: &mut HostReport, name: &str) {
    if name.contains('.') {
        host.identity.fqdn = opt(name);
        host.identity.hostname = name.split('.').next().and_then(opt);
    } else {
        host.identity.hostname = opt(name);
    }
}

fn port_line(
    s: &mut NmapTextState,
    ctx: &mut IngestContext<'_>,
    c: &Captures<'_>,
) -> Result<(), IngestError> {
    ctx.record()?;
    let Some(host) = s.host.as_mut() else {
        return Ok(());
    };
    if &c[3] != "open" {
        return Ok(());
    }
    let (Ok(port), Some(proto)) = (c[1].parse::<u16>(), Protocol::from_str_loose(&c[2])) else {
        return Ok(());
    };
    host.add_port(PortRecord {
        proto,
        port,
        service: c[4].trim_end_matches('?').to_owned(),
        banner: c.get(5).map(|m| m.as_str().to_owned()).unwrap_or_default(),
        notes: String::new(),
        listening: true,
    });
    Ok(())
}

fn mac(
    s: &mut NmapTextState,
    _: &mut IngestContext<'_>,
    c: &Captures<'_>,
) -> Result<(), IngestError> {
    if let Some(host) = s.host.as_mut() {
        host.identity.mac = opt(&c[1]);
    }
    Ok(())
}

fn os(
    s: &mut NmapTextState,
    _: &mut IngestContext<'_>,
    c: &Captures<'_>,
) -> Result<(), IngestError> {
    if let Some(host) = s.host.as_mut().filter(|h| h.os.is_none()) {
        // 여러 추정치 중 첫 번째만
        let first = c[1].split(", ").next().unwrap_or_default();
        host.os = opt(first);
    }
    Ok(())
}
