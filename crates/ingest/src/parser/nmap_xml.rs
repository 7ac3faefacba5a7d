//! NMAP XML(`-oX`) 파서
//!
//! `nmaprun/host` 하나가 호스트 하나입니다. 포트 증거와 OS 추정만 기록하며 발견 항목은
//! 만들지 않습니다.

use std::path::Path;

use stigpost_core::types::SourceType;
use stigpost_store::{PortRecord, Protocol};
use tracing::debug;

use super::xml::{XmlDispatcher, XmlElement};
use super::{FormatParser, normalize_date, opt};
use crate::context::{HostReport, IngestContext};
use crate::error::IngestError;

#[derive(Default)]
struct NmapXmlState {
    host: HostReport,
    host_up: bool,
    port: Option<PortRecord>,
    os_accuracy: u8,
}

/// NMAP XML 파서
#[derive(Debug, Clone, Copy, Default)]
pub struct NmapXmlParser;

impl FormatParser for NmapXmlParser {
    fn source(&self) -> SourceType {
        SourceType::NmapXml
    }

    fn parse(&self, path: &Path, ctx: &mut IngestContext<'_>) -> Result<(), IngestError> {
        let mut state = NmapXmlState::default();
        XmlDispatcher::new("nmaprun")
            .on_open("nmaprun", run_start)
            .on_open("nmaprun/host", open_host)
            .on_open("host/status", host_status)
            .on_open("host/address", address)
            .on_open("hostnames/hostname", hostname)
            .on_open("ports/port", open_port)
            .on_open("port/state", port_state)
            .on_open("port/service", port_service)
            .on_close("ports/port", close_port)
            .on_open("os/osmatch", os_match)
            .on_close("nmaprun/host", close_host)
            .run(path, &mut state, ctx)
    }
}

fn run_start(
    _: &mut NmapXmlState,
    ctx: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    if let Some(date) = el.attr("startstr").and_then(normalize_date) {
        ctx.set_file_date(&date)?;
    }
    Ok(())
}

fn open_host(
    s: &mut NmapXmlState,
    _: &mut IngestContext<'_>,
    _: &XmlElement,
) -> Result<(), IngestError> {
    s.host = HostReport::default();
    s.host.os_is_guess = true;
    s.host_up = true;
    s.os_accuracy = 0;
    Ok(())
}

fn host_status(
    s: &mut NmapXmlState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    s.host_up = el.attr("state").is_none_or(|state| state == "up");
    Ok(())
}

fn address(
    s: &mut NmapXmlState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    let Some(addr) = el.attr("addr") else {
        return Ok(());
    };
    match el.attr("addrtype").unwrap_or("ipv4") {
        "mac" => s.host.identity.mac = opt(addr),
        _ => s.host.identity.add_ip(addr),
    }
    Ok(())
}

fn hostname(
    s: &mut NmapXmlState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    let Some(name) = el.attr("name") else {
        return Ok(());
    };
    let identity = &mut s.host.identity;
    if name.contains('.') {
        if identity.fqdn.is_none() {
            identity.fqdn = opt(name);
        }
        if identity.hostname.is_none() {
            identity.hostname = name.split('.').next().and_then(opt);
        }
    } else if identity.hostname.is_none() {
        identity.hostname = opt(name);
    }
    Ok(())
}

fn open_port(
    s: &mut NmapXmlState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    let proto = el.attr("protocol").and_then(Protocol::from_str_loose);
    let port = el.attr("portid").and_then(|p| p.parse::<u16>().ok());
    s.port = match (proto, port) {
        (Some(proto), Some(port)) => Some(PortRecord {
            proto,
            port,
            service: String::new(),
            banner: String::new(),
            notes: String::new(),
            listening: false,
        }),
        _ => None,
    };
    Ok(())
}

fn port_state(
    s: &mut NmapXmlState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    if let Some(port) = s.port.as_mut() {
        let state = el.attr("state").unwrap_or_default();
        port.listening = state == "open";
        port.notes = state.to_owned();
    }
    Ok(())
}

fn port_service(
    s: &mut NmapXmlState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    if let Some(port) = s.port.as_mut() {
        port.service = el.attr("name").unwrap_or_default().to_owned();
        port.banner = ["product", "version", "extrainfo"]
            .iter()
            .filter_map(|key| el.attr(key))
            .collect::<Vec<_>>()
            .join(" ");
    }
    Ok(())
}

fn close_port(
    s: &mut NmapXmlState,
    ctx: &mut IngestContext<'_>,
    _: &XmlElement,
) -> Result<(), IngestError> {
    ctx.record()?;
    if let Some(port) = s.port.take().filter(|p| p.listening) {
        s.host.add_port(port);
    }
    Ok(())
}

fn os_match(
    s: &mut NmapXmlState,
    _: &mut IngestContext<'_>,
    el: &XmlElement,
) -> Result<(), IngestError> {
    let accuracy = el
        .attr("accuracy")
        .and_then(|a| a.parse::<u8>().ok())
        .unwrap_or(0);
    if accuracy > s.os_accuracy || s.host.os.is_none() {
        s.os_accuracy = accuracy;
        s.host.os = el.attr("name").and_then(opt);
    }
    Ok(())
}

fn close_host(
    s: &mut NmapXmlState,
    ctx: &mut IngestContext<'_>,
    _: &XmlElement,
) -> Result<(), IngestError> {
    let host = std::mem::take(&mut s.host);
    if !s.host_up {
        debug!(host = %host.identity.display_name(), "host down, skipped");
        return Ok(());
    }
    ctx.commit_host(host)?;
    Ok(())
}
