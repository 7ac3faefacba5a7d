//! 플러그인별 후처리 레지스트리
//!
//! 일부 Nessus 플러그인은 발견 항목이 아니라 호스트 사실(NetBIOS 이름, OS, 설치 소프트웨어,
//! 열린 포트)을 `plugin_output` 자유 텍스트로 보고합니다. 플러그인 id → [`PluginQuirk`]
//! 레지스트리를 시작 시 한 번 만들고, 각 ReportItem이 닫힐 때 조회합니다.

use std::collections::HashMap;

use regex::Regex;
use stigpost_store::{PortRecord, Protocol};
use tracing::debug;

use super::compile;
use super::nessus::{HostBlock, ReportItem};
use crate::context::SoftwareDraft;
use crate::error::IngestError;

/// 플러그인 후처리기
pub trait PluginQuirk: Send + Sync {
    /// 로그용 이름
    fn name(&self) -> &'static str;

    /// ReportItem의 출력으로 호스트 블록을 보강합니다.
    fn apply(&self, item: &ReportItem, host: &mut HostBlock);
}

/// 플러그인 id → 후처리기
pub struct QuirkRegistry {
    quirks: HashMap<u32, Box<dyn PluginQuirk>>,
}

/// 포트 스캐너 플러그인 (TCP/SYN/netstat/UDP)
pub const PORT_SCANNER_PLUGINS: &[u32] = &[10287, 10335, 11219, 14272, 34220, 34277];

impl QuirkRegistry {
    pub fn empty() -> Self {
        Self {
            quirks: HashMap::new(),
        }
    }

    /// 내장 후처리기를 모두 등록한 레지스트리
    pub fn builtin() -> Result<Self, IngestError> {
        let mut registry = Self::empty();
        registry.register(
            10150,
            Box::new(NetbiosName {
                computer: compile(r"(?m)^\s*(\S+)\s*=\s*Computer name")?,
            }),
        );
        registry.register(
            11936,
            Box::new(OsIdentification {
                remote_os: compile(r"(?m)^\s*Remote operating system\s*:\s*(.+?)\s*$")?,
            }),
        );
        registry.register(
            19506,
            Box::new(ScanInformation {
                start: compile(r"(?m)^\s*Scan Start Date\s*:\s*(.+?)\s*$")?,
            }),
        );
        registry.register(
            20811,
            Box::new(WindowsSoftware {
                app: compile(r"(?m)^[ \t]*(.+?)\s+\[version ([^\]]+)\]")?,
            }),
        );
        registry.register(
            22869,
            Box::new(UnixSoftware {
                dpkg: compile(r"(?m)^[ \t]*ii\s+(\S+)\s+(\S+)")?,
                rpm: compile(
                    r"(?m)^[ \t]*([A-Za-z0-9_.+]+(?:-[A-Za-z][A-Za-z0-9_.+]*)*)-(\d[^-|\s]*)-([^|\s]+)\|",
                )?,
            }),
        );
        registry.register(
            45590,
            Box::new(PlatformEnumeration {
                cpe: compile(r"(?m)^[ \t]*(cpe:/a:\S+)(?:[ \t]*->[ \t]*(.+?))?[ \t]*$")?,
            }),
        );
        for id in PORT_SCANNER_PLUGINS {
            registry.register(*id, Box::new(PortScanner));
        }
        Ok(registry)
    }

    pub fn register(&mut self, plugin_id: u32, quirk: Box<dyn PluginQuirk>) {
        self.quirks.insert(plugin_id, quirk);
    }

    pub fn len(&self) -> usize {
        self.quirks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quirks.is_empty()
    }

    /// 등록된 후처리기가 있으면 적용하고 `true`를 반환합니다.
    pub fn apply(&self, item: &ReportItem, host: &mut HostBlock) -> bool {
        let Some(quirk) = self.quirks.get(&item.plugin_id) else {
            return false;
        };
        debug!(plugin_id = item.plugin_id, quirk = quirk.name(), "plugin quirk");
        quirk.apply(item, host);
        true
    }
}

/// 10150: NetBIOS 이름 수집
struct NetbiosName {
    computer: Regex,
}

impl PluginQuirk for NetbiosName {
    fn name(&self) -> &'static str {
        "netbios-name"
    }

    fn apply(&self, item: &ReportItem, host: &mut HostBlock) {
        if let Some(caps) = self.computer.captures(&item.output) {
            host.report.identity.netbios = Some(caps[1].to_owned());
        }
    }
}

/// 11936: OS 식별
struct OsIdentification {
    remote_os: Regex,
}

impl PluginQuirk for OsIdentification {
    fn name(&self) -> &'static str {
        "os-identification"
    }

    fn apply(&self, item: &ReportItem, host: &mut HostBlock) {
        if host.report.os.is_some() {
            return;
        }
        if let Some(caps) = self.remote_os.captures(&item.output) {
            host.report.os = Some(caps[1].to_owned());
        }
    }
}

/// 19506: 스캔 정보 (시작 일시)
struct ScanInformation {
    start: Regex,
}

impl PluginQuirk for ScanInformation {
    fn name(&self) -> &'static str {
        "scan-information"
    }

    fn apply(&self, item: &ReportItem, host: &mut HostBlock) {
        if let Some(caps) = self.start.captures(&item.output) {
            host.scan_date = Some(caps[1].to_owned());
        }
    }
}

/// 20811: Windows 설치 소프트웨어
struct WindowsSoftware {
    app: Regex,
}

impl PluginQuirk for WindowsSoftware {
    fn name(&self) -> &'static str {
        "windows-software"
    }

    fn apply(&self, item: &ReportItem, host: &mut HostBlock) {
        for caps in self.app.captures_iter(&item.output) {
            host.report
                .software
                .push(SoftwareDraft::observed("", &caps[1], &caps[2]));
        }
    }
}

/// 22869: Unix 설치 패키지 (dpkg 또는 rpm 목록)
struct UnixSoftware {
    dpkg: Regex,
    rpm: Regex,
}

impl PluginQuirk for UnixSoftware {
    fn name(&self) -> &'static str {
        "unix-software"
    }

    fn apply(&self, item: &ReportItem, host: &mut HostBlock) {
        for caps in self.dpkg.captures_iter(&item.output) {
            host.report
                .software
                .push(SoftwareDraft::observed("", &caps[1], &caps[2]));
        }
        for caps in self.rpm.captures_iter(&item.output) {
            let version = format!("{}-{}", &caps[2], &caps[3]);
            host.report
                .software
                .push(SoftwareDraft::observed("", &caps[1], &version));
        }
    }
}

/// 45590: CPE 목록
struct PlatformEnumeration {
    cpe: Regex,
}

impl PluginQuirk for PlatformEnumeration {
    fn name(&self) -> &'static str {
        "platform-enumeration"
    }

    fn apply(&self, item: &ReportItem, host: &mut HostBlock) {
        for caps in self.cpe.captures_iter(&item.output) {
            let cpe = caps[1].to_owned();
            let mut parts = cpe.trim_start_matches("cpe:/a:").split(':');
            let vendor = parts.next().unwrap_or_default().to_owned();
            let product = parts.next().unwrap_or_default().to_owned();
            let version = parts.next().unwrap_or_default().to_owned();
            let name = caps
                .get(2)
                .map(|m| m.as_str().to_owned())
                .unwrap_or(product);
            host.report.software.push(SoftwareDraft {
                cpe,
                vendor,
                name,
                version,
            });
        }
    }
}

/// 포트 스캐너: 열린 포트와 서비스 이름 기록
struct PortScanner;

impl PluginQuirk for PortScanner {
    fn name(&self) -> &'static str {
        "port-scanner"
    }

    fn apply(&self, item: &ReportItem, host: &mut HostBlock) {
        if item.port == 0 {
            return;
        }
        let proto = Protocol::from_str_loose(&item.protocol).unwrap_or(Protocol::Tcp);
        let service = item.svc_name.trim_end_matches('?').to_owned();
        host.report.add_port(PortRecord {
            proto,
            port: item.port,
            service,
            banner: String::new(),
            notes: String::new(),
            listening: true,
        });
    }
}
