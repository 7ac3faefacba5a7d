//! 파일 하나를 처리하는 동안의 파싱 컨텍스트
//!
//! 모든 형식 파서의 핸들러에 `&mut IngestContext`로 전달되며, 한 워커만 소유합니다.
//!
//! - 호스트 블록 커밋: 식별자 해석 1회 + 발견 항목마다 병합 1회
//! - 카탈로그 조회/생성 (조회 실패는 info 로그 후 새 정의 생성)
//! - 진행률 게시와 협조적 취소 확인 (N 레코드 또는 M초마다 작업 행을 다시 읽음)

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use serde::Serialize;
use stigpost_core::config::IngestConfig;
use stigpost_core::types::{Category, FindingStatus, IdScheme, JobState, SourceType};
use stigpost_store::{PdiDraft, PortRecord, Store};
use tracing::{debug, info, trace, warn};

use crate::deconflict::{Deconflictor, MergeInput};
use crate::error::IngestError;
use crate::identity::{HostIdentity, IdentityResolver};

/// 파서가 만든 발견 항목 초안 (PDI가 이미 해석된 상태)
#[derive(Debug, Clone, PartialEq)]
pub struct FindingDraft {
    pub pdi_id: i64,
    pub status: FindingStatus,
    pub cat_override: Option<Category>,
    pub note: Option<String>,
}

/// 설치된 소프트웨어 증거
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoftwareDraft {
    pub cpe: String,
    pub vendor: String,
    pub name: String,
    pub version: String,
}

impl SoftwareDraft {
    /// CPE가 없는 관찰 결과로부터 만듭니다. CPE 2.2 형식의 합성 식별자를 붙입니다.
    pub fn observed(vendor: &str, name: &str, version: &str) -> Self {
        let part = |s: &str| {
            s.trim()
                .to_ascii_lowercase()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join("_")
                .replace(':', "_")
        };
        Self {
            cpe: format!("cpe:/a:{}:{}:{}", part(vendor), part(name), part(version)),
            vendor: vendor.trim().to_owned(),
            name: name.trim().to_owned(),
            version: version.trim().to_owned(),
        }
    }
}

/// 호스트 블록 하나의 누적 결과
#[derive(Debug, Clone, Default)]
pub struct HostReport {
    pub identity: HostIdentity,
    pub os: Option<String>,
    /// 추정치(포트 스캐너)면 기존 OS를 덮어쓰지 않음
    pub os_is_guess: bool,
    pub ports: Vec<PortRecord>,
    pub findings: Vec<FindingDraft>,
    pub software: Vec<SoftwareDraft>,
    pub checklists: Vec<i64>,
    pub process_list: Option<String>,
}

impl HostReport {
    pub fn new(identity: HostIdentity) -> Self {
        Self {
            identity,
            ..Self::default()
        }
    }

    /// 같은 (proto, port)가 이미 있으면 빈 필드만 채웁니다.
    pub fn add_port(&mut self, port: PortRecord) {
        match self
            .ports
            .iter_mut()
            .find(|p| p.proto == port.proto && p.port == port.port)
        {
            Some(existing) => {
                if existing.service.is_empty() {
                    existing.service = port.service;
                }
                if existing.banner.is_empty() {
                    existing.banner = port.banner;
                }
                existing.listening |= port.listening;
            }
            None => self.ports.push(port),
        }
    }
}

/// 처리 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub hosts: u64,
    pub hosts_skipped: u64,
    pub findings: u64,
    pub pdis_created: u64,
    pub records: u64,
}

/// 파싱 컨텍스트
pub struct IngestContext<'a> {
    store: &'a Store,
    context_id: i64,
    scan_id: i64,
    job_id: Option<i64>,
    source: SourceType,
    deconflictor: Deconflictor,
    resolver: IdentityResolver,
    config: IngestConfig,
    total_bytes: u64,
    position: u64,
    since_check: usize,
    since_progress: usize,
    last_check: Instant,
    last_host: String,
    host_counts: BTreeMap<String, u64>,
    pdi_cache: HashMap<(IdScheme, String), i64>,
    /// 대상 이름 강제 중 첫 호스트. 두 번째 호스트나 파일 끝에서 저장됩니다.
    deferred: Option<HostReport>,
    stats: IngestStats,
}

impl<'a> IngestContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: &'a Store,
        context_id: i64,
        scan_id: i64,
        job_id: Option<i64>,
        source: SourceType,
        deconflictor: Deconflictor,
        target_name: Option<String>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            context_id,
            scan_id,
            job_id,
            source,
            deconflictor,
            resolver: IdentityResolver::new(target_name),
            config,
            total_bytes: 0,
            position: 0,
            since_check: 0,
            since_progress: 0,
            last_check: Instant::now(),
            last_host: String::new(),
            host_counts: BTreeMap::new(),
            pdi_cache: HashMap::new(),
            deferred: None,
            stats: IngestStats::default(),
        }
    }

    pub fn store(&self) -> &Store {
        self.store
    }

    pub fn context_id(&self) -> i64 {
        self.context_id
    }

    pub fn scan_id(&self) -> i64 {
        self.scan_id
    }

    pub fn source(&self) -> SourceType {
        self.source
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    pub fn host_counts(&self) -> &BTreeMap<String, u64> {
        &self.host_counts
    }

    pub fn target_name(&self) -> Option<&str> {
        self.resolver.target_name()
    }

    /// 대상 이름 강제를 해제합니다 (여러 호스트를 담은 파일).
    pub fn clear_target_override(&mut self) {
        if let Some(name) = self.resolver.target_name() {
            info!(target_name = %name, "file reports several hosts, ignoring target name override");
        }
        self.resolver = IdentityResolver::default();
    }

    /// 진행률 계산용 전체 크기
    pub fn set_total_bytes(&mut self, total: u64) {
        self.total_bytes = total;
    }

    /// 현재 읽은 위치 (바이트)
    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    /// 0..=99 진행률. 100은 완료 시에만 기록됩니다.
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        let pct = self.position.saturating_mul(100) / self.total_bytes;
        pct.min(99) as u8
    }

    /// 스캔 파일 날짜를 기록합니다.
    pub fn set_file_date(&self, date: &str) -> Result<(), IngestError> {
        if !date.trim().is_empty() {
            self.store.set_scan_file_date(self.scan_id, date)?;
        }
        Ok(())
    }

    /// 레코드 하나를 처리했음을 알립니다.
    ///
    /// 주기가 되면 진행률을 게시하고 작업 상태를 다시 읽습니다.
    /// 작업이 TERMINATED로 바뀌었으면 [`IngestError::Cancelled`]를 반환합니다.
    pub fn record(&mut self) -> Result<(), IngestError> {
        self.stats.records += 1;
        self.since_check += 1;
        self.since_progress += 1;

        if self.since_progress >= self.config.progress_every_records {
            self.publish_progress()?;
        }
        if self.since_check >= self.config.cancel_check_records
            || self.last_check.elapsed() >= Duration::from_secs(self.config.cancel_check_secs)
        {
            self.checkpoint()?;
        }
        Ok(())
    }

    /// 즉시 작업 상태를 확인합니다.
    pub fn checkpoint(&mut self) -> Result<(), IngestError> {
        self.since_check = 0;
        self.last_check = Instant::now();
        let Some(job_id) = self.job_id else {
            return Ok(());
        };
        let status = self.store.job_status(job_id)?;
        trace!(job_id, status = %status, "cancellation check");
        if status == JobState::Terminated {
            info!(job_id, "job terminated externally, stopping");
            return Err(IngestError::Cancelled { job_id });
        }
        Ok(())
    }

    fn publish_progress(&mut self) -> Result<(), IngestError> {
        self.since_progress = 0;
        let Some(job_id) = self.job_id else {
            return Ok(());
        };
        let percent = self.percent();
        if !self.store.update_progress(job_id, percent, &self.last_host)? {
            // 종료 상태가 되어 갱신이 거부됨
            return self.checkpoint();
        }
        debug!(job_id, percent, host = %self.last_host, "progress");
        Ok(())
    }

    /// 식별자 중 하나로 PDI를 찾습니다. 찾으면 나머지 식별자 매핑도 추가합니다.
    pub fn lookup_pdi(&mut self, ids: &[(IdScheme, String)]) -> Result<Option<i64>, IngestError> {
        let ids: Vec<&(IdScheme, String)> = ids
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        for key in &ids {
            if let Some(&id) = self.pdi_cache.get(&(key.0, key.1.trim().to_owned())) {
                return Ok(Some(id));
            }
        }
        let refs: Vec<(IdScheme, &str)> = ids.iter().map(|(s, v)| (*s, v.as_str())).collect();
        let Some(pdi_id) = self.store.lookup_any(&refs)? else {
            return Ok(None);
        };
        self.link_ids(pdi_id, &refs)?;
        Ok(Some(pdi_id))
    }

    /// PDI를 찾고, 없으면 초안으로 새로 만들고 모든 식별자를 매핑합니다.
    ///
    /// 찾은 경우 초안이 더 최신이면 정의 본문을 갱신합니다.
    pub fn find_or_create_pdi(
        &mut self,
        ids: &[(IdScheme, String)],
        draft: &PdiDraft,
    ) -> Result<i64, IngestError> {
        if let Some(pdi_id) = self.lookup_pdi(ids)? {
            if draft.updated.is_some() && self.store.update_pdi_if_newer(pdi_id, draft)? {
                debug!(pdi_id, "definition refreshed from newer source");
            }
            return Ok(pdi_id);
        }

        let refs: Vec<(IdScheme, &str)> = ids
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(s, v)| (*s, v.as_str()))
            .collect();
        let pdi_id = self.store.insert_pdi(draft)?;
        self.link_ids(pdi_id, &refs)?;
        self.stats.pdis_created += 1;
        info!(
            pdi_id,
            ids = %refs.iter().map(|(s, v)| format!("{s}:{v}")).collect::<Vec<_>>().join(","),
            "no catalog entry, created definition"
        );
        Ok(pdi_id)
    }

    fn link_ids(&mut self, pdi_id: i64, ids: &[(IdScheme, &str)]) -> Result<(), IngestError> {
        for (scheme, value) in ids {
            let key = (*scheme, value.trim().to_owned());
            if self.pdi_cache.contains_key(&key) {
                continue;
            }
            self.store.add_xref(*scheme, value, pdi_id)?;
            self.pdi_cache.insert(key, pdi_id);
        }
        Ok(())
    }

    /// 호스트 블록을 저장합니다. 해석된 자산 id를 반환하며, 식별 정보가 없으면 `None`.
    ///
    /// 대상 이름 강제는 단일 호스트 파일에만 적용되므로, 강제 중에는 첫 호스트를
    /// 보류하고 `None`을 반환합니다. 파서가 끝나면 [`Self::finish_hosts`]를 호출해야 합니다.
    pub fn commit_host(&mut self, report: HostReport) -> Result<Option<i64>, IngestError> {
        self.record()?;
        if self.resolver.target_name().is_none() {
            return self.store_host(report);
        }
        match self.deferred.take() {
            None => {
                debug!("first host held until the host count is known");
                self.deferred = Some(report);
                Ok(None)
            }
            Some(first) => {
                self.clear_target_override();
                self.store_host(first)?;
                self.store_host(report)
            }
        }
    }

    /// 보류된 호스트를 저장합니다. 파일에 호스트가 하나뿐이었으므로 대상 이름이 적용됩니다.
    pub fn finish_hosts(&mut self) -> Result<(), IngestError> {
        if let Some(report) = self.deferred.take() {
            self.store_host(report)?;
        }
        Ok(())
    }

    fn store_host(&mut self, report: HostReport) -> Result<Option<i64>, IngestError> {
        let Some(resolved) = self
            .resolver
            .resolve(self.store, self.context_id, &report.identity)?
        else {
            warn!(source = %self.source, "host block without name or address, skipped");
            self.stats.hosts_skipped += 1;
            return Ok(None);
        };
        let asset_id = resolved.asset.id;
        let asset_name = resolved.asset.name.clone();
        self.last_host = asset_name.clone();

        if let Some(os) = report.os.as_deref().filter(|os| !os.trim().is_empty()) {
            self.store.set_asset_os(asset_id, os, report.os_is_guess)?;
        }
        if let Some(list) = report.process_list.as_deref() {
            self.store.set_process_list(asset_id, list)?;
        }

        if !report.ports.is_empty() {
            match resolved.primary_interface {
                Some(iface) => {
                    for port in &report.ports {
                        self.store.upsert_port(iface, port)?;
                    }
                    let summary = self
                        .store
                        .ports_for(iface)?
                        .iter()
                        .filter(|p| p.listening)
                        .map(|p| {
                            if p.service.is_empty() {
                                format!("{}/{}", p.port, p.proto)
                            } else {
                                format!("{}/{} {}", p.port, p.proto, p.service)
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.store.set_open_ports(asset_id, &summary)?;
                }
                None => debug!(host = %asset_name, "no interface for port evidence"),
            }
        }

        for sw in &report.software {
            let sw_id = self
                .store
                .find_or_insert_software(&sw.cpe, &sw.vendor, &sw.name, &sw.version)?;
            self.store.assign_software(asset_id, sw_id)?;
        }
        for checklist in &report.checklists {
            self.store.assign_checklist(asset_id, *checklist)?;
        }

        let label = self.source.label().to_owned();
        let mut merged = 0u64;
        for draft in &report.findings {
            self.record()?;
            let input = MergeInput {
                status: draft.status,
                cat_override: draft.cat_override,
                note: draft.note.clone(),
                scan_id: self.scan_id,
                source: label.clone(),
            };
            let row = self
                .deconflictor
                .apply(self.store, asset_id, draft.pdi_id, &input)?;
            trace!(host = %asset_name, pdi_id = draft.pdi_id, status = %row.status, "merged");
            merged += 1;
        }
        if merged > 0 {
            metrics::counter!(
                stigpost_core::metrics::INGEST_FINDINGS_TOTAL,
                stigpost_core::metrics::LABEL_FORMAT => self.source.as_str()
            )
            .increment(merged);
        }

        *self.host_counts.entry(asset_name.clone()).or_insert(0) += merged;
        self.stats.hosts += 1;
        self.stats.findings += merged;
        debug!(host = %asset_name, asset_id, findings = merged, created = resolved.created, "host committed");
        Ok(Some(asset_id))
    }
}
