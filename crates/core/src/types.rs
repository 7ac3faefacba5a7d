//! 도메인 타입 -- 시스템 전역에서 사용되는 공통 타입
//!
//! 스캔 소스 형식, 발견 항목(Finding) 상태, 심각도 범주, 작업 상태 등
//! 모든 크레이트가 공유하는 열거형을 정의합니다.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 스캔 결과 파일의 소스 형식
///
/// 분류기(classifier)가 파일마다 하나를 결정하며, 워커는 이 값으로 파서를 선택합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    /// 네트워크 스캐너 XML (`.nessus`, NessusClientData_v2)
    Nessus,
    /// 컴플라이언스 벤치마크 결과 XML (SCC XCCDF)
    SccXccdf,
    /// 체크리스트 뷰어 XML (`.ckl`)
    StigViewer,
    /// 포트 스캐너 XML 출력 (`nmap -oX`)
    NmapXml,
    /// 포트 스캐너 일반 텍스트 출력 (`nmap -oN`)
    NmapText,
    /// 포트 스캐너 greppable 출력 (`nmap -oG`)
    NmapGrep,
    /// 스프레드시트 체크리스트 CSV 내보내기
    EChecklist,
    /// 보안 분석기 XML (MBSA)
    Mbsa,
    /// 지원하지 않는 파일 (격리 대상)
    Unsupported,
}

impl SourceType {
    /// 모든 지원 형식 (Unsupported 제외)
    pub const SUPPORTED: [SourceType; 8] = [
        Self::Nessus,
        Self::SccXccdf,
        Self::StigViewer,
        Self::NmapXml,
        Self::NmapText,
        Self::NmapGrep,
        Self::EChecklist,
        Self::Mbsa,
    ];

    /// 저장소와 CLI 인자에서 사용하는 식별 문자열
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nessus => "nessus",
            Self::SccXccdf => "scc",
            Self::StigViewer => "ckl",
            Self::NmapXml => "nmap-xml",
            Self::NmapText => "nmap-text",
            Self::NmapGrep => "nmap-grep",
            Self::EChecklist => "echecklist",
            Self::Mbsa => "mbsa",
            Self::Unsupported => "unsupported",
        }
    }

    /// 노트 태그에 들어가는 사람이 읽는 이름
    pub fn label(&self) -> &'static str {
        match self {
            Self::Nessus => "Nessus",
            Self::SccXccdf => "SCC",
            Self::StigViewer => "STIG Viewer",
            Self::NmapXml | Self::NmapText | Self::NmapGrep => "NMAP",
            Self::EChecklist => "eChecklist",
            Self::Mbsa => "MBSA",
            Self::Unsupported => "Unsupported",
        }
    }

    /// 파싱 완료 후 파일이 이동되는 보관 디렉토리 이름
    ///
    /// `Unsupported`는 `None`을 반환하며 격리 디렉토리로 따로 옮겨집니다.
    pub fn holding_dir(&self) -> Option<&'static str> {
        match self {
            Self::Nessus => Some("nessus"),
            Self::SccXccdf => Some("scc"),
            Self::StigViewer => Some("stig_viewer"),
            Self::NmapXml | Self::NmapText | Self::NmapGrep => Some("nmap"),
            Self::EChecklist => Some("echecklist"),
            Self::Mbsa => Some("mbsa"),
            Self::Unsupported => None,
        }
    }

    /// 문자열에서 소스 형식을 파싱합니다 (대소문자 구분 없음).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "nessus" => Some(Self::Nessus),
            "scc" | "xccdf" | "scc-xccdf" => Some(Self::SccXccdf),
            "ckl" | "stig_viewer" | "stig-viewer" | "stigviewer" => Some(Self::StigViewer),
            "nmap-xml" | "nmap_xml" => Some(Self::NmapXml),
            "nmap-text" | "nmap_text" | "nmap" => Some(Self::NmapText),
            "nmap-grep" | "nmap_grep" | "gnmap" => Some(Self::NmapGrep),
            "echecklist" | "csv" => Some(Self::EChecklist),
            "mbsa" => Some(Self::Mbsa),
            "unsupported" => Some(Self::Unsupported),
            _ => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 상태 우선순위 계층
///
/// `Ord` 구현 순서가 곧 병합 우선순위입니다: Flagged > Resolved > Unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StatusTier {
    /// 아직 판단되지 않음
    Unknown,
    /// 해소됨 (Not a Finding, Not Applicable)
    Resolved,
    /// 문제 있음 (Open, Exception)
    Flagged,
}

/// 발견 항목(Finding) 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FindingStatus {
    /// 취약점 존재
    Open,
    /// 위험 수용 예외
    Exception,
    /// 문제 없음
    NotAFinding,
    /// 적용 대상 아님
    NotApplicable,
    /// 검토되지 않음
    NotReviewed,
}

impl FindingStatus {
    /// 상태가 속한 우선순위 계층을 반환합니다.
    pub fn tier(&self) -> StatusTier {
        match self {
            Self::Open | Self::Exception => StatusTier::Flagged,
            Self::NotAFinding | Self::NotApplicable => StatusTier::Resolved,
            Self::NotReviewed => StatusTier::Unknown,
        }
    }

    /// 저장소 표현 문자열
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Exception => "Exception",
            Self::NotAFinding => "Not a Finding",
            Self::NotApplicable => "Not Applicable",
            Self::NotReviewed => "Not Reviewed",
        }
    }

    /// 저장소 문자열 및 각 스캐너의 다양한 표기를 관대하게 파싱합니다.
    ///
    /// 공백, 밑줄, 하이픈, 대소문자를 무시합니다.
    /// 예: "NotAFinding", "Not_Applicable", "not a finding"
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "open" => Some(Self::Open),
            "exception" => Some(Self::Exception),
            "notafinding" | "nf" => Some(Self::NotAFinding),
            "notapplicable" | "na" => Some(Self::NotApplicable),
            "notreviewed" | "nr" => Some(Self::NotReviewed),
            _ => None,
        }
    }
}

impl fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 심각도 범주 (CAT I이 가장 높음)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    /// CAT I
    I,
    /// CAT II
    II,
    /// CAT III
    III,
}

impl Category {
    /// 저장소에 기록되는 정수 값 (1, 2, 3)
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::I => 1,
            Self::II => 2,
            Self::III => 3,
        }
    }

    /// 정수 값에서 범주를 복원합니다.
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(Self::I),
            2 => Some(Self::II),
            3 => Some(Self::III),
            _ => None,
        }
    }

    /// 심각도 이름 또는 로마 숫자 표기에서 범주를 파싱합니다.
    ///
    /// "high"/"critical"/"I" -> CAT I, "medium"/"II" -> CAT II, "low"/"III" -> CAT III
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let lowered = s.trim().to_lowercase();
        let trimmed = lowered
            .trim_start_matches("cat")
            .trim_start_matches("egory")
            .trim();
        match trimmed {
            "high" | "critical" | "i" | "1" => Some(Self::I),
            "medium" | "moderate" | "ii" | "2" => Some(Self::II),
            "low" | "iii" | "3" => Some(Self::III),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I => write!(f, "I"),
            Self::II => write!(f, "II"),
            Self::III => write!(f, "III"),
        }
    }
}

/// 작업(Job) 생명주기 상태
///
/// `QUEUED -> RUNNING -> {COMPLETE | ERROR | TERMINATED}`.
/// 종료 상태에서는 다시 전이하지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// 대기 중
    Queued,
    /// 실행 중
    Running,
    /// 정상 완료
    Complete,
    /// 실패
    Error,
    /// 외부 취소
    Terminated,
}

impl JobState {
    /// 종료 상태 여부
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Terminated)
    }

    /// 저장소 표현 문자열
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::Terminated => "TERMINATED",
        }
    }

    /// 저장소 문자열에서 상태를 파싱합니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "QUEUED" => Some(Self::Queued),
            "RUNNING" => Some(Self::Running),
            "COMPLETE" => Some(Self::Complete),
            "ERROR" => Some(Self::Error),
            "TERMINATED" => Some(Self::Terminated),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 외부 식별자 체계
///
/// 여러 체계의 식별자가 하나의 취약점 정의(PDI)로 다대일 매핑됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdScheme {
    /// 벤치마크 규칙 버전 ID (예: WN10-CC-000005)
    Stig,
    /// VMS/GoldDisk 취약점 번호 (예: V-63319)
    Vms,
    /// SV 규칙 ID (예: SV-77809r3_rule)
    SvRule,
    /// IAVM 공지 번호 (예: 2020-A-0001)
    Iavm,
    /// 스캐너 플러그인 ID
    Plugin,
    /// CVE ID
    Cve,
    /// CCE ID
    Cce,
    /// CCI ID
    Cci,
    /// OVAL 정의 ID
    Oval,
    /// 벤더 보안 공지 ID (예: MS10-001)
    Advisory,
}

impl IdScheme {
    /// 저장소 표현 문자열
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stig => "stig",
            Self::Vms => "vms",
            Self::SvRule => "sv_rule",
            Self::Iavm => "iavm",
            Self::Plugin => "plugin",
            Self::Cve => "cve",
            Self::Cce => "cce",
            Self::Cci => "cci",
            Self::Oval => "oval",
            Self::Advisory => "advisory",
        }
    }
}

impl fmt::Display for IdScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
