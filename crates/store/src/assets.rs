//! 자산(Target), 네트워크 인터페이스, 포트
//!
//! 자산은 인터페이스 목록을 소유하며, 인터페이스는 자산을 역참조하지 않습니다.
//! 매칭 정책(이름 → 호스트명 → FQDN → IP)은 수집 크레이트의 식별자 해석기가 결정하고,
//! 여기서는 조회/삽입/보강 기본 연산만 제공합니다.

use std::fmt;

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::{Store, non_empty};

/// 저장된 자산
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub context_id: i64,
    pub name: String,
    pub os: Option<String>,
    pub classification: Option<String>,
    pub notes: String,
    pub open_ports: String,
    pub process_list: String,
    pub interfaces: Vec<Interface>,
}

impl Asset {
    /// IP 주소로 인터페이스를 찾습니다 (v4/v6 모두 확인).
    pub fn interface_by_ip(&self, ip: &str) -> Option<&Interface> {
        self.interfaces
            .iter()
            .find(|i| i.ipv4.as_deref() == Some(ip) || i.ipv6.as_deref() == Some(ip))
    }
}

/// 저장된 네트워크 인터페이스
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub id: i64,
    pub name: String,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub hostname: Option<String>,
    pub fqdn: Option<String>,
    pub mac: Option<String>,
}

/// 인터페이스 삽입/보강 입력
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceFields {
    pub name: Option<String>,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub hostname: Option<String>,
    pub fqdn: Option<String>,
    pub mac: Option<String>,
}

impl InterfaceFields {
    /// 모든 필드가 비어 있는지
    pub fn is_empty(&self) -> bool {
        [
            &self.name,
            &self.ipv4,
            &self.ipv6,
            &self.hostname,
            &self.fqdn,
            &self.mac,
        ]
        .iter()
        .all(|f| non_empty(f.as_deref()).is_none())
    }
}

/// 포트 프로토콜
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "tcp" => Some(Self::Tcp),
            "udp" => Some(Self::Udp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 포트 증거 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    pub proto: Protocol,
    pub port: u16,
    pub service: String,
    pub banner: String,
    pub notes: String,
    pub listening: bool,
}

/// 인터페이스 조회 키
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKey {
    Hostname,
    Fqdn,
    /// IPv4 또는 IPv6
    Ip,
}

impl Store {
    /// 컨텍스트 내에서 정확한 이름으로 자산을 찾습니다 (대소문자 구분).
    pub fn find_asset_by_name(
        &self,
        context_id: i64,
        name: &str,
    ) -> Result<Option<i64>, StoreError> {
        let conn = self.conn()?;
        let id = conn
            .query_row(
                "SELECT id FROM target WHERE context_id = ?1 AND name = ?2",
                params![context_id, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// 인터페이스 필드로 자산을 찾습니다. 여러 개면 가장 먼저 생성된 자산이 이깁니다.
    pub fn find_asset_by_interface(
        &self,
        context_id: i64,
        key: InterfaceKey,
        value: &str,
    ) -> Result<Option<i64>, StoreError> {
        let sql = match key {
            InterfaceKey::Hostname => {
                "SELECT t.id FROM target t JOIN interface i ON i.target_id = t.id
                 WHERE t.context_id = ?1 AND i.hostname = ?2 COLLATE NOCASE
                 ORDER BY t.id LIMIT 1"
            }
            InterfaceKey::Fqdn => {
                "SELECT t.id FROM target t JOIN interface i ON i.target_id = t.id
                 WHERE t.context_id = ?1 AND i.fqdn = ?2 COLLATE NOCASE
                 ORDER BY t.id LIMIT 1"
            }
            InterfaceKey::Ip => {
                "SELECT t.id FROM target t JOIN interface i ON i.target_id = t.id
                 WHERE t.context_id = ?1 AND (i.ipv4 = ?2 OR i.ipv6 = ?2 COLLATE NOCASE)
                 ORDER BY t.id LIMIT 1"
            }
        };
        let conn = self.conn()?;
        let id = conn
            .query_row(sql, params![context_id, value], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    /// 새 자산을 삽입합니다.
    pub fn insert_asset(&self, context_id: i64, name: &str) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO target (context_id, name) VALUES (?1, ?2)",
            params![context_id, name],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 자산 이름을 변경합니다.
    ///
    /// 같은 컨텍스트에 이미 그 이름의 자산이 있으면 변경하지 않고 `false`를 반환합니다.
    pub fn rename_asset(&self, id: i64, new_name: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE target SET name = ?2
             WHERE id = ?1 AND NOT EXISTS (
                 SELECT 1 FROM target o
                 WHERE o.context_id = target.context_id AND o.name = ?2 AND o.id <> ?1
             )",
            params![id, new_name],
        )?;
        Ok(changed > 0)
    }

    /// 운영체제를 설정합니다. `only_if_empty`이면 비어 있을 때만 설정합니다.
    pub fn set_asset_os(&self, id: i64, os: &str, only_if_empty: bool) -> Result<(), StoreError> {
        let Some(os) = non_empty(Some(os)) else {
            return Ok(());
        };
        let conn = self.conn()?;
        let sql = if only_if_empty {
            "UPDATE target SET os = ?2 WHERE id = ?1 AND (os IS NULL OR os = '')"
        } else {
            "UPDATE target SET os = ?2 WHERE id = ?1"
        };
        conn.execute(sql, params![id, os])?;
        Ok(())
    }

    /// 열린 포트 요약을 설정합니다.
    pub fn set_open_ports(&self, id: i64, summary: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE target SET open_ports = ?2 WHERE id = ?1",
            params![id, summary],
        )?;
        Ok(())
    }

    /// 프로세스 목록 증거를 설정합니다.
    pub fn set_process_list(&self, id: i64, list: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE target SET process_list = ?2 WHERE id = ?1",
            params![id, list],
        )?;
        Ok(())
    }

    /// 분류(classification)를 비어 있을 때만 설정합니다.
    pub fn set_classification(&self, id: i64, classification: &str) -> Result<(), StoreError> {
        let Some(classification) = non_empty(Some(classification)) else {
            return Ok(());
        };
        let conn = self.conn()?;
        conn.execute(
            "UPDATE target SET classification = ?2
             WHERE id = ?1 AND (classification IS NULL OR classification = '')",
            params![id, classification],
        )?;
        Ok(())
    }

    /// 자산을 인터페이스와 함께 로드합니다.
    pub fn load_asset(&self, id: i64) -> Result<Asset, StoreError> {
        let conn = self.conn()?;
        let asset = conn
            .query_row(
                "SELECT id, context_id, name, os, classification, notes, open_ports, process_list
                 FROM target WHERE id = ?1",
                params![id],
                asset_from_row,
            )
            .optional()?;
        let mut asset = asset.ok_or_else(|| StoreError::NotFound {
            what: "asset",
            key: id.to_string(),
        })?;

        let mut stmt = conn.prepare(
            "SELECT id, name, ipv4, ipv6, hostname, fqdn, mac
             FROM interface WHERE target_id = ?1 ORDER BY id",
        )?;
        asset.interfaces = stmt
            .query_map(params![id], interface_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(asset)
    }

    /// 컨텍스트의 모든 자산
    pub fn list_assets(&self, context_id: i64) -> Result<Vec<Asset>, StoreError> {
        let ids: Vec<i64> = {
            let conn = self.conn()?;
            let mut stmt =
                conn.prepare("SELECT id FROM target WHERE context_id = ?1 ORDER BY id")?;
            let ids = stmt
                .query_map(params![context_id], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        ids.into_iter().map(|id| self.load_asset(id)).collect()
    }

    /// 자산에 새 인터페이스를 추가합니다.
    pub fn insert_interface(
        &self,
        target_id: i64,
        fields: &InterfaceFields,
    ) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO interface (target_id, name, ipv4, ipv6, hostname, fqdn, mac)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                target_id,
                non_empty(fields.name.as_deref()).unwrap_or(""),
                non_empty(fields.ipv4.as_deref()),
                non_empty(fields.ipv6.as_deref()),
                non_empty(fields.hostname.as_deref()),
                non_empty(fields.fqdn.as_deref()),
                non_empty(fields.mac.as_deref()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 비어 있는 인터페이스 필드만 채웁니다. 기존 값은 덮어쓰지 않습니다.
    pub fn fill_interface(
        &self,
        interface_id: i64,
        fields: &InterfaceFields,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE interface SET
                name     = CASE WHEN name = '' THEN COALESCE(?2, '') ELSE name END,
                ipv4     = COALESCE(ipv4, ?3),
                ipv6     = COALESCE(ipv6, ?4),
                hostname = COALESCE(hostname, ?5),
                fqdn     = COALESCE(fqdn, ?6),
                mac      = COALESCE(mac, ?7)
             WHERE id = ?1",
            params![
                interface_id,
                non_empty(fields.name.as_deref()),
                non_empty(fields.ipv4.as_deref()),
                non_empty(fields.ipv6.as_deref()),
                non_empty(fields.hostname.as_deref()),
                non_empty(fields.fqdn.as_deref()),
                non_empty(fields.mac.as_deref()),
            ],
        )?;
        Ok(())
    }

    /// 포트 번호 기준으로 포트 증거를 upsert합니다.
    ///
    /// 비어 있지 않은 새 서비스/배너만 기존 값을 덮어쓰며, listening은 한 번 참이면 유지됩니다.
    pub fn upsert_port(&self, interface_id: i64, port: &PortRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO port (interface_id, proto, port, service, banner, notes, listening)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (interface_id, proto, port) DO UPDATE SET
                service   = CASE WHEN excluded.service <> '' THEN excluded.service ELSE port.service END,
                banner    = CASE WHEN excluded.banner <> '' THEN excluded.banner ELSE port.banner END,
                notes     = CASE WHEN excluded.notes <> '' THEN excluded.notes ELSE port.notes END,
                listening = MAX(port.listening, excluded.listening)",
            params![
                interface_id,
                port.proto.as_str(),
                i64::from(port.port),
                port.service,
                port.banner,
                port.notes,
                port.listening,
            ],
        )?;
        Ok(())
    }

    /// 인터페이스의 포트 목록 (프로토콜, 포트 순)
    pub fn ports_for(&self, interface_id: i64) -> Result<Vec<PortRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT proto, port, service, banner, notes, listening
             FROM port WHERE interface_id = ?1 ORDER BY proto, port",
        )?;
        let rows = stmt
            .query_map(params![interface_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, bool>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(proto, port, service, banner, notes, listening)| {
                let proto = Protocol::from_str_loose(&proto).ok_or(StoreError::Corrupt {
                    column: "port.proto",
                    value: proto.clone(),
                })?;
                let port = u16::try_from(port).map_err(|_| StoreError::Corrupt {
                    column: "port.port",
                    value: port.to_string(),
                })?;
                Ok(PortRecord {
                    proto,
                    port,
                    service,
                    banner,
                    notes,
                    listening,
                })
            })
            .collect()
    }

    /// 컨텍스트의 자산 수
    pub fn count_assets(&self, context_id: i64) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM target WHERE context_id = ?1",
            params![context_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

fn asset_from_row(row: &Row<'_>) -> rusqlite::Result<Asset> {
    Ok(Asset {
        id: row.get(0)?,
        context_id: row.get(1)?,
        name: row.get(2)?,
        os: row.get(3)?,
        classification: row.get(4)?,
        notes: row.get(5)?,
        open_ports: row.get(6)?,
        process_list: row.get(7)?,
        interfaces: Vec::new(),
    })
}

fn interface_from_row(row: &Row<'_>) -> rusqlite::Result<Interface> {
    Ok(Interface {
        id: row.get(0)?,
        name: row.get(1)?,
        ipv4: row.get(2)?,
        ipv6: row.get(3)?,
        hostname: row.get(4)?,
        fqdn: row.get(5)?,
        mac: row.get(6)?,
    })
}
