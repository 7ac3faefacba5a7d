//! 카탈로그 -- 취약점 정의(PDI), 외부 식별자 매핑, 소프트웨어, 체크리스트
//!
//! 여러 식별자 체계(STIG 규칙, VMS 번호, 플러그인 ID, CVE, CCE ...)가
//! 하나의 PDI로 다대일 매핑됩니다. 조회 실패는 에러가 아니며,
//! 호출자가 새 정의를 만들고 매핑을 추가합니다.

use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use stigpost_core::types::{Category, IdScheme};

use crate::error::StoreError;
use crate::{Store, non_empty};

/// 저장된 취약점 정의
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pdi {
    pub id: i64,
    pub category: Option<Category>,
    pub short_title: String,
    pub group_title: String,
    pub description: String,
    pub check_text: String,
    pub fix_text: String,
    /// 마지막 갱신일 (YYYY-MM-DD)
    pub updated: Option<String>,
}

/// 새 정의 또는 갱신 입력
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdiDraft {
    pub category: Option<Category>,
    pub short_title: String,
    pub group_title: String,
    pub description: String,
    pub check_text: String,
    pub fix_text: String,
    pub updated: Option<String>,
}

/// 소프트웨어/CPE 레코드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Software {
    pub id: i64,
    pub cpe: String,
    pub vendor: String,
    pub name: String,
    pub version: String,
}

/// 체크리스트 (벤치마크 릴리스)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checklist {
    pub id: i64,
    pub name: String,
    pub version: String,
    pub release: String,
}

impl Store {
    /// 하나의 식별자로 PDI를 조회합니다.
    pub fn lookup(&self, scheme: IdScheme, ext_id: &str) -> Result<Option<i64>, StoreError> {
        let ext_id = ext_id.trim();
        if ext_id.is_empty() {
            return Ok(None);
        }
        let conn = self.conn()?;
        let id = conn
            .query_row(
                "SELECT pdi_id FROM pdi_xref WHERE scheme = ?1 AND ext_id = ?2",
                params![scheme.as_str(), ext_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// 주어진 순서대로 식별자를 조회하고 첫 번째 일치를 반환합니다.
    pub fn lookup_any(&self, ids: &[(IdScheme, &str)]) -> Result<Option<i64>, StoreError> {
        for (scheme, ext_id) in ids {
            if let Some(id) = self.lookup(*scheme, ext_id)? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// 새 PDI를 삽입하고 id를 반환합니다.
    pub fn insert_pdi(&self, draft: &PdiDraft) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pdi (category, short_title, group_title, description, check_text, fix_text, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                draft.category.map(|c| c.as_i64()),
                draft.short_title,
                draft.group_title,
                draft.description,
                draft.check_text,
                draft.fix_text,
                draft.updated,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 식별자 매핑을 추가합니다. 이미 있으면 기존 매핑을 유지합니다.
    pub fn add_xref(&self, scheme: IdScheme, ext_id: &str, pdi_id: i64) -> Result<(), StoreError> {
        let ext_id = ext_id.trim();
        if ext_id.is_empty() {
            return Ok(());
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO pdi_xref (scheme, ext_id, pdi_id) VALUES (?1, ?2, ?3)",
            params![scheme.as_str(), ext_id, pdi_id],
        )?;
        Ok(())
    }

    /// PDI에 연결된 모든 식별자 (scheme, ext_id)
    pub fn xrefs_for(&self, pdi_id: i64) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT scheme, ext_id FROM pdi_xref WHERE pdi_id = ?1 ORDER BY scheme, ext_id",
        )?;
        let rows = stmt
            .query_map(params![pdi_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// PDI를 조회합니다.
    pub fn get_pdi(&self, id: i64) -> Result<Pdi, StoreError> {
        let conn = self.conn()?;
        let pdi = conn
            .query_row(
                "SELECT id, category, short_title, group_title, description, check_text, fix_text, updated
                 FROM pdi WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Pdi {
                        id: row.get(0)?,
                        category: row.get::<_, Option<i64>>(1)?.and_then(Category::from_i64),
                        short_title: row.get(2)?,
                        group_title: row.get(3)?,
                        description: row.get(4)?,
                        check_text: row.get(5)?,
                        fix_text: row.get(6)?,
                        updated: row.get(7)?,
                    })
                },
            )
            .optional()?;
        pdi.ok_or_else(|| StoreError::NotFound {
            what: "pdi",
            key: id.to_string(),
        })
    }

    /// 입력이 더 최신이면 정의를 덮어쓰고, 아니면 빈 필드만 채웁니다.
    ///
    /// 갱신 여부를 반환합니다.
    pub fn update_pdi_if_newer(&self, id: i64, draft: &PdiDraft) -> Result<bool, StoreError> {
        let existing = self.get_pdi(id)?;
        let newer = match (&draft.updated, &existing.updated) {
            (Some(new), Some(old)) => new > old,
            (Some(_), None) => true,
            _ => false,
        };

        let pick = |new: &str, old: &str| -> String {
            if (newer && !new.trim().is_empty()) || old.trim().is_empty() {
                new.to_owned()
            } else {
                old.to_owned()
            }
        };
        let merged = Pdi {
            id,
            category: if newer {
                draft.category.or(existing.category)
            } else {
                existing.category.or(draft.category)
            },
            short_title: pick(&draft.short_title, &existing.short_title),
            group_title: pick(&draft.group_title, &existing.group_title),
            description: pick(&draft.description, &existing.description),
            check_text: pick(&draft.check_text, &existing.check_text),
            fix_text: pick(&draft.fix_text, &existing.fix_text),
            updated: if newer {
                draft.updated.clone()
            } else {
                existing.updated.clone()
            },
        };
        if merged == existing {
            return Ok(false);
        }

        let conn = self.conn()?;
        conn.execute(
            "UPDATE pdi SET category = ?2, short_title = ?3, group_title = ?4, description = ?5,
                    check_text = ?6, fix_text = ?7, updated = ?8
             WHERE id = ?1",
            params![
                id,
                merged.category.map(|c| c.as_i64()),
                merged.short_title,
                merged.group_title,
                merged.description,
                merged.check_text,
                merged.fix_text,
                merged.updated,
            ],
        )?;
        Ok(true)
    }

    /// CPE로 소프트웨어를 찾거나 새로 만듭니다.
    pub fn find_or_insert_software(
        &self,
        cpe: &str,
        vendor: &str,
        name: &str,
        version: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO software (cpe, vendor, name, version) VALUES (?1, ?2, ?3, ?4)",
            params![cpe, vendor, name, version],
        )?;
        let id = conn.query_row(
            "SELECT id FROM software WHERE cpe = ?1",
            params![cpe],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// 자산에 소프트웨어를 연결합니다 (멱등).
    pub fn assign_software(&self, target_id: i64, software_id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO target_software (target_id, software_id) VALUES (?1, ?2)",
            params![target_id, software_id],
        )?;
        Ok(())
    }

    /// 자산에 설치된 소프트웨어 목록
    pub fn software_for(&self, target_id: i64) -> Result<Vec<Software>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.cpe, s.vendor, s.name, s.version
             FROM software s JOIN target_software ts ON ts.software_id = s.id
             WHERE ts.target_id = ?1 ORDER BY s.name, s.version",
        )?;
        let rows = stmt
            .query_map(params![target_id], |row| {
                Ok(Software {
                    id: row.get(0)?,
                    cpe: row.get(1)?,
                    vendor: row.get(2)?,
                    name: row.get(3)?,
                    version: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// (이름, 버전, 릴리스)로 체크리스트를 찾거나 새로 만듭니다.
    pub fn find_or_insert_checklist(
        &self,
        name: &str,
        version: &str,
        release: &str,
    ) -> Result<i64, StoreError> {
        let name = non_empty(Some(name)).unwrap_or("Unnamed Checklist");
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO checklist (name, version, release) VALUES (?1, ?2, ?3)",
            params![name, version.trim(), release.trim()],
        )?;
        let id = conn.query_row(
            "SELECT id FROM checklist WHERE name = ?1 AND version = ?2 AND release = ?3",
            params![name, version.trim(), release.trim()],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// 체크리스트에 PDI를 추가합니다 (멱등).
    pub fn add_pdi_to_checklist(&self, checklist_id: i64, pdi_id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO checklist_pdi (checklist_id, pdi_id) VALUES (?1, ?2)",
            params![checklist_id, pdi_id],
        )?;
        Ok(())
    }

    /// 자산에 체크리스트를 할당합니다 (멱등).
    pub fn assign_checklist(&self, target_id: i64, checklist_id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO target_checklist (target_id, checklist_id) VALUES (?1, ?2)",
            params![target_id, checklist_id],
        )?;
        Ok(())
    }

    /// 자산에 할당된 체크리스트 목록
    pub fn checklists_for(&self, target_id: i64) -> Result<Vec<Checklist>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.name, c.version, c.release
             FROM checklist c JOIN target_checklist tc ON tc.checklist_id = c.id
             WHERE tc.target_id = ?1 ORDER BY c.name",
        )?;
        let rows = stmt
            .query_map(params![target_id], |row| {
                Ok(Checklist {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    version: row.get(2)?,
                    release: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 체크리스트에 포함된 PDI 수
    pub fn checklist_size(&self, checklist_id: i64) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM checklist_pdi WHERE checklist_id = ?1",
            params![checklist_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}
