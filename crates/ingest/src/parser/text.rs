//! 줄 패턴 디스패처
//!
//! 텍스트 형식(NMAP 일반/greppable 출력)을 한 줄씩 읽고, 등록 순서대로 정규식을 시험해
//! 처음 일치한 규칙의 핸들러를 호출합니다. 호스트 경계 같은 상태 전이는 핸들러가
//! 파서 상태에서 직접 관리합니다.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use regex::{Captures, Regex};
use tracing::trace;

use crate::context::IngestContext;
use crate::error::IngestError;

/// 줄 핸들러
pub type LineHandler<S> =
    fn(&mut S, &mut IngestContext<'_>, &Captures<'_>) -> Result<(), IngestError>;

/// 정규식 규칙 목록
pub struct LineDispatcher<S> {
    rules: Vec<(Regex, LineHandler<S>)>,
}

impl<S> Default for LineDispatcher<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> LineDispatcher<S> {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// 규칙을 추가합니다. 먼저 추가한 규칙이 우선합니다.
    pub fn rule(mut self, pattern: &str, handler: LineHandler<S>) -> Result<Self, IngestError> {
        let re = Regex::new(pattern).map_err(|e| IngestError::Config {
            field: "line pattern".to_owned(),
            reason: e.to_string(),
        })?;
        self.rules.push((re, handler));
        Ok(self)
    }

    /// 한 줄을 처리합니다. 일치한 규칙이 있으면 `true`.
    pub fn dispatch(
        &self,
        line: &str,
        state: &mut S,
        ctx: &mut IngestContext<'_>,
    ) -> Result<bool, IngestError> {
        for (re, handler) in &self.rules {
            if let Some(caps) = re.captures(line) {
                handler(state, ctx, &caps)?;
                return Ok(true);
            }
        }
        trace!(line, "no rule matched");
        Ok(false)
    }

    /// 파일 전체를 처리합니다. 일치한 줄 수를 반환합니다.
    pub fn run(
        &self,
        path: &Path,
        state: &mut S,
        ctx: &mut IngestContext<'_>,
    ) -> Result<usize, IngestError> {
        let display = path.display().to_string();
        let file = File::open(path).map_err(|source| IngestError::Io {
            path: display.clone(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let mut raw = Vec::new();
        let mut position = 0u64;
        let mut matched = 0usize;

        loop {
            raw.clear();
            let n = reader
                .read_until(b'\n', &mut raw)
                .map_err(|source| IngestError::Io {
                    path: display.clone(),
                    source,
                })?;
            if n == 0 {
                break;
            }
            position += n as u64;
            ctx.set_position(position);

            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);
            if self.dispatch(line, state, ctx)? {
                matched += 1;
            }
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deconflict::Deconflictor;
    use stigpost_core::config::IngestConfig;
    use stigpost_core::types::SourceType;
    use stigpost_store::Store;

    fn host(
        s: &mut Vec<String>,
        _: &mut IngestContext<'_>,
        c: &Captures<'_>,
    ) -> Result<(), IngestError> {
        s.push(format!("host {}", &c[1]));
        Ok(())
    }

    fn any(
        s: &mut Vec<String>,
        _: &mut IngestContext<'_>,
        c: &Captures<'_>,
    ) -> Result<(), IngestError> {
        s.push(format!("any {}", &c[0]));
        Ok(())
    }

    #[test]
    fn first_matching_rule_wins() {
        let dispatcher = LineDispatcher::new()
            .rule(r"^Nmap scan report for (\S+)", host)
            .and_then(|d| d.rule(r"^\S+$", any))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.nmap");
        std::fs::write(&path, "Nmap scan report for web01\r\nword\nnot matched here\n").unwrap();

        let store = Store::open_in_memory().unwrap();
        let mut ctx = IngestContext::new(
            &store,
            1,
            0,
            None,
            SourceType::NmapText,
            Deconflictor::default(),
            None,
            IngestConfig::default(),
        );
        let mut seen = Vec::new();
        let matched = dispatcher.run(&path, &mut seen, &mut ctx).unwrap();
        assert_eq!(matched, 2);
        assert_eq!(seen, vec!["host web01", "any word"]);
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let result = LineDispatcher::<Vec<String>>::new().rule(r"(unclosed", any);
        assert!(result.is_err());
    }
}
