//! 경로 기반 XML 이벤트 디스패처
//!
//! 요소 경로(접미 경로)에 핸들러를 등록하고, 스트리밍으로 읽으면서 요소가 열리거나
//! 닫힐 때 일치하는 핸들러를 호출합니다. 파일 전체를 메모리에 올리지 않습니다.
//!
//! ```ignore
//! let dispatcher = XmlDispatcher::new("NessusClientData_v2")
//!     .on_open("ReportHost", start_host)
//!     .on_close("HostProperties/tag", host_tag)
//!     .on_close("ReportHost", finish_host);
//! dispatcher.run(path, &mut state, ctx)?;
//! ```
//!
//! 요소와 속성 이름은 네임스페이스 접두어를 뗀 로컬 이름으로 비교합니다.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::trace;

use crate::context::IngestContext;
use crate::error::IngestError;

/// 핸들러에 전달되는 요소
///
/// 열림 이벤트에서는 `text`가 비어 있고, 닫힘 이벤트에서는 요소 직속 텍스트가 채워집니다.
#[derive(Debug, Clone, Default)]
pub struct XmlElement {
    pub name: String,
    /// 루트부터의 경로 (`a/b/c`)
    pub path: String,
    pub attrs: HashMap<String, String>,
    pub text: String,
}

impl XmlElement {
    /// 비어 있지 않은 속성 값
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// 공백을 제거한 텍스트 (비어 있으면 `None`)
    pub fn text(&self) -> Option<&str> {
        Some(self.text.trim()).filter(|t| !t.is_empty())
    }
}

/// 요소 핸들러
pub type XmlHandler<S> =
    fn(&mut S, &mut IngestContext<'_>, &XmlElement) -> Result<(), IngestError>;

struct Route<S> {
    /// 접미 경로 (마지막 세그먼트 포함)
    suffix: Vec<String>,
    handler: XmlHandler<S>,
}

/// 경로 기반 디스패처
pub struct XmlDispatcher<S> {
    root: &'static str,
    open: HashMap<String, Vec<Route<S>>>,
    close: HashMap<String, Vec<Route<S>>>,
}

struct Frame {
    name: String,
    attrs: HashMap<String, String>,
    text: String,
}

impl<S> XmlDispatcher<S> {
    /// 루트 요소 이름을 지정해 디스패처를 만듭니다. 다른 루트는 형식 에러입니다.
    pub fn new(root: &'static str) -> Self {
        Self {
            root,
            open: HashMap::new(),
            close: HashMap::new(),
        }
    }

    /// 요소가 열릴 때 호출할 핸들러
    pub fn on_open(mut self, path: &str, handler: XmlHandler<S>) -> Self {
        register(&mut self.open, path, handler);
        self
    }

    /// 요소가 닫힐 때 호출할 핸들러
    pub fn on_close(mut self, path: &str, handler: XmlHandler<S>) -> Self {
        register(&mut self.close, path, handler);
        self
    }

    /// 파일을 끝까지 읽으며 핸들러를 호출합니다.
    pub fn run(
        &self,
        path: &Path,
        state: &mut S,
        ctx: &mut IngestContext<'_>,
    ) -> Result<(), IngestError> {
        let display = path.display().to_string();
        let file = File::open(path).map_err(|source| IngestError::Io {
            path: display.clone(),
            source,
        })?;
        let mut reader = Reader::from_reader(BufReader::new(file));
        reader.trim_text(true);

        let mut buf = Vec::new();
        let mut stack: Vec<Frame> = Vec::new();
        let mut seen_root = false;

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| {
                IngestError::format(
                    display.clone(),
                    format!("xml error at byte {}: {e}", reader.buffer_position()),
                )
            })?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let empty = matches!(event, Event::Empty(_));
                    let name = local_name(e);
                    if !seen_root {
                        if name != self.root {
                            return Err(IngestError::format(
                                display,
                                format!("expected <{}> root element, found <{name}>", self.root),
                            ));
                        }
                        seen_root = true;
                    }
                    stack.push(Frame {
                        name,
                        attrs: parse_attrs(e),
                        text: String::new(),
                    });
                    self.fire(&self.open, &stack, String::new(), state, ctx)?;
                    if empty {
                        self.close_top(&mut stack, state, ctx)?;
                    }
                }
                Event::End(_) => {
                    self.close_top(&mut stack, state, ctx)?;
                }
                Event::Text(t) => {
                    if let Some(top) = stack.last_mut() {
                        let text = t
                            .unescape()
                            .map_err(|e| IngestError::format(display.clone(), e.to_string()))?;
                        top.text.push_str(&text);
                    }
                }
                Event::CData(c) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            ctx.set_position(reader.buffer_position() as u64);
            buf.clear();
        }

        if !seen_root {
            return Err(IngestError::format(
                display,
                format!("no <{}> element found", self.root),
            ));
        }
        if let Some(open) = stack.last() {
            return Err(IngestError::format(
                display,
                format!("unexpected end of file inside <{}>", open.name),
            ));
        }
        Ok(())
    }

    fn close_top(
        &self,
        stack: &mut Vec<Frame>,
        state: &mut S,
        ctx: &mut IngestContext<'_>,
    ) -> Result<(), IngestError> {
        if stack.is_empty() {
            return Ok(());
        }
        let text = stack
            .last_mut()
            .map(|f| std::mem::take(&mut f.text))
            .unwrap_or_default();
        self.fire(&self.close, stack, text, state, ctx)?;
        stack.pop();
        Ok(())
    }

    fn fire(
        &self,
        table: &HashMap<String, Vec<Route<S>>>,
        stack: &[Frame],
        text: String,
        state: &mut S,
        ctx: &mut IngestContext<'_>,
    ) -> Result<(), IngestError> {
        let Some(top) = stack.last() else {
            return Ok(());
        };
        let Some(routes) = table.get(&top.name) else {
            return Ok(());
        };
        let matching: Vec<&Route<S>> = routes
            .iter()
            .filter(|r| suffix_matches(stack, &r.suffix))
            .collect();
        if matching.is_empty() {
            return Ok(());
        }

        let element = XmlElement {
            name: top.name.clone(),
            path: stack
                .iter()
                .map(|f| f.name.as_str())
                .collect::<Vec<_>>()
                .join("/"),
            attrs: top.attrs.clone(),
            text,
        };
        trace!(path = %element.path, "dispatch");
        for route in matching {
            (route.handler)(state, ctx, &element)?;
        }
        Ok(())
    }
}

fn register<S>(table: &mut HashMap<String, Vec<Route<S>>>, path: &str, handler: XmlHandler<S>) {
    let suffix: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    let Some(last) = suffix.last().cloned() else {
        return;
    };
    table
        .entry(last)
        .or_default()
        .push(Route { suffix, handler });
}

fn suffix_matches(stack: &[Frame], suffix: &[String]) -> bool {
    if suffix.len() > stack.len() {
        return false;
    }
    stack[stack.len() - suffix.len()..]
        .iter()
        .zip(suffix)
        .all(|(frame, seg)| frame.name == *seg)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn parse_attrs(e: &BytesStart<'_>) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
        attrs.insert(key, value);
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deconflict::Deconflictor;
    use stigpost_core::config::IngestConfig;
    use stigpost_core::types::SourceType;
    use stigpost_store::Store;

    #[derive(Default)]
    struct Seen {
        opened: Vec<String>,
        closed: Vec<(String, String)>,
    }

    fn opened(s: &mut Seen, _: &mut IngestContext<'_>, el: &XmlElement) -> Result<(), IngestError> {
        s.opened.push(el.attr("id").unwrap_or_default().to_owned());
        Ok(())
    }

    fn closed(s: &mut Seen, _: &mut IngestContext<'_>, el: &XmlElement) -> Result<(), IngestError> {
        s.closed.push((el.path.clone(), el.text.clone()));
        Ok(())
    }

    fn run(xml: &str, dispatcher: &XmlDispatcher<Seen>) -> Result<Seen, IngestError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.xml");
        std::fs::write(&path, xml).unwrap();
        let store = Store::open_in_memory().unwrap();
        let mut ctx = IngestContext::new(
            &store,
            1,
            0,
            None,
            SourceType::Nessus,
            Deconflictor::default(),
            None,
            IngestConfig::default(),
        );
        let mut seen = Seen::default();
        dispatcher.run(&path, &mut seen, &mut ctx)?;
        Ok(seen)
    }

    #[test]
    fn suffix_paths_and_namespaces() {
        let dispatcher = XmlDispatcher::new("root")
            .on_open("item", opened)
            .on_close("group/item/value", closed);
        let seen = run(
            r#"<x:root xmlns:x="urn:x"><group><item id="a"><x:value>one &amp; two</x:value></item></group>
               <item id="b"><value>ignored</value></item><item id="c"/></x:root>"#,
            &dispatcher,
        )
        .unwrap();
        assert_eq!(seen.opened, vec!["a", "b", "c"]);
        assert_eq!(
            seen.closed,
            vec![("root/group/item/value".to_owned(), "one & two".to_owned())]
        );
    }

    #[test]
    fn cdata_is_collected() {
        let dispatcher = XmlDispatcher::new("root").on_close("value", closed);
        let seen = run("<root><value><![CDATA[a < b]]></value></root>", &dispatcher).unwrap();
        assert_eq!(seen.closed[0].1, "a < b");
    }

    #[test]
    fn wrong_root_is_format_error() {
        let dispatcher: XmlDispatcher<Seen> = XmlDispatcher::new("CHECKLIST");
        let err = run("<nmaprun></nmaprun>", &dispatcher).err().unwrap();
        assert!(matches!(err, IngestError::Format { .. }));
    }

    #[test]
    fn broken_xml_is_format_error() {
        let dispatcher: XmlDispatcher<Seen> = XmlDispatcher::new("root");
        let err = run("<root><a></b></root>", &dispatcher).err().unwrap();
        assert!(matches!(err, IngestError::Format { .. }));
    }

    #[test]
    fn truncated_xml_is_format_error() {
        let dispatcher: XmlDispatcher<Seen> = XmlDispatcher::new("root");
        let err = run("<root><a>partial", &dispatcher).err().unwrap();
        assert!(err.to_string().contains("inside <a>"));
    }
}
