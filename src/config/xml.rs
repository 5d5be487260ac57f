//! XML <-> JSON value mapping.
//!
//! Element names become keys, attributes become `@name` keys, text next to
//! attributes or child elements goes under `#text`, repeated siblings
//! collapse into an array and empty elements map to `null`.

use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};

const ATTR_PREFIX: char = '@';
const TEXT_KEY: &str = "#text";

struct Frame {
    name: String,
    children: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart) -> Result<Self, String> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut children = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| e.to_string())?;
            let key = format!("{}{}", ATTR_PREFIX, String::from_utf8_lossy(attr.key.as_ref()));
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            children.insert(key, Value::String(value.into_owned()));
        }
        Ok(Self {
            name,
            children,
            text: String::new(),
        })
    }

    fn close(self) -> (String, Value) {
        let Frame {
            name,
            mut children,
            text,
        } = self;
        let text = text.trim().to_string();
        let value = match (children.is_empty(), text.is_empty()) {
            (true, true) => Value::Null,
            (true, false) => Value::String(text),
            (false, _) => {
                if !text.is_empty() {
                    children.insert(TEXT_KEY.to_string(), Value::String(text));
                }
                Value::Object(children)
            }
        };
        (name, value)
    }
}

/// Add `value` under `name`, turning repeated names into arrays
fn insert_child(map: &mut Map<String, Value>, name: String, value: Value) {
    match map.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(name, value);
        }
    }
}

/// Parse an XML document into `{ root_name: ... }`
pub fn parse(xml: &str) -> Result<Value, String> {
    // Text is trimmed per element on close; trimming per event would eat the
    // spaces around entity references
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root = Map::new();

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Eof => break,
            Event::Start(start) => stack.push(Frame::open(&start)?),
            Event::Empty(start) => {
                let (name, value) = Frame::open(&start)?.close();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, value),
                    None => insert_child(&mut root, name, value),
                }
            }
            Event::End(_) => {
                let frame = stack.pop().ok_or("unexpected closing tag")?;
                let (name, value) = frame.close();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, value),
                    None => insert_child(&mut root, name, value),
                }
            }
            Event::Text(text) => {
                if let Some(frame) = stack.last_mut() {
                    let raw = std::str::from_utf8(&text).map_err(|e| e.to_string())?;
                    frame.text.push_str(&unescape(raw).map_err(|e| e.to_string())?);
                }
            }
            Event::CData(data) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::GeneralRef(reference) => {
                if let Some(frame) = stack.last_mut() {
                    let name = std::str::from_utf8(&reference).map_err(|e| e.to_string())?;
                    match reference.resolve_char_ref().map_err(|e| e.to_string())? {
                        Some(ch) => frame.text.push(ch),
                        None => frame.text.push_str(
                            resolve_predefined_entity(name)
                                .ok_or_else(|| format!("unknown entity &{};", name))?,
                        ),
                    }
                }
            }
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(format!("unclosed element <{}>", stack[stack.len() - 1].name));
    }
    if root.is_empty() {
        return Err("document has no root element".to_string());
    }
    Ok(Value::Object(root))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, name: &str, value: &Value) -> Result<(), String> {
    match value {
        Value::Array(items) => {
            for item in items {
                write_element(writer, name, item)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            let mut start = BytesStart::new(name);
            for (key, v) in map {
                if let Some(attr) = key.strip_prefix(ATTR_PREFIX) {
                    start.push_attribute((attr, scalar_text(v).as_str()));
                }
            }
            let children: Vec<_> = map
                .iter()
                .filter(|(key, _)| !key.starts_with(ATTR_PREFIX) && key.as_str() != TEXT_KEY)
                .collect();
            let text = map.get(TEXT_KEY).map(scalar_text);

            if children.is_empty() && text.is_none() {
                return writer.write_event(Event::Empty(start)).map_err(|e| e.to_string());
            }

            writer.write_event(Event::Start(start)).map_err(|e| e.to_string())?;
            if let Some(text) = text {
                writer
                    .write_event(Event::Text(BytesText::new(&text)))
                    .map_err(|e| e.to_string())?;
            }
            for (key, child) in children {
                write_element(writer, key, child)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(|e| e.to_string())
        }
        Value::Null => writer
            .write_event(Event::Empty(BytesStart::new(name)))
            .map_err(|e| e.to_string()),
        scalar => {
            let text = scalar_text(scalar);
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(|e| e.to_string())?;
            writer
                .write_event(Event::Text(BytesText::new(&text)))
                .map_err(|e| e.to_string())?;
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(|e| e.to_string())
        }
    }
}

/// Serialize `{ root_name: ... }` back to an indented XML document
pub fn to_string(value: &Value) -> Result<String, String> {
    let root = match value {
        Value::Object(map) if map.len() == 1 => map.iter().next(),
        _ => None,
    };
    let (name, body) = root.ok_or("XML documents need exactly one root element")?;
    if body.is_array() {
        return Err("XML root element cannot repeat".to_string());
    }

    let mut writer = Writer::new_with_indent(Vec::new(), b'\t', 1);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(|e| e.to_string())?;
    write_element(&mut writer, name, body)?;

    let mut xml = String::from_utf8(writer.into_inner()).map_err(|e| e.to_string())?;
    xml.push('\n');
    Ok(xml)
}
