/*
 * xml.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Switchyard, a uniform client for heterogeneous HTTP APIs.
 *
 * Switchyard is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Switchyard is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Switchyard.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Owned XML element tree for structured responses, read and written with quick_xml.

use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    /// Qualified name as written (may include a namespace prefix).
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Concatenated, trimmed character data directly inside this element.
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    /// Name without namespace prefix.
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First descendant (depth-first, self included) whose local name matches.
    pub fn find(&self, local_name: &str) -> Option<&XmlElement> {
        if self.local_name() == local_name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(local_name))
    }

    /// Text of the first matching descendant, if non-empty.
    pub fn find_text(&self, local_name: &str) -> Option<&str> {
        self.find(local_name)
            .map(|e| e.text.as_str())
            .filter(|t| !t.is_empty())
    }

    /// Parse a document with exactly one root element.
    pub fn parse(data: &[u8]) -> Result<XmlElement, String> {
        let mut reader = Reader::from_reader(data);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Eof) => break,
                Ok(Event::Start(e)) => {
                    if root.is_some() {
                        return Err("content after the root element".to_string());
                    }
                    stack.push(element_from_start(&e)?);
                }
                Ok(Event::Empty(e)) => {
                    if root.is_some() {
                        return Err("content after the root element".to_string());
                    }
                    let el = element_from_start(&e)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(el),
                        None => root = Some(el),
                    }
                }
                Ok(Event::End(e)) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| "unexpected closing tag".to_string())?;
                    if e.name().as_ref() != el.name.as_bytes() {
                        return Err(format!(
                            "mismatched closing tag </{}> for <{}>",
                            String::from_utf8_lossy(e.name().as_ref()),
                            el.name
                        ));
                    }
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(el),
                        None => root = Some(el),
                    }
                }
                Ok(Event::Text(e)) => {
                    let text = e.unescape().map_err(|e| e.to_string())?;
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    match stack.last_mut() {
                        Some(el) => el.text.push_str(text),
                        None => return Err("text outside the root element".to_string()),
                    }
                }
                Ok(Event::CData(e)) => {
                    let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    match stack.last_mut() {
                        Some(el) => el.text.push_str(&text),
                        None => return Err("CDATA outside the root element".to_string()),
                    }
                }
                Ok(_) => {}
                Err(e) => return Err(e.to_string()),
            }
            buf.clear();
        }
        if let Some(open) = stack.last() {
            return Err(format!("unclosed element <{}>", open.name));
        }
        root.ok_or_else(|| "document has no root element".to_string())
    }

    /// Serialize to a UTF-8 document (no declaration, no indentation).
    pub fn to_xml(&self) -> Vec<u8> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        // Writing into a Vec cannot fail.
        let _ = write_element(&mut writer, self);
        writer.into_inner().into_inner()
    }
}

fn element_from_start(e: &BytesStart<'_>) -> Result<XmlElement, String> {
    let mut el = XmlElement::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        el.attributes.push((
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            value.into_owned(),
        ));
    }
    Ok(el)
}

fn write_element(writer: &mut Writer<Cursor<Vec<u8>>>, el: &XmlElement) -> Result<(), String> {
    let mut start = BytesStart::new(el.name.as_str());
    for (k, v) in &el.attributes {
        start.push_attribute((k.as_str(), v.as_str()));
    }
    if el.text.is_empty() && el.children.is_empty() {
        writer
            .write_event(Event::Empty(start))
            .map_err(|e| e.to_string())?;
        return Ok(());
    }
    writer
        .write_event(Event::Start(start))
        .map_err(|e| e.to_string())?;
    if !el.text.is_empty() {
        writer
            .write_event(Event::Text(BytesText::new(el.text.as_str())))
            .map_err(|e| e.to_string())?;
    }
    for child in &el.children {
        write_element(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(el.name.as_str())))
        .map_err(|e| e.to_string())?;
    Ok(())
}
