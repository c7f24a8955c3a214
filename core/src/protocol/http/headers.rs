/*
 * headers.rs
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

//! Case-insensitive, insertion-ordered header list. Names keep the case they were given.

/// Header values whose contents never reach the logs.
const SENSITIVE: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-auth-token",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace every value of `name` with one value, keeping the first position.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.entries.iter().position(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(i) => {
                self.entries[i] = (name.clone(), value);
                let mut j = i + 1;
                while j < self.entries.len() {
                    if self.entries[j].0.eq_ignore_ascii_case(&name) {
                        self.entries.remove(j);
                    } else {
                        j += 1;
                    }
                }
            }
            None => self.entries.push((name, value)),
        }
        self
    }

    /// Set only if absent (how provider defaults are merged under caller headers).
    pub fn set_default(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        if !self.contains(&name) {
            self.entries.push((name, value.into()));
        }
        self
    }

    /// Append without replacing (multi-valued headers such as Set-Cookie).
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let mut removed = None;
        self.entries.retain(|(k, v)| {
            if k.eq_ignore_ascii_case(name) {
                if removed.is_none() {
                    removed = Some(v.clone());
                }
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy with sensitive values replaced, for logging.
    pub fn redacted(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| {
                if SENSITIVE.iter().any(|s| k.eq_ignore_ascii_case(s)) {
                    (k.clone(), "<redacted>".to_string())
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut h = Headers::new();
        for (k, v) in iter {
            h.append(k, v);
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut h = Headers::new();
        h.set("Content-Type", "application/json");
        assert_eq!(h.get("content-type"), Some("application/json"));
        assert!(h.contains("CONTENT-TYPE"));
    }

    #[test]
    fn set_replaces_all_values_in_place() {
        let mut h: Headers = [("A", "1"), ("b", "2"), ("a", "3")].into_iter().collect();
        h.set("a", "9");
        let all: Vec<_> = h.iter().collect();
        assert_eq!(all, vec![("a", "9"), ("b", "2")]);
    }

    #[test]
    fn set_default_does_not_override_caller() {
        let mut h = Headers::new();
        h.set("Accept", "text/plain");
        h.set_default("accept", "application/json");
        h.set_default("User-Agent", "x");
        assert_eq!(h.get("Accept"), Some("text/plain"));
        assert_eq!(h.get("user-agent"), Some("x"));
    }

    #[test]
    fn append_keeps_multiple_values() {
        let mut h = Headers::new();
        h.append("Set-Cookie", "a=1").append("set-cookie", "b=2");
        assert_eq!(h.get_all("SET-COOKIE").collect::<Vec<_>>(), vec!["a=1", "b=2"]);
        assert_eq!(h.remove("set-cookie").as_deref(), Some("a=1"));
        assert!(h.is_empty());
    }

    #[test]
    fn redaction_hides_credentials() {
        let h: Headers = [("Authorization", "Bearer t"), ("Accept", "*/*")].into_iter().collect();
        let r = h.redacted();
        assert_eq!(r[0].1, "<redacted>");
        assert_eq!(r[1].1, "*/*");
    }
}
