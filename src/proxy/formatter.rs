//! Entity formatting: shape a decoded response per the backend's field rules.
//!
//! Steps run in a fixed order: target extraction, allow (or deny) filtering,
//! field renaming, grouping.

use serde_json::{Map, Value};

use crate::config::BackendConfig;
use crate::proxy::Response;

#[derive(Debug, Clone, Default)]
pub struct EntityFormatter {
    target: Option<Vec<String>>,
    allow: Vec<Vec<String>>,
    deny: Vec<Vec<String>>,
    mapping: Vec<(String, String)>,
    group: Option<String>,
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl EntityFormatter {
    pub fn new(remote: &BackendConfig) -> Self {
        Self {
            target: remote
                .target
                .as_deref()
                .map(split_path)
                .filter(|p| !p.is_empty()),
            allow: remote.allow.iter().map(|p| split_path(p)).collect(),
            deny: remote.deny.iter().map(|p| split_path(p)).collect(),
            mapping: remote
                .mapping
                .iter()
                .map(|(from, to)| (from.clone(), to.clone()))
                .collect(),
            group: remote.group.clone().filter(|g| !g.is_empty()),
        }
    }

    pub fn format(&self, mut response: Response) -> Response {
        let mut data = std::mem::take(&mut response.data);

        if let Some(target) = &self.target {
            data = match get_path(&data, target) {
                Some(Value::Object(inner)) => inner.clone(),
                _ => Map::new(),
            };
        }

        if !self.allow.is_empty() {
            let mut kept = Map::new();
            for path in &self.allow {
                if let Some(value) = get_path(&data, path) {
                    insert_path(&mut kept, path, value.clone());
                }
            }
            data = kept;
        } else {
            for path in &self.deny {
                remove_path(&mut data, path);
            }
        }

        for (from, to) in &self.mapping {
            if let Some(value) = data.remove(from) {
                data.insert(to.clone(), value);
            }
        }

        if let Some(group) = &self.group {
            let mut grouped = Map::new();
            grouped.insert(group.clone(), Value::Object(data));
            data = grouped;
        }

        response.data = data;
        response
    }
}

fn get_path<'a>(data: &'a Map<String, Value>, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = data.get(first)?;
    for key in rest {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

fn insert_path(data: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = data;
    for key in parents {
        let entry = current
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.clone(), value);
}

fn remove_path(data: &mut Map<String, Value>, path: &[String]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = data;
    for key in parents {
        current = match current.get_mut(key) {
            Some(Value::Object(map)) => map,
            _ => return,
        };
    }
    current.remove(last);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: Value) -> Response {
        Response {
            data: value.as_object().cloned().unwrap(),
            is_complete: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_target_and_allow() {
        let remote = BackendConfig {
            target: Some("data.user".into()),
            allow: vec!["id".into(), "address.city".into()],
            ..Default::default()
        };
        let formatted = EntityFormatter::new(&remote).format(response(json!({
            "data": {"user": {"id": 1, "secret": "x", "address": {"city": "Oslo", "zip": "0150"}}}
        })));
        assert_eq!(
            Value::Object(formatted.data),
            json!({"id": 1, "address": {"city": "Oslo"}})
        );
        assert!(formatted.is_complete);
    }

    #[test]
    fn test_deny_mapping_group() {
        let remote = BackendConfig {
            deny: vec!["password".into(), "meta.internal".into()],
            mapping: [("name".to_string(), "full_name".to_string())].into(),
            group: Some("user".into()),
            ..Default::default()
        };
        let formatted = EntityFormatter::new(&remote).format(response(json!({
            "name": "Ada", "password": "p", "meta": {"internal": 1, "public": 2}
        })));
        assert_eq!(
            Value::Object(formatted.data),
            json!({"user": {"full_name": "Ada", "meta": {"public": 2}}})
        );
    }

    #[test]
    fn test_missing_target_yields_empty() {
        let remote = BackendConfig {
            target: Some("nope".into()),
            ..Default::default()
        };
        let formatted = EntityFormatter::new(&remote).format(response(json!({"a": 1})));
        assert!(formatted.data.is_empty());
    }
}
