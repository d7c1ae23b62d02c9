//! SCORM 1.2 runtime (`window.API`).
//!
//! The CMI data model is a JSON tree addressed by dot-separated paths.
//! Numeric segments index arrays, which are created on first write.
//! `._children` and `._count` are computed on read and cannot be written.

use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use tracing::debug;

use super::to_js_string;
use crate::config::protocol::{EventKind, Namespace};
use crate::error::Result;
use crate::mediator::Mediator;
use crate::shim::{Shim, ShimCore};
use crate::window::{globals, ContentWindow};

const EVENTS: &[EventKind] = &[EventKind::StateUpdate, EventKind::UserDataUpdate];

const CHILDREN: &str = "_children";
const COUNT: &str = "_count";

/// Highest array index a write may create.
const MAX_INDEX: usize = 4096;

/// SCORM string booleans.
pub const TRUE: &str = "true";
pub const FALSE: &str = "false";

/// `_children` lists, keyed by the parent path with array indices written
/// as `n`.
const CHILDREN_LISTS: &[(&str, &str)] = &[
    (
        "cmi.core",
        "student_id,student_name,lesson_location,credit,lesson_status,entry,score,total_time,lesson_mode,exit,session_time",
    ),
    ("cmi.core.score", "raw,min,max"),
    ("cmi.objectives", "id,score,status"),
    ("cmi.objectives.n.score", "raw,min,max"),
    (
        "cmi.student_data",
        "mastery_score,max_time_allowed,time_limit_action",
    ),
    ("cmi.student_preference", "audio,language,speed,text"),
    (
        "cmi.interactions",
        "id,objectives,time,type,correct_responses,weighting,student_response,result,latency",
    ),
];

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// The `_children` list for `parent`, if the data model defines one.
fn children_of(parent: &str) -> Option<&'static str> {
    let normalized = parent
        .split('.')
        .map(|s| if is_index(s) { "n" } else { s })
        .collect::<Vec<_>>()
        .join(".");
    CHILDREN_LISTS
        .iter()
        .find(|(path, _)| *path == normalized)
        .map(|(_, children)| *children)
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn child_slot<'a>(node: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match node {
        Value::Object(map) => Some(map.entry(segment.to_string()).or_insert(Value::Null)),
        Value::Array(items) => {
            let index: usize = segment.parse().ok().filter(|i| *i <= MAX_INDEX)?;
            if items.len() <= index {
                items.resize(index + 1, Value::Null);
            }
            items.get_mut(index)
        }
        _ => None,
    }
}

/// Write `value` at `path`, creating objects and arrays along the way.
fn assign(root: &mut Value, path: &str, value: Value) -> bool {
    let segments: Vec<&str> = path.split('.').collect();
    let mut node = root;
    for (i, segment) in segments.iter().enumerate() {
        let Some(slot) = child_slot(node, segment) else {
            return false;
        };
        match segments.get(i + 1) {
            None => {
                *slot = value;
                return true;
            }
            Some(next) => {
                if !(slot.is_object() || slot.is_array()) {
                    *slot = if is_index(next) {
                        Value::Array(Vec::new())
                    } else {
                        Value::Object(Map::new())
                    };
                }
                node = slot;
            }
        }
    }
    false
}

pub struct ScormShim {
    core: ShimCore,
    cmi: RwLock<Value>,
}

impl ScormShim {
    pub fn new(mediator: Arc<Mediator>) -> Self {
        Self {
            core: ShimCore::new(Namespace::Scorm, EVENTS, mediator),
            cmi: RwLock::new(Value::Object(Map::new())),
        }
    }

    #[allow(non_snake_case)]
    pub fn LMSInitialize(&self, _arg: &str) -> &'static str {
        TRUE
    }

    #[allow(non_snake_case)]
    pub fn LMSFinish(&self, _arg: &str) -> &'static str {
        TRUE
    }

    #[allow(non_snake_case)]
    pub fn LMSCommit(&self, _arg: &str) -> &'static str {
        TRUE
    }

    #[allow(non_snake_case)]
    pub fn LMSGetValue(&self, key: &str) -> String {
        self.get_value(key)
    }

    #[allow(non_snake_case)]
    pub fn LMSSetValue(&self, key: &str, value: &str) -> Result<&'static str> {
        self.set_value(key, value)
    }

    #[allow(non_snake_case)]
    pub fn LMSGetLastError(&self) -> u32 {
        0
    }

    #[allow(non_snake_case)]
    pub fn LMSGetErrorString(&self, _code: u32) -> &'static str {
        ""
    }

    #[allow(non_snake_case)]
    pub fn LMSGetDiagnostic(&self, _code: u32) -> &'static str {
        ""
    }

    /// Read a CMI element. Unset elements read as `""`.
    pub fn get_value(&self, key: &str) -> String {
        if let Some(parent) = key.strip_suffix(CHILDREN).and_then(|k| k.strip_suffix('.')) {
            return children_of(parent).unwrap_or_default().to_string();
        }

        let cmi = self.cmi.read().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = key.strip_suffix(COUNT).and_then(|k| k.strip_suffix('.')) {
            return match lookup(&cmi, parent) {
                Some(Value::Array(items)) => items.len().to_string(),
                None | Some(Value::Null) => "0".to_string(),
                Some(_) => String::new(),
            };
        }

        match lookup(&cmi, key) {
            None | Some(Value::Null) | Some(Value::Object(_)) | Some(Value::Array(_)) => {
                String::new()
            }
            Some(value) => to_js_string(value),
        }
    }

    /// Write a CMI element and push state to the host.
    pub fn set_value(&self, key: &str, value: &str) -> Result<&'static str> {
        let last = key.rsplit('.').next().unwrap_or_default();
        if last == CHILDREN || last == COUNT {
            debug!(key, "Refusing write to computed element");
            return Ok(FALSE);
        }
        let stored = {
            let mut cmi = self.cmi.write().unwrap_or_else(|e| e.into_inner());
            assign(&mut cmi, key, Value::String(value.to_string()))
        };
        if !stored {
            debug!(key, "Path runs through a scalar element");
            return Ok(FALSE);
        }
        self.state_updated()?;
        Ok(TRUE)
    }

    /// Seed learner identity from a `UserDataUpdate` message.
    pub fn handle_user_data(&self, data: &Value) -> Result<()> {
        let mut cmi = self.cmi.write().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = data.get("userId").and_then(Value::as_str) {
            assign(&mut cmi, "cmi.core.student_id", Value::String(id.to_string()));
        }
        if let Some(name) = data.get("userName").and_then(Value::as_str) {
            assign(&mut cmi, "cmi.core.student_name", Value::String(name.to_string()));
        }
        Ok(())
    }

    /// `1` once passed or completed, else the raw score as a fraction of the
    /// maximum, else `None`.
    pub fn progress(&self) -> Option<f64> {
        let status = self.get_value("cmi.core.lesson_status");
        if status == "passed" || status == "completed" {
            return Some(1.0);
        }
        let raw: f64 = self.get_value("cmi.core.score.raw").parse().ok()?;
        let max: f64 = self.get_value("cmi.core.score.max").parse().ok()?;
        if max <= 0.0 {
            return None;
        }
        Some((raw / max).clamp(0.0, 1.0))
    }
}

impl Shim for ScormShim {
    fn core(&self) -> &ShimCore {
        &self.core
    }

    fn data(&self) -> Value {
        self.cmi.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn apply_data(&self, data: Value) {
        let data = if data.is_object() {
            data
        } else {
            Value::Object(Map::new())
        };
        *self.cmi.write().unwrap_or_else(|e| e.into_inner()) = data;
    }

    fn iframe_initialize(self: Arc<Self>, window: &ContentWindow) {
        window.install(globals::SCORM_API, self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mediator::RecordingTransport;
    use serde_json::json;
    use std::time::Duration;

    fn scorm() -> (Arc<RecordingTransport>, ScormShim) {
        let transport = Arc::new(RecordingTransport::new());
        let mediator = Arc::new(Mediator::new(transport.clone(), Duration::from_secs(1)));
        (transport, ScormShim::new(mediator))
    }

    #[test]
    fn test_count_fields() {
        let (_, api) = scorm();
        assert_eq!(api.LMSGetValue("cmi.objectives._count"), "0");
        api.LMSSetValue("cmi.objectives.0.id", "a").unwrap();
        api.LMSSetValue("cmi.objectives.1.id", "b").unwrap();
        assert_eq!(api.LMSGetValue("cmi.objectives._count"), "2");
        assert_eq!(api.LMSGetValue("cmi.objectives.1.id"), "b");
        assert_eq!(
            api.data(),
            json!({"cmi": {"objectives": [{"id": "a"}, {"id": "b"}]}})
        );
    }

    #[test]
    fn test_children_are_fixed() {
        let (_, api) = scorm();
        let expected = "student_id,student_name,lesson_location,credit,lesson_status,entry,score,total_time,lesson_mode,exit,session_time";
        assert_eq!(api.LMSGetValue("cmi.core._children"), expected);
        api.LMSSetValue("cmi.core.lesson_status", "incomplete").unwrap();
        assert_eq!(api.LMSGetValue("cmi.core._children"), expected);
        assert_eq!(api.LMSGetValue("cmi.objectives.3.score._children"), "raw,min,max");
        assert_eq!(api.LMSSetValue("cmi.core._children", "x").unwrap(), FALSE);
    }

    #[test]
    fn test_unset_reads_empty() {
        let (_, api) = scorm();
        assert_eq!(api.LMSGetValue("cmi.core.lesson_location"), "");
        assert_eq!(api.LMSGetValue("cmi.core"), "");
        assert_eq!(api.LMSInitialize(""), "true");
        assert_eq!(api.LMSGetLastError(), 0);
        assert_eq!(api.LMSGetErrorString(0), "");
    }

    #[test]
    fn test_set_value_pushes_state() {
        let (transport, api) = scorm();
        assert_eq!(api.LMSSetValue("cmi.core.lesson_status", "completed").unwrap(), TRUE);
        assert_eq!(
            transport.last().unwrap()["data"],
            json!({"cmi": {"core": {"lesson_status": "completed"}}})
        );
    }

    #[test]
    fn test_user_data_and_progress() {
        let (_, api) = scorm();
        api.handle_user_data(&json!({"userId": "u1", "userName": "Ada"}))
            .unwrap();
        assert_eq!(api.LMSGetValue("cmi.core.student_name"), "Ada");
        assert_eq!(api.progress(), None);

        api.LMSSetValue("cmi.core.score.raw", "30").unwrap();
        api.LMSSetValue("cmi.core.score.max", "40").unwrap();
        assert_eq!(api.progress(), Some(0.75));

        api.LMSSetValue("cmi.core.lesson_status", "passed").unwrap();
        assert_eq!(api.progress(), Some(1.0));
    }
}
