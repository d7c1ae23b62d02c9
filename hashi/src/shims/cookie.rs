//! `document.cookie`.
//!
//! Cookies are kept per path. Reading returns root cookies overlaid with
//! those of every path that prefixes the frame's own path, most specific
//! last. Expiry is judged against the virtual clock, and expired cookies
//! are pruned whenever state is read for persistence or rehydrated.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::{parse_now, VirtualClock};
use crate::config::protocol::{EventKind, Namespace};
use crate::error::Result;
use crate::mediator::Mediator;
use crate::shim::{Shim, ShimCore};
use crate::window::{globals, ContentWindow};

const EVENTS: &[EventKind] = &[EventKind::StateUpdate, EventKind::Now];

pub const ROOT_PATH: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expiry {
    /// Cleared when the browsing session ends
    Session,
    At(DateTime<Utc>),
}

impl Expiry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            Expiry::Session => false,
            Expiry::At(at) => *at <= now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieEntry {
    pub value: String,
    pub expires: Expiry,
}

type Jar = BTreeMap<String, BTreeMap<String, CookieEntry>>;

/// What a `document.cookie = ...` assignment asks for.
#[derive(Debug, Clone, PartialEq)]
struct CookieAssignment {
    name: String,
    value: String,
    path: String,
    max_age: Option<i64>,
    expires: Option<DateTime<Utc>>,
}

fn parse_expires(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_assignment(cookie: &str) -> Option<CookieAssignment> {
    let mut parts = cookie.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut assignment = CookieAssignment {
        name: name.to_string(),
        value: value.trim().to_string(),
        path: ROOT_PATH.to_string(),
        max_age: None,
        expires: None,
    };
    for attribute in parts {
        let (key, val) = match attribute.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attribute.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "path" if !val.is_empty() => assignment.path = val.to_string(),
            "max-age" => assignment.max_age = val.parse().ok(),
            "expires" => assignment.expires = parse_expires(val),
            _ => {}
        }
    }
    Some(assignment)
}

/// Does cookie `path` apply to a document at `frame_path`?
fn path_matches(path: &str, frame_path: &str) -> bool {
    if path == ROOT_PATH || path == frame_path {
        return true;
    }
    frame_path.starts_with(path)
        && (path.ends_with('/') || frame_path[path.len()..].starts_with('/'))
}

/// Expiry `secs` seconds after `now`, capped at the end of year 9999.
fn expires_after(now: DateTime<Utc>, secs: i64) -> Expiry {
    let latest = NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|day| day.and_hms_opt(23, 59, 59))
        .map(|at| at.and_utc());
    let at = Duration::try_seconds(secs).and_then(|lifetime| now.checked_add_signed(lifetime));
    match (at, latest) {
        (Some(at), Some(latest)) => Expiry::At(at.min(latest)),
        (Some(at), None) => Expiry::At(at),
        (None, Some(latest)) => Expiry::At(latest),
        (None, None) => Expiry::Session,
    }
}

fn prune(jar: &mut Jar, now: DateTime<Utc>) {
    for cookies in jar.values_mut() {
        cookies.retain(|_, entry| !entry.expires.expired(now));
    }
    jar.retain(|_, cookies| !cookies.is_empty());
}

pub struct CookieShim {
    core: ShimCore,
    clock: Arc<VirtualClock>,
    frame_path: String,
    jar: RwLock<Jar>,
}

impl CookieShim {
    pub fn new(mediator: Arc<Mediator>, clock: Arc<VirtualClock>, frame_path: impl Into<String>) -> Self {
        Self {
            core: ShimCore::new(Namespace::Cookie, EVENTS, mediator),
            clock,
            frame_path: frame_path.into(),
            jar: RwLock::new(Jar::new()),
        }
    }

    pub fn clock(&self) -> &Arc<VirtualClock> {
        &self.clock
    }

    /// The `document.cookie` getter: `name=value` pairs joined by `; `.
    pub fn cookie(&self) -> String {
        let now = self.clock.now();
        let mut jar = self.jar.write().unwrap_or_else(|e| e.into_inner());
        prune(&mut jar, now);

        let mut paths: Vec<&String> = jar
            .keys()
            .filter(|path| path_matches(path, &self.frame_path))
            .collect();
        paths.sort_by_key(|path| path.len());

        let mut visible: BTreeMap<&str, &str> = BTreeMap::new();
        for path in paths {
            if let Some(cookies) = jar.get(path.as_str()) {
                for (name, entry) in cookies {
                    visible.insert(name, &entry.value);
                }
            }
        }
        visible
            .into_iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// The `document.cookie` setter.
    pub fn set_cookie(&self, cookie: &str) -> Result<()> {
        let Some(assignment) = parse_assignment(cookie) else {
            debug!("Ignoring malformed cookie assignment");
            return Ok(());
        };
        let now = self.clock.now();
        let expires = match (assignment.max_age, assignment.expires) {
            (Some(secs), _) if secs <= 0 => None,
            (Some(secs), _) => Some(expires_after(now, secs)),
            (None, Some(at)) if at <= now => None,
            (None, Some(at)) => Some(Expiry::At(at)),
            (None, None) => Some(Expiry::Session),
        };

        {
            let mut jar = self.jar.write().unwrap_or_else(|e| e.into_inner());
            match expires {
                Some(expires) => {
                    jar.entry(assignment.path)
                        .or_default()
                        .insert(
                            assignment.name,
                            CookieEntry {
                                value: assignment.value,
                                expires,
                            },
                        );
                }
                None => {
                    if let Some(cookies) = jar.get_mut(&assignment.path) {
                        cookies.remove(&assignment.name);
                    }
                    prune(&mut jar, now);
                }
            }
        }
        self.state_updated()
    }

    /// Take the host's clock from a `Now` message.
    pub fn handle_now(&self, data: &Value) -> Result<()> {
        match parse_now(data) {
            Some(now) => self.clock.sync_to(now),
            None => warn!("Now message without a usable time"),
        }
        Ok(())
    }
}

impl Shim for CookieShim {
    fn core(&self) -> &ShimCore {
        &self.core
    }

    fn data(&self) -> Value {
        let now = self.clock.now();
        let mut jar = self.jar.write().unwrap_or_else(|e| e.into_inner());
        prune(&mut jar, now);
        serde_json::to_value(&*jar).unwrap_or_default()
    }

    fn apply_data(&self, data: Value) {
        let mut jar: Jar = match serde_json::from_value(data) {
            Ok(jar) => jar,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable cookie state");
                Jar::new()
            }
        };
        prune(&mut jar, self.clock.now());
        *self.jar.write().unwrap_or_else(|e| e.into_inner()) = jar;
    }

    fn iframe_initialize(self: Arc<Self>, window: &ContentWindow) {
        window.install(globals::COOKIE, self);
    }
}
