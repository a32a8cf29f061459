use std::{
    fmt,
    ops::Deref,
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        Arc,
    },
};

static GLOBAL_SERVICE_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Service identifier.
///
/// A simple, numeric identifier that uniquely identifies a managed service within the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Id(usize);

impl Id {
    pub(crate) fn new() -> Self {
        let id = GLOBAL_SERVICE_ID_COUNTER.fetch_add(1, Relaxed);
        Self(id)
    }

    /// Returns the identifier as a plain integer.
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Service name.
///
/// A human-readable name for a service that only contains alphanumeric characters, underscores, and periods.
///
/// Names are sanitized if they contain invalid characters, such as hyphens or spaces: runs of invalid characters are
/// replaced with a single underscore, and leading or trailing invalid characters are removed. Background tasks owned by
/// a service get a scoped name, such that a task named `flush` owned by `metrics_sink` is named `metrics_sink.flush`.
///
/// Not guaranteed to be unique.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Name(Arc<str>);

impl Name {
    pub(crate) fn root<N: AsRef<str>>(name: N) -> Option<Self> {
        get_sanitized_name(name.as_ref()).map(Self)
    }

    pub(crate) fn scoped<N: AsRef<str>>(parent: &Name, name: N) -> Option<Self> {
        let sanitized_name = get_sanitized_name(name.as_ref())?;
        let scoped_name = format!("{}.{}", parent.0, sanitized_name);
        Some(Self(scoped_name.into()))
    }

    pub(crate) fn unnamed() -> Self {
        Self(Arc::from("unnamed"))
    }
}

impl Deref for Name {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_name_segment_valid(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    // Names cannot start or end with anything other than alphanumeric characters.
    if !name.starts_with(|c: char| c.is_alphanumeric()) || !name.ends_with(|c: char| c.is_alphanumeric()) {
        return false;
    }

    // Periods are only used as separators between a service and its tasks, so a single segment can't contain them.
    name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn get_sanitized_name(name: &str) -> Option<Arc<str>> {
    if is_name_segment_valid(name) {
        return Some(name.into());
    }

    // Replace invalid characters with underscores, collapsing runs of them into a single one.
    let mut sanitized = String::with_capacity(name.len());
    let mut last_was_underscore = true;
    for c in name.chars() {
        if c.is_alphanumeric() {
            sanitized.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            sanitized.push('_');
            last_was_underscore = true;
        }
    }

    let trimmed = sanitized.trim_matches(|c: char| !c.is_alphanumeric());
    if trimmed.is_empty() {
        None
    } else {
        Some(Arc::from(trimmed))
    }
}
