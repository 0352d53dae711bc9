//! Named simulator variables and their latest values.
//!
//! The store is a concurrent map of independently locked variables: a writer
//! updating one variable never blocks readers of another. Values are replaced
//! whole on every update, so readers see either the old or the new value.

use std::{
    fmt,
    sync::{
        Arc, OnceLock, PoisonError, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

mod poller;
pub use poller::VariablePoller;

/// Prefix of cockpit-internal variables; always writable by activations.
pub const INTERNAL_PREFIX: &str = "data:";
/// Prefix of variables exporting control state.
pub const STATE_PREFIX: &str = "state:";

/// The value of a variable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// A number (booleans are stored as 0/1)
    Number(f64),
    /// A string
    Text(String),
    /// An array of numbers
    Vector(Vec<f64>),
    /// Never set, or unknown
    #[default]
    Unset,
}

impl Value {
    /// Numeric view: numbers as is, numeric text parsed, everything else `None`
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(text) => text.trim().parse().ok(),
            Value::Vector(_) | Value::Unset => None,
        }
    }

    /// True for [`Value::Unset`]
    pub fn is_unset(&self) -> bool {
        matches!(self, Value::Unset)
    }

    /// Non-zero numbers and non-empty text are true
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0,
            Value::Text(text) => !text.is_empty(),
            Value::Vector(values) => !values.is_empty(),
            Value::Unset => false,
        }
    }

    fn rounded(self, digits: Option<i32>) -> Value {
        match (self, digits) {
            (Value::Number(n), Some(d)) => Value::Number(round_to(n, d)),
            (Value::Vector(values), Some(d)) => {
                Value::Vector(values.into_iter().map(|n| round_to(n, d)).collect())
            }
            (value, _) => value,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Number(if value { 1.0 } else { 0.0 })
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(text) => f.write_str(text),
            Value::Vector(values) => {
                let parts: Vec<String> = values.iter().map(|n| n.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Unset => f.write_str("---"),
        }
    }
}

/// Round `value` to `digits` decimal places; negative `digits` round to a power of ten.
///
/// ```rust
/// use cockpitdecks::variables::round_to;
/// assert_eq!(round_to(3.14159, 2), 3.14);
/// assert_eq!(round_to(123456.789, -4), 120000.0);
/// ```
pub fn round_to(value: f64, digits: i32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    if digits >= 0 {
        let factor = 10f64.powi(digits);
        (value * factor).round() / factor
    } else {
        let factor = 10f64.powi(-digits);
        (value / factor).round() * factor
    }
}

/// Where a variable lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariableKind {
    /// Read from the simulator
    Simulator,
    /// Owned by the cockpit (`data:` prefix)
    Internal,
    /// Control state export (`state:` prefix)
    State,
}

impl VariableKind {
    /// Classify a variable by its name prefix
    pub fn of(name: &str) -> Self {
        if name.starts_with(INTERNAL_PREFIX) {
            VariableKind::Internal
        } else if name.starts_with(STATE_PREFIX) {
            VariableKind::State
        } else {
            VariableKind::Simulator
        }
    }
}

/// Per-variable policy, usually supplied by the layout configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableSpec {
    /// Decimal places kept on update; negative rounds to powers of ten
    pub round_digits: Option<i32>,
    /// Cadence hint forwarded to the value source
    #[serde(with = "crate::config::opt_seconds")]
    pub fetch_period: Option<Duration>,
    /// Whether activations may write it
    pub writable: bool,
}

/// A variable and its latest committed value.
#[derive(Clone, Debug)]
pub struct Variable {
    /// Globally unique name
    pub name: String,
    /// Latest value
    pub value: Value,
    /// When the value source last delivered a value
    pub last_update: Option<Instant>,
    /// Rounding applied on update
    pub round_digits: Option<i32>,
    /// Fastest requested cadence
    pub fetch_period: Option<Duration>,
    /// Whether activations may write it
    pub writable: bool,
}

impl Variable {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: Value::Unset,
            last_update: None,
            round_digits: None,
            fetch_period: None,
            writable: VariableKind::of(name) == VariableKind::Internal,
        }
    }
}

/// Receives cadence hints for variables, typically the component polling the simulator.
pub trait FetchHintSink: Send + Sync {
    /// `name` should be fetched at least every `period`
    fn fetch_period(&self, name: &str, period: Duration);
}

/// Handle returned by [`VariableStore::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Concurrent variable registry.
#[derive(Default)]
pub struct VariableStore {
    variables: DashMap<String, Arc<RwLock<Variable>>>,
    listeners: DashMap<String, Vec<(SubscriptionId, Listener)>>,
    subscriptions: DashMap<SubscriptionId, String>,
    next_subscription: AtomicU64,
    hints: RwLock<Option<Weak<dyn FetchHintSink>>>,
}

impl fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VariableStore [{} variables]", self.variables.len())
    }
}

static GLOBAL_STORE: OnceLock<Arc<VariableStore>> = OnceLock::new();

/// Create the process-wide store, or return it if it already exists.
pub fn initialize() -> Arc<VariableStore> {
    GLOBAL_STORE
        .get_or_init(|| {
            debug!("Variable store initialized");
            Arc::new(VariableStore::new())
        })
        .clone()
}

/// The process-wide store, if [`initialize`] was called.
pub fn global() -> Option<Arc<VariableStore>> {
    GLOBAL_STORE.get().cloned()
}

impl VariableStore {
    /// An empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward future cadence hints to `sink` for as long as it is alive.
    ///
    /// Only a weak reference is kept: the store never keeps its sink alive.
    pub fn set_fetch_hint_sink(&self, sink: &Arc<dyn FetchHintSink>) {
        *self.hints.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(sink));
    }

    fn cell(&self, name: &str) -> Arc<RwLock<Variable>> {
        if let Some(cell) = self.variables.get(name) {
            return cell.clone();
        }
        self.variables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Variable::new(name))))
            .clone()
    }

    /// Make sure `name` exists without logging anything.
    pub fn reference(&self, name: &str) {
        let _ = self.cell(name);
    }

    /// Apply `spec` to `name`, creating it if needed.
    pub fn declare(&self, name: &str, spec: &VariableSpec) {
        let cell = self.cell(name);
        {
            let mut variable = cell.write().unwrap_or_else(PoisonError::into_inner);
            variable.round_digits = spec.round_digits;
            variable.writable = spec.writable || VariableKind::of(name) == VariableKind::Internal;
        }
        if let Some(period) = spec.fetch_period {
            self.request_fetch_period(name, period);
        }
    }

    /// Latest value of `name`.
    ///
    /// Never blocks on other variables. A name nobody declared, referenced or
    /// set is created on the spot, logged once, and reads as [`Value::Unset`].
    pub fn get(&self, name: &str) -> Value {
        if let Some(cell) = self.variables.get(name) {
            let cell = cell.clone();
            return cell
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .value
                .clone();
        }
        if let Entry::Vacant(vacant) = self.variables.entry(name.to_string()) {
            vacant.insert(Arc::new(RwLock::new(Variable::new(name))));
            warn!("Variable '{}' is not known, reading it as unset", name);
        }
        Value::Unset
    }

    /// Copy of the whole variable record
    pub fn snapshot(&self, name: &str) -> Option<Variable> {
        let cell = self.variables.get(name)?.clone();
        let variable = cell.read().unwrap_or_else(PoisonError::into_inner).clone();
        Some(variable)
    }

    /// Store a new value from the value source.
    ///
    /// The value is rounded first; listeners run only when the rounded value
    /// differs from the stored one. Returns whether it changed.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> bool {
        let cell = self.cell(name);
        let changed = {
            let mut variable = cell.write().unwrap_or_else(PoisonError::into_inner);
            let value = value.into().rounded(variable.round_digits);
            variable.last_update = Some(Instant::now());
            if variable.value == value {
                None
            } else {
                variable.value = value.clone();
                Some(value)
            }
        };

        match changed {
            Some(value) => {
                trace!("{} = {}", name, value);
                self.notify(name, &value);
                true
            }
            None => false,
        }
    }

    /// Store a value produced by an activation.
    ///
    /// Only writable variables accept it; others are left alone with a warning.
    pub fn write(&self, name: &str, value: impl Into<Value>) -> bool {
        let writable = self
            .cell(name)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .writable;
        if !writable {
            warn!("Variable '{}' is not writable", name);
            return false;
        }
        self.set(name, value);
        true
    }

    /// Ask for `name` to be fetched at least every `period`.
    ///
    /// The fastest request wins. The store only records and forwards it.
    pub fn request_fetch_period(&self, name: &str, period: Duration) {
        let cell = self.cell(name);
        let effective = {
            let mut variable = cell.write().unwrap_or_else(PoisonError::into_inner);
            let effective = variable.fetch_period.map_or(period, |p| p.min(period));
            variable.fetch_period = Some(effective);
            effective
        };
        let sink = self
            .hints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        if let Some(sink) = sink {
            sink.fetch_period(name, effective);
        }
    }

    /// Run `callback` after every change of `name`
    pub fn subscribe(
        &self,
        name: &str,
        callback: impl Fn(&str, &Value) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.reference(name);
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .entry(name.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        self.subscriptions.insert(id, name.to_string());
        id
    }

    /// Drop a subscription; unknown ids are ignored
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some((_, name)) = self.subscriptions.remove(&id)
            && let Some(mut listeners) = self.listeners.get_mut(&name)
        {
            listeners.retain(|(listener_id, _)| *listener_id != id);
        }
    }

    fn notify(&self, name: &str, value: &Value) {
        let listeners: Vec<Listener> = match self.listeners.get(name) {
            Some(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            None => return,
        };
        for listener in listeners {
            listener(name, value);
        }
    }

    /// Names of all known variables
    pub fn names(&self) -> Vec<String> {
        self.variables.iter().map(|e| e.key().clone()).collect()
    }

    /// Variables with a cadence hint, and the hint
    pub fn fetch_schedule(&self) -> Vec<(String, Duration)> {
        self.variables
            .iter()
            .filter_map(|entry| {
                let variable = entry.value().read().unwrap_or_else(PoisonError::into_inner);
                variable
                    .fetch_period
                    .map(|period| (entry.key().clone(), period))
            })
            .collect()
    }

    /// Number of known variables
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// True when no variable is known
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    #[test]
    fn unknown_variable_reads_unset_and_is_created() {
        let store = VariableStore::new();
        assert_eq!(store.get("sim/unknown"), Value::Unset);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("sim/unknown"), Value::Unset);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn rounding_applies_before_change_detection() {
        let store = VariableStore::new();
        store.declare(
            "sim/altitude",
            &VariableSpec {
                round_digits: Some(-2),
                ..Default::default()
            },
        );
        assert!(store.set("sim/altitude", 12345.0));
        assert_eq!(store.get("sim/altitude"), Value::Number(12300.0));
        assert!(!store.set("sim/altitude", 12320.0));
        assert!(store.set("sim/altitude", 12360.0));
        assert_eq!(store.get("sim/altitude"), Value::Number(12400.0));
    }

    #[test]
    fn negative_digits_round_to_powers_of_ten() {
        assert_eq!(round_to(123456.789, -4), 120000.0);
        assert_eq!(round_to(-155.0, -1), -160.0);
        assert_eq!(round_to(0.125, 0), 0.0);
    }

    #[test]
    fn listeners_fire_only_on_change() {
        let store = VariableStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = store.subscribe("sim/gear", move |name, value| {
            sink.lock().unwrap().push((name.to_string(), value.clone()));
        });

        store.set("sim/gear", 1.0);
        store.set("sim/gear", 1.0);
        store.set("sim/gear", 0.0);
        store.unsubscribe(id);
        store.set("sim/gear", 1.0);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], ("sim/gear".to_string(), Value::Number(0.0)));
    }

    #[test]
    fn vectors_are_rounded_element_wise() {
        let store = VariableStore::new();
        store.declare(
            "sim/engines/n1",
            &VariableSpec {
                round_digits: Some(1),
                ..Default::default()
            },
        );
        store.set("sim/engines/n1", Value::Vector(vec![87.34, 88.06]));
        assert_eq!(store.get("sim/engines/n1"), Value::Vector(vec![87.3, 88.1]));
    }

    #[test]
    fn only_writable_variables_accept_activation_writes() {
        let store = VariableStore::new();
        assert!(!store.write("sim/flaps", 1.0));
        assert_eq!(store.get("sim/flaps"), Value::Unset);
        assert!(store.write("data:page", 2.0));
        assert_eq!(store.get("data:page"), Value::Number(2.0));
    }

    #[test]
    fn fastest_fetch_period_wins_and_is_forwarded() {
        struct Hints(Mutex<Vec<(String, Duration)>>);
        impl FetchHintSink for Hints {
            fn fetch_period(&self, name: &str, period: Duration) {
                self.0.lock().unwrap().push((name.to_string(), period));
            }
        }

        let store = VariableStore::new();
        let hints = Arc::new(Hints(Mutex::new(Vec::new())));
        let sink: Arc<dyn FetchHintSink> = hints.clone();
        store.set_fetch_hint_sink(&sink);
        store.request_fetch_period("sim/qnh", Duration::from_secs(5));
        store.request_fetch_period("sim/qnh", Duration::from_secs(1));
        store.request_fetch_period("sim/qnh", Duration::from_secs(3));

        assert_eq!(
            store.fetch_schedule(),
            vec![("sim/qnh".to_string(), Duration::from_secs(1))]
        );
        let forwarded = hints.0.lock().unwrap();
        assert_eq!(forwarded.last().unwrap().1, Duration::from_secs(1));
    }

    #[test]
    fn variable_kind_from_prefix() {
        assert_eq!(VariableKind::of("data:mode"), VariableKind::Internal);
        assert_eq!(VariableKind::of("state:key1:count"), VariableKind::State);
        assert_eq!(VariableKind::of("sim/x"), VariableKind::Simulator);
    }

    proptest! {
        #[test]
        fn stored_values_keep_exactly_the_declared_digits(
            value in -1.0e6f64..1.0e6,
            digits in 0i32..6,
        ) {
            let store = VariableStore::new();
            store.declare("v", &VariableSpec { round_digits: Some(digits), ..Default::default() });
            store.set("v", value);
            let stored = store.get("v").as_number().unwrap();
            let scaled = stored * 10f64.powi(digits);
            prop_assert!((scaled - scaled.round()).abs() <= 1e-6 * scaled.abs().max(1.0));
            prop_assert!((stored - value).abs() <= 0.5 / 10f64.powi(digits) + 1e-9 * value.abs().max(1.0));
        }
    }
}
