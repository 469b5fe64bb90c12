//! Environment variable table
//!
//! Keys are declared by the plugin through `SET_VARIABLES` and overridden by
//! the host. Overrides outlive re-declarations, and may be set for keys the
//! plugin has not declared yet.

use std::ffi::{CString, c_char};

use hashbrown::HashMap;
use retrohost_shared::VariableInfo;

/// Parsed `"Description; opt1|opt2|..."` declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDescriptor {
    pub description: String,
    pub options: Vec<String>,
}

impl VariableDescriptor {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once("; ") {
            Some((description, options)) => Self {
                description: description.to_owned(),
                options: options.split('|').map(str::to_owned).collect(),
            },
            None => Self {
                description: String::new(),
                options: vec![raw.to_owned()],
            },
        }
    }

    /// The first listed option
    pub fn default_value(&self) -> &str {
        self.options.first().map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct Entry {
    descriptor: Option<VariableDescriptor>,
    value: Option<String>,
}

#[derive(Debug, Default)]
pub struct VariableTable {
    entries: HashMap<String, Entry>,
    /// Declaration order, for listing
    order: Vec<String>,
    /// Strings last handed to the plugin, kept alive until the next lookup
    /// of the same key
    handed_out: HashMap<String, CString>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare (or re-declare) a key. Later declarations win; an existing
    /// override is kept.
    pub fn declare(&mut self, key: &str, descriptor: VariableDescriptor) {
        let entry = self.entries.entry_ref(key).or_default();
        if entry.descriptor.is_none() {
            self.order.push(key.to_owned());
        }
        entry.descriptor = Some(descriptor);
    }

    /// Record an override. Returns `true` if the key is declared.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        let entry = self.entries.entry_ref(key).or_default();
        entry.value = Some(value.to_owned());
        entry.descriptor.is_some()
    }

    /// Current value of a declared key
    pub fn get(&self, key: &str) -> Option<&str> {
        let entry = self.entries.get(key)?;
        let descriptor = entry.descriptor.as_ref()?;
        Some(entry.value.as_deref().unwrap_or(descriptor.default_value()))
    }

    /// Current value as a C string owned by the table
    pub(crate) fn lookup_c(&mut self, key: &str) -> Option<*const c_char> {
        let value = CString::new(self.get(key)?).ok()?;
        self.handed_out.insert(key.to_owned(), value);
        self.handed_out.get(key).map(|v| v.as_ptr())
    }

    /// Declared keys with their descriptors and current values
    pub fn list(&self) -> Vec<VariableInfo> {
        self.order
            .iter()
            .filter_map(|key| {
                let entry = self.entries.get(key)?;
                let descriptor = entry.descriptor.as_ref()?;
                let default_value = descriptor.default_value().to_owned();
                Some(VariableInfo {
                    key: key.clone(),
                    description: descriptor.description.clone(),
                    options: descriptor.options.clone(),
                    value: entry.value.clone().unwrap_or_else(|| default_value.clone()),
                    default_value,
                })
            })
            .collect()
    }
}
